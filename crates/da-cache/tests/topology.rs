use std::fs;
use std::sync::Arc;
use std::time::Duration;

use da_cache::{
    namespace_names, CacheError, CacheSettings, CacheTopology, ManualClock, NamespaceKind, StoreOptions,
};
use da_model::DigestAlgorithm;
use tempfile::TempDir;

fn settings(algorithms: &[DigestAlgorithm]) -> CacheSettings {
    CacheSettings {
        algorithms: algorithms.to_vec(),
        store: StoreOptions {
            lifespan: Some(Duration::from_secs(3600)),
            max_idle: Some(Duration::from_secs(3600)),
            segments: 8,
        },
        lock_timeout: Duration::from_millis(200),
    }
}

#[test]
fn namespace_count_follows_algorithm_set() {
    let sets: [&[DigestAlgorithm]; 4] = [
        &[],
        &[DigestAlgorithm::Md5],
        &[DigestAlgorithm::Md5, DigestAlgorithm::Sha256],
        &DigestAlgorithm::ALL,
    ];

    for algorithms in sets {
        let temp = TempDir::new().unwrap();
        let topology = CacheTopology::new();
        let handle = topology.ensure(temp.path(), &settings(algorithms)).unwrap();

        assert_eq!(handle.namespace_count(), 4 * algorithms.len() + 2);
        for name in namespace_names(algorithms) {
            assert!(temp.path().join(&name).is_dir(), "missing directory for {name}");
            handle.namespace_by_name(&name).unwrap();
        }
        handle.close().unwrap();
    }
}

#[test]
fn ensure_returns_same_instance_while_open() {
    let temp = TempDir::new().unwrap();
    let topology = CacheTopology::new();

    let first = topology.ensure(temp.path(), &settings(&DigestAlgorithm::ALL)).unwrap();
    let second = topology.ensure(temp.path(), &settings(&DigestAlgorithm::ALL)).unwrap();

    assert!(first.same_as(&second));
    assert_eq!(first.name(), second.name());
    assert!(topology.current().unwrap().same_as(&first));
}

#[test]
fn ensure_reopens_after_close() {
    let temp = TempDir::new().unwrap();
    let topology = CacheTopology::new();

    let first = topology.ensure(temp.path(), &settings(&[DigestAlgorithm::Md5])).unwrap();
    assert!(topology.close().unwrap());
    assert!(first.is_closed());
    assert!(topology.current().is_none());

    let second = topology.ensure(temp.path(), &settings(&[DigestAlgorithm::Md5])).unwrap();
    assert!(!second.same_as(&first));
    assert!(!second.is_closed());
}

#[test]
fn ensure_rejects_other_root_while_open() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    let topology = CacheTopology::new();

    topology.ensure(a.path(), &settings(&[])).unwrap();
    let err = topology.ensure(b.path(), &settings(&[])).unwrap_err();
    assert!(matches!(err, CacheError::RootMismatch { .. }));
    assert!(err.is_configuration());
}

#[test]
fn ensure_creates_missing_root() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("nested").join("cache");
    let topology = CacheTopology::new();

    topology.ensure(&root, &settings(&[DigestAlgorithm::Sha1])).unwrap();
    assert!(root.join("files-sha1").is_dir());
}

#[test]
fn root_that_is_a_file_is_a_configuration_error() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("not-a-dir");
    fs::write(&root, b"x").unwrap();

    let err = CacheTopology::new().ensure(&root, &settings(&[])).unwrap_err();
    assert!(matches!(err, CacheError::Configuration { .. }), "{err:?}");
}

#[test]
fn entries_persist_across_close_and_reopen() {
    let temp = TempDir::new().unwrap();
    let topology = CacheTopology::new();

    let handle = topology.ensure(temp.path(), &settings(&[DigestAlgorithm::Md5])).unwrap();
    let files = handle.namespace(NamespaceKind::Files(DigestAlgorithm::Md5)).unwrap();
    files.put("dist/lib.jar", &"d41d8cd98f00b204e9800998ecf8427e").unwrap();
    drop(files);
    topology.close().unwrap();

    let handle = topology.ensure(temp.path(), &settings(&[DigestAlgorithm::Md5])).unwrap();
    let files = handle.namespace(NamespaceKind::Files(DigestAlgorithm::Md5)).unwrap();
    assert_eq!(
        files.get::<String>("dist/lib.jar").unwrap().as_deref(),
        Some("d41d8cd98f00b204e9800998ecf8427e")
    );
    assert_eq!(handle.stats()["files-md5"], 1);
}

#[test]
fn expired_entries_are_not_restored() {
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::default());
    let topology = CacheTopology::with_clock(clock.clone());

    let handle = topology.ensure(temp.path(), &settings(&[])).unwrap();
    handle.namespace(NamespaceKind::Builds).unwrap().put("42", &"build").unwrap();
    topology.close().unwrap();

    clock.advance(chrono::Duration::hours(2));
    let handle = topology.ensure(temp.path(), &settings(&[])).unwrap();
    assert!(handle.namespace(NamespaceKind::Builds).unwrap().is_empty());
}

#[test]
fn closed_handle_refuses_namespace_access() {
    let temp = TempDir::new().unwrap();
    let topology = CacheTopology::new();
    let handle = topology.ensure(temp.path(), &settings(&[])).unwrap();

    handle.close().unwrap();
    handle.close().unwrap();
    assert!(matches!(
        handle.namespace(NamespaceKind::Builds),
        Err(CacheError::Closed(_))
    ));
}

#[test]
fn second_topology_cannot_share_root() {
    let temp = TempDir::new().unwrap();
    let first = CacheTopology::new();
    let _held = first.ensure(temp.path(), &settings(&[])).unwrap();

    let err = CacheTopology::new().ensure(temp.path(), &settings(&[])).unwrap_err();
    assert!(matches!(err, CacheError::Lock(_)), "{err:?}");

    first.close().unwrap();
    CacheTopology::new().ensure(temp.path(), &settings(&[])).unwrap();
}

#[test]
fn unknown_namespace_is_reported() {
    let temp = TempDir::new().unwrap();
    let handle = CacheTopology::new().ensure(temp.path(), &settings(&[DigestAlgorithm::Md5])).unwrap();

    assert!(matches!(
        handle.namespace(NamespaceKind::Rpms(DigestAlgorithm::Sha256)),
        Err(CacheError::UnknownNamespace(name)) if name == "rpms-sha256"
    ));
}

#[test]
fn manager_stays_open_until_last_lease_is_released() {
    let temp = TempDir::new().unwrap();
    let topology = Arc::new(CacheTopology::new());

    let first = topology.acquire(temp.path(), &settings(&[DigestAlgorithm::Md5])).unwrap();
    let second = topology.acquire(temp.path(), &settings(&[DigestAlgorithm::Md5])).unwrap();
    assert!(first.handle().same_as(second.handle()));
    assert_eq!(topology.leases(), 2);

    assert!(!second.release().unwrap());
    let builds = first.handle().namespace(NamespaceKind::Builds).unwrap();
    builds.put("koji-42", &"org.example-core-1.0-1").unwrap();
    assert!(!first.handle().is_closed());

    let handle = first.handle().clone();
    assert!(first.release().unwrap());
    assert!(handle.is_closed());
    assert!(topology.current().is_none());
    assert_eq!(topology.leases(), 0);
}

#[test]
fn dropped_lease_is_released() {
    let temp = TempDir::new().unwrap();
    let topology = Arc::new(CacheTopology::new());

    let handle = {
        let lease = topology.acquire(temp.path(), &settings(&[])).unwrap();
        lease.handle().clone()
    };
    assert!(handle.is_closed());
    assert!(topology.current().is_none());
}

#[test]
fn stale_lease_does_not_close_reopened_manager() {
    let temp = TempDir::new().unwrap();
    let topology = Arc::new(CacheTopology::new());

    let stale = topology.acquire(temp.path(), &settings(&[])).unwrap();
    assert!(topology.close().unwrap());

    let fresh = topology.acquire(temp.path(), &settings(&[])).unwrap();
    assert!(!stale.release().unwrap());
    assert!(!fresh.handle().is_closed());
    assert!(fresh.release().unwrap());
}

#[test]
fn very_long_lifespan_never_expires() {
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::default());
    let topology = CacheTopology::with_clock(clock.clone());
    let long = Duration::from_millis(10_000_000_000_000_000);
    let settings = CacheSettings {
        store: StoreOptions {
            lifespan: Some(long),
            max_idle: Some(long),
            segments: 4,
        },
        ..settings(&[])
    };

    let handle = topology.ensure(temp.path(), &settings).unwrap();
    let builds = handle.namespace(NamespaceKind::Builds).unwrap();
    builds.put("k", &1u32).unwrap();
    clock.advance(chrono::Duration::days(365 * 1000));

    assert_eq!(builds.get::<u32>("k").unwrap(), Some(1));
    assert!(builds.contains_key("k").unwrap());
    assert_eq!(builds.len(), 1);
    topology.close().unwrap();

    let handle = topology.ensure(temp.path(), &settings).unwrap();
    assert_eq!(handle.namespace(NamespaceKind::Builds).unwrap().len(), 1);
}
