//! Cache manager lifecycle and namespace layout.
//!
//! A [`CacheTopology`] owns at most one open [`CacheManager`] at a time.
//! `ensure` is idempotent for the root that is already open and reopens
//! the store after it has been closed. Concurrent users share the manager
//! through leases.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use da_model::DigestAlgorithm;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{CacheError, CacheResult};
use crate::lock::StoreLock;
use crate::namespace::{Namespace, StoreOptions};
use crate::{BRAND_NAME, VERSION};

/// The role a namespace plays in an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    /// Local file name to checksum.
    Files(DigestAlgorithm),
    /// Koji checksum lookups.
    Checksums(DigestAlgorithm),
    /// Remote build system checksum lookups.
    RemoteChecksums(DigestAlgorithm),
    Rpms(DigestAlgorithm),
    Builds,
    RemoteBuilds,
}

impl NamespaceKind {
    pub fn name(&self) -> String {
        match self {
            Self::Files(a) => format!("files-{}", a),
            Self::Checksums(a) => format!("checksums-{}", a),
            Self::RemoteChecksums(a) => format!("checksums-remote-{}", a),
            Self::Rpms(a) => format!("rpms-{}", a),
            Self::Builds => "builds".to_string(),
            Self::RemoteBuilds => "builds-remote".to_string(),
        }
    }

    /// Every namespace required for `algorithms`, duplicates removed.
    pub fn for_algorithms(algorithms: &[DigestAlgorithm]) -> Vec<NamespaceKind> {
        let mut seen = Vec::new();
        for algorithm in algorithms {
            if !seen.contains(algorithm) {
                seen.push(*algorithm);
            }
        }

        let mut kinds = Vec::with_capacity(seen.len() * 4 + 2);
        for algorithm in seen {
            kinds.push(Self::Files(algorithm));
            kinds.push(Self::Checksums(algorithm));
            kinds.push(Self::RemoteChecksums(algorithm));
            kinds.push(Self::Rpms(algorithm));
        }
        kinds.push(Self::Builds);
        kinds.push(Self::RemoteBuilds);
        kinds
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Names of every namespace required for `algorithms`.
pub fn namespace_names(algorithms: &[DigestAlgorithm]) -> Vec<String> {
    NamespaceKind::for_algorithms(algorithms)
        .iter()
        .map(NamespaceKind::name)
        .collect()
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub algorithms: Vec<DigestAlgorithm>,
    pub store: StoreOptions,
    /// How long to wait for another owner to release the root.
    pub lock_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            algorithms: DigestAlgorithm::ALL.to_vec(),
            store: StoreOptions::default(),
            lock_timeout: Duration::from_secs(10),
        }
    }
}

/// An open store rooted at one directory.
pub struct CacheManager {
    id: Uuid,
    root: PathBuf,
    namespaces: BTreeMap<String, Arc<Namespace>>,
    lock: Mutex<Option<StoreLock>>,
    closed: AtomicBool,
}

impl CacheManager {
    fn open(root: PathBuf, settings: &CacheSettings, clock: Arc<dyn Clock>) -> CacheResult<Self> {
        let lock = StoreLock::acquire(&root, settings.lock_timeout)?;

        let mut namespaces = BTreeMap::new();
        for kind in NamespaceKind::for_algorithms(&settings.algorithms) {
            let name = kind.name();
            let namespace = Namespace::open(&root, &name, settings.store, clock.clone())?;
            namespaces.insert(name, Arc::new(namespace));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            root,
            namespaces,
            lock: Mutex::new(Some(lock)),
            closed: AtomicBool::new(false),
        })
    }

    /// Identity of this instance, stable for its lifetime.
    pub fn name(&self) -> String {
        format!("{} {} ({})", BRAND_NAME, VERSION, self.id)
    }

    pub fn instance_id(&self) -> Uuid {
        self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn namespace(&self, kind: NamespaceKind) -> CacheResult<Arc<Namespace>> {
        self.namespace_by_name(&kind.name())
    }

    pub fn namespace_by_name(&self, name: &str) -> CacheResult<Arc<Namespace>> {
        if self.is_closed() {
            return Err(CacheError::Closed(self.name()));
        }
        self.namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::UnknownNamespace(name.to_string()))
    }

    pub fn namespace_names(&self) -> Vec<&str> {
        self.namespaces.keys().map(String::as_str).collect()
    }

    pub fn namespace_count(&self) -> usize {
        self.namespaces.len()
    }

    /// Live entry count per namespace.
    pub fn stats(&self) -> BTreeMap<String, usize> {
        self.namespaces
            .iter()
            .map(|(name, namespace)| (name.clone(), namespace.len()))
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Flush every namespace and release the root lock.
    ///
    /// Every namespace is closed even if an earlier one fails; the first
    /// failure is returned. Closing twice is a no-op.
    pub fn close(&self) -> CacheResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut first_error = None;
        for namespace in self.namespaces.values() {
            if let Err(e) = namespace.close() {
                warn!("Failed to close cache namespace {}: {}", namespace.name(), e);
                first_error.get_or_insert(e);
            }
        }

        drop(self.lock_guard().take());
        info!("Closed cache {}", self.name());

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn lock_guard(&self) -> MutexGuard<'_, Option<StoreLock>> {
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("namespaces", &self.namespaces.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Error closing cache on drop: {}", e);
        }
    }
}

/// Shared handle to an open [`CacheManager`].
#[derive(Debug, Clone)]
pub struct CacheHandle(Arc<CacheManager>);

impl CacheHandle {
    /// Whether both handles refer to the same manager instance.
    pub fn same_as(&self, other: &CacheHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for CacheHandle {
    type Target = CacheManager;

    fn deref(&self) -> &CacheManager {
        &self.0
    }
}

/// Creates the cache manager on demand and hands out the open instance.
///
/// Runs hold the manager through a [`CacheLease`]; the manager is closed
/// when the last lease is released.
pub struct CacheTopology {
    clock: Arc<dyn Clock>,
    state: Mutex<TopologyState>,
}

#[derive(Debug, Default)]
struct TopologyState {
    current: Option<CacheHandle>,
    /// Outstanding leases on `current`.
    leases: usize,
}

impl Default for CacheTopology {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CacheTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state_guard();
        f.debug_struct("CacheTopology")
            .field("current", &state.current)
            .field("leases", &state.leases)
            .finish()
    }
}

impl CacheTopology {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(TopologyState::default()),
        }
    }

    /// Return the open manager for `root`, opening one if needed.
    ///
    /// Fails with a configuration error if `root` cannot be created or is
    /// not a readable and writable directory, and with
    /// [`CacheError::RootMismatch`] if a different root is still open.
    pub fn ensure(&self, root: &Path, settings: &CacheSettings) -> CacheResult<CacheHandle> {
        let mut state = self.state_guard();
        self.ensure_locked(&mut state, root, settings)
    }

    /// Like [`CacheTopology::ensure`], but the manager stays open until the
    /// returned lease and every other outstanding lease are released.
    pub fn acquire(self: &Arc<Self>, root: &Path, settings: &CacheSettings) -> CacheResult<CacheLease> {
        let mut state = self.state_guard();
        let handle = self.ensure_locked(&mut state, root, settings)?;
        state.leases += 1;
        debug!("Leased cache {} ({} leases)", handle.name(), state.leases);

        Ok(CacheLease {
            topology: Arc::clone(self),
            handle,
            released: false,
        })
    }

    /// Outstanding leases on the open manager.
    pub fn leases(&self) -> usize {
        self.state_guard().leases
    }

    /// The currently open manager, if any.
    pub fn current(&self) -> Option<CacheHandle> {
        self.state_guard().current.as_ref().filter(|h| !h.is_closed()).cloned()
    }

    /// Close the current manager regardless of leases. Returns whether one
    /// was open.
    pub fn close(&self) -> CacheResult<bool> {
        let mut state = self.state_guard();
        state.leases = 0;
        match state.current.take() {
            Some(handle) if !handle.is_closed() => handle.close().map(|_| true),
            _ => Ok(false),
        }
    }

    fn ensure_locked(
        &self,
        state: &mut TopologyState,
        root: &Path,
        settings: &CacheSettings,
    ) -> CacheResult<CacheHandle> {
        if let Some(handle) = state.current.as_ref().filter(|h| !h.is_closed()) {
            let requested = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
            if handle.root() == requested.as_path() {
                debug!("Reusing cache {}", handle.name());
                return Ok(handle.clone());
            }
            return Err(CacheError::RootMismatch {
                open: handle.root().to_path_buf(),
                requested,
            });
        }

        let root = prepare_root(root)?;
        let manager = CacheManager::open(root, settings, self.clock.clone())?;
        info!(
            "Opened cache {} at {} with {} namespaces",
            manager.name(),
            manager.root().display(),
            manager.namespace_count()
        );

        let handle = CacheHandle(Arc::new(manager));
        state.current = Some(handle.clone());
        // Leases on a manager closed behind their back no longer count.
        state.leases = 0;
        Ok(handle)
    }

    /// Returns whether releasing `handle` closed the manager.
    fn release(&self, handle: &CacheHandle) -> CacheResult<bool> {
        let mut state = self.state_guard();
        if !state.current.as_ref().is_some_and(|current| current.same_as(handle)) {
            return Ok(false);
        }

        state.leases = state.leases.saturating_sub(1);
        if state.leases > 0 {
            debug!("Released lease on cache {} ({} left)", handle.name(), state.leases);
            return Ok(false);
        }
        match state.current.take() {
            Some(current) => current.close().map(|_| true),
            None => Ok(false),
        }
    }

    fn state_guard(&self) -> MutexGuard<'_, TopologyState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One user's hold on the open cache manager.
///
/// Dropping an unreleased lease releases it and logs any close error.
#[derive(Debug)]
pub struct CacheLease {
    topology: Arc<CacheTopology>,
    handle: CacheHandle,
    released: bool,
}

impl CacheLease {
    pub fn handle(&self) -> &CacheHandle {
        &self.handle
    }

    /// Give the lease back. Returns whether this was the last lease and
    /// the manager was closed.
    pub fn release(mut self) -> CacheResult<bool> {
        self.released = true;
        self.topology.release(&self.handle)
    }
}

impl Drop for CacheLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.topology.release(&self.handle) {
            warn!("Error closing cache {}: {}", self.handle.name(), e);
        }
    }
}

fn prepare_root(root: &Path) -> CacheResult<PathBuf> {
    if !root.exists() {
        info!("Creating cache root {}", root.display());
        fs::create_dir_all(root)
            .map_err(|e| CacheError::configuration(root, format!("cannot create directory: {}", e)))?;
    }

    let metadata = fs::metadata(root)
        .map_err(|e| CacheError::configuration(root, format!("cannot stat: {}", e)))?;
    if !metadata.is_dir() {
        return Err(CacheError::configuration(root, "not a directory"));
    }
    if !is_readable(root) {
        return Err(CacheError::configuration(root, "directory is not readable"));
    }
    if !is_writable(root, &metadata) {
        return Err(CacheError::configuration(root, "directory is not writable"));
    }

    fs::canonicalize(root).map_err(|e| CacheError::configuration(root, format!("cannot resolve: {}", e)))
}

#[cfg(unix)]
fn access(path: &Path, mode: libc::c_int) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    match CString::new(path.as_os_str().as_bytes()) {
        Ok(c_path) => unsafe { libc::access(c_path.as_ptr(), mode) == 0 },
        Err(_) => false,
    }
}

#[cfg(unix)]
fn is_readable(path: &Path) -> bool {
    access(path, libc::R_OK | libc::X_OK)
}

#[cfg(unix)]
fn is_writable(path: &Path, _metadata: &fs::Metadata) -> bool {
    access(path, libc::W_OK)
}

#[cfg(not(unix))]
fn is_readable(path: &Path) -> bool {
    fs::read_dir(path).is_ok()
}

#[cfg(not(unix))]
fn is_writable(_path: &Path, metadata: &fs::Metadata) -> bool {
    !metadata.permissions().readonly()
}
