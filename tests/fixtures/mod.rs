//! Fake collaborators for pipeline tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use da_cache::{CacheHandle, NamespaceKind};
use da_model::{
    ArchiveInfo, BuildDescriptor, BuildInfo, BuildSystemKey, BuildSystem, Checksum, ChecksumMap, DigestAlgorithm,
    LocalArchive, RawBuildMap,
};
use deliverables_analyzer::{
    AnalyzerConfig, Backend, BuildSystemSession, ChecksumEntry, EffectiveConfig, Endpoint, FingerprintContext,
    Fingerprinter, MatchContext, Matcher, Phase, ProgressEvent, ProgressListener, Sessions, StreamItem, TaskResult,
};
use serde_json::{json, Value};

pub const KOJI_HUB: &str = "https://koji.hub.example.com/kojihub";
pub const PNC: &str = "https://pnc.example.com";
pub const LOCATION: &str = "https://download.example.com/dist-1.0.zip";

/// What a fake task does once it has done its normal work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Fail,
    Panic,
    /// Block until the interrupt is raised.
    Hang,
}

pub fn config(root: &Path, overrides: Value) -> AnalyzerConfig {
    let base = json!({
        "output_parent": root.join("out"),
        "cache_root": root.join("cache"),
        "koji_hub_url": KOJI_HUB,
        "checksum_types": ["md5", "sha256"],
    });
    let cli = deliverables_analyzer::config::deep_merge(base, overrides);
    EffectiveConfig::build(None, None, Some(cli)).unwrap().into_analyzer()
}

pub fn sample_files() -> Vec<ChecksumEntry> {
    vec![
        ChecksumEntry::new(DigestAlgorithm::Md5, "11111111111111111111111111111111", "dist.zip!/lib/core.jar"),
        ChecksumEntry::new(DigestAlgorithm::Md5, "22222222222222222222222222222222", "dist.zip!/lib/other.jar"),
        ChecksumEntry::new(DigestAlgorithm::Sha256, "a".repeat(64), "dist.zip!/lib/core.jar"),
    ]
}

pub fn sample_builds() -> RawBuildMap {
    let mut raw = RawBuildMap::new();
    raw.insert(
        BuildSystemKey::Attributed {
            system: BuildSystem::Koji,
            id: 42,
        },
        BuildDescriptor {
            build_info: BuildInfo {
                id: 42,
                nvr: "org.example-core-1.0-1".into(),
            },
            source: Some("git+https://scm.example.org/core.git#v1.0".into()),
            import: false,
            archives: vec![LocalArchive {
                archive: Some(ArchiveInfo {
                    archive_id: 7,
                    build_type: Some("maven".into()),
                    group_id: Some("org.example".into()),
                    artifact_id: "core".into(),
                    version: "1.0".into(),
                    extension: Some("jar".into()),
                    classifier: None,
                }),
                checksums: vec![Checksum::new(DigestAlgorithm::Md5, "11111111111111111111111111111111")],
                filenames: ["dist.zip!/lib/core.jar".to_string()].into_iter().collect(),
                unmatched_filenames: Default::default(),
                built_from_source: true,
            }],
        },
    )
    .unwrap();
    raw.insert(
        BuildSystemKey::Unattributed,
        BuildDescriptor {
            archives: vec![LocalArchive {
                checksums: vec![Checksum::new(DigestAlgorithm::Md5, "22222222222222222222222222222222")],
                filenames: ["dist.zip!/lib/other.jar".to_string()].into_iter().collect(),
                ..Default::default()
            }],
            ..Default::default()
        },
    )
    .unwrap();
    raw
}

/// Shared record of what the fakes saw.
#[derive(Default)]
pub struct Observed {
    pub opened: Mutex<Vec<Endpoint>>,
    pub released: AtomicUsize,
    pub streamed: Mutex<Vec<ChecksumEntry>>,
    /// Set when the matcher saw every entry before fingerprinting returned.
    pub overlapped: AtomicBool,
    pub output_dirs: Mutex<Vec<PathBuf>>,
    pub fingerprint_cache: Mutex<Option<bool>>,
    pub matcher_cache: Mutex<Option<bool>>,
    pub matcher_sessions: AtomicUsize,
}

pub struct FakeBackend {
    pub files: Vec<ChecksumEntry>,
    pub builds: RawBuildMap,
    pub fingerprint: Behavior,
    pub matcher: Behavior,
    pub fail_sessions: bool,
    /// Fingerprinting waits for the matcher to consume every entry.
    pub require_overlap: bool,
    pub observed: Arc<Observed>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            files: sample_files(),
            builds: sample_builds(),
            fingerprint: Behavior::Succeed,
            matcher: Behavior::Succeed,
            fail_sessions: false,
            require_overlap: false,
            observed: Arc::new(Observed::default()),
        }
    }
}

struct FakeSession {
    endpoint: Endpoint,
    observed: Arc<Observed>,
}

impl BuildSystemSession for FakeSession {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn release(&self) -> TaskResult<()> {
        self.observed.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeFingerprinter {
    files: Vec<ChecksumEntry>,
    behavior: Behavior,
    require_overlap: bool,
    observed: Arc<Observed>,
}

impl Fingerprinter for FakeFingerprinter {
    fn fingerprint(self: Box<Self>, ctx: FingerprintContext) -> TaskResult<ChecksumMap> {
        self.observed.output_dirs.lock().unwrap().push(ctx.output_dir.clone());
        fs::write(ctx.output_dir.join("scratch.bin"), b"scratch")?;

        ctx.progress.on_event(&ProgressEvent::Started {
            phase: Phase::Fingerprint,
            total: self.files.len() as u64,
        });

        let mut map = ChecksumMap::new();
        for (done, entry) in self.files.iter().enumerate() {
            map.entry(entry.algorithm)
                .or_default()
                .entry(entry.value.clone())
                .or_default()
                .insert(entry.filename.clone());
            ctx.sink.publish(entry.clone());
            ctx.progress.on_event(&ProgressEvent::Advanced {
                phase: Phase::Fingerprint,
                done: done as u64 + 1,
            });
        }

        if self.require_overlap {
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                if self.observed.streamed.lock().unwrap().len() == self.files.len() {
                    self.observed.overlapped.store(true, Ordering::SeqCst);
                    break;
                }
                thread::sleep(Duration::from_millis(5));
            }
        }

        match self.behavior {
            Behavior::Succeed => {}
            Behavior::Fail => return Err("archive is corrupt".into()),
            Behavior::Panic => panic!("fingerprinter panicked"),
            Behavior::Hang => {
                while !ctx.interrupt.is_raised() {
                    thread::sleep(Duration::from_millis(5));
                }
                return Err("interrupted".into());
            }
        }

        ctx.progress.on_event(&ProgressEvent::Finished {
            phase: Phase::Fingerprint,
        });
        Ok(map)
    }
}

struct FakeMatcher {
    builds: RawBuildMap,
    behavior: Behavior,
    cache: Option<CacheHandle>,
    sessions: Sessions,
    observed: Arc<Observed>,
}

impl Matcher for FakeMatcher {
    fn find_builds(self: Box<Self>, ctx: MatchContext) -> TaskResult<RawBuildMap> {
        let _sessions = self.sessions;
        ctx.progress.on_event(&ProgressEvent::Started {
            phase: Phase::Match,
            total: 0,
        });

        loop {
            if ctx.interrupt.is_raised() {
                return Err("interrupted".into());
            }
            match ctx.checksums.recv_timeout(Duration::from_millis(10)) {
                StreamItem::Entry(entry) => {
                    if let Some(cache) = &self.cache {
                        cache
                            .namespace(NamespaceKind::Checksums(entry.algorithm))?
                            .put(&entry.value, &entry.filename)?;
                    }
                    self.observed.streamed.lock().unwrap().push(entry);
                }
                StreamItem::Pending => {}
                StreamItem::Closed => break,
            }
        }

        match self.behavior {
            Behavior::Succeed => {}
            Behavior::Fail => return Err("build database rejected query".into()),
            Behavior::Panic => panic!("matcher panicked"),
            Behavior::Hang => {
                while !ctx.interrupt.is_raised() {
                    thread::sleep(Duration::from_millis(5));
                }
                return Err("interrupted".into());
            }
        }

        ctx.progress.on_event(&ProgressEvent::Finished { phase: Phase::Match });
        Ok(self.builds)
    }
}

impl Backend for FakeBackend {
    fn open_session(&self, endpoint: &Endpoint) -> TaskResult<Box<dyn BuildSystemSession>> {
        if self.fail_sessions {
            return Err(format!("connection refused: {}", endpoint.url).into());
        }
        self.observed.opened.lock().unwrap().push(endpoint.clone());
        Ok(Box::new(FakeSession {
            endpoint: endpoint.clone(),
            observed: self.observed.clone(),
        }))
    }

    fn fingerprinter(
        &self,
        _config: &AnalyzerConfig,
        _location: &str,
        cache: Option<CacheHandle>,
    ) -> TaskResult<Box<dyn Fingerprinter>> {
        *self.observed.fingerprint_cache.lock().unwrap() = Some(cache.is_some());
        Ok(Box::new(FakeFingerprinter {
            files: self.files.clone(),
            behavior: self.fingerprint,
            require_overlap: self.require_overlap,
            observed: self.observed.clone(),
        }))
    }

    fn matcher(
        &self,
        _config: &AnalyzerConfig,
        cache: Option<CacheHandle>,
        sessions: Sessions,
    ) -> TaskResult<Box<dyn Matcher>> {
        *self.observed.matcher_cache.lock().unwrap() = Some(cache.is_some());
        let count = 1 + usize::from(sessions.secondary.is_some());
        self.observed.matcher_sessions.store(count, Ordering::SeqCst);
        Ok(Box::new(FakeMatcher {
            builds: self.builds.clone(),
            behavior: self.matcher,
            cache,
            sessions,
            observed: self.observed.clone(),
        }))
    }
}

/// Records every event it receives.
#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressListener for RecordingListener {
    fn on_event(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
