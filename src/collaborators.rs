//! Interfaces to the fingerprinting and matching implementations.
//!
//! The orchestrator never knows how archives are walked or how build
//! databases are queried. A [`Backend`] builds both tasks and the remote
//! sessions they use.

use std::fmt;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;

use da_cache::CacheHandle;
use da_model::{BuildSystem, ChecksumMap, RawBuildMap};
use tracing::{debug, warn};

use crate::channel::{ChecksumSink, ChecksumStream};
use crate::config::AnalyzerConfig;
use crate::interrupt::Interrupt;
use crate::progress::ProgressListener;

/// Error raised by a collaborator.
pub type TaskError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type TaskResult<T> = Result<T, TaskError>;

/// A build-provenance database to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub system: BuildSystem,
    pub url: String,
}

/// One connection to a build-provenance database.
pub trait BuildSystemSession: Send + Sync {
    fn endpoint(&self) -> &Endpoint;

    /// Release the connection. Called exactly once, by [`SessionGuard`].
    fn release(&self) -> TaskResult<()>;
}

/// Owns a session and releases it when dropped.
pub struct SessionGuard {
    session: Box<dyn BuildSystemSession>,
}

impl SessionGuard {
    pub fn new(session: Box<dyn BuildSystemSession>) -> Self {
        debug!("Opened {} session to {}", session.endpoint().system, session.endpoint().url);
        Self { session }
    }
}

impl Deref for SessionGuard {
    type Target = dyn BuildSystemSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGuard")
            .field("endpoint", self.session.endpoint())
            .finish()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let endpoint = self.session.endpoint().clone();
        match self.session.release() {
            Ok(()) => debug!("Released {} session to {}", endpoint.system, endpoint.url),
            Err(e) => warn!("Failed to release {} session to {}: {}", endpoint.system, endpoint.url, e),
        }
    }
}

/// Sessions handed to the matcher. The primary source is always present.
#[derive(Debug, Clone)]
pub struct Sessions {
    pub primary: Arc<SessionGuard>,
    pub secondary: Option<Arc<SessionGuard>>,
}

/// Everything the fingerprinting task receives when it starts.
pub struct FingerprintContext {
    /// Per-run scratch directory, removed at teardown.
    pub output_dir: PathBuf,
    pub progress: Arc<dyn ProgressListener>,
    pub sink: ChecksumSink,
    pub interrupt: Interrupt,
}

/// Everything the matching task receives when it starts.
pub struct MatchContext {
    pub progress: Arc<dyn ProgressListener>,
    pub checksums: ChecksumStream,
    pub interrupt: Interrupt,
}

/// Computes file digests for a distribution. Runs once.
pub trait Fingerprinter: Send {
    /// Every digest must be published to `ctx.sink` as well as returned.
    fn fingerprint(self: Box<Self>, ctx: FingerprintContext) -> TaskResult<ChecksumMap>;
}

/// Looks up digests in the build databases. Runs once.
pub trait Matcher: Send {
    fn find_builds(self: Box<Self>, ctx: MatchContext) -> TaskResult<RawBuildMap>;
}

/// Builds the collaborators for one run.
pub trait Backend: Send + Sync {
    fn open_session(&self, endpoint: &Endpoint) -> TaskResult<Box<dyn BuildSystemSession>>;

    fn fingerprinter(
        &self,
        config: &AnalyzerConfig,
        location: &str,
        cache: Option<CacheHandle>,
    ) -> TaskResult<Box<dyn Fingerprinter>>;

    fn matcher(
        &self,
        config: &AnalyzerConfig,
        cache: Option<CacheHandle>,
        sessions: Sessions,
    ) -> TaskResult<Box<dyn Matcher>>;
}
