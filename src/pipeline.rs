//! Analysis pipeline orchestration
//!
//! One run:
//! - Validate the job id and the build-system endpoints
//! - Boot (or reuse) the cache
//! - Size a worker pool to one thread per digest algorithm plus one
//! - Submit fingerprinting and matching, coupled by a checksum channel
//! - Join both tasks
//! - Project the raw build map into a report
//! - Tear down the output directory, cache and pool on every path

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use da_cache::{CacheError, CacheLease, CacheTopology};
use da_model::{project, AnalysisReport, BuildSystem, ChecksumMap, JobId, JobIdError, ProjectionError, RawBuildMap};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::channel::checksum_channel;
use crate::collaborators::{
    Backend, Endpoint, FingerprintContext, MatchContext, SessionGuard, Sessions, TaskError,
};
use crate::config::{AnalyzerConfig, ConfigError};
use crate::interrupt::Interrupt;
use crate::pool::{Joined, PoolError, TaskHandle, WorkerPool};
use crate::progress::{ListenerSet, Phase, ProgressListener};
use crate::teardown::{teardown, TeardownReport};

/// How long teardown waits for in-flight tasks to finish.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Prefix of every per-run output directory.
pub const OUTPUT_DIR_PREFIX: &str = "deliverables-analyzer-";

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("remote configuration error: {0}")]
    RemoteConfiguration(String),

    #[error("invalid job id: {0}")]
    InvalidJobId(#[from] JobIdError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("could not open {system} session to {url}: {source}")]
    Session {
        system: BuildSystem,
        url: String,
        #[source]
        source: TaskError,
    },

    #[error("{phase} task failed: {source}")]
    Execution {
        phase: Phase,
        #[source]
        source: TaskError,
    },

    #[error("projection error: {0}")]
    Projection(#[from] ProjectionError),
}

impl PipelineError {
    /// Whether the run was rejected before any task was submitted
    /// because of bad or missing configuration.
    pub fn is_configuration(&self) -> bool {
        match self {
            PipelineError::Configuration(_)
            | PipelineError::RemoteConfiguration(_)
            | PipelineError::InvalidJobId(_) => true,
            PipelineError::Cache(e) => e.is_configuration(),
            _ => false,
        }
    }

    /// The phase that failed, for execution errors.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            PipelineError::Execution { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    fn execution(phase: Phase, source: impl Into<TaskError>) -> Self {
        PipelineError::Execution {
            phase,
            source: source.into(),
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// How a run ended when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(AnalysisReport),
    /// The interrupt was raised while joining. The flag is left raised.
    Interrupted,
}

impl Outcome {
    pub fn report(&self) -> Option<&AnalysisReport> {
        match self {
            Outcome::Completed(report) => Some(report),
            Outcome::Interrupted => None,
        }
    }

    pub fn into_report(self) -> Option<AnalysisReport> {
        match self {
            Outcome::Completed(report) => Some(report),
            Outcome::Interrupted => None,
        }
    }
}

/// Fresh job identifier accepted by [`Orchestrator::run`].
pub fn generate_job_id() -> JobId {
    JobId::generate()
}

/// Resources owned by one run, released by teardown.
#[derive(Default)]
struct RunResources {
    output_dir: Option<PathBuf>,
    cache: Option<CacheLease>,
    pool: Option<WorkerPool>,
    sessions: Vec<Arc<SessionGuard>>,
}

pub struct Orchestrator {
    config: AnalyzerConfig,
    backend: Arc<dyn Backend>,
    topology: Arc<CacheTopology>,
    interrupt: Interrupt,
    shutdown_timeout: Duration,
    last_teardown: Mutex<Option<TeardownReport>>,
}

impl Orchestrator {
    pub fn new(config: AnalyzerConfig, backend: Arc<dyn Backend>) -> Self {
        Self {
            config,
            backend,
            topology: Arc::new(CacheTopology::new()),
            interrupt: Interrupt::new(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            last_teardown: Mutex::new(None),
        }
    }

    /// Share a cache topology with other orchestrators in the process.
    ///
    /// Each run holds a lease on the open cache, so concurrent runs never
    /// close it under each other.
    pub fn with_topology(mut self, topology: Arc<CacheTopology>) -> Self {
        self.topology = topology;
        self
    }

    /// Use a caller-owned interrupt flag.
    ///
    /// The orchestrator never clears the flag. Once raised, every later
    /// `run` returns [`Outcome::Interrupted`] until the caller calls
    /// [`Interrupt::clear`].
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn topology(&self) -> &Arc<CacheTopology> {
        &self.topology
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Teardown result of the most recent run that got past validation.
    pub fn last_teardown(&self) -> Option<TeardownReport> {
        *self.last_teardown.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Analyze the distribution at `location`.
    ///
    /// Configuration problems are reported before anything is started.
    /// Otherwise teardown always runs before this returns, and its result is
    /// available from [`Orchestrator::last_teardown`]. A raised interrupt is
    /// left raised; clear it before reusing the orchestrator.
    pub fn run(
        &self,
        job_id: &str,
        location: &str,
        listeners: &[Arc<dyn ProgressListener>],
    ) -> PipelineResult<Outcome> {
        let job_id = JobId::parse(job_id)?;
        let endpoints = self.endpoints()?;

        let mut resources = RunResources::default();
        let result = self.execute(&job_id, location, &endpoints, listeners, &mut resources);

        // Sessions are released once the tasks holding them are joined.
        resources.sessions.clear();
        let report = teardown(
            resources.output_dir.as_deref(),
            resources.cache.take(),
            resources.pool.as_mut(),
            self.shutdown_timeout,
        );
        *self.last_teardown.lock().unwrap_or_else(|e| e.into_inner()) = Some(report);

        result
    }

    fn endpoints(&self) -> PipelineResult<(Endpoint, Option<Endpoint>)> {
        let primary = match self.config.koji_hub_url() {
            Some(url) => Endpoint {
                system: BuildSystem::Koji,
                url: url.to_string(),
            },
            None => {
                return Err(PipelineError::RemoteConfiguration(
                    "no build system endpoint configured (koji_hub_url is not set)".to_string(),
                ))
            }
        };
        let secondary = self.config.pnc_url().map(|url| Endpoint {
            system: BuildSystem::Pnc,
            url: url.to_string(),
        });
        Ok((primary, secondary))
    }

    fn execute(
        &self,
        job_id: &JobId,
        location: &str,
        endpoints: &(Endpoint, Option<Endpoint>),
        listeners: &[Arc<dyn ProgressListener>],
        resources: &mut RunResources,
    ) -> PipelineResult<Outcome> {
        let algorithms = self.config.checksum_types();

        if self.config.cache_enabled() {
            let lease = self
                .topology
                .acquire(self.config.cache_root(), &self.config.cache_settings())?;
            info!("Initialized cache {}", lease.handle().name());
            resources.cache = Some(lease);
        } else {
            info!("Cache disabled");
        }

        let output_dir = self.create_output_dir(job_id)?;
        resources.output_dir = Some(output_dir.clone());

        let (primary, secondary) = endpoints;
        let primary = self.open_session(primary)?;
        resources.sessions.push(primary.clone());
        let secondary = match secondary {
            Some(endpoint) => {
                let guard = self.open_session(endpoint)?;
                resources.sessions.push(guard.clone());
                Some(guard)
            }
            None => None,
        };

        let threads = 1 + algorithms.len();
        info!("Using {} threads for {} checksum types", threads, algorithms.len());
        let pool = resources.pool.insert(WorkerPool::new(threads, "da-worker")?);

        let progress: Arc<dyn ProgressListener> = Arc::new(ListenerSet::new(listeners.to_vec()));
        let (sink, stream) = checksum_channel();
        let cache = resources.cache.as_ref().map(|lease| lease.handle().clone());

        let fingerprinter = self
            .backend
            .fingerprinter(&self.config, location, cache.clone())
            .map_err(|e| PipelineError::execution(Phase::Fingerprint, e))?;
        let matcher = self
            .backend
            .matcher(
                &self.config,
                cache,
                Sessions { primary, secondary },
            )
            .map_err(|e| PipelineError::execution(Phase::Match, e))?;

        let fingerprint_ctx = FingerprintContext {
            output_dir,
            progress: progress.clone(),
            sink,
            interrupt: self.interrupt.clone(),
        };
        let fingerprint_handle = pool.submit("fingerprint", move || fingerprinter.fingerprint(fingerprint_ctx))?;
        info!("Submitted fingerprinting of {}", location);

        let match_ctx = MatchContext {
            progress,
            checksums: stream,
            interrupt: self.interrupt.clone(),
        };
        let match_handle = pool.submit("match", move || matcher.find_builds(match_ctx))?;
        info!("Submitted build matching for job {}", job_id);

        let checksums = self.join(Phase::Fingerprint, &fingerprint_handle);
        let builds = self.join(Phase::Match, &match_handle);

        // A task that noticed the interrupt first may have failed because of
        // it; that is still an interrupted run.
        if self.interrupt.is_raised() {
            warn!("Job {} interrupted while waiting for tasks", job_id);
            return Ok(Outcome::Interrupted);
        }

        let (checksums, builds): (ChecksumMap, RawBuildMap) = match (checksums, builds) {
            (Joined::Interrupted, _) | (_, Joined::Interrupted) => return Ok(Outcome::Interrupted),
            (Joined::Completed(Err(e)), _) => return Err(PipelineError::execution(Phase::Fingerprint, e)),
            (Joined::Panicked(message), _) => return Err(PipelineError::execution(Phase::Fingerprint, message)),
            (Joined::Lost, _) => return Err(lost(Phase::Fingerprint)),
            (_, Joined::Completed(Err(e))) => return Err(PipelineError::execution(Phase::Match, e)),
            (_, Joined::Panicked(message)) => return Err(PipelineError::execution(Phase::Match, message)),
            (_, Joined::Lost) => return Err(lost(Phase::Match)),
            (Joined::Completed(Ok(checksums)), Joined::Completed(Ok(builds))) => (checksums, builds),
        };

        info!(
            "Got {} checksum types and {} builds",
            checksums.len(),
            builds.attributed_count()
        );

        let report = project(job_id, location, &builds)?;
        Ok(Outcome::Completed(report))
    }

    fn join<T>(&self, phase: Phase, handle: &TaskHandle<T>) -> Joined<T> {
        let joined = handle.wait(|| self.interrupt.is_raised());
        if let Joined::Panicked(message) = &joined {
            warn!("{} task panicked: {}", phase, message);
        }
        joined
    }

    fn open_session(&self, endpoint: &Endpoint) -> PipelineResult<Arc<SessionGuard>> {
        let session = self
            .backend
            .open_session(endpoint)
            .map_err(|source| PipelineError::Session {
                system: endpoint.system,
                url: endpoint.url.clone(),
                source,
            })?;
        Ok(Arc::new(SessionGuard::new(session)))
    }

    fn create_output_dir(&self, job_id: &JobId) -> PipelineResult<PathBuf> {
        let parent = self.config.output_parent();
        fs::create_dir_all(parent).map_err(|source| PipelineError::Io {
            path: parent.to_path_buf(),
            source,
        })?;

        let dir = parent.join(format!("{}{}-{}", OUTPUT_DIR_PREFIX, job_id, Uuid::new_v4().simple()));
        fs::create_dir(&dir).map_err(|source| PipelineError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("topology", &self.topology)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

fn lost(phase: Phase) -> PipelineError {
    PipelineError::execution(phase, format!("{} worker exited without a result", phase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_kinds() {
        assert!(PipelineError::RemoteConfiguration("x".into()).is_configuration());
        assert!(PipelineError::from(JobId::parse("nope").unwrap_err()).is_configuration());
        assert!(!PipelineError::execution(Phase::Match, "boom").is_configuration());
    }

    #[test]
    fn test_execution_error_names_phase() {
        let err = PipelineError::execution(Phase::Fingerprint, "disk full");
        assert_eq!(err.phase(), Some(Phase::Fingerprint));
        assert_eq!(err.to_string(), "fingerprint task failed: disk full");
    }

    #[test]
    fn test_generated_job_id_is_valid() {
        let id = generate_job_id();
        assert!(JobId::parse(id.as_str()).is_ok());
    }
}
