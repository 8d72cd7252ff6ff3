//! Deliverables Analyzer - attributes distribution artifacts to builds
//!
//! This crate runs the two-phase analysis of a software distribution:
//! content fingerprinting and build-system matching. They run concurrently
//! over a shared cache, and the matcher's raw output is projected into an
//! [`AnalysisReport`].

pub mod channel;
pub mod collaborators;
pub mod config;
pub mod interrupt;
pub mod pipeline;
pub mod pool;
pub mod progress;
pub mod status;
pub mod teardown;

pub use channel::{checksum_channel, ChecksumEntry, ChecksumSink, ChecksumStream, StreamItem};
pub use collaborators::{
    Backend, BuildSystemSession, Endpoint, FingerprintContext, Fingerprinter, MatchContext, Matcher, SessionGuard,
    Sessions, TaskError, TaskResult,
};
pub use config::{AnalyzerConfig, ConfigError, EffectiveConfig};
pub use da_model::AnalysisReport;
pub use interrupt::Interrupt;
pub use pipeline::{generate_job_id, Orchestrator, Outcome, PipelineError, PipelineResult};
pub use progress::{ListenerSet, Phase, ProgressEvent, ProgressListener};
pub use status::{JobState, JobStatus, JobStatusRegistry, StatusListener, StatusRegistry};
pub use teardown::TeardownReport;
