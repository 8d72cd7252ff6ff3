//! Deliverables Analyzer Model
//!
//! Types shared by the analysis pipeline:
//! - Digest algorithms and the checksum multimap produced by fingerprinting
//! - Build-system keys and the raw build map produced by matching
//! - The client-facing report and its statistics
//! - The projection from the raw build map into the report

pub mod build;
pub mod digest;
pub mod job;
pub mod projection;
pub mod report;
pub mod statistics;

pub use build::{ArchiveInfo, BuildDescriptor, BuildInfo, BuildSystem, BuildSystemKey, LocalArchive, RawBuildMap, RawMapError};
pub use digest::{Checksum, ChecksumMap, DigestAlgorithm, DigestMultiMap, ParseAlgorithmError};
pub use job::{JobId, JobIdError};
pub use projection::{project, ProjectionError};
pub use report::{AnalysisReport, Artifact, ArtifactIdentity, Build, BuildRef, MavenArtifact, NpmArtifact};
pub use statistics::BuildStatistics;
