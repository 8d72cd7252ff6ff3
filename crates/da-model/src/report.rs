//! Client-facing analysis report.
//!
//! An [`AnalysisReport`] is built once from a completed raw build map and is
//! immutable afterwards. Artifacts inside a [`Build`] always carry a
//! [`BuildRef`] back to it; unattributed artifacts never do.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::build::BuildSystem;
use crate::digest::{Checksum, DigestAlgorithm};
use crate::job::JobId;
use crate::statistics::BuildStatistics;

/// Maven coordinates of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MavenArtifact {
    pub group_id: String,
    pub artifact_id: String,
    /// Packaging type, e.g. `jar` or `pom`.
    #[serde(rename = "type")]
    pub packaging: String,
    pub version: String,
    #[serde(default)]
    pub classifier: String,
}

impl MavenArtifact {
    /// `groupId:artifactId:type:version`, with `:classifier` appended when
    /// the classifier is not empty.
    pub fn identifier(&self) -> String {
        let mut id = format!(
            "{}:{}:{}:{}",
            self.group_id, self.artifact_id, self.packaging, self.version
        );
        if !self.classifier.is_empty() {
            id.push(':');
            id.push_str(&self.classifier);
        }
        id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NpmArtifact {
    pub name: String,
    pub version: String,
}

impl NpmArtifact {
    pub fn identifier(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }
}

/// Package-ecosystem identity of an attributed artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "ecosystem", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactIdentity {
    Maven(MavenArtifact),
    Npm(NpmArtifact),
}

impl ArtifactIdentity {
    pub fn identifier(&self) -> String {
        match self {
            Self::Maven(maven) => maven.identifier(),
            Self::Npm(npm) => npm.identifier(),
        }
    }
}

/// Back-reference from an artifact to the build that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRef {
    pub identifier: String,
    pub build_system_type: BuildSystem,
    pub id: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<ArtifactIdentity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_system_type: Option<BuildSystem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub koji_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pnc_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub built_from_source: bool,
    #[serde(default)]
    pub files_not_built_from_source: BTreeSet<String>,
    /// Owning build. `None` exactly when the artifact is unattributed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildRef>,
}

impl Artifact {
    /// Copy digest values into the per-algorithm fields.
    pub fn set_checksums<'a>(&mut self, checksums: impl IntoIterator<Item = &'a Checksum>) {
        for checksum in checksums {
            let slot = match checksum.algorithm {
                DigestAlgorithm::Md5 => &mut self.md5,
                DigestAlgorithm::Sha1 => &mut self.sha1,
                DigestAlgorithm::Sha256 => &mut self.sha256,
            };
            *slot = Some(checksum.value.clone());
        }
    }

    pub fn checksum(&self, algorithm: DigestAlgorithm) -> Option<&str> {
        match algorithm {
            DigestAlgorithm::Md5 => self.md5.as_deref(),
            DigestAlgorithm::Sha1 => self.sha1.as_deref(),
            DigestAlgorithm::Sha256 => self.sha256.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    /// Name-version-release of the build.
    pub identifier: String,
    pub build_system_type: BuildSystem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub koji_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pnc_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub built_from_source: bool,
    pub artifacts: Vec<Artifact>,
}

impl Build {
    /// Id of the build in its own build system.
    pub fn id(&self) -> Option<u64> {
        match self.build_system_type {
            BuildSystem::Koji => self.koji_id,
            BuildSystem::Pnc => self.pnc_id,
        }
    }

    pub fn to_ref(&self) -> BuildRef {
        BuildRef {
            identifier: self.identifier.clone(),
            build_system_type: self.build_system_type,
            id: self.id().unwrap_or_default(),
        }
    }
}

/// Result of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    id: JobId,
    url: String,
    builds: Vec<Build>,
    not_found_artifacts: Vec<Artifact>,
    statistics: BuildStatistics,
}

impl AnalysisReport {
    pub(crate) fn new(
        id: JobId,
        url: String,
        builds: Vec<Build>,
        not_found_artifacts: Vec<Artifact>,
        statistics: BuildStatistics,
    ) -> Self {
        Self {
            id,
            url,
            builds,
            not_found_artifacts,
            statistics,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn builds(&self) -> &[Build] {
        &self.builds
    }

    pub fn not_found_artifacts(&self) -> &[Artifact] {
        &self.not_found_artifacts
    }

    pub fn statistics(&self) -> &BuildStatistics {
        &self.statistics
    }

    /// Number of archives across both partitions.
    pub fn artifact_count(&self) -> usize {
        self.builds.iter().map(|b| b.artifacts.len()).sum::<usize>() + self.not_found_artifacts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maven_identifier_skips_empty_classifier() {
        let mut maven = MavenArtifact {
            group_id: "org.example".into(),
            artifact_id: "core".into(),
            packaging: "jar".into(),
            version: "1.0.0".into(),
            classifier: String::new(),
        };
        assert_eq!(maven.identifier(), "org.example:core:jar:1.0.0");

        maven.classifier = "sources".into();
        assert_eq!(maven.identifier(), "org.example:core:jar:1.0.0:sources");
    }

    #[test]
    fn test_npm_identifier() {
        let npm = NpmArtifact {
            name: "left-pad".into(),
            version: "1.3.0".into(),
        };
        assert_eq!(npm.identifier(), "left-pad:1.3.0");
    }

    #[test]
    fn test_set_checksums_fills_matching_slots() {
        let mut artifact = Artifact::default();
        artifact.set_checksums(&[
            Checksum::new(DigestAlgorithm::Md5, "m"),
            Checksum::new(DigestAlgorithm::Sha256, "s"),
        ]);
        assert_eq!(artifact.checksum(DigestAlgorithm::Md5), Some("m"));
        assert_eq!(artifact.checksum(DigestAlgorithm::Sha1), None);
        assert_eq!(artifact.checksum(DigestAlgorithm::Sha256), Some("s"));
    }

    #[test]
    fn test_identity_is_tagged_by_ecosystem() {
        let identity = ArtifactIdentity::Npm(NpmArtifact {
            name: "a".into(),
            version: "1".into(),
        });
        let json = serde_json::to_value(&identity).unwrap();
        assert_eq!(json["ecosystem"], "NPM");
        assert_eq!(json["name"], "a");
    }
}
