//! Projection of the raw build map into an [`AnalysisReport`].
//!
//! The projection is a pure function. Attributed groups become [`Build`]s in
//! the insertion order of the source map. The unattributed group is selected
//! by its key variant, never by its position.

use thiserror::Error;
use tracing::info;

use crate::build::{ArchiveInfo, BuildDescriptor, BuildSystem, LocalArchive, RawBuildMap};
use crate::job::JobId;
use crate::report::{AnalysisReport, Artifact, ArtifactIdentity, Build, BuildRef, MavenArtifact, NpmArtifact};
use crate::statistics::BuildStatistics;

const BUILD_TYPE_MAVEN: &str = "maven";
const BUILD_TYPE_NPM: &str = "npm";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectionError {
    #[error("archive {artifact} had unhandled artifact type: {build_type}")]
    UnsupportedArtifactType { artifact: String, build_type: String },
}

/// Build the report for `id` from a completed raw build map.
pub fn project(id: &JobId, url: &str, raw: &RawBuildMap) -> Result<AnalysisReport, ProjectionError> {
    let builds = found_builds(raw)?;
    let not_found = not_found_artifacts(raw);
    let statistics = BuildStatistics::from_builds(raw.attributed().map(|(_, _, build)| build));

    Ok(AnalysisReport::new(
        id.clone(),
        url.to_string(),
        builds,
        not_found,
        statistics,
    ))
}

fn not_found_artifacts(raw: &RawBuildMap) -> Vec<Artifact> {
    let archives = match raw.unattributed() {
        Some(group) => &group.archives,
        None => return Vec::new(),
    };

    let total = archives.len();
    archives
        .iter()
        .enumerate()
        .map(|(index, local)| {
            let artifact = not_found_artifact(local);
            info!(
                "Not found artifact: {} / {} ({:?})",
                index + 1,
                total,
                artifact.files_not_built_from_source
            );
            artifact
        })
        .collect()
}

fn not_found_artifact(local: &LocalArchive) -> Artifact {
    let mut artifact = Artifact {
        built_from_source: false,
        files_not_built_from_source: local.filenames.clone(),
        ..Default::default()
    };
    artifact.set_checksums(&local.checksums);
    artifact
}

fn found_builds(raw: &RawBuildMap) -> Result<Vec<Build>, ProjectionError> {
    let total = raw.attributed_count();
    let mut builds = Vec::with_capacity(total);

    for (index, (system, id, descriptor)) in raw.attributed().enumerate() {
        let mut build = create_build(system, id, descriptor);
        info!(
            "Build: {} / {} ({}.{})",
            index + 1,
            total,
            build.identifier,
            build.build_system_type
        );

        let back_ref = build.to_ref();
        let archive_total = descriptor.archives.len();
        for (archive_index, local) in descriptor.archives.iter().enumerate() {
            let artifact = create_artifact(local, &build, &back_ref)?;
            info!(
                "Artifact: {} / {} ({})",
                archive_index + 1,
                archive_total,
                artifact.identifier.as_deref().unwrap_or_default()
            );
            build.artifacts.push(artifact);
        }

        builds.push(build);
    }

    Ok(builds)
}

fn create_build(system: BuildSystem, id: u64, descriptor: &BuildDescriptor) -> Build {
    let (koji_id, pnc_id) = match system {
        BuildSystem::Koji => (Some(id), None),
        BuildSystem::Pnc => (None, Some(id)),
    };

    Build {
        identifier: descriptor.build_info.nvr.clone(),
        build_system_type: system,
        koji_id,
        pnc_id,
        source: descriptor.source.clone(),
        built_from_source: !descriptor.import,
        artifacts: Vec::with_capacity(descriptor.archives.len()),
    }
}

fn identity_of(local: &LocalArchive) -> Result<(&ArchiveInfo, ArtifactIdentity), ProjectionError> {
    let info = local.archive.as_ref().ok_or_else(|| ProjectionError::UnsupportedArtifactType {
        artifact: local.filenames.iter().next().cloned().unwrap_or_else(|| "<unnamed>".to_string()),
        build_type: "<none>".to_string(),
    })?;

    let identity = match info.build_type.as_deref() {
        Some(BUILD_TYPE_MAVEN) => ArtifactIdentity::Maven(MavenArtifact {
            group_id: info.group_id.clone().unwrap_or_default(),
            artifact_id: info.artifact_id.clone(),
            packaging: info.extension.clone().unwrap_or_default(),
            version: info.version.clone(),
            classifier: info.classifier.clone().unwrap_or_default(),
        }),
        Some(BUILD_TYPE_NPM) => ArtifactIdentity::Npm(NpmArtifact {
            name: info.artifact_id.clone(),
            version: info.version.clone(),
        }),
        other => {
            return Err(ProjectionError::UnsupportedArtifactType {
                artifact: info.artifact_id.clone(),
                build_type: other.unwrap_or("<none>").to_string(),
            })
        }
    };

    Ok((info, identity))
}

fn create_artifact(local: &LocalArchive, build: &Build, back_ref: &BuildRef) -> Result<Artifact, ProjectionError> {
    let (info, identity) = identity_of(local)?;

    let mut artifact = Artifact {
        identifier: Some(identity.identifier()),
        identity: Some(identity),
        build_system_type: Some(build.build_system_type),
        build: Some(back_ref.clone()),
        ..Default::default()
    };

    if local.built_from_source {
        artifact.built_from_source = build.built_from_source;
    } else {
        artifact.built_from_source = false;
        artifact
            .files_not_built_from_source
            .extend(local.unmatched_filenames.iter().cloned());
    }

    artifact.set_checksums(&local.checksums);

    match build.build_system_type {
        BuildSystem::Koji => artifact.koji_id = Some(info.archive_id),
        BuildSystem::Pnc => artifact.pnc_id = Some(info.archive_id),
    }

    Ok(artifact)
}
