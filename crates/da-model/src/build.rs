//! Build-system keys and the raw build map produced by the matching phase.
//!
//! The raw map is keyed by [`BuildSystemKey`]. Archives that could not be
//! attributed to any build are grouped under [`BuildSystemKey::Unattributed`].
//! On the wire a key is a `(system, id)` pair where id `0` denotes the
//! unattributed group; in memory that sentinel never exists as an integer.

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::digest::Checksum;

/// The closed set of build systems that can attribute an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildSystem {
    #[serde(alias = "koji")]
    Koji,
    #[serde(alias = "pnc")]
    Pnc,
}

impl fmt::Display for BuildSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Koji => write!(f, "KOJI"),
            Self::Pnc => write!(f, "PNC"),
        }
    }
}

/// Key of one group in the raw build map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "KeyRepr", into = "KeyRepr")]
pub enum BuildSystemKey {
    /// A real build in `system` with a non-zero `id`.
    Attributed { system: BuildSystem, id: u64 },
    /// Archives for which no attributing build was found.
    Unattributed,
}

impl BuildSystemKey {
    /// Build a key from its wire form. Id `0` always maps to
    /// [`BuildSystemKey::Unattributed`], whatever the system.
    pub fn from_pair(system: BuildSystem, id: u64) -> Self {
        if id == 0 {
            Self::Unattributed
        } else {
            Self::Attributed { system, id }
        }
    }

    pub fn is_unattributed(&self) -> bool {
        matches!(self, Self::Unattributed)
    }

    pub fn system(&self) -> Option<BuildSystem> {
        match self {
            Self::Attributed { system, .. } => Some(*system),
            Self::Unattributed => None,
        }
    }
}

impl fmt::Display for BuildSystemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attributed { system, id } => write!(f, "{}#{}", system, id),
            Self::Unattributed => write!(f, "unattributed"),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct KeyRepr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    system: Option<BuildSystem>,
    id: u64,
}

impl TryFrom<KeyRepr> for BuildSystemKey {
    type Error = String;

    fn try_from(repr: KeyRepr) -> Result<Self, Self::Error> {
        match (repr.system, repr.id) {
            (_, 0) => Ok(Self::Unattributed),
            (Some(system), id) => Ok(Self::Attributed { system, id }),
            (None, id) => Err(format!("build key with id {} has no build system", id)),
        }
    }
}

impl From<BuildSystemKey> for KeyRepr {
    fn from(key: BuildSystemKey) -> Self {
        match key {
            BuildSystemKey::Attributed { system, id } => KeyRepr {
                system: Some(system),
                id,
            },
            BuildSystemKey::Unattributed => KeyRepr { system: None, id: 0 },
        }
    }
}

/// Identity of a build inside its build system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub id: u64,
    /// Name-version-release string.
    #[serde(default)]
    pub nvr: String,
}

/// Remote metadata describing one archive of a build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveInfo {
    pub archive_id: u64,
    /// Package ecosystem tag, e.g. `maven` or `npm`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub artifact_id: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier: Option<String>,
}

/// An archive discovered in the distribution, with its match detail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalArchive {
    /// Remote metadata. Absent for archives no build claimed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveInfo>,
    #[serde(default)]
    pub checksums: Vec<Checksum>,
    /// Every file of the distribution that carries this archive's content.
    #[serde(default)]
    pub filenames: BTreeSet<String>,
    /// Internal files that could not be matched to source.
    #[serde(default)]
    pub unmatched_filenames: BTreeSet<String>,
    #[serde(default)]
    pub built_from_source: bool,
}

/// One group of the raw build map: a build and the archives it claimed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDescriptor {
    #[serde(default)]
    pub build_info: BuildInfo,
    /// Source-control reference the build was produced from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// True when the build was imported rather than built.
    #[serde(default)]
    pub import: bool,
    #[serde(default)]
    pub archives: Vec<LocalArchive>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RawMapError {
    #[error("duplicate build key {0}")]
    DuplicateKey(BuildSystemKey),
}

/// Output of the matching phase, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawBuildMap {
    entries: IndexMap<BuildSystemKey, BuildDescriptor>,
}

impl RawBuildMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a group. Keys are unique within one run.
    pub fn insert(&mut self, key: BuildSystemKey, build: BuildDescriptor) -> Result<(), RawMapError> {
        if self.entries.contains_key(&key) {
            return Err(RawMapError::DuplicateKey(key));
        }
        self.entries.insert(key, build);
        Ok(())
    }

    pub fn get(&self, key: &BuildSystemKey) -> Option<&BuildDescriptor> {
        self.entries.get(key)
    }

    /// The group of archives no build claimed, if any.
    pub fn unattributed(&self) -> Option<&BuildDescriptor> {
        self.entries.get(&BuildSystemKey::Unattributed)
    }

    /// Attributed groups in insertion order.
    pub fn attributed(&self) -> impl Iterator<Item = (BuildSystem, u64, &BuildDescriptor)> {
        self.entries.iter().filter_map(|(key, build)| match key {
            BuildSystemKey::Attributed { system, id } => Some((*system, *id, build)),
            BuildSystemKey::Unattributed => None,
        })
    }

    pub fn attributed_count(&self) -> usize {
        self.entries.keys().filter(|k| !k.is_unattributed()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BuildSystemKey, &BuildDescriptor)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Serialize)]
struct EntryRef<'a> {
    key: &'a BuildSystemKey,
    build: &'a BuildDescriptor,
}

#[derive(Deserialize)]
struct Entry {
    key: BuildSystemKey,
    build: BuildDescriptor,
}

impl Serialize for RawBuildMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter().map(|(key, build)| EntryRef { key, build }))
    }
}

impl<'de> Deserialize<'de> for RawBuildMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        let mut map = RawBuildMap::new();
        for entry in entries {
            map.insert(entry.key, entry.build).map_err(de::Error::custom)?;
        }
        Ok(map)
    }
}
