//! Built-in defaults (layer 1) and well-known paths

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::effective::{ConfigError, ConfigResult};

/// Directory name under `~/.config`
pub const APP_DIR_NAME: &str = "deliverables-analyzer";

/// One hour, the default lifespan and max idle for cache entries
pub const DEFAULT_CACHE_EXPIRY_MS: i64 = 3_600_000;

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Parent of each run's temporary output directory
    pub output_parent: PathBuf,

    pub disable_cache: bool,

    /// Entry lifespan in milliseconds (-1 never expires)
    pub cache_lifespan_ms: i64,

    /// Entry max idle in milliseconds (-1 never expires)
    pub cache_max_idle_ms: i64,

    pub checksum_types: Vec<String>,

    pub cache_root: PathBuf,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            output_parent: env::temp_dir(),
            disable_cache: false,
            cache_lifespan_ms: DEFAULT_CACHE_EXPIRY_MS,
            cache_max_idle_ms: DEFAULT_CACHE_EXPIRY_MS,
            checksum_types: vec!["md5".to_string(), "sha1".to_string(), "sha256".to_string()],
            cache_root: config_dir().join("cache"),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "output_parent": self.output_parent,
            "disable_cache": self.disable_cache,
            "cache_lifespan_ms": self.cache_lifespan_ms,
            "cache_max_idle_ms": self.cache_max_idle_ms,
            "checksum_types": self.checksum_types,
            "cache_root": self.cache_root,
            "koji_hub_url": null,
            "koji_web_url": null,
            "pnc_url": null
        })
    }
}

/// `~/.config/deliverables-analyzer`, or a directory under the system temp
/// dir when `HOME` is unset.
pub fn config_dir() -> PathBuf {
    match env::var_os("HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home).join(".config").join(APP_DIR_NAME),
        _ => env::temp_dir().join(APP_DIR_NAME),
    }
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Create `dir` (and parents) if it does not exist yet.
pub fn ensure_config_dir(dir: &Path) -> ConfigResult<()> {
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ConfigError::NotADirectory(dir.to_path_buf()));
        }
        return Ok(());
    }

    info!("Creating configuration directory {}", dir.display());
    fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })
}
