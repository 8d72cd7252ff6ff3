//! Effective configuration with provenance
//!
//! Captures the merged configuration plus where each layer came from.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::analyzer::AnalyzerConfig;
use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;

/// Schema identifier
pub const SCHEMA_ID: &str = "deliverables-analyzer/effective_config@1";

/// Environment variables consulted by [`env_overrides`], with the key each
/// one sets.
pub const ENV_KEYS: &[(&str, &str)] = &[
    ("KOJI_HUB_URL", "koji_hub_url"),
    ("KOJI_WEB_URL", "koji_web_url"),
    ("PNC_URL", "pnc_url"),
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parse error in {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("{0} exists but is not a directory")]
    NotADirectory(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    File,
    Env,
    Cli,
}

/// A contributing layer
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 of the raw file bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl ConfigSource {
    fn layer(origin: ConfigOrigin) -> Self {
        Self {
            origin,
            path: None,
            digest: None,
        }
    }
}

/// Merged configuration, its typed form and its sources
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub schema_id: String,

    pub created_at: DateTime<Utc>,

    /// The merged configuration object
    pub config: Value,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,

    #[serde(skip)]
    analyzer: AnalyzerConfig,
}

impl EffectiveConfig {
    /// Merge every layer and validate the result.
    ///
    /// A missing config file is skipped; an unreadable one is an error.
    pub fn build(
        config_file: Option<&Path>,
        env_layer: Option<Value>,
        cli_overrides: Option<Value>,
    ) -> ConfigResult<Self> {
        let mut layers = vec![BuiltinDefaults::default().to_value()];
        let mut sources = vec![ConfigSource::layer(ConfigOrigin::Builtin)];

        if let Some(path) = config_file.filter(|p| p.exists()) {
            let (value, digest) = load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::File,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(env) = env_layer {
            layers.push(env);
            sources.push(ConfigSource::layer(ConfigOrigin::Env));
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource::layer(ConfigOrigin::Cli));
        }

        let config = merge_layers(layers);
        let analyzer = AnalyzerConfig::from_merged(&config)?;

        Ok(Self {
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            config,
            sources,
            analyzer,
        })
    }

    /// The validated, typed configuration.
    pub fn analyzer(&self) -> &AnalyzerConfig {
        &self.analyzer
    }

    pub fn into_analyzer(self) -> AnalyzerConfig {
        self.analyzer
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Look up a merged value by dot-separated path
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(&self.config, |current, part| current.get(part))
    }
}

/// Environment layer read through `lookup`. Returns `None` when no
/// variable is set.
pub fn env_overrides(lookup: impl Fn(&str) -> Option<String>) -> Option<Value> {
    let map: serde_json::Map<String, Value> = ENV_KEYS
        .iter()
        .filter_map(|(var, key)| {
            lookup(var)
                .filter(|v| !v.trim().is_empty())
                .map(|v| (key.to_string(), Value::String(v)))
        })
        .collect();
    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

fn load_toml_file(path: &Path) -> ConfigResult<(Value, String)> {
    let bytes = fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let digest = hex::encode(Sha256::digest(&bytes));

    let parse_error = |reason: String| ConfigError::Parse {
        path: path.to_path_buf(),
        reason,
    };
    let contents = String::from_utf8(bytes).map_err(|e| parse_error(format!("invalid UTF-8: {}", e)))?;
    let table: toml::Value = toml::from_str(&contents).map_err(|e| parse_error(e.to_string()))?;

    Ok((toml_to_json(table), digest))
}

fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}
