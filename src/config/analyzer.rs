//! Typed, validated analyzer configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use da_cache::{CacheSettings, StoreOptions};
use da_model::DigestAlgorithm;
use regex_lite::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::effective::{ConfigError, ConfigResult};

const URL_PATTERN: &str = r"^https?://\S+$";

#[derive(Debug, Deserialize)]
struct RawConfig {
    output_parent: PathBuf,
    disable_cache: bool,
    cache_lifespan_ms: i64,
    cache_max_idle_ms: i64,
    checksum_types: Vec<String>,
    cache_root: PathBuf,
    koji_hub_url: Option<String>,
    koji_web_url: Option<String>,
    pnc_url: Option<String>,
}

/// Immutable configuration for one orchestrator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyzerConfig {
    output_parent: PathBuf,
    disable_cache: bool,
    cache_lifespan: Option<Duration>,
    cache_max_idle: Option<Duration>,
    checksum_types: Vec<DigestAlgorithm>,
    cache_root: PathBuf,
    koji_hub_url: Option<String>,
    koji_web_url: Option<String>,
    pnc_url: Option<String>,
}

impl AnalyzerConfig {
    /// Build from a merged layer value. The value must be complete, as
    /// produced by merging onto the built-in defaults.
    pub fn from_merged(value: &Value) -> ConfigResult<Self> {
        let raw: RawConfig = serde_json::from_value(value.clone())
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        let mut checksum_types = Vec::new();
        for name in &raw.checksum_types {
            let algorithm: DigestAlgorithm = name
                .parse()
                .map_err(|e| ConfigError::Validation(format!("checksum_types: {}", e)))?;
            if !checksum_types.contains(&algorithm) {
                checksum_types.push(algorithm);
            }
        }
        if checksum_types.is_empty() {
            return Err(ConfigError::Validation("checksum_types must not be empty".to_string()));
        }

        let url_pattern =
            Regex::new(URL_PATTERN).map_err(|e| ConfigError::Validation(format!("URL pattern: {}", e)))?;
        let koji_hub_url = validate_url("koji_hub_url", raw.koji_hub_url, &url_pattern)?;
        let koji_web_url = validate_url("koji_web_url", raw.koji_web_url, &url_pattern)?;
        let pnc_url = validate_url("pnc_url", raw.pnc_url, &url_pattern)?;
        let koji_web_url = koji_web_url.or_else(|| koji_hub_url.as_deref().map(derive_web_url));

        Ok(Self {
            output_parent: raw.output_parent,
            disable_cache: raw.disable_cache,
            cache_lifespan: expiry("cache_lifespan_ms", raw.cache_lifespan_ms)?,
            cache_max_idle: expiry("cache_max_idle_ms", raw.cache_max_idle_ms)?,
            checksum_types,
            cache_root: raw.cache_root,
            koji_hub_url,
            koji_web_url,
            pnc_url,
        })
    }

    pub fn output_parent(&self) -> &Path {
        &self.output_parent
    }

    pub fn cache_enabled(&self) -> bool {
        !self.disable_cache
    }

    /// `None` never expires.
    pub fn cache_lifespan(&self) -> Option<Duration> {
        self.cache_lifespan
    }

    /// `None` never expires.
    pub fn cache_max_idle(&self) -> Option<Duration> {
        self.cache_max_idle
    }

    pub fn checksum_types(&self) -> &[DigestAlgorithm] {
        &self.checksum_types
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn koji_hub_url(&self) -> Option<&str> {
        self.koji_hub_url.as_deref()
    }

    pub fn koji_web_url(&self) -> Option<&str> {
        self.koji_web_url.as_deref()
    }

    pub fn pnc_url(&self) -> Option<&str> {
        self.pnc_url.as_deref()
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            algorithms: self.checksum_types.clone(),
            store: StoreOptions {
                lifespan: self.cache_lifespan,
                max_idle: self.cache_max_idle,
                ..StoreOptions::default()
            },
            ..CacheSettings::default()
        }
    }
}

/// Koji web URL for a hub URL: `hub.` becomes `web.`, then any remaining
/// `hub` is dropped.
pub fn derive_web_url(hub_url: &str) -> String {
    hub_url.replace("hub.", "web.").replace("hub", "")
}

fn validate_url(key: &str, url: Option<String>, pattern: &Regex) -> ConfigResult<Option<String>> {
    match url {
        None => Ok(None),
        Some(url) if url.trim().is_empty() => Ok(None),
        Some(url) if pattern.is_match(&url) => Ok(Some(url)),
        Some(url) => Err(ConfigError::Validation(format!("{} is not an http(s) URL: {}", key, url))),
    }
}

fn expiry(key: &str, millis: i64) -> ConfigResult<Option<Duration>> {
    match millis {
        -1 => Ok(None),
        ms if ms > 0 => Ok(Some(Duration::from_millis(ms as u64))),
        ms => Err(ConfigError::Validation(format!(
            "{} must be positive or -1, got {}",
            key, ms
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{merge_layers, BuiltinDefaults};
    use serde_json::json;

    fn config(overlay: Value) -> ConfigResult<AnalyzerConfig> {
        AnalyzerConfig::from_merged(&merge_layers(vec![BuiltinDefaults::default().to_value(), overlay]))
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = config(json!({})).unwrap();
        assert!(config.cache_enabled());
        assert_eq!(config.cache_lifespan(), Some(Duration::from_secs(3600)));
        assert_eq!(config.checksum_types(), &DigestAlgorithm::ALL);
    }

    #[test]
    fn test_minus_one_never_expires() {
        let config = config(json!({"cache_lifespan_ms": -1, "cache_max_idle_ms": -1})).unwrap();
        assert_eq!(config.cache_lifespan(), None);
        assert_eq!(config.cache_settings().store.max_idle, None);
    }

    #[test]
    fn test_zero_expiry_rejected() {
        assert!(matches!(
            config(json!({"cache_max_idle_ms": 0})),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_empty_checksum_types_rejected() {
        assert!(config(json!({"checksum_types": []})).is_err());
    }

    #[test]
    fn test_checksum_types_parsed_and_deduped() {
        let config = config(json!({"checksum_types": ["SHA-256", "sha256", "md5"]})).unwrap();
        assert_eq!(config.checksum_types(), &[DigestAlgorithm::Sha256, DigestAlgorithm::Md5]);
    }

    #[test]
    fn test_unknown_checksum_type_rejected() {
        assert!(config(json!({"checksum_types": ["crc32"]})).is_err());
    }

    #[test]
    fn test_bad_url_rejected() {
        let err = config(json!({"pnc_url": "ftp://pnc.example.com"})).unwrap_err();
        assert!(err.to_string().contains("pnc_url"));
    }

    #[test]
    fn test_web_url_derived_from_hub() {
        let config = config(json!({"koji_hub_url": "https://koji.hub.example.com/kojihub"})).unwrap();
        assert_eq!(config.koji_web_url(), Some("https://koji.web.example.com/koji"));
    }

    #[test]
    fn test_explicit_web_url_kept() {
        let config = config(json!({
            "koji_hub_url": "https://koji.hub.example.com/kojihub",
            "koji_web_url": "https://brew.example.com/brew"
        }))
        .unwrap();
        assert_eq!(config.koji_web_url(), Some("https://brew.example.com/brew"));
    }
}
