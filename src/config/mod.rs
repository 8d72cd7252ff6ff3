//! Layered analyzer configuration
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. Config file (~/.config/deliverables-analyzer/config.toml)
//! 3. Environment (`KOJI_HUB_URL`, `KOJI_WEB_URL`, `PNC_URL`)
//! 4. CLI overrides

mod analyzer;
mod defaults;
mod effective;
mod merge;

pub use analyzer::{derive_web_url, AnalyzerConfig};
pub use defaults::{config_dir, default_config_path, ensure_config_dir, BuiltinDefaults};
pub use effective::{env_overrides, ConfigError, ConfigOrigin, ConfigResult, ConfigSource, EffectiveConfig};
pub use merge::{deep_merge, merge_layers};
