//! Error types for cache operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::lock::LockError;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache root cannot be used as configured.
    #[error("cache configuration error at {path}: {reason}")]
    Configuration { path: PathBuf, reason: String },

    #[error("cache is already open at {open} and cannot be bound to {requested}")]
    RootMismatch { open: PathBuf, requested: PathBuf },

    #[error("unknown cache namespace: {0}")]
    UnknownNamespace(String),

    #[error("cache {0} is closed")]
    Closed(String),

    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("serialization error in namespace {namespace}: {source}")]
    Serialization {
        namespace: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    pub(crate) fn configuration(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::RootMismatch { .. })
    }
}
