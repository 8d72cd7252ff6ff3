//! Best-effort release of a run's resources.
//!
//! Order: output directory, cache lease, worker pool. A failing step is
//! logged and the next step still runs.

use std::fs;
use std::path::Path;
use std::time::Duration;

use da_cache::CacheLease;
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::pool::WorkerPool;

/// What teardown managed to release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    pub output_removed: bool,
    /// The run's cache lease was given back. The manager itself closes
    /// with the last lease.
    pub cache_released: bool,
    pub pool_terminated: bool,
    /// Worker threads still running after the shutdown wait.
    pub live_workers: usize,
}

impl TeardownReport {
    /// True only if every step succeeded.
    pub fn is_clean(&self) -> bool {
        self.output_removed && self.cache_released && self.pool_terminated
    }
}

pub(crate) fn teardown(
    output_dir: Option<&Path>,
    cache: Option<CacheLease>,
    pool: Option<&mut WorkerPool>,
    pool_timeout: Duration,
) -> TeardownReport {
    let output_removed = output_dir.map(remove_tree).unwrap_or(true);

    let cache_released = match cache {
        None => true,
        Some(lease) => {
            let name = lease.handle().name();
            match lease.release() {
                Ok(true) => {
                    info!("Closed cache {} after last lease", name);
                    true
                }
                Ok(false) => true,
                Err(e) => {
                    warn!("Error closing cache {}: {}", name, e);
                    false
                }
            }
        }
    };

    let (pool_terminated, live_workers) = match pool {
        None => (true, 0),
        Some(pool) => {
            let terminated = pool.shutdown_and_await(pool_timeout);
            (terminated, pool.live_workers())
        }
    };

    let report = TeardownReport {
        output_removed,
        cache_released,
        pool_terminated,
        live_workers,
    };
    if report.is_clean() {
        info!("Teardown complete");
    } else {
        warn!("Teardown incomplete: {:?}", report);
    }
    report
}

/// Delete `root`, innermost entries first. Every entry is attempted even if
/// an earlier one fails.
pub(crate) fn remove_tree(root: &Path) -> bool {
    if !root.exists() {
        return true;
    }

    let mut ok = true;
    for entry in WalkDir::new(root).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Error walking {}: {}", root.display(), e);
                ok = false;
                continue;
            }
        };

        let path = entry.path();
        let removed = if entry.file_type().is_dir() {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        };
        if let Err(e) = removed {
            warn!("Error deleting {}: {}", path.display(), e);
            ok = false;
        }
    }
    ok
}
