//! Aggregate statistics over the attributed builds of a report.

use serde::{Deserialize, Serialize};

use crate::build::BuildDescriptor;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildStatistics {
    pub number_of_builds: usize,
    pub number_of_archives: usize,
    pub number_of_imported_builds: usize,
    pub number_of_imported_archives: usize,
    pub percent_of_builds_imported: f64,
    pub percent_of_archives_imported: f64,
}

impl BuildStatistics {
    /// Compute statistics over attributed builds only. Callers must not pass
    /// the unattributed group.
    pub fn from_builds<'a, I>(builds: I) -> Self
    where
        I: IntoIterator<Item = &'a BuildDescriptor>,
    {
        let mut stats = Self::default();

        for build in builds {
            let archives = build.archives.len();
            stats.number_of_builds += 1;
            stats.number_of_archives += archives;
            if build.import {
                stats.number_of_imported_builds += 1;
                stats.number_of_imported_archives += archives;
            }
        }

        stats.percent_of_builds_imported = percent(stats.number_of_imported_builds, stats.number_of_builds);
        stats.percent_of_archives_imported =
            percent(stats.number_of_imported_archives, stats.number_of_archives);
        stats
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}
