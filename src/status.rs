//! Process-wide job status registry.
//!
//! Entries expire a fixed retention window after their last insertion.
//! Expiry is passive: an expired entry is dropped the next time it is read,
//! and every `put` sweeps out whatever else has expired.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use da_cache::{Clock, SystemClock};
use da_model::JobId;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::progress::{Phase, ProgressEvent, ProgressListener};

/// Retention window for status entries, in hours.
pub const STATUS_RETENTION_HOURS: i64 = 24;

struct Entry<V> {
    value: V,
    inserted_at: DateTime<Utc>,
}

/// A concurrent map whose entries become unreadable after `retention`.
pub struct StatusRegistry<K, V> {
    entries: RwLock<HashMap<K, Entry<V>>>,
    retention: Duration,
    clock: Arc<dyn Clock>,
}

impl<K, V> fmt::Debug for StatusRegistry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusRegistry")
            .field("retention", &self.retention)
            .finish()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for StatusRegistry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> StatusRegistry<K, V> {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::with_retention(Duration::hours(STATUS_RETENTION_HOURS), clock)
    }

    pub fn with_retention(retention: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            retention,
            clock,
        }
    }

    /// Insert or replace, restarting the retention window.
    pub fn put(&self, key: K, value: V) {
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        if entries.len() < before {
            debug!("Dropped {} expired status entries", before - entries.len());
        }

        entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
            },
        );
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            match entries.get(key) {
                None => return None,
                Some(entry) if !self.is_expired(entry, now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.get(key).is_some_and(|entry| self.is_expired(entry, now)) {
            entries.remove(key);
        }
        None
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .filter(|entry| !self.is_expired(entry, now))
            .map(|entry| entry.value)
    }

    /// Number of unexpired entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|entry| !self.is_expired(entry, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, entry: &Entry<V>, now: DateTime<Utc>) -> bool {
        entry
            .inserted_at
            .checked_add_signed(self.retention)
            .is_some_and(|deadline| now >= deadline)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    /// 0 to 100
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobStatus {
    pub fn queued() -> Self {
        Self::new(JobState::Queued, 0, None)
    }

    pub fn running(percent: u8) -> Self {
        Self::new(JobState::Running, percent, None)
    }

    pub fn done() -> Self {
        Self::new(JobState::Done, 100, None)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(JobState::Failed, 100, Some(message.into()))
    }

    pub fn cancelled() -> Self {
        Self::new(JobState::Cancelled, 100, None)
    }

    fn new(state: JobState, percent: u8, message: Option<String>) -> Self {
        Self {
            state,
            percent: percent.min(100),
            message,
        }
    }
}

pub type JobStatusRegistry = StatusRegistry<JobId, JobStatus>;

#[derive(Debug, Default, Clone, Copy)]
struct PhaseProgress {
    done: u64,
    total: u64,
    finished: bool,
}

impl PhaseProgress {
    fn fraction(&self) -> f64 {
        if self.finished {
            1.0
        } else if self.total == 0 {
            0.0
        } else {
            (self.done.min(self.total) as f64) / (self.total as f64)
        }
    }
}

/// Maps progress from both phases onto one job's registry entry. Each
/// phase contributes half of the overall percentage.
pub struct StatusListener {
    job_id: JobId,
    registry: Arc<JobStatusRegistry>,
    phases: Mutex<[PhaseProgress; 2]>,
}

impl StatusListener {
    /// Register `job_id` as queued.
    pub fn new(job_id: JobId, registry: Arc<JobStatusRegistry>) -> Self {
        registry.put(job_id.clone(), JobStatus::queued());
        Self {
            job_id,
            registry,
            phases: Mutex::new([PhaseProgress::default(); 2]),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Record a terminal status for the job.
    pub fn finish(&self, status: JobStatus) {
        debug!("Job {} finished as {:?}", self.job_id, status.state);
        self.registry.put(self.job_id.clone(), status);
    }
}

impl ProgressListener for StatusListener {
    fn on_event(&self, event: &ProgressEvent) {
        let percent = {
            let mut phases = self.phases.lock().unwrap_or_else(|e| e.into_inner());
            let slot = match event.phase() {
                Phase::Fingerprint => &mut phases[0],
                Phase::Match => &mut phases[1],
            };
            match *event {
                ProgressEvent::Started { total, .. } => slot.total = total,
                ProgressEvent::Advanced { done, .. } => slot.done = slot.done.max(done),
                ProgressEvent::Finished { .. } => slot.finished = true,
            }
            let overall = (phases[0].fraction() + phases[1].fraction()) * 50.0;
            overall.round() as u8
        };
        self.registry.put(self.job_id.clone(), JobStatus::running(percent));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use da_cache::ManualClock;

    fn job(id: &str) -> JobId {
        JobId::parse(id).unwrap()
    }

    #[test]
    fn test_put_then_get() {
        let registry = JobStatusRegistry::new();
        registry.put(job("0000abcd"), JobStatus::running(10));
        assert_eq!(registry.get(&job("0000abcd")), Some(JobStatus::running(10)));
        assert_eq!(registry.get(&job("ffffffff")), None);
    }

    #[test]
    fn test_reinsert_restarts_window() {
        let clock = Arc::new(ManualClock::default());
        let registry = JobStatusRegistry::with_clock(clock.clone());

        registry.put(job("00000001"), JobStatus::queued());
        clock.advance(Duration::hours(20));
        registry.put(job("00000001"), JobStatus::running(50));
        clock.advance(Duration::hours(20));

        assert_eq!(registry.get(&job("00000001")), Some(JobStatus::running(50)));
    }

    #[test]
    fn test_expired_entry_dropped_on_read() {
        let clock = Arc::new(ManualClock::default());
        let registry = JobStatusRegistry::with_clock(clock.clone());

        registry.put(job("00000002"), JobStatus::done());
        clock.advance(Duration::hours(25));

        assert_eq!(registry.len(), 0);
        assert_eq!(registry.get(&job("00000002")), None);
        assert_eq!(registry.remove(&job("00000002")), None);
    }

    #[test]
    fn test_put_sweeps_entries_nobody_reads() {
        let clock = Arc::new(ManualClock::default());
        let registry = JobStatusRegistry::with_clock(clock.clone());

        for n in 0..10u32 {
            registry.put(job(&format!("{:08x}", n)), JobStatus::done());
        }
        clock.advance(Duration::hours(25));
        registry.put(job("0000ffff"), JobStatus::queued());

        let stored = registry.entries.read().unwrap().len();
        assert_eq!(stored, 1);
        assert_eq!(registry.get(&job("0000ffff")), Some(JobStatus::queued()));
    }

    #[test]
    fn test_listener_percent_spans_both_phases() {
        let registry = Arc::new(JobStatusRegistry::new());
        let listener = StatusListener::new(job("0000beef"), registry.clone());
        assert_eq!(registry.get(&job("0000beef")), Some(JobStatus::queued()));

        listener.on_event(&ProgressEvent::Started {
            phase: Phase::Fingerprint,
            total: 4,
        });
        listener.on_event(&ProgressEvent::Advanced {
            phase: Phase::Fingerprint,
            done: 2,
        });
        assert_eq!(registry.get(&job("0000beef")).unwrap().percent, 25);

        listener.on_event(&ProgressEvent::Finished { phase: Phase::Fingerprint });
        listener.on_event(&ProgressEvent::Finished { phase: Phase::Match });
        let status = registry.get(&job("0000beef")).unwrap();
        assert_eq!(status.state, JobState::Running);
        assert_eq!(status.percent, 100);

        listener.finish(JobStatus::done());
        assert!(registry.get(&job("0000beef")).unwrap().state.is_terminal());
    }

    #[test]
    fn test_failed_status_carries_message() {
        let status = JobStatus::failed("matcher died");
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["message"], "matcher died");
    }
}
