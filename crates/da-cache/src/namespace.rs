//! A single named key-value namespace.
//!
//! Layout: `<root>/<namespace>/segment-NNN.json`. A key always lives in the
//! segment selected by the first two bytes of its SHA-256. Puts are written
//! through to their segment file; access-time updates are flushed on
//! [`Namespace::flush`] and at close.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{CacheError, CacheResult};

/// Schema identifier written in every segment header.
pub const SEGMENT_SCHEMA_ID: &str = "da-cache/segment";

/// Bumped whenever the segment layout changes. Segments written under
/// another version are discarded at preload.
pub const SEGMENT_SCHEMA_VERSION: u32 = 1;

/// Storage and expiration settings shared by every namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Maximum age of an entry since insertion. `None` never expires.
    pub lifespan: Option<Duration>,
    /// Maximum time since last access. `None` never expires.
    pub max_idle: Option<Duration>,
    pub segments: u16,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            lifespan: Some(Duration::from_secs(3600)),
            max_idle: Some(Duration::from_secs(3600)),
            segments: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    value: Value,
    created_at: DateTime<Utc>,
    last_used: DateTime<Utc>,
}

#[derive(Serialize)]
struct SegmentHeaderRef<'a> {
    schema_id: &'a str,
    schema_version: u32,
    namespace: &'a str,
    segment: u16,
    segment_count: u16,
    entries: &'a BTreeMap<String, StoredEntry>,
}

#[derive(Deserialize)]
struct SegmentFile {
    schema_id: String,
    schema_version: u32,
    namespace: String,
    segment: u16,
    segment_count: u16,
    entries: BTreeMap<String, StoredEntry>,
}

struct State {
    segments: Vec<BTreeMap<String, StoredEntry>>,
    dirty: BTreeSet<u16>,
    closed: bool,
}

pub struct Namespace {
    name: String,
    dir: PathBuf,
    options: StoreOptions,
    lifespan: Option<chrono::Duration>,
    max_idle: Option<chrono::Duration>,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .field("options", &self.options)
            .finish()
    }
}

impl Namespace {
    /// Open the namespace under `root` and restore every unexpired entry.
    pub(crate) fn open(root: &Path, name: &str, options: StoreOptions, clock: Arc<dyn Clock>) -> CacheResult<Self> {
        let dir = root.join(name);
        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;

        let segment_count = options.segments.max(1);
        let namespace = Self {
            name: name.to_string(),
            dir,
            options: StoreOptions {
                segments: segment_count,
                ..options
            },
            lifespan: options.lifespan.and_then(|d| chrono::Duration::from_std(d).ok()),
            max_idle: options.max_idle.and_then(|d| chrono::Duration::from_std(d).ok()),
            clock,
            state: Mutex::new(State {
                segments: vec![BTreeMap::new(); segment_count as usize],
                dirty: BTreeSet::new(),
                closed: false,
            }),
        };
        namespace.preload()?;
        Ok(namespace)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.get_value(key)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| self.serialization_error(source)),
            None => Ok(None),
        }
    }

    /// Look up `key`, refreshing its idle timer. Expired entries are removed.
    pub fn get_value(&self, key: &str) -> CacheResult<Option<Value>> {
        let now = self.clock.now();
        let index = self.segment_of(key);
        let mut state = self.open_state()?;

        let expired = match state.segments[index as usize].get(key) {
            None => return Ok(None),
            Some(entry) => self.is_expired(entry, now),
        };

        state.dirty.insert(index);
        if expired {
            debug!("Expired entry {} in {}", key, self.name);
            state.segments[index as usize].remove(key);
            return Ok(None);
        }

        let entry = state.segments[index as usize]
            .get_mut(key)
            .map(|entry| {
                entry.last_used = now;
                entry.value.clone()
            });
        Ok(entry)
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> CacheResult<()> {
        let value = serde_json::to_value(value).map_err(|source| self.serialization_error(source))?;
        self.put_value(key, value)
    }

    pub fn put_value(&self, key: &str, value: Value) -> CacheResult<()> {
        let now = self.clock.now();
        let index = self.segment_of(key);
        let mut state = self.open_state()?;

        state.segments[index as usize].insert(
            key.to_string(),
            StoredEntry {
                value,
                created_at: now,
                last_used: now,
            },
        );
        self.write_segment(index, &state.segments[index as usize])?;
        state.dirty.remove(&index);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> CacheResult<bool> {
        let index = self.segment_of(key);
        let mut state = self.open_state()?;

        let removed = state.segments[index as usize].remove(key).is_some();
        if removed {
            self.write_segment(index, &state.segments[index as usize])?;
            state.dirty.remove(&index);
        }
        Ok(removed)
    }

    /// Whether `key` holds a live entry. Does not refresh the idle timer.
    pub fn contains_key(&self, key: &str) -> CacheResult<bool> {
        let now = self.clock.now();
        let index = self.segment_of(key);
        let state = self.open_state()?;
        Ok(state.segments[index as usize]
            .get(key)
            .map(|entry| !self.is_expired(entry, now))
            .unwrap_or(false))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        let state = self.lock_state();
        state
            .segments
            .iter()
            .flat_map(|segment| segment.values())
            .filter(|entry| !self.is_expired(entry, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write every segment touched since the last write.
    pub fn flush(&self) -> CacheResult<()> {
        let mut state = self.open_state()?;
        self.flush_locked(&mut state)
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// Flush and refuse further access. Closing twice is a no-op.
    pub(crate) fn close(&self) -> CacheResult<()> {
        let mut state = self.lock_state();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        self.flush_locked(&mut state)
    }

    fn flush_locked(&self, state: &mut State) -> CacheResult<()> {
        let dirty: Vec<u16> = state.dirty.iter().copied().collect();
        for index in dirty {
            self.write_segment(index, &state.segments[index as usize])?;
            state.dirty.remove(&index);
        }
        Ok(())
    }

    fn preload(&self) -> CacheResult<()> {
        let now = self.clock.now();
        let mut state = self.lock_state();
        let mut restored = 0usize;

        for index in 0..self.options.segments {
            let path = self.segment_path(index);
            if !path.exists() {
                continue;
            }

            let bytes = fs::read(&path).map_err(|e| CacheError::io(&path, e))?;
            let file: SegmentFile = match serde_json::from_slice(&bytes) {
                Ok(file) => file,
                Err(e) => {
                    warn!("Discarding unreadable cache segment {}: {}", path.display(), e);
                    state.dirty.insert(index);
                    continue;
                }
            };

            if !self.header_matches(&file, index) {
                warn!(
                    "Discarding cache segment {} written as {}@{} for {}",
                    path.display(),
                    file.schema_id,
                    file.schema_version,
                    file.namespace
                );
                state.dirty.insert(index);
                continue;
            }

            let before = file.entries.len();
            let live: BTreeMap<String, StoredEntry> = file
                .entries
                .into_iter()
                .filter(|(_, entry)| !self.is_expired(entry, now))
                .collect();
            if live.len() != before {
                state.dirty.insert(index);
            }
            restored += live.len();
            state.segments[index as usize] = live;
        }

        debug!("Preloaded {} entries into {}", restored, self.name);
        Ok(())
    }

    fn header_matches(&self, file: &SegmentFile, index: u16) -> bool {
        file.schema_id == SEGMENT_SCHEMA_ID
            && file.schema_version == SEGMENT_SCHEMA_VERSION
            && file.namespace == self.name
            && file.segment == index
            && file.segment_count == self.options.segments
    }

    fn write_segment(&self, index: u16, entries: &BTreeMap<String, StoredEntry>) -> CacheResult<()> {
        let header = SegmentHeaderRef {
            schema_id: SEGMENT_SCHEMA_ID,
            schema_version: SEGMENT_SCHEMA_VERSION,
            namespace: &self.name,
            segment: index,
            segment_count: self.options.segments,
            entries,
        };
        let bytes = serde_json::to_vec(&header).map_err(|source| self.serialization_error(source))?;

        let path = self.segment_path(index);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).map_err(|e| CacheError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| CacheError::io(&path, e))?;
        Ok(())
    }

    /// A deadline past the representable range never arrives.
    fn is_expired(&self, entry: &StoredEntry, now: DateTime<Utc>) -> bool {
        let past = |from: DateTime<Utc>, window: Option<chrono::Duration>| {
            window
                .and_then(|window| from.checked_add_signed(window))
                .is_some_and(|deadline| now >= deadline)
        };
        past(entry.created_at, self.lifespan) || past(entry.last_used, self.max_idle)
    }

    fn segment_of(&self, key: &str) -> u16 {
        let digest = Sha256::digest(key.as_bytes());
        u16::from_be_bytes([digest[0], digest[1]]) % self.options.segments
    }

    fn segment_path(&self, index: u16) -> PathBuf {
        self.dir.join(format!("segment-{:03}.json", index))
    }

    fn serialization_error(&self, source: serde_json::Error) -> CacheError {
        CacheError::Serialization {
            namespace: self.name.clone(),
            source,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn open_state(&self) -> CacheResult<MutexGuard<'_, State>> {
        let state = self.lock_state();
        if state.closed {
            return Err(CacheError::Closed(self.name.clone()));
        }
        Ok(state)
    }
}
