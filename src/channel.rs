//! Checksum channel between fingerprinting and matching.
//!
//! The fingerprinter publishes each digest as soon as it is computed. The
//! matcher consumes them while fingerprinting is still running. The stream
//! ends once every sink clone has been finished or dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use da_model::{ChecksumMap, DigestAlgorithm};

/// One file digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumEntry {
    pub algorithm: DigestAlgorithm,
    pub value: String,
    pub filename: String,
}

impl ChecksumEntry {
    pub fn new(algorithm: DigestAlgorithm, value: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            algorithm,
            value: value.into(),
            filename: filename.into(),
        }
    }
}

/// Producer end. Clone it to publish from several threads.
#[derive(Debug, Clone)]
pub struct ChecksumSink {
    tx: Sender<ChecksumEntry>,
    published: Arc<AtomicU64>,
}

impl ChecksumSink {
    /// Returns false once the consumer is gone.
    pub fn publish(&self, entry: ChecksumEntry) -> bool {
        let sent = self.tx.send(entry).is_ok();
        if sent {
            self.published.fetch_add(1, Ordering::Relaxed);
        }
        sent
    }

    /// Entries published through any clone of this sink.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Close this clone of the sink.
    pub fn finish(self) {}
}

/// Result of a bounded wait on the stream.
#[derive(Debug, PartialEq, Eq)]
pub enum StreamItem {
    Entry(ChecksumEntry),
    Pending,
    Closed,
}

/// Consumer end.
#[derive(Debug)]
pub struct ChecksumStream {
    rx: Receiver<ChecksumEntry>,
}

impl ChecksumStream {
    /// Block until the next entry, or `None` when every sink is closed.
    pub fn recv(&self) -> Option<ChecksumEntry> {
        self.rx.recv().ok()
    }

    /// Wait at most `timeout`, so callers can poll an interrupt flag.
    pub fn recv_timeout(&self, timeout: Duration) -> StreamItem {
        match self.rx.recv_timeout(timeout) {
            Ok(entry) => StreamItem::Entry(entry),
            Err(RecvTimeoutError::Timeout) => StreamItem::Pending,
            Err(RecvTimeoutError::Disconnected) => StreamItem::Closed,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = ChecksumEntry> + '_ {
        self.rx.iter()
    }

    /// Drain the stream into a checksum map.
    pub fn collect_map(self) -> ChecksumMap {
        let mut map = ChecksumMap::new();
        for entry in self.rx.iter() {
            map.entry(entry.algorithm)
                .or_default()
                .entry(entry.value)
                .or_default()
                .insert(entry.filename);
        }
        map
    }
}

pub fn checksum_channel() -> (ChecksumSink, ChecksumStream) {
    let (tx, rx) = mpsc::channel();
    (
        ChecksumSink {
            tx,
            published: Arc::new(AtomicU64::new(0)),
        },
        ChecksumStream { rx },
    )
}
