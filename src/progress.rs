//! Progress events emitted by the two analysis phases.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// The two concurrently scheduled phases of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Fingerprint,
    Match,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Fingerprint => "fingerprint",
            Phase::Match => "match",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The phase knows how many units of work it has.
    Started { phase: Phase, total: u64 },
    /// `done` units completed so far.
    Advanced { phase: Phase, done: u64 },
    Finished { phase: Phase },
}

impl ProgressEvent {
    pub fn phase(&self) -> Phase {
        match self {
            ProgressEvent::Started { phase, .. }
            | ProgressEvent::Advanced { phase, .. }
            | ProgressEvent::Finished { phase } => *phase,
        }
    }
}

/// Receives progress from either phase. Callbacks from the two phases may
/// interleave in any order.
pub trait ProgressListener: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

/// Fans each event out to every registered listener.
#[derive(Clone, Default)]
pub struct ListenerSet {
    listeners: Vec<Arc<dyn ProgressListener>>,
}

impl ListenerSet {
    pub fn new(listeners: Vec<Arc<dyn ProgressListener>>) -> Self {
        Self { listeners }
    }

    pub fn push(&mut self, listener: Arc<dyn ProgressListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl ProgressListener for ListenerSet {
    fn on_event(&self, event: &ProgressEvent) {
        for listener in &self.listeners {
            listener.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ProgressEvent>>);

    impl ProgressListener for Recorder {
        fn on_event(&self, event: &ProgressEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_listener_set_fans_out() {
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let set = ListenerSet::new(vec![a.clone(), b.clone()]);

        set.on_event(&ProgressEvent::Finished { phase: Phase::Match });

        assert_eq!(a.0.lock().unwrap().len(), 1);
        assert_eq!(b.0.lock().unwrap()[0].phase(), Phase::Match);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let json = serde_json::to_value(ProgressEvent::Started {
            phase: Phase::Fingerprint,
            total: 3,
        })
        .unwrap();
        assert_eq!(json["event"], "started");
        assert_eq!(json["phase"], "fingerprint");
        assert_eq!(json["total"], 3);
    }
}
