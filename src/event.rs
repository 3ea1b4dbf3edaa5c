//! Structured events recorded by the dispatcher on every assignment,
//! completion and failure.
//!
//! The log is append-only. Its order is the authoritative order in which the
//! dispatch loop observed things happen, which is not necessarily the order
//! in which calls were submitted.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::model::{CallId, Worker};

/// A structured event recorded by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number, starting at 1. Consumers can detect gaps.
    pub seq: u64,
    /// When this event occurred.
    pub timestamp: DateTime<Utc>,
    /// The worker involved.
    pub worker: Worker,
    /// The call involved.
    pub call: CallId,
    /// What happened.
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Assigned,
    Completed,
    Failed {
        attempt: u32,
        error: String,
        /// Whether the call went back to the pending queue for another try.
        requeued: bool,
    },
}

impl EventKind {
    /// Does this event end the call's life in the dispatcher?
    pub fn is_terminal(&self) -> bool {
        match self {
            EventKind::Assigned => false,
            EventKind::Completed => true,
            EventKind::Failed { requeued, .. } => !requeued,
        }
    }
}

/// Append-only event log.
///
/// The dispatch loop is the only writer; readers take consistent snapshots.
#[derive(Debug, Default)]
pub struct EventLog {
    events: RwLock<Vec<Event>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and return a copy of it.
    pub fn record(&self, worker: Worker, call: CallId, kind: EventKind) -> Event {
        let mut events = self.events.write();
        let event = Event {
            seq: events.len() as u64 + 1,
            timestamp: Utc::now(),
            worker,
            call,
            kind,
        };
        events.push(event.clone());
        event
    }

    /// All events recorded so far, in log order.
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Events with a sequence number greater than `since_seq`.
    pub fn since(&self, since_seq: u64) -> Vec<Event> {
        let events = self.events.read();
        let start = (since_seq as usize).min(events.len());
        events[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}
