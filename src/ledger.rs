//! Pending queue and in-flight set.
//!
//! A call is in at most one of the two at any time. The in-flight set is
//! bounded: `mark_in_flight` refuses to go past capacity, and the dispatcher
//! checks `has_capacity` before pulling the next pending call, so excess
//! calls simply wait in the pending queue.

use std::collections::{HashSet, VecDeque};

use crate::error::{Error, Result};
use crate::model::CallId;

/// Default bound on concurrently handled calls.
pub const DEFAULT_CAPACITY: usize = 10;

#[derive(Debug)]
pub struct CallLedger {
    pending: VecDeque<CallId>,
    in_flight: HashSet<CallId>,
    capacity: usize,
}

impl CallLedger {
    /// Create a ledger. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            in_flight: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a call to the back of the pending queue.
    pub fn enqueue(&mut self, call: CallId) {
        self.pending.push_back(call);
    }

    /// Put a call back at the front of the pending queue (retry).
    pub fn requeue(&mut self, call: CallId) {
        self.pending.push_front(call);
    }

    /// Remove and return the oldest pending call.
    pub fn try_dequeue(&mut self) -> Option<CallId> {
        self.pending.pop_front()
    }

    pub fn mark_in_flight(&mut self, call: CallId) -> Result<()> {
        if !self.has_capacity() {
            return Err(Error::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        self.in_flight.insert(call);
        Ok(())
    }

    /// Remove a call from the in-flight set. Returns false if it was not there.
    pub fn mark_complete(&mut self, call: CallId) -> bool {
        self.in_flight.remove(&call)
    }

    pub fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }

    pub fn has_capacity(&self) -> bool {
        self.in_flight.len() < self.capacity
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn is_in_flight(&self, call: CallId) -> bool {
        self.in_flight.contains(&call)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for CallLedger {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
