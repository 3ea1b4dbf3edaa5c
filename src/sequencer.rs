//! Call id generation.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::model::CallId;

/// Hands out unique, monotonically increasing call ids starting at 1.
///
/// Safe to share between tasks behind an `Arc`.
#[derive(Debug, Default)]
pub struct CallSequencer {
    issued: AtomicU64,
}

impl CallSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> CallId {
        CallId(self.issued.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Reserve `n` consecutive ids in one step.
    pub fn reserve(&self, n: usize) -> Vec<CallId> {
        let n = n as u64;
        let start = self.issued.fetch_add(n, Ordering::Relaxed) + 1;
        (start..start + n).map(CallId).collect()
    }

    /// How many ids have been handed out.
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }
}
