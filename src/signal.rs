//! One-shot "all work done" gate.

use tokio::sync::watch;

use crate::error::{Error, Result};

/// Resolves once, wakes every waiter, and stays resolved.
#[derive(Debug)]
pub struct CompletionSignal {
    tx: watch::Sender<bool>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Resolve the signal. Returns true only for the call that resolved it.
    pub fn resolve(&self) -> bool {
        self.tx.send_if_modified(|resolved| {
            if *resolved {
                false
            } else {
                *resolved = true;
                true
            }
        })
    }

    pub fn is_resolved(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the signal is resolved. Returns immediately if it already is.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.tx.subscribe();
        rx.wait_for(|resolved| *resolved)
            .await
            .map(|_| ())
            .map_err(|_| Error::DispatcherStopped)
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}
