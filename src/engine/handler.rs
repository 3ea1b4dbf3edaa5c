//! The call-handling seam.
//!
//! The dispatcher only knows that handling a call takes some time and then
//! either succeeds or fails. What a worker actually does with the call lives
//! behind [`CallHandler`].

use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{CallId, Worker};

/// Handles one call on behalf of a worker.
///
/// Each in-flight call runs `handle` on its own tokio task. Returning an
/// error, panicking, or exceeding the dispatcher's handle timeout all count
/// as a failed attempt.
#[async_trait]
pub trait CallHandler: Send + Sync + 'static {
    async fn handle(&self, worker: Worker, call: CallId) -> Result<()>;
}

/// Stand-in for real telephony work: sleeps for a random duration.
#[derive(Debug, Clone)]
pub struct SimulatedHandler {
    min: Duration,
    max: Duration,
    failure_rate: f64,
}

impl SimulatedHandler {
    /// Sleep uniformly between `min` and `max`. `max` below `min` is raised to `min`.
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            failure_rate: 0.0,
        }
    }

    /// Fail this fraction of calls (clamped to 0.0..=1.0) after the sleep.
    /// A non-finite rate disables failures.
    pub fn failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = if rate.is_finite() {
            rate.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    fn roll(&self) -> (Duration, bool) {
        let mut rng = rand::thread_rng();
        let min_ms = self.min.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        let wait = Duration::from_millis(rng.gen_range(min_ms..=max_ms));
        (wait, rng.gen_bool(self.failure_rate))
    }
}

impl Default for SimulatedHandler {
    /// 50 to 100 ms per call, never failing.
    fn default() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_millis(100))
    }
}

#[async_trait]
impl CallHandler for SimulatedHandler {
    async fn handle(&self, worker: Worker, call: CallId) -> Result<()> {
        let (wait, fail) = self.roll();
        debug!(%worker, %call, wait_ms = wait.as_millis() as u64, "handling call");
        tokio::time::sleep(wait).await;

        if fail {
            Err(Error::HandlingFailed {
                call,
                reason: "simulated line drop".to_string(),
            })
        } else {
            Ok(())
        }
    }
}
