//! Dispatch loop: pairs pending calls with workers and reacts to completions.
//!
//! All bookkeeping (pending queue, in-flight set, worker registry, event log
//! writes, the drain decision and the completion signal) is owned by a single
//! tokio task. [`Dispatcher`] handles talk to it over a command channel;
//! handling tasks report back over a completion channel. Because both kinds
//! of message are processed one at a time, a submission can never interleave
//! with a drain check.

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, UpDownCounter};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinError;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use super::handler::CallHandler;
use crate::error::{Error, Result};
use crate::event::{Event, EventKind, EventLog};
use crate::ledger::{CallLedger, DEFAULT_CAPACITY};
use crate::model::{CallId, Role, Worker};
use crate::registry::{Lease, WorkerRegistry};
use crate::sequencer::CallSequencer;
use crate::signal::CompletionSignal;
use crate::telemetry::call::{record_call_outcome, start_call_span};
use crate::telemetry::metrics;

/// Configuration for the dispatch loop.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum number of calls handled at once.
    pub capacity: usize,
    /// Handling attempts per call before it is given up as failed.
    pub max_attempts: u32,
    /// Attempts running longer than this are aborted and count as failed.
    pub handle_timeout: Option<Duration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_attempts: 3,
            handle_timeout: None,
        }
    }
}

/// Point-in-time view of the dispatch state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchStats {
    pub pending: usize,
    pub in_flight: usize,
    pub capacity: usize,
    pub available_workers: usize,
    pub registered_workers: usize,
    pub calls_issued: u64,
    pub events: usize,
    pub resolved: bool,
}

enum Command {
    AddWorker(Worker),
    Submit {
        count: usize,
        reply: oneshot::Sender<Result<Vec<CallId>>>,
    },
    Stats {
        reply: oneshot::Sender<DispatchStats>,
    },
}

/// Sent by a handling task when its attempt is over.
struct Finished {
    call: CallId,
    lease: Lease,
    attempt: u32,
    result: Result<()>,
    elapsed: Duration,
}

/// Handle to a running dispatch loop. Cheap to clone.
///
/// The loop keeps running while any handle is alive or any call is still
/// in flight.
#[derive(Clone)]
pub struct Dispatcher {
    id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    sequencer: Arc<CallSequencer>,
    events: Arc<EventLog>,
    signal: Arc<CompletionSignal>,
}

impl Dispatcher {
    /// Start a dispatch loop on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(config: DispatchConfig, handler: Arc<dyn CallHandler>) -> Self {
        let id = Uuid::new_v4();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let sequencer = Arc::new(CallSequencer::new());
        let events = Arc::new(EventLog::new());
        let signal = Arc::new(CompletionSignal::new());

        let dispatch_loop = DispatchLoop {
            id,
            max_attempts: config.max_attempts.max(1),
            handle_timeout: config.handle_timeout,
            handler,
            ledger: CallLedger::new(config.capacity),
            registry: WorkerRegistry::new(),
            worker_ids: HashSet::new(),
            attempts: HashMap::new(),
            accepted: false,
            sequencer: Arc::clone(&sequencer),
            events: Arc::clone(&events),
            signal: Arc::clone(&signal),
            commands: commands_rx,
            completions: completions_rx,
            completions_tx,
            instruments: Instruments::new(),
        };

        let span = tracing::info_span!("dispatch.loop", "dispatcher.id" = %id);
        tokio::spawn(dispatch_loop.run().instrument(span));

        Self {
            id,
            commands: commands_tx,
            sequencer,
            events,
            signal,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Register a worker by role name ("director", "supervisor", "operator").
    pub fn add_worker(&self, id: u32, role: &str) -> Result<()> {
        let role: Role = role.parse()?;
        self.add(Worker::new(id, role))
    }

    /// Register a worker. Duplicate ids are accepted.
    pub fn add(&self, worker: Worker) -> Result<()> {
        self.send(Command::AddWorker(worker))
    }

    /// Enqueue `count` new calls without waiting for them.
    ///
    /// Returns the ids given to the calls, in submission order.
    pub async fn submit(&self, count: usize) -> Result<Vec<CallId>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit { count, reply })?;
        rx.await.map_err(|_| Error::DispatcherStopped)?
    }

    /// Enqueue `count` new calls and wait until every known call is done.
    pub async fn submit_batch(&self, count: usize) -> Result<Vec<CallId>> {
        let calls = self.submit(count).await?;
        self.await_completion().await?;
        Ok(calls)
    }

    /// Wait for the completion signal without submitting anything.
    pub async fn await_completion(&self) -> Result<()> {
        self.signal.wait().await
    }

    pub fn is_resolved(&self) -> bool {
        self.signal.is_resolved()
    }

    /// Every event recorded so far, in log order.
    pub fn snapshot_events(&self) -> Vec<Event> {
        self.events.snapshot()
    }

    /// Events recorded after sequence number `since_seq`.
    pub fn events_since(&self, since_seq: u64) -> Vec<Event> {
        self.events.since(since_seq)
    }

    /// Number of call ids handed out so far.
    pub fn calls_issued(&self) -> u64 {
        self.sequencer.issued()
    }

    pub async fn stats(&self) -> Result<DispatchStats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply })?;
        rx.await.map_err(|_| Error::DispatcherStopped)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::DispatcherStopped)
    }
}

struct Instruments {
    submitted: Counter<u64>,
    assigned: Counter<u64>,
    completed: Counter<u64>,
    failed: Counter<u64>,
    in_flight: UpDownCounter<i64>,
    duration_ms: Histogram<f64>,
}

impl Instruments {
    fn new() -> Self {
        Self {
            submitted: metrics::calls_submitted(),
            assigned: metrics::calls_assigned(),
            completed: metrics::calls_completed(),
            failed: metrics::calls_failed(),
            in_flight: metrics::calls_in_flight(),
            duration_ms: metrics::handle_duration_ms(),
        }
    }
}

/// The single owner of all dispatch state.
struct DispatchLoop {
    id: Uuid,
    max_attempts: u32,
    handle_timeout: Option<Duration>,
    handler: Arc<dyn CallHandler>,
    ledger: CallLedger,
    registry: WorkerRegistry,
    worker_ids: HashSet<u32>,
    /// Attempts started per unfinished call.
    attempts: HashMap<CallId, u32>,
    /// Has any submission been accepted? The signal never resolves before one.
    accepted: bool,
    sequencer: Arc<CallSequencer>,
    events: Arc<EventLog>,
    signal: Arc<CompletionSignal>,
    commands: mpsc::UnboundedReceiver<Command>,
    completions: mpsc::UnboundedReceiver<Finished>,
    completions_tx: mpsc::UnboundedSender<Finished>,
    instruments: Instruments,
}

impl DispatchLoop {
    async fn run(mut self) {
        debug!(capacity = self.ledger.capacity(), "dispatch loop started");
        let mut commands_open = true;

        loop {
            if !commands_open && self.ledger.in_flight_len() == 0 {
                break;
            }

            tokio::select! {
                command = self.commands.recv(), if commands_open => match command {
                    Some(command) => self.on_command(command),
                    None => commands_open = false,
                },
                Some(finished) = self.completions.recv() => self.on_finished(finished),
            }
        }

        if self.ledger.has_pending() {
            warn!(
                pending = self.ledger.pending_len(),
                "dispatch loop stopped with unassigned calls"
            );
        }
        debug!("dispatch loop stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::AddWorker(worker) => {
                if !self.worker_ids.insert(worker.id) {
                    warn!(worker_id = worker.id, "duplicate worker id registered");
                }
                let rank = self.registry.add(worker);
                debug!(%worker, rank, "worker registered");
                self.drain();
            }
            Command::Submit { count, reply } => {
                let _ = reply.send(self.accept(count));
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn accept(&mut self, count: usize) -> Result<Vec<CallId>> {
        // An empty batch adds no work, so it cannot undo a resolved signal.
        if count == 0 && self.signal.is_resolved() {
            return Ok(Vec::new());
        }
        if self.signal.is_resolved() {
            return Err(Error::Sealed);
        }
        self.accepted = true;

        let calls = self.sequencer.reserve(count);
        for &call in &calls {
            self.ledger.enqueue(call);
            self.drain();
        }
        self.instruments.submitted.add(count as u64, &[]);
        info!(
            count,
            first = calls.first().map(|c| c.0),
            last = calls.last().map(|c| c.0),
            "calls submitted"
        );

        self.resolve_if_drained();
        Ok(calls)
    }

    /// Assign pending calls while a worker and an in-flight slot are free.
    fn drain(&mut self) {
        while self.ledger.has_pending() && self.ledger.has_capacity() && !self.registry.is_empty() {
            let Some(call) = self.ledger.try_dequeue() else {
                break;
            };
            let Some(lease) = self.registry.take_next() else {
                self.ledger.requeue(call);
                break;
            };
            if let Err(e) = self.ledger.mark_in_flight(call) {
                warn!(%call, error = %e, "cannot mark call in flight");
                self.registry.release(lease);
                self.ledger.requeue(call);
                break;
            }

            let attempt = {
                let n = self.attempts.entry(call).or_insert(0);
                *n += 1;
                *n
            };
            let worker = lease.worker;
            self.events.record(worker, call, EventKind::Assigned);
            self.instruments.assigned.add(1, &[role_label(&worker)]);
            self.instruments.in_flight.add(1, &[]);
            debug!(%call, %worker, attempt, "call assigned");

            self.spawn_attempt(call, lease, attempt);
        }
    }

    fn spawn_attempt(&self, call: CallId, lease: Lease, attempt: u32) {
        let handler = Arc::clone(&self.handler);
        let completions = self.completions_tx.clone();
        let handle_timeout = self.handle_timeout;
        let span = start_call_span(&self.id, call, &lease.worker, attempt);
        let worker = lease.worker;

        tokio::spawn(async move {
            let started = Instant::now();

            // Inner task so a panicking handler surfaces as a JoinError
            // instead of taking the completion message down with it.
            let mut task =
                tokio::spawn(async move { handler.handle(worker, call).await }.instrument(span.clone()));

            let result = match handle_timeout {
                Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                    Ok(joined) => flatten(call, joined),
                    Err(_) => {
                        task.abort();
                        Err(Error::HandlingFailed {
                            call,
                            reason: format!("timed out after {}ms", limit.as_millis()),
                        })
                    }
                },
                None => flatten(call, task.await),
            };

            record_call_outcome(&span, if result.is_ok() { "completed" } else { "failed" });

            // The loop only goes away once nothing is in flight, so this
            // send fails only if the runtime is shutting down.
            let _ = completions.send(Finished {
                call,
                lease,
                attempt,
                result,
                elapsed: started.elapsed(),
            });
        });
    }

    fn on_finished(&mut self, finished: Finished) {
        let Finished {
            call,
            lease,
            attempt,
            result,
            elapsed,
        } = finished;
        let worker = lease.worker;

        self.registry.release(lease);
        self.ledger.mark_complete(call);
        self.instruments.in_flight.add(-1, &[]);
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;

        match result {
            Ok(()) => {
                self.attempts.remove(&call);
                self.events.record(worker, call, EventKind::Completed);
                self.instruments.completed.add(1, &[role_label(&worker)]);
                self.instruments.duration_ms.record(
                    elapsed_ms,
                    &[role_label(&worker), KeyValue::new("outcome", "completed")],
                );
                debug!(%call, %worker, elapsed_ms, "call completed");
            }
            Err(e) => {
                let requeued = attempt < self.max_attempts;
                if requeued {
                    self.ledger.requeue(call);
                } else {
                    self.attempts.remove(&call);
                }
                self.events.record(
                    worker,
                    call,
                    EventKind::Failed {
                        attempt,
                        error: e.to_string(),
                        requeued,
                    },
                );
                self.instruments.failed.add(
                    1,
                    &[role_label(&worker), KeyValue::new("requeued", requeued.to_string())],
                );
                self.instruments.duration_ms.record(
                    elapsed_ms,
                    &[role_label(&worker), KeyValue::new("outcome", "failed")],
                );
                warn!(%call, %worker, attempt, requeued, error = %e, "call handling failed");
            }
        }

        self.drain();
        self.resolve_if_drained();
    }

    fn resolve_if_drained(&self) {
        if self.accepted && self.ledger.is_drained() && self.signal.resolve() {
            info!(
                calls = self.sequencer.issued(),
                events = self.events.len(),
                "all calls handled, completion signal resolved"
            );
        }
    }

    fn stats(&self) -> DispatchStats {
        DispatchStats {
            pending: self.ledger.pending_len(),
            in_flight: self.ledger.in_flight_len(),
            capacity: self.ledger.capacity(),
            available_workers: self.registry.len(),
            registered_workers: self.registry.registered(),
            calls_issued: self.sequencer.issued(),
            events: self.events.len(),
            resolved: self.signal.is_resolved(),
        }
    }
}

fn flatten(call: CallId, joined: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(Error::HandlingFailed {
            call,
            reason: "handler panicked".to_string(),
        }),
        Err(_) => Err(Error::HandlingFailed {
            call,
            reason: "handler task cancelled".to_string(),
        }),
    }
}

fn role_label(worker: &Worker) -> KeyValue {
    KeyValue::new("role", worker.role.to_string())
}
