//! Integration tests for the dispatch engine.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use switchboard::{
    CallHandler, CallId, DispatchConfig, Dispatcher, Error, Event, EventKind, Result, Role,
    SimulatedHandler, Worker,
};
use tokio::sync::{Mutex, watch};
use tokio::time::timeout;

const DEADLINE: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Test handlers
// ---------------------------------------------------------------------------

/// Finishes every call after a fixed delay.
struct Delay(Duration);

#[async_trait]
impl CallHandler for Delay {
    async fn handle(&self, _worker: Worker, _call: CallId) -> Result<()> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

/// Records the peak number of calls handled at once.
#[derive(Default)]
struct ConcurrencyTracker {
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl CallHandler for ConcurrencyTracker {
    async fn handle(&self, _worker: Worker, _call: CallId) -> Result<()> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Blocks every call until the gate opens.
struct Gate(watch::Receiver<bool>);

#[async_trait]
impl CallHandler for Gate {
    async fn handle(&self, _worker: Worker, _call: CallId) -> Result<()> {
        let mut open = self.0.clone();
        open.wait_for(|o| *o).await.ok();
        Ok(())
    }
}

/// Fails the first `failures` attempts of each call in `calls`.
struct Flaky {
    calls: HashSet<CallId>,
    failures: u32,
    seen: Mutex<HashMap<CallId, u32>>,
}

impl Flaky {
    fn new(calls: impl IntoIterator<Item = u64>, failures: u32) -> Self {
        Self {
            calls: calls.into_iter().map(CallId).collect(),
            failures,
            seen: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CallHandler for Flaky {
    async fn handle(&self, _worker: Worker, call: CallId) -> Result<()> {
        if !self.calls.contains(&call) {
            return Ok(());
        }
        let mut seen = self.seen.lock().await;
        let attempts = seen.entry(call).or_insert(0);
        *attempts += 1;
        if *attempts <= self.failures {
            Err(Error::HandlingFailed {
                call,
                reason: format!("dropped on attempt {attempts}"),
            })
        } else {
            Ok(())
        }
    }
}

/// Panics on call 1, completes everything else.
struct PanicsOnFirst;

#[async_trait]
impl CallHandler for PanicsOnFirst {
    async fn handle(&self, _worker: Worker, call: CallId) -> Result<()> {
        if call == CallId(1) {
            panic!("handler blew up on call 1");
        }
        Ok(())
    }
}

/// Never finishes call 1.
struct HangsOnFirst;

#[async_trait]
impl CallHandler for HangsOnFirst {
    async fn handle(&self, _worker: Worker, call: CallId) -> Result<()> {
        if call == CallId(1) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn dispatcher(handler: impl CallHandler, config: DispatchConfig) -> Dispatcher {
    Dispatcher::new(config, Arc::new(handler))
}

fn add_workers(d: &Dispatcher, workers: &[(u32, &str)]) {
    for (id, role) in workers {
        d.add_worker(*id, role).unwrap();
    }
}

fn assigned(events: &[Event]) -> Vec<&Event> {
    events
        .iter()
        .filter(|e| e.kind == EventKind::Assigned)
        .collect()
}

fn count_kind(events: &[Event], call: CallId, pred: impl Fn(&EventKind) -> bool) -> usize {
    events
        .iter()
        .filter(|e| e.call == call && pred(&e.kind))
        .count()
}

// ---------------------------------------------------------------------------
// Assignment order
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reference_roster_assigns_first_calls_by_priority() {
    let d = dispatcher(Delay(Duration::from_millis(20)), DispatchConfig::default());
    add_workers(
        &d,
        &[(1, "director"), (2, "supervisor"), (3, "operator"), (4, "operator")],
    );

    let calls = timeout(DEADLINE, d.submit_batch(10)).await.unwrap().unwrap();
    assert_eq!(calls, (1..=10).map(CallId).collect::<Vec<_>>());

    let events = d.snapshot_events();
    let first: Vec<(u32, u64)> = assigned(&events)
        .iter()
        .take(4)
        .map(|e| (e.worker.id, e.call.0))
        .collect();
    assert_eq!(first, vec![(1, 1), (2, 2), (3, 3), (4, 4)]);

    for call in calls {
        assert_eq!(count_kind(&events, call, |k| *k == EventKind::Assigned), 1);
        assert_eq!(count_kind(&events, call, |k| *k == EventKind::Completed), 1);
    }
    assert_eq!(events.len(), 20);
}

#[tokio::test]
async fn first_assignments_use_distinct_workers() {
    let d = dispatcher(Delay(Duration::from_millis(10)), DispatchConfig::default());
    let mut roster: Vec<(u32, &str)> = (1..=7).map(|id| (id, "operator")).collect();
    roster.extend([(8, "supervisor"), (9, "supervisor"), (10, "director")]);
    add_workers(&d, &roster);

    timeout(DEADLINE, d.submit_batch(20)).await.unwrap().unwrap();

    let events = d.snapshot_events();
    let first_ten: HashSet<u32> = assigned(&events)
        .iter()
        .take(10)
        .map(|e| e.worker.id)
        .collect();
    assert_eq!(first_ten.len(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn assigned_worker_has_best_priority_among_available() {
    let d = dispatcher(Delay(Duration::from_millis(1)), DispatchConfig::default());
    let roster = [
        (1, Role::Operator),
        (2, Role::Operator),
        (3, Role::Operator),
        (4, Role::Director),
        (5, Role::Supervisor),
    ];
    for (id, role) in roster {
        d.add(Worker::new(id, role)).unwrap();
    }

    timeout(DEADLINE, d.submit_batch(50)).await.unwrap().unwrap();

    // Replay the log against a model of the available set, keyed by
    // (priority class, registration order).
    let rank: HashMap<u32, (u8, usize)> = roster
        .iter()
        .enumerate()
        .map(|(i, (id, role))| (*id, (role.priority_class(), i)))
        .collect();
    let mut available: HashSet<u32> = rank.keys().copied().collect();

    for event in d.snapshot_events() {
        match event.kind {
            EventKind::Assigned => {
                let best = available.iter().map(|id| rank[id]).min().unwrap();
                assert_eq!(
                    rank[&event.worker.id], best,
                    "event {} assigned worker {} while a better one was free",
                    event.seq, event.worker.id
                );
                assert!(available.remove(&event.worker.id));
            }
            EventKind::Completed | EventKind::Failed { .. } => {
                assert!(available.insert(event.worker.id));
            }
        }
    }
    assert_eq!(available.len(), roster.len());
}

#[tokio::test]
async fn duplicate_worker_ids_are_accepted() {
    let d = dispatcher(Delay(Duration::from_millis(10)), DispatchConfig::default());
    add_workers(&d, &[(1, "supervisor"), (1, "operator")]);

    timeout(DEADLINE, d.submit_batch(2)).await.unwrap().unwrap();

    let events = d.snapshot_events();
    let roles: Vec<Role> = assigned(&events).iter().map(|e| e.worker.role).collect();
    assert_eq!(roles, vec![Role::Supervisor, Role::Operator]);
    assert!(events.iter().all(|e| e.worker.id == 1));
}

#[tokio::test]
async fn unknown_role_is_rejected() {
    let d = dispatcher(Delay(Duration::ZERO), DispatchConfig::default());

    let err = d.add_worker(1, "janitor").unwrap_err();
    assert!(matches!(err, Error::UnknownRole(ref r) if r == "janitor"));

    d.add_worker(2, "DIRECTOR").unwrap();
    let stats = d.stats().await.unwrap();
    assert_eq!(stats.registered_workers, 1);
}

// ---------------------------------------------------------------------------
// Capacity
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn in_flight_calls_never_exceed_capacity() {
    let tracker = Arc::new(ConcurrencyTracker::default());
    let config = DispatchConfig {
        capacity: 3,
        ..DispatchConfig::default()
    };
    let d = Dispatcher::new(config, tracker.clone());
    let roster: Vec<(u32, &str)> = (1..=8).map(|id| (id, "operator")).collect();
    add_workers(&d, &roster);

    timeout(DEADLINE, d.submit_batch(40)).await.unwrap().unwrap();

    let peak = tracker.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {peak} exceeded capacity");

    // Replay: assignments minus terminal-or-retry events never exceed the bound.
    let mut in_flight = 0usize;
    for event in d.snapshot_events() {
        match event.kind {
            EventKind::Assigned => in_flight += 1,
            _ => in_flight -= 1,
        }
        assert!(in_flight <= 3);
    }
}

#[tokio::test]
async fn calls_wait_in_queue_until_a_worker_joins() {
    let d = dispatcher(Delay(Duration::from_millis(5)), DispatchConfig::default());

    let calls = d.submit(3).await.unwrap();
    assert_eq!(calls.len(), 3);

    let stats = d.stats().await.unwrap();
    assert_eq!(stats.pending, 3);
    assert_eq!(stats.in_flight, 0);
    assert!(!stats.resolved);

    d.add_worker(9, "operator").unwrap();
    timeout(DEADLINE, d.await_completion()).await.unwrap().unwrap();

    let events = d.snapshot_events();
    for call in calls {
        assert_eq!(count_kind(&events, call, |k| *k == EventKind::Completed), 1);
    }
}

// ---------------------------------------------------------------------------
// Completion signal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_batch_resolves_without_blocking() {
    let d = dispatcher(Delay(Duration::ZERO), DispatchConfig::default());

    let calls = timeout(Duration::from_secs(1), d.submit_batch(0))
        .await
        .expect("empty batch must not block")
        .unwrap();

    assert!(calls.is_empty());
    assert!(d.is_resolved());
    assert!(d.snapshot_events().is_empty());
}

#[tokio::test]
async fn signal_resolves_once_and_log_stays_stable() {
    let d = dispatcher(Delay(Duration::from_millis(5)), DispatchConfig::default());
    add_workers(&d, &[(1, "director"), (2, "operator")]);

    timeout(DEADLINE, d.submit_batch(6)).await.unwrap().unwrap();

    let first = d.snapshot_events();
    timeout(Duration::from_secs(1), d.await_completion())
        .await
        .unwrap()
        .unwrap();
    let second = d.snapshot_events();
    assert_eq!(first, second);

    // Resolved dispatchers refuse new work rather than un-resolving.
    assert!(matches!(d.submit_batch(1).await, Err(Error::Sealed)));
    assert_eq!(d.snapshot_events(), first);
    assert_eq!(d.calls_issued(), 6);
}

#[tokio::test]
async fn empty_batch_after_resolution_is_a_no_op() {
    let d = dispatcher(Delay(Duration::from_millis(5)), DispatchConfig::default());
    add_workers(&d, &[(1, "operator")]);

    timeout(DEADLINE, d.submit_batch(3)).await.unwrap().unwrap();
    let before = d.snapshot_events();

    let calls = timeout(Duration::from_secs(1), d.submit_batch(0))
        .await
        .expect("empty batch must not block")
        .unwrap();

    assert!(calls.is_empty());
    assert!(d.is_resolved());
    assert_eq!(d.calls_issued(), 3);
    assert_eq!(d.snapshot_events(), before);
}

#[tokio::test]
async fn external_waiter_sees_every_call_done() {
    let d = dispatcher(Delay(Duration::from_millis(10)), DispatchConfig::default());
    add_workers(&d, &[(1, "supervisor"), (2, "operator")]);

    let waiter = {
        let d = d.clone();
        tokio::spawn(async move {
            d.await_completion().await.unwrap();
            d.snapshot_events()
        })
    };

    let calls = d.submit(5).await.unwrap();
    let events = timeout(DEADLINE, waiter).await.unwrap().unwrap();

    for call in calls {
        assert_eq!(count_kind(&events, call, |k| *k == EventKind::Completed), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_get_unique_ids_and_all_complete() {
    let (open, gate) = watch::channel(false);
    let d = dispatcher(Gate(gate), DispatchConfig::default());
    let roster: Vec<(u32, &str)> = (1..=4).map(|id| (id, "operator")).collect();
    add_workers(&d, &roster);

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let d = d.clone();
        tasks.push(tokio::spawn(async move { d.submit(25).await.unwrap() }));
    }
    let mut ids = HashSet::new();
    for task in tasks {
        ids.extend(task.await.unwrap());
    }
    assert_eq!(ids.len(), 100);
    assert_eq!(ids.iter().map(|c| c.0).max(), Some(100));
    assert!(!d.is_resolved());

    open.send(true).unwrap();
    timeout(DEADLINE, d.await_completion()).await.unwrap().unwrap();

    let events = d.snapshot_events();
    let completed: HashSet<CallId> = events
        .iter()
        .filter(|e| e.kind == EventKind::Completed)
        .map(|e| e.call)
        .collect();
    assert_eq!(completed, ids);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_attempts_are_retried_until_success() {
    let d = dispatcher(Flaky::new([1, 3, 5], 1), DispatchConfig::default());
    add_workers(&d, &[(1, "director"), (2, "operator")]);

    timeout(DEADLINE, d.submit_batch(6)).await.unwrap().unwrap();

    let events = d.snapshot_events();
    for call in 1..=6 {
        let call = CallId(call);
        assert_eq!(count_kind(&events, call, |k| *k == EventKind::Completed), 1);
    }
    for call in [1, 3, 5] {
        let retried = count_kind(&events, CallId(call), |k| {
            matches!(k, EventKind::Failed { requeued: true, attempt: 1, .. })
        });
        assert_eq!(retried, 1);
        assert_eq!(count_kind(&events, CallId(call), |k| *k == EventKind::Assigned), 2);
    }
}

#[tokio::test]
async fn exhausted_attempts_are_terminal_and_release_the_worker() {
    let config = DispatchConfig {
        max_attempts: 2,
        ..DispatchConfig::default()
    };
    let d = dispatcher(Flaky::new([2], u32::MAX), config);
    add_workers(&d, &[(1, "operator")]);

    timeout(DEADLINE, d.submit_batch(3)).await.unwrap().unwrap();

    let events = d.snapshot_events();
    let failures: Vec<&EventKind> = events
        .iter()
        .filter(|e| e.call == CallId(2))
        .map(|e| &e.kind)
        .filter(|k| matches!(k, EventKind::Failed { .. }))
        .collect();
    assert_eq!(failures.len(), 2);
    assert!(!failures[0].is_terminal());
    assert!(failures[1].is_terminal());
    assert_eq!(count_kind(&events, CallId(2), |k| *k == EventKind::Completed), 0);

    let stats = d.stats().await.unwrap();
    assert_eq!(stats.available_workers, 1);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.in_flight, 0);
    assert!(stats.resolved);
}

#[tokio::test]
async fn panicking_handler_counts_as_failed_attempt() {
    let config = DispatchConfig {
        max_attempts: 1,
        ..DispatchConfig::default()
    };
    let d = dispatcher(PanicsOnFirst, config);
    add_workers(&d, &[(1, "operator")]);

    timeout(DEADLINE, d.submit_batch(2)).await.unwrap().unwrap();

    let events = d.snapshot_events();
    let failed = events
        .iter()
        .find(|e| e.call == CallId(1) && matches!(e.kind, EventKind::Failed { .. }))
        .expect("call 1 should fail");
    match &failed.kind {
        EventKind::Failed { error, requeued, .. } => {
            assert!(error.contains("panicked"), "unexpected error: {error}");
            assert!(!requeued);
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    assert_eq!(count_kind(&events, CallId(2), |k| *k == EventKind::Completed), 1);
}

#[tokio::test]
async fn slow_attempts_time_out() {
    let config = DispatchConfig {
        max_attempts: 1,
        handle_timeout: Some(Duration::from_millis(50)),
        ..DispatchConfig::default()
    };
    let d = dispatcher(HangsOnFirst, config);
    add_workers(&d, &[(1, "operator"), (2, "operator")]);

    timeout(DEADLINE, d.submit_batch(3)).await.unwrap().unwrap();

    let events = d.snapshot_events();
    assert!(events.iter().any(|e| {
        e.call == CallId(1)
            && matches!(&e.kind, EventKind::Failed { error, .. } if error.contains("timed out"))
    }));
    assert_eq!(count_kind(&events, CallId(3), |k| *k == EventKind::Completed), 1);
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stats_after_completion_show_idle_dispatcher() {
    let d = dispatcher(Delay(Duration::from_millis(2)), DispatchConfig::default());
    add_workers(&d, &[(1, "director"), (2, "supervisor"), (3, "operator")]);

    timeout(DEADLINE, d.submit_batch(12)).await.unwrap().unwrap();

    let stats = d.stats().await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.capacity, 10);
    assert_eq!(stats.available_workers, 3);
    assert_eq!(stats.registered_workers, 3);
    assert_eq!(stats.calls_issued, 12);
    assert_eq!(stats.events, 24);
    assert!(stats.resolved);

    let tail = d.events_since(20);
    assert_eq!(tail.len(), 4);
    assert_eq!(tail[0].seq, 21);
}

#[tokio::test]
async fn non_finite_failure_rate_never_fails_calls() {
    let handler = SimulatedHandler::new(Duration::from_millis(1), Duration::from_millis(2))
        .failure_rate(f64::NAN);
    let d = dispatcher(handler, DispatchConfig::default());
    add_workers(&d, &[(1, "operator"), (2, "operator")]);

    let calls = timeout(DEADLINE, d.submit_batch(5)).await.unwrap().unwrap();
    let events = d.snapshot_events();

    for call in calls {
        assert_eq!(count_kind(&events, call, |k| *k == EventKind::Completed), 1);
    }
    assert!(
        events
            .iter()
            .all(|e| !matches!(e.kind, EventKind::Failed { .. }))
    );
}
