//! Metric instrument factories for the dispatcher.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without an OTLP endpoint the global provider is a no-op, so recording is
//! always safe.

use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};

fn meter() -> Meter {
    opentelemetry::global::meter("switchboard")
}

/// Counter: calls accepted by `submit`.
pub fn calls_submitted() -> Counter<u64> {
    meter()
        .u64_counter("switchboard.calls.submitted")
        .with_description("Number of calls accepted for dispatch")
        .build()
}

/// Counter: calls paired with a worker.
/// Labels: `role`.
pub fn calls_assigned() -> Counter<u64> {
    meter()
        .u64_counter("switchboard.calls.assigned")
        .with_description("Number of call assignments")
        .build()
}

/// Counter: calls handled successfully.
/// Labels: `role`.
pub fn calls_completed() -> Counter<u64> {
    meter()
        .u64_counter("switchboard.calls.completed")
        .with_description("Number of calls handled successfully")
        .build()
}

/// Counter: failed handling attempts.
/// Labels: `role`, `requeued` ("true" | "false").
pub fn calls_failed() -> Counter<u64> {
    meter()
        .u64_counter("switchboard.calls.failed")
        .with_description("Number of failed handling attempts")
        .build()
}

/// Gauge-like counter: calls currently in flight.
pub fn calls_in_flight() -> UpDownCounter<i64> {
    meter()
        .i64_up_down_counter("switchboard.calls.in_flight")
        .with_description("Calls currently being handled")
        .build()
}

/// Histogram: handling duration in milliseconds.
/// Labels: `role`, `outcome` ("completed" | "failed").
pub fn handle_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("switchboard.call.handle_duration_ms")
        .with_description("Call handling duration in milliseconds")
        .with_unit("ms")
        .build()
}
