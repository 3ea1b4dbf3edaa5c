//! Call handling span helpers.

use tracing::Span;
use uuid::Uuid;

use crate::model::{CallId, Worker};

/// Start a span covering one handling attempt of a call.
///
/// The `call.outcome` field is declared empty and filled by
/// [`record_call_outcome`].
pub fn start_call_span(dispatcher: &Uuid, call: CallId, worker: &Worker, attempt: u32) -> Span {
    tracing::info_span!(
        "call.handle",
        "dispatcher.id" = %dispatcher,
        "call.id" = call.0,
        "call.attempt" = attempt,
        "worker.id" = worker.id,
        "worker.role" = %worker.role,
        "call.outcome" = tracing::field::Empty,
    )
}

/// Record how a handling attempt ended on its span.
pub fn record_call_outcome(span: &Span, outcome: &str) {
    span.record("call.outcome", outcome);
    span.in_scope(|| {
        tracing::debug!(outcome, "call_handled");
    });
}
