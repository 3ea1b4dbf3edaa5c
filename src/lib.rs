//! # switchboard
//!
//! Call-center dispatch engine.
//!
//! Calls are queued as they arrive and paired with the available worker of
//! highest precedence (director, then supervisor, then operator). Each call
//! is handled on its own task; when it finishes the worker goes back to the
//! pool and the next pending call is dispatched. Callers can submit a batch
//! and wait for a one-shot signal that fires once nothing is left pending or
//! in flight.

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod ledger;
pub mod model;
pub mod registry;
pub mod roster;
pub mod sequencer;
pub mod signal;
pub mod telemetry;

pub use engine::{CallHandler, DispatchConfig, DispatchStats, Dispatcher, SimulatedHandler};
pub use error::{Error, Result};
pub use event::{Event, EventKind};
pub use model::{CallId, Role, Worker};
