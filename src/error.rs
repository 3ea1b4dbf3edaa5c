//! Error types for switchboard.

use thiserror::Error;

use crate::model::CallId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("handling failed for call {call}: {reason}")]
    HandlingFailed { call: CallId, reason: String },

    #[error("in-flight capacity of {capacity} calls exceeded")]
    CapacityExceeded { capacity: usize },

    #[error("unknown role: {0:?}")]
    UnknownRole(String),

    #[error("completion signal already resolved; dispatcher no longer accepts calls")]
    Sealed,

    #[error("dispatch loop has stopped")]
    DispatcherStopped,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
