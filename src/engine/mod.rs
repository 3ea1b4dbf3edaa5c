//! Dispatch engine: the serialized dispatch loop and the call-handling seam.

pub mod dispatch;
pub mod handler;

pub use dispatch::{DispatchConfig, DispatchStats, Dispatcher};
pub use handler::{CallHandler, SimulatedHandler};
