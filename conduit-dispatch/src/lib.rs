//! The per-signal orchestrator and per-key serialized signal queue (spec
//! §4.4, §4.7) — the dispatcher half of Conduit's core.

pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod processor;

pub use dispatcher::{QueueSnapshot, QueuedSignal, SignalDispatcher, DEFAULT_WORKER_LIMIT};
pub use error::DispatchError;
pub use processor::SignalProcessor;
