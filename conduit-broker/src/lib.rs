//! Broker abstraction, position sizing, and the position-reconciliation
//! state machine shared by every Conduit broker connector.

pub mod adapter;
pub mod reconciler;
pub mod sizing;

pub use adapter::{BrokerAdapter, DEFAULT_SETTLEMENT_ATTEMPTS, DEFAULT_SETTLEMENT_DELAY};
pub use reconciler::Reconciler;
pub use sizing::calculate_position_size;
