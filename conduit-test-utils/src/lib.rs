//! Mock broker, mock HTTP endpoints, and scenario builders shared by every
//! Conduit crate's integration tests.

pub mod broker;
pub mod http;
pub mod notify;

pub use broker::{MockBroker, MockBrokerConfig};
pub use http::MockTelegramApi;
pub use notify::RecordingNotifier;
