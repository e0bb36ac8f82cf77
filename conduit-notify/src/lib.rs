//! Outbound notification contract and channels for Conduit (spec §4.8).

pub mod noop;
pub mod report;
pub mod telegram;

use async_trait::async_trait;

pub use noop::NoopNotifier;
pub use report::{ErrorReport, NotificationReport, SignalReport, SlippageEntry};
pub use telegram::TelegramNotifier;

/// Sends a structured report to an external channel. Best-effort: a
/// notification failure is logged and swallowed, never propagated, because
/// it must not fail the signal that produced the report (spec §4.8).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, report: &NotificationReport) -> bool;
}
