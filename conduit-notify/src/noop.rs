use async_trait::async_trait;
use tracing::debug;

use crate::{NotificationReport, Notifier};

/// A `Notifier` that discards every report. Used in tests and for accounts
/// that haven't configured a real channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, report: &NotificationReport) -> bool {
        debug!(?report, "noop notifier discarding report");
        true
    }
}
