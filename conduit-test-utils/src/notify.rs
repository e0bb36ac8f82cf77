use std::sync::Arc;

use async_trait::async_trait;
use conduit_notify::{NotificationReport, Notifier};
use tokio::sync::Mutex;

/// Captures every report instead of delivering it, for assertions in tests.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    reports: Arc<Mutex<Vec<NotificationReport>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn reports(&self) -> Vec<NotificationReport> {
        self.reports.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.reports.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, report: &NotificationReport) -> bool {
        self.reports.lock().await.push(report.clone());
        true
    }
}
