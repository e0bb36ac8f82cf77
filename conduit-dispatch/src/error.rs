use thiserror::Error;

/// Errors `SignalDispatcher::enqueue` can return. Reconciliation failures
/// never surface here — they're handled inside the worker and reported via
/// `Notifier`, per spec §4.7/§7.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown account: {0}")]
    UnknownAccount(String),
}
