use std::collections::HashMap;

use chrono::Duration;
use conduit_core::{EnsureOrder, ErrorCode, Instrument, Position, PositionState, Signal, StopOrder};
use rust_decimal::Decimal;

/// Per-order slippage, keyed by `EnsureOrder::order_id` (spec §4.5).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlippageEntry {
    /// Positive = adverse (worse than the signal's advertised entry price).
    pub price: Option<Decimal>,
    pub time: Option<Duration>,
}

/// The full report a completed (order-issuing) reconciliation produces,
/// handed to `SignalProcessor.Process` callers and `Notifier::notify`
/// (spec §4.4).
#[derive(Debug, Clone)]
pub struct SignalReport {
    pub account: String,
    pub signal: Signal,
    pub init_position: Option<Position>,
    pub orders: Vec<EnsureOrder>,
    pub slippage: HashMap<String, SlippageEntry>,
    pub profit: Option<Decimal>,
    pub final_position: Option<Position>,
    pub current_stops: Vec<StopOrder>,
}

/// Shorter report composed when `Process` fails, mirroring the original
/// implementation's distinct error-notification shape (`_send_error_notification`).
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub account: String,
    pub instrument: Option<Instrument>,
    pub position: Option<PositionState>,
    pub code: ErrorCode,
    pub message: String,
}

/// What a `Notifier` is asked to deliver: either a completed reconciliation
/// or a failure, each formatted differently per channel.
#[derive(Debug, Clone)]
pub enum NotificationReport {
    Success(SignalReport),
    Failure(ErrorReport),
}
