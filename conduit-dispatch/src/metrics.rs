//! Prometheus surface for the dispatcher, per the ambient observability
//! requirements this codebase always carries regardless of feature scope.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge_vec,
    Histogram, IntCounter, IntCounterVec, IntGaugeVec,
};

pub static SIGNALS_ENQUEUED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "conduit_signals_enqueued_total",
        "Signals accepted into the dispatcher's waiting slot"
    )
    .expect("register conduit_signals_enqueued_total")
});

pub static SIGNALS_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "conduit_signals_processed_total",
        "Signals that finished SignalProcessor::process",
        &["outcome"]
    )
    .expect("register conduit_signals_processed_total")
});

pub static SIGNALS_COALESCED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "conduit_signals_coalesced_total",
        "Waiting signals overwritten before they ever ran"
    )
    .expect("register conduit_signals_coalesced_total")
});

pub static RECONCILE_ORDERS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "conduit_reconcile_orders_total",
        "Orders issued by the reconciler",
        &["type"]
    )
    .expect("register conduit_reconcile_orders_total")
});

pub static RECONCILE_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "conduit_reconcile_duration_seconds",
        "Wall time spent inside SignalProcessor::process"
    )
    .expect("register conduit_reconcile_duration_seconds")
});

pub static QUEUE_DEPTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "conduit_queue_depth",
        "Current occupancy of the dispatcher's processing/waiting slots",
        &["state"]
    )
    .expect("register conduit_queue_depth")
});

pub fn order_kind_label(kind: conduit_core::EnsureOrderKind) -> &'static str {
    match kind {
        conduit_core::EnsureOrderKind::Buy => "buy",
        conduit_core::EnsureOrderKind::Sell => "sell",
        conduit_core::EnsureOrderKind::StopLoss => "stop_loss",
        conduit_core::EnsureOrderKind::TakeProfit => "take_profit",
    }
}
