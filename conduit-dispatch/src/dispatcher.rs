use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use conduit_core::Signal;
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, info_span, warn, Instrument as _};

use crate::error::DispatchError;
use crate::metrics::{self, order_kind_label};
use crate::processor::SignalProcessor;

/// Default worker pool size (spec §4.7: "recommended 10 workers").
pub const DEFAULT_WORKER_LIMIT: usize = 10;

/// A signal sitting in the `processing` or `waiting` slot (spec §3).
#[derive(Debug, Clone)]
pub struct QueuedSignal {
    pub key: String,
    pub signal: Signal,
    pub account: String,
    pub enqueue_time: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    processing: HashMap<String, QueuedSignal>,
    waiting: HashMap<String, QueuedSignal>,
}

/// A point-in-time view of the dispatcher's slots, for `GET /signals/queue`.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub processing: Vec<QueuedSignal>,
    pub waiting: Vec<QueuedSignal>,
}

/// Per-key serialized signal queue (spec §4.7): at most one `processing`
/// and one `waiting` entry per `account/instrument` key, overwrite-on-pending,
/// bounded worker concurrency across keys.
pub struct SignalDispatcher {
    inner: Arc<Mutex<Inner>>,
    processors: Arc<HashMap<String, Arc<SignalProcessor>>>,
    permits: Arc<Semaphore>,
}

impl SignalDispatcher {
    pub fn new(processors: HashMap<String, Arc<SignalProcessor>>, worker_limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            processors: Arc::new(processors),
            permits: Arc::new(Semaphore::new(worker_limit.max(1))),
        }
    }

    pub fn known_account(&self, account: &str) -> bool {
        self.processors.contains_key(account)
    }

    /// Places `signal` in the waiting slot for its key, overwriting any
    /// signal already waiting there, and triggers a worker if none is
    /// currently processing that key (spec §4.7 "Enqueue algorithm").
    pub async fn enqueue(&self, account: &str, signal: Signal) -> Result<String, DispatchError> {
        if !self.known_account(account) {
            return Err(DispatchError::UnknownAccount(account.to_string()));
        }

        let signal_id = signal.signal_id.clone();
        let key = format!("{account}/{}", signal.instrument);
        let queued = QueuedSignal {
            key: key.clone(),
            signal,
            account: account.to_string(),
            enqueue_time: Utc::now(),
        };

        let trigger = {
            let mut inner = self.inner.lock().await;
            if let Some(replaced) = inner.waiting.insert(key.clone(), queued) {
                info!(
                    key = %key,
                    replaced_signal_id = %replaced.signal.signal_id,
                    "replacing waiting signal"
                );
                metrics::SIGNALS_COALESCED.inc();
            } else {
                info!(key = %key, "signal added to waiting slot");
            }
            metrics::QUEUE_DEPTH
                .with_label_values(&["waiting"])
                .set(inner.waiting.len() as i64);
            !inner.processing.contains_key(&key)
        };

        metrics::SIGNALS_ENQUEUED.inc();

        if trigger {
            info!(key = %key, "signal triggered processing");
            let inner = self.inner.clone();
            let processors = self.processors.clone();
            let permits = self.permits.clone();
            tokio::spawn(promote(inner, processors, permits, key));
        }

        Ok(signal_id)
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        let inner = self.inner.lock().await;
        QueueSnapshot {
            processing: inner.processing.values().cloned().collect(),
            waiting: inner.waiting.values().cloned().collect(),
        }
    }
}

/// Worker loop for one key: promotes the waiting slot, processes it, then
/// either continues directly onto the next waiting signal for the same key
/// or releases its permit (spec §4.7 "Worker `promote(key)` algorithm").
async fn promote(
    inner: Arc<Mutex<Inner>>,
    processors: Arc<HashMap<String, Arc<SignalProcessor>>>,
    permits: Arc<Semaphore>,
    key: String,
) {
    let _permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return,
    };

    let mut key = key;
    loop {
        let queued = {
            let mut guard = inner.lock().await;
            let queued = match guard.waiting.remove(&key) {
                Some(queued) => queued,
                None => {
                    // A second promote for this key lost the race under pool
                    // saturation and found the slot already drained; the
                    // other promote is carrying the signal, nothing is lost.
                    warn!(key = %key, "promote found an empty waiting slot, yielding to the other in-flight worker");
                    return;
                }
            };
            guard.processing.insert(key.clone(), queued.clone());
            metrics::QUEUE_DEPTH
                .with_label_values(&["waiting"])
                .set(guard.waiting.len() as i64);
            metrics::QUEUE_DEPTH
                .with_label_values(&["processing"])
                .set(guard.processing.len() as i64);
            queued
        };

        let Some(processor) = processors.get(&queued.account).cloned() else {
            error!(account = %queued.account, "no processor registered for account");
            return;
        };

        let span = info_span!("process_signal", signal_id = %queued.signal.signal_id, account = %queued.account);
        process_one(&queued, processor.as_ref()).instrument(span).await;

        let trigger_next = {
            let mut guard = inner.lock().await;
            guard.processing.remove(&key);
            metrics::QUEUE_DEPTH
                .with_label_values(&["processing"])
                .set(guard.processing.len() as i64);
            guard.waiting.contains_key(&key)
        };

        if !trigger_next {
            info!(key = %key, "no more signals waiting, worker releasing key");
            return;
        }
        info!(key = %key, "continuing to next waiting signal without a pool round-trip");
    }
}

async fn process_one(queued: &QueuedSignal, processor: &SignalProcessor) {
    let processing_start = Utc::now();
    let queue_duration = processing_start - queued.enqueue_time;

    info!(key = %queued.key, "processing signal");
    let result = processor.process(&queued.signal).await;

    let processing_end = Utc::now();
    let processing_duration = processing_end - processing_start;
    let total_duration = processing_end - queued.enqueue_time;

    info!(
        queue_ms = queue_duration.num_milliseconds(),
        processing_ms = processing_duration.num_milliseconds(),
        total_ms = total_duration.num_milliseconds(),
        "signal processing finished"
    );
    metrics::RECONCILE_DURATION.observe(processing_duration.num_milliseconds().max(0) as f64 / 1000.0);

    match result {
        Ok(report) => {
            metrics::SIGNALS_PROCESSED.with_label_values(&["success"]).inc();
            for order in &report.orders {
                metrics::RECONCILE_ORDERS
                    .with_label_values(&[order_kind_label(order.kind)])
                    .inc();
            }
        }
        Err(err) => {
            metrics::SIGNALS_PROCESSED.with_label_values(&["error"]).inc();
            error!(code = %err.code, message = %err.message, "signal processing failed");
            processor
                .notify_failure(&queued.signal, &queued.signal.instrument, &err)
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    use conduit_core::{Instrument, InstrumentInfo, InstrumentType, PositionState, Signal};
    use conduit_notify::NotificationReport;
    use conduit_test_utils::{MockBroker, MockBrokerConfig, RecordingNotifier};
    use rust_decimal_macros::dec;

    fn instrument_info(id: Instrument) -> InstrumentInfo {
        InstrumentInfo {
            id,
            name: "Sberbank".into(),
            kind: InstrumentType::Share,
            currency: "RUB".into(),
            lot_size: dec!(1),
            min_price_step: dec!(0.01),
            margin_long: Some(dec!(50)),
            margin_short: Some(dec!(50)),
        }
    }

    /// Builds a single-account dispatcher over a `MockBroker`, returning the
    /// broker and notifier so tests can assert on both broker state and
    /// emitted reports.
    fn build_dispatcher(
        config: MockBrokerConfig,
    ) -> (SignalDispatcher, MockBroker, RecordingNotifier) {
        let broker = MockBroker::new(config);
        let notifier = RecordingNotifier::new();
        let processor = Arc::new(SignalProcessor::new(
            "main",
            Arc::new(broker.clone()),
            Arc::new(notifier.clone()),
        ));
        let mut processors = HashMap::new();
        processors.insert("main".to_string(), processor);
        let dispatcher = SignalDispatcher::new(processors, DEFAULT_WORKER_LIMIT);
        (dispatcher, broker, notifier)
    }

    #[tokio::test]
    async fn enqueue_rejects_unknown_account() {
        let (dispatcher, _broker, _notifier) = build_dispatcher(MockBrokerConfig::new());
        let signal = Signal::new(Instrument::new("SBER", "TQBR"), PositionState::Flat);
        let err = dispatcher.enqueue("ghost", signal).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownAccount(account) if account == "ghost"));
    }

    #[tokio::test]
    async fn single_signal_drains_to_empty_slots_and_settles_the_broker() {
        let instrument = Instrument::new("SBER", "TQBR");
        let config = MockBrokerConfig::new()
            .with_instrument(instrument_info(instrument.clone()))
            .with_balance("RUB", dec!(10000))
            .with_last_price(instrument.clone(), dec!(100));
        let (dispatcher, broker, notifier) = build_dispatcher(config);

        let signal = Signal::new(instrument.clone(), PositionState::Long);
        dispatcher.enqueue("main", signal).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        let snapshot = dispatcher.snapshot().await;
        assert!(snapshot.processing.is_empty());
        assert!(snapshot.waiting.is_empty());

        let position = broker.position(&instrument).await.unwrap();
        assert_eq!(position.quantity, 100);
        assert_eq!(notifier.len().await, 1);
    }

    /// Spec §8 scenario 5: a burst of three same-key signals while the first
    /// is in flight. The middle one is replaced while waiting and must never
    /// execute; exactly two reconciliations occur.
    #[tokio::test]
    async fn burst_coalescing_drops_the_overwritten_middle_signal() {
        let instrument = Instrument::new("SBER", "TQBR");
        let config = MockBrokerConfig::new()
            .with_instrument(instrument_info(instrument.clone()))
            .with_balance("RUB", dec!(10000))
            .with_last_price(instrument.clone(), dec!(100))
            .with_instrument_lookup_delay(StdDuration::from_millis(150));
        let (dispatcher, broker, notifier) = build_dispatcher(config);

        let signal_a = Signal::new(instrument.clone(), PositionState::Long);
        let signal_a_id = signal_a.signal_id.clone();
        let signal_b = Signal::new(instrument.clone(), PositionState::Short);
        let signal_b_id = signal_b.signal_id.clone();
        let signal_c = Signal::new(instrument.clone(), PositionState::Flat);
        let signal_c_id = signal_c.signal_id.clone();

        dispatcher.enqueue("main", signal_a).await.unwrap();
        // Give the spawned worker time to promote A into `processing` and
        // block on the instrument-lookup delay before B and C arrive.
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        dispatcher.enqueue("main", signal_b).await.unwrap();
        let snapshot = dispatcher.snapshot().await;
        assert_eq!(snapshot.processing.len(), 1);
        assert_eq!(snapshot.processing[0].signal.signal_id, signal_a_id);
        assert_eq!(snapshot.waiting.len(), 1);
        assert_eq!(snapshot.waiting[0].signal.signal_id, signal_b_id);

        dispatcher.enqueue("main", signal_c).await.unwrap();
        let snapshot = dispatcher.snapshot().await;
        assert_eq!(snapshot.waiting.len(), 1);
        assert_eq!(snapshot.waiting[0].signal.signal_id, signal_c_id);

        tokio::time::sleep(StdDuration::from_millis(500)).await;

        let snapshot = dispatcher.snapshot().await;
        assert!(snapshot.processing.is_empty());
        assert!(snapshot.waiting.is_empty());

        // C ran last and requested flat: the broker ends up with no position
        // regardless of whether B would have flipped it short.
        assert!(broker.position(&instrument).await.is_none());

        let reports = notifier.reports().await;
        assert_eq!(reports.len(), 2, "only A and C should have produced orders");
        let reported_ids: Vec<_> = reports
            .iter()
            .map(|report| match report {
                NotificationReport::Success(report) => report.signal.signal_id.clone(),
                NotificationReport::Failure(_) => panic!("unexpected failure report"),
            })
            .collect();
        assert!(reported_ids.contains(&signal_a_id));
        assert!(reported_ids.contains(&signal_c_id));
        assert!(
            !reported_ids.contains(&signal_b_id),
            "the overwritten signal must never execute"
        );
    }

    /// Spec §8 scenario 6: a reconciliation failure notifies and clears the
    /// key so a subsequent signal on the same key still runs normally.
    #[tokio::test]
    async fn error_isolation_clears_processing_and_does_not_block_the_key() {
        let known = Instrument::new("SBER", "TQBR");
        let unknown = Instrument::new("GHOST", "TQBR");
        let config = MockBrokerConfig::new()
            .with_instrument(instrument_info(known.clone()))
            .with_balance("RUB", dec!(10000))
            .with_last_price(known.clone(), dec!(100))
            .with_unresolvable_instrument(unknown.clone());
        let (dispatcher, broker, notifier) = build_dispatcher(config);

        let failing = Signal::new(unknown.clone(), PositionState::Long);
        dispatcher.enqueue("main", failing).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        let reports = notifier.reports().await;
        assert_eq!(reports.len(), 1);
        assert!(matches!(reports[0], NotificationReport::Failure(_)));
        assert!(dispatcher.snapshot().await.processing.is_empty());

        let following = Signal::new(known.clone(), PositionState::Long);
        dispatcher.enqueue("main", following).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        let position = broker.position(&known).await.unwrap();
        assert_eq!(position.quantity, 100);
        assert_eq!(notifier.len().await, 2);
    }

    #[tokio::test]
    async fn distinct_keys_run_without_blocking_each_other() {
        let sber = Instrument::new("SBER", "TQBR");
        let gazp = Instrument::new("GAZP", "TQBR");
        let config = MockBrokerConfig::new()
            .with_instrument(instrument_info(sber.clone()))
            .with_instrument(instrument_info(gazp.clone()))
            .with_balance("RUB", dec!(10000))
            .with_last_price(sber.clone(), dec!(100))
            .with_last_price(gazp.clone(), dec!(100))
            .with_instrument_lookup_delay(StdDuration::from_millis(80));
        let (dispatcher, broker, _notifier) = build_dispatcher(config);

        dispatcher
            .enqueue("main", Signal::new(sber.clone(), PositionState::Long))
            .await
            .unwrap();
        dispatcher
            .enqueue("main", Signal::new(gazp.clone(), PositionState::Long))
            .await
            .unwrap();

        tokio::time::sleep(StdDuration::from_millis(150)).await;

        assert!(broker.position(&sber).await.is_some());
        assert!(broker.position(&gazp).await.is_some());
    }
}
