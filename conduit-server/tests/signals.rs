use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use conduit_broker::BrokerAdapter;
use conduit_core::{Instrument, InstrumentInfo, InstrumentType};
use conduit_dispatch::{SignalDispatcher, SignalProcessor};
use conduit_test_utils::{MockBroker, MockBrokerConfig, RecordingNotifier};
use rust_decimal_macros::dec;
use tokio::sync::oneshot;

fn sample_instrument_info() -> InstrumentInfo {
    InstrumentInfo {
        id: Instrument::new("SBER", "TQBR"),
        name: "Sberbank".into(),
        kind: InstrumentType::Share,
        currency: "RUB".into(),
        lot_size: dec!(1),
        min_price_step: dec!(0.01),
        margin_long: Some(dec!(50)),
        margin_short: Some(dec!(50)),
    }
}

async fn spawn_server() -> (SocketAddr, oneshot::Sender<()>, RecordingNotifier) {
    let info = sample_instrument_info();
    let broker: Arc<dyn BrokerAdapter> = Arc::new(MockBroker::new(
        MockBrokerConfig::new()
            .with_instrument(info.clone())
            .with_balance("RUB", dec!(10000))
            .with_last_price(info.id.clone(), dec!(100)),
    ));
    let notifier = RecordingNotifier::new();
    let processor = Arc::new(SignalProcessor::new("main", broker, Arc::new(notifier.clone())));
    let mut processors = HashMap::new();
    processors.insert("main".to_string(), processor);
    let dispatcher = Arc::new(SignalDispatcher::new(processors, 4));

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tokio::spawn(async move {
        let _ = conduit_server::serve(dispatcher, listener, async {
            let _ = shutdown_rx.await;
        })
        .await;
    });

    (addr, shutdown_tx, notifier)
}

#[tokio::test]
async fn healthz_returns_ok() {
    let (addr, shutdown, _notifier) = spawn_server().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/healthz"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let _ = shutdown.send(());
}

#[tokio::test]
async fn enqueue_unknown_account_returns_404() {
    let (addr, shutdown, _notifier) = spawn_server().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/signals/enqueue/ghost"))
        .json(&serde_json::json!({"position": "flat", "instrument": "SBER@TQBR"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let _ = shutdown.send(());
}

#[tokio::test]
async fn enqueue_malformed_body_returns_422() {
    let (addr, shutdown, _notifier) = spawn_server().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/signals/enqueue/main"))
        .json(&serde_json::json!({"position": "sideways", "instrument": "SBER@TQBR"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");

    let _ = shutdown.send(());
}

#[tokio::test]
async fn enqueue_valid_signal_returns_202_and_drains_queue() {
    let (addr, shutdown, _notifier) = spawn_server().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/signals/enqueue/main"))
        .json(&serde_json::json!({"position": "long", "instrument": "SBER@TQBR"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "accepted");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let queue: serde_json::Value = client
        .get(format!("http://{addr}/signals/queue"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(queue["processing"].as_array().unwrap().is_empty());
    assert!(queue["waiting"].as_array().unwrap().is_empty());

    let _ = shutdown.send(());
}

#[tokio::test]
async fn metrics_endpoint_serves_prometheus_text() {
    let (addr, shutdown, _notifier) = spawn_server().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = reqwest::Client::new();
    let response = client.get(format!("http://{addr}/metrics")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    let _ = shutdown.send(());
}
