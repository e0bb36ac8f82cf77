use std::sync::Arc;

use conduit_core::Signal;
use conduit_dispatch::{DispatchError, SignalDispatcher};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

/// One item of `GET /signals/queue`'s `processing`/`waiting` arrays (spec §6).
#[derive(Serialize)]
struct QueueItem<'a> {
    signal: &'a Signal,
    account: &'a str,
}

pub async fn route(req: Request<Body>, dispatcher: Arc<SignalDispatcher>) -> Response<Body> {
    match (req.method(), req.uri().path()) {
        (&Method::POST, path) if path.starts_with("/signals/enqueue/") => {
            let account = path.trim_start_matches("/signals/enqueue/").to_string();
            enqueue_signal(req, dispatcher, account).await
        }
        (&Method::GET, "/signals/queue") => queue_snapshot(dispatcher).await,
        (&Method::GET, "/healthz") => json_response(StatusCode::OK, json!({"status": "ok"})),
        (&Method::GET, "/metrics") => metrics_response(),
        _ => json_response(StatusCode::NOT_FOUND, json!({"error": "not_found"})),
    }
}

async fn enqueue_signal(req: Request<Body>, dispatcher: Arc<SignalDispatcher>, account: String) -> Response<Body> {
    if !dispatcher.known_account(&account) {
        return json_response(StatusCode::NOT_FOUND, json!({"error": format!("unknown account: {account}")}));
    }

    let bytes = match hyper::body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return json_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                validation_error(&err.to_string()),
            )
        }
    };

    let signal: Signal = match serde_json::from_slice(&bytes) {
        Ok(signal) => signal,
        Err(err) => {
            return json_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                validation_error(&err.to_string()),
            )
        }
    };

    match dispatcher.enqueue(&account, signal.clone()).await {
        Ok(_signal_id) => json_response(
            StatusCode::ACCEPTED,
            json!({"status": "accepted", "account": account, "signal": signal}),
        ),
        Err(DispatchError::UnknownAccount(account)) => {
            json_response(StatusCode::NOT_FOUND, json!({"error": format!("unknown account: {account}")}))
        }
    }
}

async fn queue_snapshot(dispatcher: Arc<SignalDispatcher>) -> Response<Body> {
    let snapshot = dispatcher.snapshot().await;
    let processing: Vec<_> = snapshot
        .processing
        .iter()
        .map(|q| QueueItem {
            signal: &q.signal,
            account: &q.account,
        })
        .collect();
    let waiting: Vec<_> = snapshot
        .waiting
        .iter()
        .map(|q| QueueItem {
            signal: &q.signal,
            account: &q.account,
        })
        .collect();

    json_response(StatusCode::OK, json!({"processing": processing, "waiting": waiting}))
}

fn metrics_response() -> Response<Body> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %err, "failed to encode metrics");
        return json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "metrics encoding failed"}));
    }
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", encoder.format_type())
        .body(Body::from(buffer))
        .unwrap()
}

fn validation_error(message: &str) -> serde_json::Value {
    json!({
        "error": "validation_error",
        "details": [{"path": "body", "message": message}],
    })
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
