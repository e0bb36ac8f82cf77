use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

/// A mock Telegram Bot API endpoint: accepts `POST /bot<token>/sendMessage`
/// and records every payload it receives, for asserting `TelegramNotifier`'s
/// wire format without reaching the real network. Mirrors this codebase's
/// existing `hyper`-based mock REST server pattern.
pub struct MockTelegramApi {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Value>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl MockTelegramApi {
    pub async fn spawn() -> Result<Self> {
        let received = Arc::new(Mutex::new(Vec::new()));
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let std_listener = listener.into_std()?;
        std_listener.set_nonblocking(true)?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let received_for_service = received.clone();
        let make_svc = make_service_fn(move |_| {
            let received = received_for_service.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let received = received.clone();
                    async move { Ok::<_, Infallible>(route(req, received).await) }
                }))
            }
        });
        let server = Server::from_tcp(std_listener)?.serve(make_svc);
        let handle = tokio::spawn(async move {
            if let Err(err) = server
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                tracing::error!(error = %err, "mock telegram server exited with error");
            }
        });

        Ok(Self {
            addr,
            received,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn received(&self) -> Vec<Value> {
        self.received.lock().await.clone()
    }

    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

impl Drop for MockTelegramApi {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

async fn route(req: Request<Body>, received: Arc<Mutex<Vec<Value>>>) -> Response<Body> {
    if req.method() != Method::POST || !req.uri().path().ends_with("/sendMessage") {
        return json_response(StatusCode::NOT_FOUND, json!({"ok": false, "description": "not found"}));
    }

    let bytes = match hyper::body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(_) => return json_response(StatusCode::BAD_REQUEST, json!({"ok": false})),
    };
    let payload: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(_) => return json_response(StatusCode::BAD_REQUEST, json!({"ok": false})),
    };

    received.lock().await.push(payload);
    json_response(StatusCode::OK, json!({"ok": true, "result": {"message_id": 1}}))
}

fn json_response(status: StatusCode, body: Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
