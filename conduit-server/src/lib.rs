//! HTTP front for Conduit (spec §6): signal intake, queue introspection,
//! health, and metrics. Deliberately thin — a collaborator, not part of the
//! core algorithmic surface.

mod routes;

use std::convert::Infallible;
use std::future::Future;
use std::net::TcpListener;
use std::sync::Arc;

use conduit_dispatch::SignalDispatcher;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use tracing::info;

/// Serves the Conduit HTTP surface on an already-bound `listener` until
/// `shutdown` resolves, then drains in-flight connections before returning.
/// Takes ownership of a pre-bound `std::net::TcpListener` (rather than a
/// `SocketAddr`) so callers — including tests — can discover the actual
/// bound address before the listener starts accepting connections.
pub async fn serve(
    dispatcher: Arc<SignalDispatcher>,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;

    let make_svc = make_service_fn(move |_conn| {
        let dispatcher = dispatcher.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let dispatcher = dispatcher.clone();
                async move { Ok::<_, Infallible>(routes::route(req, dispatcher).await) }
            }))
        }
    });

    info!(%addr, "conduit HTTP front listening");
    Server::from_tcp(listener)?
        .serve(make_svc)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
