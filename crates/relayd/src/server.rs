//! Axum router assembly and the accept-vs-shutdown run loop.
//!
//! Grounded on `gossipd/src/server.rs::run`'s `tokio::select!` between
//! `listener.accept()` and a `broadcast::Receiver<()>` shutdown signal;
//! axum's `serve(...).with_graceful_shutdown(...)` is the direct idiomatic
//! replacement for that hand-rolled loop. Router layout follows the
//! `ioi-foundation-ioi-network` gateway's `Router::new().route(...).with_state(...)`
//! plus a `TraceLayer` for request logging.

use crate::blob_routes::{get_blob, put_blob};
use crate::info::relay_info;
use crate::state::AppState;
use crate::ws::upgrade;
use axum::routing::{get, put};
use axum::Router;
use std::net::SocketAddr;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid bind address: {0}")]
    InvalidAddress(std::net::AddrParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(relay_info))
        .route("/ws", get(upgrade))
        .route("/info", get(relay_info))
        .route("/blob/:hash", put(put_blob).get(get_blob))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds and serves `router`, running until `shutdown` resolves (ctrl_c in
/// `main`). Each accepted websocket connection runs to completion on its
/// own task; graceful shutdown stops accepting new ones but does not sever
/// connections already live.
pub async fn run(
    bind_address: &str,
    port: u16,
    router: Router,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let addr: SocketAddr = format!("{bind_address}:{port}")
        .parse()
        .map_err(ServerError::InvalidAddress)?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "relayd listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
