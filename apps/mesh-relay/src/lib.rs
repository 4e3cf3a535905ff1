//! Signaling relay: assigns ids, announces arrivals and departures, and forwards targeted
//! frames between connected clients. It never inspects the payloads it forwards.

pub mod config;
pub mod state;
pub mod websocket;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub use config::RelayConfig;
pub use state::{ForwardError, RelayState};

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/", get(websocket::websocket_handler))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(listener: TcpListener, state: RelayState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

async fn health_check() -> &'static str {
    "ok"
}
