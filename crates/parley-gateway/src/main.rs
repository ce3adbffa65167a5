//! # parley-gateway
//!
//! Protocol-bridging gateway for browser clients: accepts WebSocket
//! connections carrying JSON envelope frames and proxies each browser
//! identity onto its own TCP connection into the chat backend. The gateway
//! is an ordinary client of the backend listener, not a part of it.

mod bridge;
mod error;
mod session;

use std::net::SocketAddr;

use axum::{routing::get, Router};
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::session::SessionMap;

/// Address of the chat backend the gateway proxies to.
const BACKEND_ADDR: &str = "127.0.0.1:8000";

#[derive(Parser, Debug)]
#[command(name = "parley-gateway", version, about = "WebSocket gateway for the parley chat backend")]
struct Args {
    /// Port for the gateway's own WebSocket listener.
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_gateway=debug")),
        )
        .init();

    let args = Args::parse();
    info!("Starting parley gateway v{}", env!("CARGO_PKG_VERSION"));

    let sessions = SessionMap::new(BACKEND_ADDR);

    // Browsers connect from arbitrary origins during development.
    let cors = CorsLayer::new().allow_origin(Any);

    let app = Router::new()
        .route("/ws", get(bridge::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(sessions);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, backend = %BACKEND_ADDR, "Gateway listening");

    axum::serve(listener, app).await?;
    Ok(())
}
