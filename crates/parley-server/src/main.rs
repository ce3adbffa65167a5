//! # parley-server
//!
//! The chat backend: a TCP listener speaking newline-delimited JSON
//! envelopes, a lock-guarded connection registry and group registry, and the
//! routing engine that fans messages out as human-readable broadcast lines.
//!
//! Native clients connect here directly; browser clients arrive through
//! `parley-gateway`, which is just another client of this listener.

mod config;
mod connection;
mod groups;
mod registry;
mod router;
mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::router::Router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting parley chat server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();

    // Listener setup is the only fatal failure; everything after this point
    // is logged and survived.
    let listener = TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Chat server listening");

    let router = Arc::new(Router::new());

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                info!(peer = %peer, "Client connected");
                let router = router.clone();
                tokio::spawn(async move {
                    connection::serve(stream, peer, router).await;
                });
            }
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
            }
        }
    }
}
