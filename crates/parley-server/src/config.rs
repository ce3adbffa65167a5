//! Backend configuration loaded from environment variables.
//!
//! The backend takes no CLI flags; the listen address has a fixed default so
//! the server starts with zero configuration for local development.

use std::net::SocketAddr;

/// Backend server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the TCP chat listener.
    /// Env: `PARLEY_LISTEN_ADDR`
    /// Default: `127.0.0.1:8000`
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([127, 0, 0, 1], 8000).into(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("PARLEY_LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.listen_addr = parsed;
            } else {
                tracing::warn!(
                    value = %addr,
                    "Invalid PARLEY_LISTEN_ADDR, using default"
                );
            }
        }

        config
    }
}
