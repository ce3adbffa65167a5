use thiserror::Error;

use parley_shared::ProtocolError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("backend connection error: {0}")]
    Backend(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
