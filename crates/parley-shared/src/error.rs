use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("unknown operation code: {0}")]
    UnknownOperation(u8),

    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}
