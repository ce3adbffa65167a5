//! # parley-shared
//!
//! Protocol types shared by the chat backend, the WebSocket gateway and the
//! native client:
//!
//! - the [`Envelope`](envelope::Envelope) message model carried as JSON over
//!   every transport
//! - the backend wire formats in [`wire`]: newline-delimited JSON frames
//!   (client to server) and the human-readable broadcast line format plus its
//!   parser (server to client)

pub mod envelope;
pub mod error;
pub mod wire;

pub use envelope::{Area, Envelope, Operation, Profile, SYSTEM_SENDER};
pub use error::ProtocolError;
