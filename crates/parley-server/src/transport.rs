//! Outbound transport handles.
//!
//! A [`Transport`] is the write side of one client connection: an unbounded
//! line queue drained by a dedicated writer task that owns the socket write
//! half. Queueing a line never blocks, so broadcast fan-out keeps making
//! progress past slow peers, and each line is exactly one `write_all` call —
//! concurrent senders can never interleave inside one logical message.

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// The peer's writer task is gone; the connection is effectively dead.
#[derive(Debug, Error)]
#[error("transport closed")]
pub struct TransportClosed;

/// Cloneable handle for writing lines to one client.
#[derive(Debug, Clone)]
pub struct Transport {
    tx: mpsc::UnboundedSender<String>,
}

impl Transport {
    /// Create a transport and the receiving end for its writer task.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue one line (without trailing newline) for delivery.
    pub fn send_line(&self, line: impl Into<String>) -> Result<(), TransportClosed> {
        self.tx.send(line.into()).map_err(|_| TransportClosed)
    }

    /// Whether two handles feed the same writer task, i.e. the same
    /// underlying connection.
    pub fn same_channel(&self, other: &Transport) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// Spawn the writer task for a connection.
///
/// Runs until the last [`Transport`] clone is dropped or a write fails;
/// dropping the write half on exit closes the socket for the peer.
pub fn spawn_writer<W>(peer: String, mut writer: W, mut rx: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let mut buf = line.into_bytes();
            buf.push(b'\n');
            if let Err(e) = writer.write_all(&buf).await {
                warn!(peer = %peer, error = %e, "Write to client failed, stopping writer");
                break;
            }
        }
        debug!(peer = %peer, "Writer task finished");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writer_appends_newline() {
        let (transport, rx) = Transport::channel();
        let (client, mut server) = tokio::io::duplex(256);
        spawn_writer("test".into(), client, rx);

        transport.send_line("hello").unwrap();
        drop(transport);

        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut server, &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"hello\n");
    }

    #[tokio::test]
    async fn test_send_after_writer_gone() {
        let (transport, rx) = Transport::channel();
        drop(rx);
        assert!(transport.send_line("hello").is_err());
    }
}
