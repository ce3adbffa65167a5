//! Browser session pairs and backend connection management.
//!
//! Each browser display name owns at most one [`SessionPair`]: the current
//! browser-facing channel plus an optional live TCP connection into the chat
//! backend. Liveness is checked lazily on the next inbound frame — a
//! zero-byte write under a short deadline — never by background heartbeats,
//! and a dead backend is replaced inline on the request path with a fresh
//! connection preceded by a synthetic Login.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use parley_shared::{wire, Envelope};

use crate::error::GatewayError;

/// Deadline for the zero-byte liveness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Channel into the forwarding task that writes frames to one browser socket.
pub type BrowserTx = mpsc::UnboundedSender<Envelope>;

/// One browser identity: its current channel and backend connection.
struct SessionPair {
    browser_tx: BrowserTx,
    backend: Option<BackendHandle>,
}

/// Write side of one backend TCP connection. The `id` ties the handle to the
/// read loop spawned with it, so a stale loop cannot tear down a successor.
#[derive(Clone)]
struct BackendHandle {
    id: u64,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl BackendHandle {
    /// Probe the connection with a zero-byte write. Cheap, lazy and
    /// best-effort: a peer that died without a FIN may still pass once.
    /// The deadline covers the writer mutex as well, so a handle wedged
    /// mid-send counts as dead instead of hanging the caller.
    async fn is_alive(&self) -> bool {
        let writer = self.writer.clone();
        timeout(PROBE_TIMEOUT, async move {
            writer.lock().await.write(&[]).await.is_ok()
        })
        .await
        .unwrap_or(false)
    }

    /// Forward one envelope as a JSON frame.
    async fn send(&self, env: &Envelope) -> Result<(), GatewayError> {
        let frame = wire::encode_frame(env)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(frame.as_bytes()).await?;
        Ok(())
    }
}

/// All live session pairs, keyed by display name.
#[derive(Clone)]
pub struct SessionMap {
    inner: Arc<RwLock<HashMap<String, SessionPair>>>,
    backend_addr: Arc<str>,
    next_id: Arc<AtomicU64>,
}

impl SessionMap {
    pub fn new(backend_addr: impl Into<Arc<str>>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            backend_addr: backend_addr.into(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Forward one browser frame to the backend, creating or replacing the
    /// session pair's backend connection as needed.
    pub async fn forward(&self, env: Envelope, browser_tx: &BrowserTx) -> Result<(), GatewayError> {
        let handle = self.ensure_backend(&env.sender, browser_tx).await?;
        handle.send(&env).await
    }

    /// Get a live backend handle for `name`, dialing a fresh connection when
    /// there is none or the existing one fails the liveness probe. A fresh
    /// connection is announced to the backend with a synthetic Login before
    /// anything else is sent on it.
    async fn ensure_backend(
        &self,
        name: &str,
        browser_tx: &BrowserTx,
    ) -> Result<BackendHandle, GatewayError> {
        // Refresh the browser channel and take the current handle out of the
        // map. The map lock is never held across the probe or the dial — one
        // slow backend must not stall every other session's forward path.
        let existing = {
            let mut map = self.inner.write().await;
            let pair = map.entry(name.to_string()).or_insert_with(|| SessionPair {
                browser_tx: browser_tx.clone(),
                backend: None,
            });
            // A browser reconnecting under the same name replaces the channel.
            pair.browser_tx = browser_tx.clone();
            pair.backend.clone()
        };

        let stale_id = match existing {
            Some(handle) => {
                if handle.is_alive().await {
                    return Ok(handle);
                }
                debug!(name = %name, "Backend connection failed liveness probe, reconnecting");
                Some(handle.id)
            }
            None => None,
        };

        let stream = TcpStream::connect(self.backend_addr.as_ref()).await?;
        let (read_half, write_half) = stream.into_split();
        let handle = BackendHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            writer: Arc::new(Mutex::new(write_half)),
        };

        // Re-acquire only to install. A concurrent frame for this name may
        // have connected first while we probed or dialed; if so its handle
        // wins (it is already logged in) and our socket closes on drop.
        {
            let mut map = self.inner.write().await;
            let pair = map.entry(name.to_string()).or_insert_with(|| SessionPair {
                browser_tx: browser_tx.clone(),
                backend: None,
            });
            if let Some(current) = &pair.backend {
                if Some(current.id) != stale_id {
                    return Ok(current.clone());
                }
            }
            pair.backend = Some(handle.clone());
        }
        info!(name = %name, backend = %self.backend_addr, "Opened backend connection");

        self.spawn_backend_reader(name.to_string(), read_half, handle.id);
        handle.send(&Envelope::login(name)).await?;
        Ok(handle)
    }

    /// Read loop for one backend connection: newline-terminated broadcast
    /// lines in, structured envelopes out to the pair's current browser
    /// channel. Ends on EOF or read error; never retries in the background.
    fn spawn_backend_reader(&self, name: String, read_half: OwnedReadHalf, handle_id: u64) {
        let sessions = self.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!(name = %name, "Backend closed connection");
                        break;
                    }
                    Ok(_) => {
                        let env = wire::parse_line(&line);
                        let Some(tx) = sessions.browser_tx(&name).await else {
                            continue;
                        };
                        if tx.send(env).is_err() {
                            debug!(name = %name, "Browser channel closed, dropping line");
                        }
                    }
                    Err(e) => {
                        warn!(name = %name, error = %e, "Backend read failed");
                        break;
                    }
                }
            }
            sessions.teardown_backend(&name, handle_id).await;
        });
    }

    async fn browser_tx(&self, name: &str) -> Option<BrowserTx> {
        self.inner
            .read()
            .await
            .get(name)
            .map(|pair| pair.browser_tx.clone())
    }

    /// Detach a dead backend connection from its pair and tell the browser.
    /// Guarded by the handle id: a reader outliving its replaced connection
    /// must not tear down the successor. The next inbound frame reconnects.
    async fn teardown_backend(&self, name: &str, handle_id: u64) {
        let mut map = self.inner.write().await;
        let Some(pair) = map.get_mut(name) else {
            return;
        };
        if pair.backend.as_ref().map(|h| h.id) != Some(handle_id) {
            return;
        }
        pair.backend = None;
        info!(name = %name, "Backend connection lost");
        let _ = pair.browser_tx.send(Envelope::system("server connection lost"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;

    use parley_shared::{Operation, SYSTEM_SENDER};

    async fn read_frame(reader: &mut BufReader<TcpStream>) -> Envelope {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        wire::decode_frame(&line).unwrap()
    }

    #[tokio::test]
    async fn test_forward_dials_and_logs_in_first() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let sessions = SessionMap::new(addr);
        let (browser_tx, _browser_rx) = mpsc::unbounded_channel();

        let backend = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            (read_frame(&mut reader).await, read_frame(&mut reader).await)
        });

        sessions
            .forward(Envelope::chat("alice", "hi"), &browser_tx)
            .await
            .unwrap();

        let (first, second) = backend.await.unwrap();
        assert_eq!(first.op, Operation::Login);
        assert_eq!(first.sender, "alice");
        assert_eq!(second.op, Operation::Chat);
        assert_eq!(second.body, "hi");
    }

    #[tokio::test]
    async fn test_backend_line_reaches_browser_as_envelope() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let sessions = SessionMap::new(addr);
        let (browser_tx, mut browser_rx) = mpsc::unbounded_channel();

        let backend = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let line = wire::format_line(
                parley_shared::Area::Public,
                1_700_000_000,
                "bob",
                "hello alice",
            );
            stream.write_all(line.as_bytes()).await.unwrap();
            stream.write_all(b"\n").await.unwrap();
            // Keep the socket open until the frame has been observed.
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        sessions
            .forward(Envelope::chat("alice", "hi"), &browser_tx)
            .await
            .unwrap();

        let env = browser_rx.recv().await.unwrap();
        assert_eq!(env.sender, "bob");
        assert_eq!(env.body, "hello alice");
        assert_eq!(env.timestamp, 1_700_000_000);
        backend.await.unwrap();
    }

    #[tokio::test]
    async fn test_backend_eof_notifies_browser_and_detaches() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let sessions = SessionMap::new(addr);
        let (browser_tx, mut browser_rx) = mpsc::unbounded_channel();

        let backend = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            // Drain the login and the triggering frame, then hang up.
            read_frame(&mut reader).await;
            read_frame(&mut reader).await;
        });

        sessions
            .forward(Envelope::chat("alice", "hi"), &browser_tx)
            .await
            .unwrap();
        backend.await.unwrap();

        let env = browser_rx.recv().await.unwrap();
        assert_eq!(env.sender, SYSTEM_SENDER);
        assert_eq!(env.body, "server connection lost");

        let map = sessions.inner.read().await;
        assert!(map.get("alice").unwrap().backend.is_none());
    }

    #[tokio::test]
    async fn test_wedged_backend_writer_does_not_stall_other_sessions() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let sessions = SessionMap::new(addr);
        let (alice_tx, _alice_rx) = mpsc::unbounded_channel();
        let (bob_tx, _bob_rx) = mpsc::unbounded_channel();

        // Backend that accepts connections and keeps them open unread.
        tokio::spawn(async move {
            let mut streams = Vec::new();
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                streams.push(stream);
            }
        });

        sessions
            .forward(Envelope::chat("alice", "hi"), &alice_tx)
            .await
            .unwrap();

        // Hold alice's writer so her next liveness probe can only end by
        // deadline, never by taking the lock.
        let alice_writer = {
            let map = sessions.inner.read().await;
            map.get("alice").unwrap().backend.as_ref().unwrap().writer.clone()
        };
        let _held = alice_writer.lock().await;

        let stalled = sessions.clone();
        let stalled_tx = alice_tx.clone();
        let alice_forward = tokio::spawn(async move {
            stalled
                .forward(Envelope::chat("alice", "again"), &stalled_tx)
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        timeout(
            Duration::from_millis(500),
            sessions.forward(Envelope::chat("bob", "hello"), &bob_tx),
        )
        .await
        .expect("unrelated session blocked behind a wedged writer")
        .unwrap();

        // Alice herself recovers once the probe deadline expires.
        timeout(Duration::from_secs(3), alice_forward)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_stale_reader_cannot_detach_successor() {
        let sessions = SessionMap::new("127.0.0.1:1");
        let (browser_tx, mut browser_rx) = mpsc::unbounded_channel();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();
        let (_read_half, write_half) = stream.into_split();
        let handle = BackendHandle {
            id: 7,
            writer: Arc::new(Mutex::new(write_half)),
        };
        sessions.inner.write().await.insert(
            "alice".to_string(),
            SessionPair {
                browser_tx,
                backend: Some(handle),
            },
        );

        // A reader from a replaced connection reports in with the old id.
        sessions.teardown_backend("alice", 6).await;
        assert!(sessions.inner.read().await.get("alice").unwrap().backend.is_some());
        assert!(browser_rx.try_recv().is_err());

        // The owning reader detaches and notifies.
        sessions.teardown_backend("alice", 7).await;
        assert!(sessions.inner.read().await.get("alice").unwrap().backend.is_none());
        assert_eq!(browser_rx.recv().await.unwrap().body, "server connection lost");
    }
}
