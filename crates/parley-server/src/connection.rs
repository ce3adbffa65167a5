//! Per-connection read loop for the backend listener.
//!
//! One task per accepted socket: frames arrive as newline-delimited JSON
//! envelopes, each handed to the routing engine in strict arrival order.
//! Malformed frames are dropped and the loop keeps going; a terminal read
//! error or EOF tears the session down as if the user had logged out.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use parley_shared::{wire, Operation};

use crate::router::Router;
use crate::transport::{self, Transport};

pub async fn serve(stream: TcpStream, peer: SocketAddr, router: Arc<Router>) {
    let (read_half, write_half) = stream.into_split();

    let (transport, rx) = Transport::channel();
    transport::spawn_writer(peer.to_string(), write_half, rx);

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    // Set once this connection logs in; drives teardown on abrupt close.
    let mut session_name: Option<String> = None;

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!(peer = %peer, "Client closed connection");
                break;
            }
            Ok(_) => {
                let env = match wire::decode_frame(&line) {
                    Ok(env) => env,
                    Err(e) => {
                        warn!(peer = %peer, error = %e, "Dropping malformed frame");
                        continue;
                    }
                };
                if env.sender.is_empty() {
                    warn!(peer = %peer, "Dropping frame without a sender name");
                    continue;
                }

                let op = env.op;
                if op == Operation::Login {
                    session_name = Some(env.sender.clone());
                }

                router.dispatch(env, &transport).await;

                if op == Operation::Logout {
                    // The registry entry is already gone; returning drops our
                    // transport clone, which closes the writer and the socket.
                    session_name = None;
                    break;
                }
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "Read failed, closing connection");
                break;
            }
        }
    }

    if let Some(name) = session_name {
        info!(peer = %peer, user = %name, "Connection lost without logout");
        router.connection_lost(&name, &transport).await;
    }
}
