//! WebSocket entrypoint and per-browser connection loop.
//!
//! Upgrades HTTP to WS, then runs two tasks per browser socket: one draining
//! an envelope channel into the sink, one decoding inbound frames and handing
//! them to the session map. Browser frames carry the same JSON envelope
//! structure the backend speaks, so forwarding is a re-serialization, not a
//! translation — translation only happens on the backend-to-browser path,
//! where broadcast lines are parsed back into envelopes.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use parley_shared::Envelope;

use crate::session::SessionMap;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(sessions): State<SessionMap>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, sessions))
}

async fn handle_connection(socket: WebSocket, sessions: SessionMap) {
    let (mut sink, mut stream) = socket.split();
    let (browser_tx, mut browser_rx) = mpsc::unbounded_channel::<Envelope>();

    // Forward envelopes queued for this browser to the actual websocket.
    let mut send_task = tokio::spawn(async move {
        while let Some(env) = browser_rx.recv().await {
            let json = match serde_json::to_string(&env) {
                Ok(json) => json,
                Err(e) => {
                    error!(error = %e, "Failed to encode frame for browser");
                    continue;
                }
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // Decode inbound frames and push them through the session map.
    let tx = browser_tx.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => {
                    let env = match serde_json::from_str::<Envelope>(&text) {
                        Ok(env) => env,
                        Err(e) => {
                            warn!(error = %e, "Dropping invalid browser frame");
                            continue;
                        }
                    };
                    if env.sender.is_empty() {
                        warn!("Dropping browser frame without a sender name");
                        continue;
                    }
                    if let Err(e) = sessions.forward(env, &tx).await {
                        // Surfaced to the browser as a system message, never
                        // as a dropped websocket.
                        warn!(error = %e, "Failed to forward frame to backend");
                        let _ = tx.send(Envelope::system(format!("error: {e}")));
                    }
                }
                Message::Close(_) => break,
                // Binary, ping and pong frames are not part of the protocol.
                _ => {}
            }
        }
    });

    // If either direction ends, the other has nothing left to do.
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    info!("Browser connection closed");
}
