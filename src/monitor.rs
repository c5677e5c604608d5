//! Monitoring sink for one or more queues.
//!
//! Queues push frames over TCP (one JSON line per frame, acknowledged line
//! by line); job updates are rebroadcast to WebSocket subscribers at `/ws`.
//! Subscribers detach with a `{"message": "disconnect"}` control envelope or
//! by dropping the socket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::telemetry::{Frame, ACK};

const BROADCAST_BUFFER: usize = 256;

/// Control envelope a subscriber sends over the socket.
#[derive(Debug, Deserialize)]
struct Control {
    message: String,
}

/// Collector side of the monitoring protocol: ingests frames pushed by
/// queues and fans job updates out to live subscribers.
pub struct Monitor {
    updates: broadcast::Sender<String>,
}

impl Monitor {
    pub fn new() -> Arc<Self> {
        let (updates, _) = broadcast::channel(BROADCAST_BUFFER);
        Arc::new(Self { updates })
    }

    /// Subscribe to the raw JSON payloads rebroadcast to socket clients.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.updates.subscribe()
    }

    /// Accept queue connections and ingest their frames until the listener
    /// fails.
    pub async fn ingest(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "queue connected");
                    let monitor = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(err) = monitor.handle_queue(stream).await {
                            debug!(error = %err, "queue connection closed");
                        }
                    });
                }
                Err(err) => {
                    warn!(error = %err, "ingest accept failed");
                    return;
                }
            }
        }
    }

    async fn handle_queue(&self, stream: TcpStream) -> std::io::Result<()> {
        let mut stream = BufStream::new(stream);
        let mut line = String::new();

        loop {
            line.clear();
            if stream.read_line(&mut line).await? == 0 {
                return Ok(());
            }

            match serde_json::from_str::<Frame>(&line) {
                Ok(Frame::Job {
                    app,
                    queue_id,
                    update,
                }) => {
                    let payload = serde_json::json!({
                        "app": app,
                        "queue_id": queue_id,
                        "update": update,
                    });
                    // no subscribers is fine; the send just reports zero receivers
                    let _ = self.updates.send(payload.to_string());
                }
                Ok(Frame::Stats { stats }) => {
                    debug!(
                        app = %stats.app,
                        queued = stats.queued_jobs,
                        processed = stats.processed_jobs,
                        failed = stats.failed_jobs,
                        "stats snapshot received"
                    );
                }
                Err(err) => warn!(error = %err, "unreadable frame"),
            }

            stream.write_all(ACK.as_bytes()).await?;
            stream.write_all(b"\n").await?;
            stream.flush().await?;
        }
    }

    /// Router serving the live subscriber socket.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/", get(index))
            .route("/ws", get(subscribe_socket))
            .with_state(self)
    }
}

async fn index() -> &'static str {
    "millrace monitor"
}

async fn subscribe_socket(
    ws: WebSocketUpgrade,
    State(monitor): State<Arc<Monitor>>,
) -> impl IntoResponse {
    let updates = monitor.subscribe();
    ws.on_upgrade(move |socket| stream_updates(socket, updates))
}

async fn stream_updates(mut socket: WebSocket, mut updates: broadcast::Receiver<String>) {
    info!("subscriber connected");

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(payload) => {
                    if socket.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagging behind updates");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            received = socket.recv() => match received {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(control) = serde_json::from_str::<Control>(&text) {
                        if control.message == "disconnect" {
                            break;
                        }
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            },
        }
    }

    info!("subscriber disconnected");
}
