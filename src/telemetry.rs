use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::metrics::{JobUpdate, Stats};

/// Acknowledgment line the sink writes back for every accepted frame.
pub(crate) const ACK: &str = "ok";

/// Wire frame pushed to a monitor sink. One JSON object per line, answered
/// with a single acknowledgment line.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum Frame {
    Job {
        app: String,
        queue_id: String,
        update: JobUpdate,
    },
    Stats {
        stats: Stats,
    },
}

/// Lazily connected client for a monitor sink.
///
/// The connection is attempted on the first push and again on any push after
/// a failure. An unreachable sink is logged and otherwise ignored; it never
/// affects the queue.
pub(crate) struct MonitorClient {
    addr: Option<String>,
    app: String,
    queue_id: String,
    stream: Option<BufStream<TcpStream>>,
}

impl MonitorClient {
    pub(crate) fn new(addr: Option<String>, app: String, queue_id: String) -> Self {
        Self {
            addr,
            app,
            queue_id,
            stream: None,
        }
    }

    pub(crate) async fn push_update(&mut self, update: &JobUpdate) {
        let frame = Frame::Job {
            app: self.app.clone(),
            queue_id: self.queue_id.clone(),
            update: update.clone(),
        };
        self.push(&frame).await;
    }

    pub(crate) async fn push_stats(&mut self, stats: &Stats) {
        let frame = Frame::Stats {
            stats: stats.clone(),
        };
        self.push(&frame).await;
    }

    async fn push(&mut self, frame: &Frame) {
        if !self.ensure_connected().await {
            return;
        }
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        if let Err(err) = send_frame(stream, frame).await {
            warn!(error = %err, "monitor push failed");
            self.stream = None;
        }
    }

    async fn ensure_connected(&mut self) -> bool {
        if self.stream.is_some() {
            return true;
        }
        let Some(addr) = self.addr.as_deref() else {
            return false;
        };
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                debug!(addr, "connected to monitor");
                self.stream = Some(BufStream::new(stream));
                true
            }
            Err(err) => {
                warn!(addr, error = %err, "monitor unreachable");
                false
            }
        }
    }

    pub(crate) async fn shutdown(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}

async fn send_frame(stream: &mut BufStream<TcpStream>, frame: &Frame) -> io::Result<()> {
    let mut line = serde_json::to_vec(frame).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    line.push(b'\n');
    stream.write_all(&line).await?;
    stream.flush().await?;

    let mut ack = String::new();
    stream.read_line(&mut ack).await?;
    if ack.trim_end() != ACK {
        return Err(io::Error::new(io::ErrorKind::Other, "unexpected acknowledgment"));
    }
    Ok(())
}
