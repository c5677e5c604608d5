//! Standalone monitoring sink.
//!
//! Point queues at the ingest address via `Options::with_monitor` and watch
//! job updates stream from the `/ws` endpoint.

use std::env;
use std::sync::Arc;

use millrace::monitor::Monitor;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let ingest_addr =
        env::var("MILLRACE_MONITOR_INGEST").unwrap_or_else(|_| "127.0.0.1:9147".to_string());
    let http_addr =
        env::var("MILLRACE_MONITOR_HTTP").unwrap_or_else(|_| "127.0.0.1:9148".to_string());

    let monitor = Monitor::new();

    let ingest = TcpListener::bind(&ingest_addr).await?;
    info!(addr = %ingest_addr, "ingesting queue frames");
    tokio::spawn(Arc::clone(&monitor).ingest(ingest));

    let http = TcpListener::bind(&http_addr).await?;
    info!(addr = %http_addr, "subscribers at /ws");
    axum::serve(http, monitor.router()).await?;

    Ok(())
}
