//! Entry point for the mcp-cdb-bridge MCP server.
//!
//! Initializes tracing (to stderr, so it doesn't interfere with MCP stdio
//! transport), loads configuration, builds the session manager, and serves
//! on stdin/stdout. Grounded in the teacher's `main.rs`.

use std::sync::Arc;

use anyhow::Result;
use mcp_cdb_bridge::notify::BroadcastSink;
use mcp_cdb_bridge::server::CdbBridgeServer;
use mcp_cdb_bridge::session::SessionManager;
use mcp_cdb_bridge::{config::Config, notify::NotificationSink};
use rmcp::{ServiceExt, transport::stdio};
use tracing_subscriber::{self, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing to stderr (stdout is used for MCP JSON-RPC).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("starting mcp-cdb-bridge v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::load()?);
    let sink: Arc<dyn NotificationSink> = Arc::new(BroadcastSink::default());
    let sessions = Arc::new(SessionManager::new(config, sink));

    let server = CdbBridgeServer::new(sessions);
    let service = server.serve(stdio()).await.inspect_err(|e| {
        tracing::error!("serving error: {:?}", e);
    })?;

    service.waiting().await?;
    tracing::info!("mcp-cdb-bridge server shut down");
    Ok(())
}
