//! mcp-cdb-bridge core: session lifecycle, command queueing, batching, and
//! recovery for an MCP server fronting the Microsoft Console Debugger.

pub mod batch;
pub mod cache;
pub mod cdb;
pub mod config;
pub mod error;
pub mod notify;
pub mod queue;
pub mod recovery;
pub mod server;
pub mod session;
