//! MCP server: tool definitions using rmcp macros.
//!
//! Grounded directly in the teacher's `server.rs`: a thin `#[tool_router]`
//! impl whose bodies do nothing but marshal MCP params into
//! [`SessionManager`] calls and marshal the result back to JSON. No
//! business logic lives here -- session lifecycle, queueing, batching, and
//! recovery are all owned by the core modules this server wires together.

use std::path::PathBuf;
use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::schemars;
use rmcp::tool;
use rmcp::tool_handler;
use rmcp::tool_router;
use rmcp::{ErrorData as McpError, ServerHandler};
use serde::Serialize;

use crate::session::SessionManager;

// ---------------------------------------------------------------------------
// Parameter structs (deserialized from MCP tool call arguments)
// ---------------------------------------------------------------------------

/// Parameters for the `create_session` tool.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct CreateSessionParams {
    /// Path to the crash dump to open.
    pub dump_path: String,
    /// Optional symbol search path override for this session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbols_path: Option<String>,
}

/// Parameters for tools keyed only by session id.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SessionIdParams {
    pub session_id: String,
}

/// Parameters for the `run_command` tool.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct RunCommandParams {
    pub session_id: String,
    /// The CDB command to queue, e.g. `k`, `!analyze -v`, `lm`.
    pub command: String,
}

/// Parameters for the `command_status` tool.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct CommandStatusParams {
    pub session_id: String,
    pub command_id: String,
}

/// Parameters for the `command_status_bulk` tool.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct CommandStatusBulkParams {
    pub session_id: String,
    pub command_ids: Vec<String>,
}

/// Parameters for the `cancel_command` tool.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct CancelCommandParams {
    pub session_id: String,
    pub command_id: String,
    /// Operator-facing reason recorded on the cancelled command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Parameters for the `cancel_all_commands` tool.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct CancelAllCommandsParams {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Result structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
struct CreateSessionResult {
    session_id: String,
}

#[derive(Debug, Clone, Serialize)]
struct RunCommandResult {
    command_id: String,
}

#[derive(Debug, Clone, Serialize)]
struct CloseSessionResult {
    session_id: String,
    closed: bool,
}

#[derive(Debug, Clone, Serialize)]
struct CancelCommandResult {
    command_id: String,
    cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
struct CancelAllCommandsResult {
    affected_commands: Vec<String>,
}

const DEFAULT_CANCEL_REASON: &str = "cancelled by client";

// ---------------------------------------------------------------------------
// MCP Server
// ---------------------------------------------------------------------------

/// The mcp-cdb-bridge MCP server.
///
/// Holds the single [`SessionManager`] that owns every debug session's
/// adapter, queue, and recovery controller.
#[derive(Clone)]
pub struct CdbBridgeServer {
    sessions: Arc<SessionManager>,
    tool_router: ToolRouter<CdbBridgeServer>,
}

impl CdbBridgeServer {
    #[must_use]
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions, tool_router: Self::tool_router() }
    }
}

fn json_content<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("JSON serialization error: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

fn err_result(msg: impl std::fmt::Display) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg.to_string())]))
}

#[tool_router]
impl CdbBridgeServer {
    #[tool(
        description = "Open a crash dump in a new CDB session. Spawns a private cdb.exe process against dumpPath, optionally overriding the symbol search path, and returns a sessionId used by every other tool. Fails with an error if the session limit (maxConcurrentSessions) is reached or CDB cannot reach its prompt."
    )]
    async fn create_session(
        &self,
        Parameters(params): Parameters<CreateSessionParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(dump_path = %params.dump_path, "create_session");
        match self
            .sessions
            .create(PathBuf::from(params.dump_path), params.symbols_path)
            .await
        {
            Ok(session_id) => json_content(&CreateSessionResult { session_id }),
            Err(e) => err_result(e),
        }
    }

    #[tool(
        description = "Queue a CDB command (e.g. `k`, `lm`, `!analyze -v`) in an existing session. Returns immediately with a commandId; the command runs asynchronously and may be coalesced into a batch with other queued commands. Use command_status or command_status_bulk to poll for the result."
    )]
    async fn run_command(
        &self,
        Parameters(params): Parameters<RunCommandParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(session_id = %params.session_id, command = %params.command, "run_command");
        match self.sessions.enqueue(&params.session_id, params.command).await {
            Ok(command_id) => json_content(&RunCommandResult { command_id }),
            Err(e) => err_result(e),
        }
    }

    #[tool(
        description = "Check the status of a queued or completed command by commandId. Returns its state (Queued/Executing/Completed/Failed/Cancelled/Timeout), output, and timing. Terminal results remain available for a bounded time after completion."
    )]
    async fn command_status(
        &self,
        Parameters(params): Parameters<CommandStatusParams>,
    ) -> Result<CallToolResult, McpError> {
        match self
            .sessions
            .command_status(&params.session_id, &params.command_id)
            .await
        {
            Ok(info) => json_content(&info),
            Err(e) => err_result(e),
        }
    }

    #[tool(
        description = "Check the status of multiple commands in one call. Returns a map from commandId to either its status or an error if the id is unknown."
    )]
    async fn command_status_bulk(
        &self,
        Parameters(params): Parameters<CommandStatusBulkParams>,
    ) -> Result<CallToolResult, McpError> {
        match self
            .sessions
            .command_status_bulk(&params.session_id, &params.command_ids)
            .await
        {
            Ok(statuses) => {
                let rendered: std::collections::HashMap<String, serde_json::Value> = statuses
                    .into_iter()
                    .map(|(id, result)| {
                        let value = match result {
                            Ok(info) => serde_json::to_value(info).unwrap_or(serde_json::Value::Null),
                            Err(e) => serde_json::json!({ "error": e.to_string() }),
                        };
                        (id, value)
                    })
                    .collect();
                json_content(&rendered)
            }
            Err(e) => err_result(e),
        }
    }

    #[tool(
        description = "Cancel a single queued or executing command. A still-queued command is removed immediately; an executing command is signalled and finishes with state=Cancelled once CDB yields control back. Returns false if the command is unknown or already terminal."
    )]
    async fn cancel_command(
        &self,
        Parameters(params): Parameters<CancelCommandParams>,
    ) -> Result<CallToolResult, McpError> {
        let reason = params.reason.unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());
        tracing::info!(session_id = %params.session_id, command_id = %params.command_id, "cancel_command");
        match self
            .sessions
            .cancel_command(&params.session_id, &params.command_id, &reason)
            .await
        {
            Ok(cancelled) => json_content(&CancelCommandResult { command_id: params.command_id, cancelled }),
            Err(e) => err_result(e),
        }
    }

    #[tool(
        description = "Cancel every non-terminal command in a session (queued and executing). Returns the commandIds actually affected. Useful before closing a session or after a recovery event."
    )]
    async fn cancel_all_commands(
        &self,
        Parameters(params): Parameters<CancelAllCommandsParams>,
    ) -> Result<CallToolResult, McpError> {
        let reason = params.reason.unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());
        match self.sessions.cancel_all_commands(&params.session_id, &reason).await {
            Ok(affected_commands) => json_content(&CancelAllCommandsResult { affected_commands }),
            Err(e) => err_result(e),
        }
    }

    #[tool(description = "Fetch a snapshot of a single session: dump path, symbols path, status, and commands processed.")]
    async fn get_session(
        &self,
        Parameters(params): Parameters<SessionIdParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.sessions.get(&params.session_id).await {
            Ok(snapshot) => json_content(&snapshot),
            Err(e) => err_result(e),
        }
    }

    #[tool(description = "List sessions currently Active (excludes Closing/Closed/Faulted).")]
    async fn list_active_sessions(&self) -> Result<CallToolResult, McpError> {
        json_content(&self.sessions.list_active().await)
    }

    #[tool(description = "List every session this server still tracks, regardless of status.")]
    async fn list_all_sessions(&self) -> Result<CallToolResult, McpError> {
        json_content(&self.sessions.list_all().await)
    }

    #[tool(
        description = "Close a session: cancels its outstanding commands, stops its CDB process, and frees its concurrency slot. Idempotent -- returns false if the session was already gone."
    )]
    async fn close_session(
        &self,
        Parameters(params): Parameters<SessionIdParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(session_id = %params.session_id, "close_session");
        let closed = self.sessions.close(&params.session_id).await;
        json_content(&CloseSessionResult { session_id: params.session_id, closed })
    }

    #[tool(description = "Server-wide counters: sessions created/closed/expired, total commands processed, and uptime in seconds.")]
    async fn session_stats(&self) -> Result<CallToolResult, McpError> {
        json_content(&self.sessions.stats().await)
    }
}

#[tool_handler]
impl ServerHandler for CdbBridgeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "mcp-cdb-bridge".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "mcp-cdb-bridge fronts the Microsoft Console Debugger (CDB) for crash-dump \
                 triage.\n\n\
                 Call create_session with a dump path to open a debugging session, then \
                 run_command to queue CDB commands (k, lm, !analyze -v, ...) against it. \
                 Commands run asynchronously and may be batched with adjacent queued commands \
                 for efficiency; poll command_status or command_status_bulk with the returned \
                 commandId to retrieve output once it transitions to a terminal state \
                 (Completed/Failed/Cancelled/Timeout). cancel_command and cancel_all_commands \
                 stop in-flight work. Sessions expire automatically after a period of \
                 inactivity and are restarted automatically by the recovery controller if \
                 CDB stops responding; call close_session when you are done with a dump to \
                 free its resources immediately."
                    .to_string(),
            ),
        }
    }
}
