//! MCP protocol implementation for JSON-RPC 2.0 communication.
//!
//! This module provides the core MCP server implementation including:
//! - JSON-RPC 2.0 request/response handling
//! - Tool definitions and schemas
//! - Stdio-based server communication

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

use super::{handle_tool_call, SharedState};

#[cfg(test)]
#[path = "mcp_tests.rs"]
mod mcp_tests;

/// Protocol version advertised during initialization.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Server name advertised during initialization.
pub const SERVER_NAME: &str = "mcp-thought-tree";

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request identifier (None for notifications).
    pub id: Option<Value>,
    /// The method name to invoke.
    pub method: String,
    /// Optional parameters for the method.
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request identifier (null if unknown, always present).
    pub id: Value,
    /// The result on success (mutually exclusive with error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The error on failure (mutually exclusive with result).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    /// Error code (negative for predefined errors).
    pub code: i32,
    /// Human-readable error message.
    pub message: String,
}

/// MCP server information returned during initialization.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Crate version.
    pub version: String,
}

/// MCP server capabilities advertised to clients.
#[derive(Debug, Serialize)]
pub struct Capabilities {
    /// Tool support.
    pub tools: ToolCapabilities,
}

/// Tool-specific capabilities.
#[derive(Debug, Serialize)]
pub struct ToolCapabilities {
    /// Whether the tool list can change dynamically.
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Result of the MCP initialize handshake.
#[derive(Debug, Serialize)]
pub struct InitializeResult {
    /// Protocol revision spoken by the server.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Advertised capabilities.
    pub capabilities: Capabilities,
    /// Name and version of the server.
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// MCP tool definition with JSON Schema.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    /// Unique tool name (used in tool calls).
    pub name: String,
    /// Human-readable description of the tool.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Parameters for a tools/call request.
#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    /// The name of the tool to invoke.
    pub name: String,
    /// Optional arguments for the tool.
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Content item within a tool result.
#[derive(Debug, Serialize)]
pub struct ToolResultContent {
    /// The content type (e.g., "text").
    #[serde(rename = "type")]
    pub content_type: String,
    /// The text content of the result.
    pub text: String,
}

/// Result of a tool invocation.
#[derive(Debug, Serialize)]
pub struct ToolCallResult {
    /// Result payload; a single JSON text item.
    pub content: Vec<ToolResultContent>,
    /// Whether the result represents an error.
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolCallResult {
    /// Single text item; `is_error` marks a failed tool run.
    pub fn text(text: String, is_error: bool) -> Self {
        Self {
            content: vec![ToolResultContent {
                content_type: "text".to_string(),
                text,
            }],
            is_error: is_error.then_some(true),
        }
    }
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// MCP Server running over stdio.
///
/// Handles JSON-RPC 2.0 messages, one per line, for MCP protocol
/// communication with clients.
pub struct McpServer {
    state: SharedState,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Run the server using async stdio
    pub async fn run(&self) -> std::io::Result<()> {
        info!("MCP Thought Tree Server starting...");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serve line-delimited JSON-RPC from `reader` until EOF, writing responses to `writer`.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                info!("EOF received, shutting down");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            debug!(request = %trimmed, "Received request");

            if let Some(response) = self.handle_line(trimmed).await {
                let response_json = serde_json::to_string(&response)?;
                debug!(response = %response_json, "Sending response");

                writer.write_all(response_json.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }

        Ok(())
    }

    /// Handle one raw message line.
    /// Returns None when no response is due (notifications).
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => {
                error!(error = %e, "Failed to parse request");
                Some(JsonRpcResponse::error(
                    None,
                    -32700,
                    format!("Parse error: {}", e),
                ))
            }
        }
    }

    /// Handle a single JSON-RPC request
    async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.id.is_none();

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(request.id)),
            "tools/list" => Some(self.handle_tools_list(request.id)),
            "tools/call" => Some(self.handle_tool_call(request.id, request.params).await),
            "ping" => Some(JsonRpcResponse::success(
                request.id,
                Value::Object(Default::default()),
            )),
            method => {
                if is_notification {
                    debug!(method = %method, "Notification received");
                    None
                } else {
                    error!(method = %method, "Unknown method");
                    Some(JsonRpcResponse::error(
                        request.id,
                        -32601,
                        format!("Method not found: {}", method),
                    ))
                }
            }
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling initialize request");

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: Capabilities {
                tools: ToolCapabilities {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        match serde_json::to_value(result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize initialize result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }

    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling tools/list request");
        JsonRpcResponse::success(id, serde_json::json!({ "tools": tool_definitions() }))
    }

    async fn handle_tool_call(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(p) => p,
                Err(e) => {
                    return JsonRpcResponse::error(id, -32602, format!("Invalid params: {}", e));
                }
            },
            None => {
                return JsonRpcResponse::error(id, -32602, "Missing params");
            }
        };

        info!(tool = %params.name, "Handling tool call");

        let tool_result = match handle_tool_call(&self.state, &params.name, params.arguments).await
        {
            Ok(result) => match serde_json::to_string_pretty(&result) {
                Ok(text) => ToolCallResult::text(text, false),
                Err(e) => {
                    error!(tool = %params.name, error = %e, "Failed to serialize tool result");
                    return JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e));
                }
            },
            Err(e) => {
                error!(tool = %params.name, error = %e, "Tool call failed");
                ToolCallResult::text(format!("Error: {}", e), true)
            }
        };

        match serde_json::to_value(tool_result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize tool call result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }
}

/// Every tool the server exposes, in workflow order.
pub fn tool_definitions() -> Vec<Tool> {
    vec![
        get_create_tree_tool(),
        get_generate_thoughts_tool(),
        get_evaluate_thoughts_tool(),
        get_select_path_tool(),
        get_expand_thought_tool(),
        get_backtrack_tool(),
        get_tree_state_tool(),
        get_best_path_tool(),
        get_list_trees_tool(),
        get_delete_tree_tool(),
        get_set_criteria_weights_tool(),
    ]
}

fn tree_id_schema() -> Value {
    serde_json::json!({
        "type": "string",
        "description": "ID of the thought tree"
    })
}

fn get_create_tree_tool() -> Tool {
    Tool {
        name: "tot_create_tree".to_string(),
        description: "Start a Tree-of-Thought search for a problem. Creates the root thought and \
                      returns the tree ID, scoring criteria and a recommended thinking level."
            .to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "problem": {
                    "type": "string",
                    "description": "The problem statement to explore"
                },
                "criteria": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Criteria thoughts are scored on (default: feasibility, complexity, risk)"
                },
                "strategy": {
                    "type": "string",
                    "enum": ["greedy", "beam", "diverse", "sampling"],
                    "description": "Frontier selection strategy (default: greedy)"
                },
                "max_depth": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum search depth below the root"
                }
            },
            "required": ["problem"],
            "additionalProperties": false
        }),
    }
}

fn get_generate_thoughts_tool() -> Tool {
    Tool {
        name: "tot_generate_thoughts".to_string(),
        description: "Attach candidate thoughts as pending children of the current thought."
            .to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "tree_id": tree_id_schema(),
                "thoughts": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "content": { "type": "string", "description": "The approach" },
                            "rationale": { "type": "string", "description": "Why it might work" }
                        },
                        "required": ["content"]
                    },
                    "description": "Thoughts to add under the current thought"
                }
            },
            "required": ["tree_id", "thoughts"],
            "additionalProperties": false
        }),
    }
}

fn get_evaluate_thoughts_tool() -> Tool {
    Tool {
        name: "tot_evaluate_thoughts".to_string(),
        description: "Score thoughts per criterion (1-10). Each thought is classified \
                      promising, uncertain or failed, or pruned against the best score seen."
            .to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "tree_id": tree_id_schema(),
                "evaluations": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "thought_id": { "type": "string" },
                            "scores": {
                                "type": "object",
                                "additionalProperties": { "type": "number" },
                                "description": "Criterion name to score"
                            }
                        },
                        "required": ["thought_id", "scores"]
                    }
                }
            },
            "required": ["tree_id", "evaluations"],
            "additionalProperties": false
        }),
    }
}

fn get_select_path_tool() -> Tool {
    Tool {
        name: "tot_select_path".to_string(),
        description: "Choose which thought(s) below the current thought to pursue and move \
                      the cursor to the best one. Pass thought_id to select a thought directly."
            .to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "tree_id": tree_id_schema(),
                "thought_id": {
                    "type": "string",
                    "description": "Select this thought directly, bypassing the strategy"
                },
                "strategy": {
                    "type": "string",
                    "enum": ["greedy", "beam", "diverse", "sampling"],
                    "description": "Strategy for this call only (default: the tree's strategy)"
                },
                "beam_width": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Number of thoughts kept by beam, diverse and sampling"
                }
            },
            "required": ["tree_id"],
            "additionalProperties": false
        }),
    }
}

fn get_expand_thought_tool() -> Tool {
    Tool {
        name: "tot_expand_thought".to_string(),
        description: "Record a detailed elaboration of a thought and mark it complete."
            .to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "tree_id": tree_id_schema(),
                "thought_id": { "type": "string", "description": "Thought to expand" },
                "expansion": { "type": "string", "description": "Detailed elaboration" },
                "implementation_notes": {
                    "type": "string",
                    "description": "Optional notes about implementation"
                }
            },
            "required": ["tree_id", "thought_id", "expansion"],
            "additionalProperties": false
        }),
    }
}

fn get_backtrack_tool() -> Tool {
    Tool {
        name: "tot_backtrack".to_string(),
        description: "Abandon the current thought as failed and return to its parent. \
                      Returns the remaining alternatives at that level."
            .to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "tree_id": tree_id_schema(),
                "reason": { "type": "string", "description": "Why this path is abandoned" }
            },
            "required": ["tree_id", "reason"],
            "additionalProperties": false
        }),
    }
}

fn get_tree_state_tool() -> Tool {
    Tool {
        name: "tot_get_tree_state".to_string(),
        description: "Show the current thought, status counts and a text outline of the tree."
            .to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": { "tree_id": tree_id_schema() },
            "required": ["tree_id"],
            "additionalProperties": false
        }),
    }
}

fn get_best_path_tool() -> Tool {
    Tool {
        name: "tot_get_best_path".to_string(),
        description: "Return the root-to-leaf path ranked best by leaf score and status."
            .to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": { "tree_id": tree_id_schema() },
            "required": ["tree_id"],
            "additionalProperties": false
        }),
    }
}

fn get_list_trees_tool() -> Tool {
    Tool {
        name: "tot_list_trees".to_string(),
        description: "List stored thought trees, most recently updated first.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        }),
    }
}

fn get_delete_tree_tool() -> Tool {
    Tool {
        name: "tot_delete_tree".to_string(),
        description: "Permanently delete a thought tree and its stored record.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": { "tree_id": tree_id_schema() },
            "required": ["tree_id"],
            "additionalProperties": false
        }),
    }
}

fn get_set_criteria_weights_tool() -> Tool {
    Tool {
        name: "tot_set_criteria_weights".to_string(),
        description: "Set the weight (0.0-1.0) of one or more criteria. Unlisted criteria keep \
                      their weight."
            .to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "tree_id": tree_id_schema(),
                "weights": {
                    "type": "object",
                    "additionalProperties": { "type": "number", "minimum": 0, "maximum": 1 },
                    "description": "Criterion name to weight"
                }
            },
            "required": ["tree_id", "weights"],
            "additionalProperties": false
        }),
    }
}
