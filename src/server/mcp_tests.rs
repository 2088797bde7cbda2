//! Unit tests for MCP protocol implementation.
//!
//! Tests JSON-RPC 2.0 request/response handling, tool definitions,
//! and dispatch of tool calls to the search controller.

use super::*;
use crate::config::{Config, StorageConfig};
use crate::server::AppState;
use crate::storage::{FileStorage, TreeRepository};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

async fn test_server(dir: &TempDir) -> McpServer {
    let mut config = Config::default();
    config.storage = StorageConfig {
        data_dir: dir.path().to_path_buf(),
    };
    let storage = FileStorage::new(&config.storage).await.unwrap();
    let state = AppState::new(config, TreeRepository::new(Arc::new(storage)));
    McpServer::new(Arc::new(state))
}

async fn call(server: &McpServer, id: i64, tool: &str, arguments: Value) -> JsonRpcResponse {
    let request = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": { "name": tool, "arguments": arguments }
    });
    server.handle_line(&request.to_string()).await.unwrap()
}

/// Parse the JSON text payload of a successful tool call.
fn payload(response: &JsonRpcResponse) -> Value {
    let result = response.result.as_ref().unwrap();
    assert!(result.get("isError").is_none(), "tool failed: {}", result);
    serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap()
}

fn error_text(response: &JsonRpcResponse) -> String {
    let result = response.result.as_ref().unwrap();
    assert_eq!(result["isError"], true);
    result["content"][0]["text"].as_str().unwrap().to_string()
}

// ============================================================================
// JsonRpcResponse tests
// ============================================================================

#[test]
fn test_jsonrpc_response_success_with_id() {
    let response = JsonRpcResponse::success(Some(json!(1)), json!({"result": "ok"}));

    assert_eq!(response.jsonrpc, "2.0");
    assert_eq!(response.id, json!(1));
    assert!(response.error.is_none());
    assert_eq!(response.result.unwrap()["result"], "ok");
}

#[test]
fn test_jsonrpc_response_success_without_id() {
    let response = JsonRpcResponse::success(None, json!({"data": "value"}));
    assert_eq!(response.id, Value::Null);
}

#[test]
fn test_jsonrpc_response_error_serialization() {
    let response = JsonRpcResponse::error(Some(json!(42)), -32601, "Method not found: x");
    let value = serde_json::to_value(&response).unwrap();

    assert_eq!(value["id"], 42);
    assert_eq!(value["error"]["code"], -32601);
    assert!(value.get("result").is_none());
    assert!(value["error"].get("data").is_none());
}

// ============================================================================
// Request parsing tests
// ============================================================================

#[test]
fn test_jsonrpc_request_deserialization() {
    let request: JsonRpcRequest = serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": "req-1",
        "method": "tools/list"
    }))
    .unwrap();

    assert_eq!(request.method, "tools/list");
    assert_eq!(request.id, Some(json!("req-1")));
    assert!(request.params.is_none());
}

#[test]
fn test_tool_call_params_without_arguments() {
    let params: ToolCallParams =
        serde_json::from_value(json!({ "name": "tot_list_trees" })).unwrap();
    assert_eq!(params.name, "tot_list_trees");
    assert!(params.arguments.is_none());
}

// ============================================================================
// Tool definition tests
// ============================================================================

#[test]
fn test_all_tools_count() {
    let names: Vec<String> = tool_definitions().into_iter().map(|t| t.name).collect();
    assert_eq!(
        names,
        vec![
            "tot_create_tree",
            "tot_generate_thoughts",
            "tot_evaluate_thoughts",
            "tot_select_path",
            "tot_expand_thought",
            "tot_backtrack",
            "tot_get_tree_state",
            "tot_get_best_path",
            "tot_list_trees",
            "tot_delete_tree",
            "tot_set_criteria_weights",
        ]
    );
}

#[test]
fn test_all_tools_have_valid_schemas() {
    for tool in tool_definitions() {
        assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
        assert!(tool.input_schema["properties"].is_object(), "{}", tool.name);
        assert!(!tool.description.is_empty(), "{}", tool.name);

        if let Some(required) = tool.input_schema["required"].as_array() {
            for field in required {
                let field = field.as_str().unwrap();
                assert!(
                    tool.input_schema["properties"].get(field).is_some(),
                    "{} requires undeclared {}",
                    tool.name,
                    field
                );
            }
        }
    }
}

#[test]
fn test_tool_serializes_input_schema_camel_case() {
    let value = serde_json::to_value(get_create_tree_tool()).unwrap();
    assert!(value.get("inputSchema").is_some());
    assert!(value.get("input_schema").is_none());
}

// ============================================================================
// Protocol dispatch tests
// ============================================================================

#[tokio::test]
async fn test_initialize() {
    let dir = tempfile::tempdir().unwrap();
    let server = test_server(&dir).await;

    let response = server
        .handle_line(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#)
        .await
        .unwrap();
    let result = response.result.unwrap();

    assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
    assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
    assert_eq!(result["capabilities"]["tools"]["listChanged"], false);
}

#[test]
fn test_tool_call_result_text() {
    let ok = serde_json::to_value(ToolCallResult::text("{}".to_string(), false)).unwrap();
    assert_eq!(ok["content"][0]["type"], "text");
    assert!(ok.get("isError").is_none());

    let failed = serde_json::to_value(ToolCallResult::text("Error: boom".to_string(), true)).unwrap();
    assert_eq!(failed["isError"], true);
    assert_eq!(failed["content"][0]["text"], "Error: boom");
}

#[tokio::test]
async fn test_notifications_get_no_response() {
    let dir = tempfile::tempdir().unwrap();
    let server = test_server(&dir).await;

    for method in ["initialized", "notifications/initialized", "notifications/cancelled", "whatever"] {
        let line = json!({ "jsonrpc": "2.0", "method": method }).to_string();
        assert!(server.handle_line(&line).await.is_none(), "{method}");
    }
}

#[tokio::test]
async fn test_unknown_method_and_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let server = test_server(&dir).await;

    let response = server
        .handle_line(r#"{"jsonrpc":"2.0","id":7,"method":"resources/list"}"#)
        .await
        .unwrap();
    assert_eq!(response.error.unwrap().code, -32601);

    let response = server.handle_line("{not json").await.unwrap();
    assert_eq!(response.id, Value::Null);
    assert_eq!(response.error.unwrap().code, -32700);
}

#[tokio::test]
async fn test_tools_call_missing_params() {
    let dir = tempfile::tempdir().unwrap();
    let server = test_server(&dir).await;

    let response = server
        .handle_line(r#"{"jsonrpc":"2.0","id":3,"method":"tools/call"}"#)
        .await
        .unwrap();
    assert_eq!(response.error.unwrap().code, -32602);
}

#[tokio::test]
async fn test_ping() {
    let dir = tempfile::tempdir().unwrap();
    let server = test_server(&dir).await;

    let response = server
        .handle_line(r#"{"jsonrpc":"2.0","id":"p","method":"ping"}"#)
        .await
        .unwrap();
    assert_eq!(response.result.unwrap(), json!({}));
}

// ============================================================================
// Tool call tests
// ============================================================================

#[tokio::test]
async fn test_unknown_tool_is_tool_error() {
    let dir = tempfile::tempdir().unwrap();
    let server = test_server(&dir).await;

    let response = call(&server, 1, "tot_teleport", json!({})).await;
    assert!(error_text(&response).contains("Unknown tool: tot_teleport"));
}

#[tokio::test]
async fn test_invalid_arguments_are_tool_error() {
    let dir = tempfile::tempdir().unwrap();
    let server = test_server(&dir).await;

    let response = call(&server, 1, "tot_create_tree", json!({ "max_depth": 2 })).await;
    assert!(error_text(&response).contains("Invalid parameters for tot_create_tree"));
}

#[tokio::test]
async fn test_search_error_is_tool_error() {
    let dir = tempfile::tempdir().unwrap();
    let server = test_server(&dir).await;

    let response = call(&server, 1, "tot_create_tree", json!({ "problem": "p", "max_depth": 0 })).await;
    assert!(error_text(&response).contains("max_depth"));

    let response = call(&server, 2, "tot_get_tree_state", json!({ "tree_id": "missing" })).await;
    assert!(error_text(&response).contains("Tree not found: missing"));
}

#[tokio::test]
async fn test_tool_workflow_over_protocol() {
    let dir = tempfile::tempdir().unwrap();
    let server = test_server(&dir).await;

    let created = payload(
        &call(
            &server,
            1,
            "tot_create_tree",
            json!({ "problem": "Speed up CI", "criteria": ["feasibility", "risk"] }),
        )
        .await,
    );
    let tree_id = created["tree_id"].as_str().unwrap().to_string();

    let generated = payload(
        &call(
            &server,
            2,
            "tot_generate_thoughts",
            json!({
                "tree_id": tree_id,
                "thoughts": [
                    { "content": "cache dependencies", "rationale": "most time is downloads" },
                    { "content": "run everything twice", "rationale": "more signal" }
                ]
            }),
        )
        .await,
    );
    let a = generated["added"][0]["id"].as_str().unwrap().to_string();
    let b = generated["added"][1]["id"].as_str().unwrap().to_string();

    let evaluated = payload(
        &call(
            &server,
            3,
            "tot_evaluate_thoughts",
            json!({
                "tree_id": tree_id,
                "evaluations": [
                    { "thought_id": a, "scores": { "feasibility": 8, "risk": 8 } },
                    { "thought_id": b, "scores": { "feasibility": 9, "risk": 2 } }
                ]
            }),
        )
        .await,
    );
    assert_eq!(evaluated["best_score_seen"], 8.0);
    assert_eq!(evaluated["evaluated"][0]["classification"], "promising");
    assert_eq!(evaluated["evaluated"][1]["classification"], "failed");

    let selected = payload(&call(&server, 4, "tot_select_path", json!({ "tree_id": tree_id })).await);
    assert_eq!(selected["outcome"], "selected");
    assert_eq!(selected["selected"][0]["id"], a.as_str());

    let path = payload(&call(&server, 5, "tot_get_best_path", json!({ "tree_id": tree_id })).await);
    assert_eq!(path["outcome"], "found");
    assert_eq!(path["path_length"], 2);

    let listed = payload(&call(&server, 6, "tot_list_trees", Value::Null).await);
    assert_eq!(listed["count"], 1);

    let deleted = payload(&call(&server, 7, "tot_delete_tree", json!({ "tree_id": tree_id })).await);
    assert_eq!(deleted["deleted"], true);
}

#[tokio::test]
async fn test_backtrack_at_root_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let server = test_server(&dir).await;

    let created = payload(&call(&server, 1, "tot_create_tree", json!({ "problem": "p" })).await);
    let response = call(
        &server,
        2,
        "tot_backtrack",
        json!({ "tree_id": created["tree_id"], "reason": "stuck" }),
    )
    .await;

    let body = payload(&response);
    assert_eq!(body["outcome"], "at_root");
    assert!(body["message"].as_str().unwrap().contains("cannot backtrack"));
}

#[tokio::test]
async fn test_serve_writes_one_line_per_response() {
    let dir = tempfile::tempdir().unwrap();
    let server = test_server(&dir).await;

    let input = concat!(
        r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
        "\n",
        r#"{"jsonrpc":"2.0","method":"initialized"}"#,
        "\n\n",
        r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
        "\n"
    );
    let mut output = Vec::new();
    server
        .serve(tokio::io::BufReader::new(input.as_bytes()), &mut output)
        .await
        .unwrap();

    let text = String::from_utf8(output).unwrap();
    let lines: Vec<Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["id"], 1);
    assert_eq!(lines[1]["result"]["tools"].as_array().unwrap().len(), 11);
}
