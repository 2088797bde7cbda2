use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::SharedState;
use crate::error::{McpError, McpResult};
use crate::search::{
    BacktrackParams, CreateTreeParams, EvaluateThoughtsParams, ExpandThoughtParams,
    GenerateThoughtsParams, SelectPathParams, SetCriteriaWeightsParams,
};

/// Route tool calls to appropriate handlers
pub async fn handle_tool_call(
    state: &SharedState,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");

    match tool_name {
        "tot_create_tree" => handle_create_tree(state, arguments).await,
        "tot_generate_thoughts" => handle_generate_thoughts(state, arguments).await,
        "tot_evaluate_thoughts" => handle_evaluate_thoughts(state, arguments).await,
        "tot_select_path" => handle_select_path(state, arguments).await,
        "tot_expand_thought" => handle_expand_thought(state, arguments).await,
        "tot_backtrack" => handle_backtrack(state, arguments).await,
        "tot_get_tree_state" => handle_get_tree_state(state, arguments).await,
        "tot_get_best_path" => handle_get_best_path(state, arguments).await,
        "tot_list_trees" => handle_list_trees(state, arguments).await,
        "tot_delete_tree" => handle_delete_tree(state, arguments).await,
        "tot_set_criteria_weights" => handle_set_criteria_weights(state, arguments).await,
        _ => Err(McpError::UnknownTool {
            tool_name: tool_name.to_string(),
        }),
    }
}

async fn handle_create_tree(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("tot_create_tree", arguments, |params: CreateTreeParams| {
        state.search.create_tree(params)
    })
    .await
}

async fn handle_generate_thoughts(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    execute_handler(
        "tot_generate_thoughts",
        arguments,
        |params: GenerateThoughtsParams| state.search.generate_thoughts(params),
    )
    .await
}

async fn handle_evaluate_thoughts(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    execute_handler(
        "tot_evaluate_thoughts",
        arguments,
        |params: EvaluateThoughtsParams| state.search.evaluate_thoughts(params),
    )
    .await
}

async fn handle_select_path(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("tot_select_path", arguments, |params: SelectPathParams| {
        state.search.select_path(params)
    })
    .await
}

async fn handle_expand_thought(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "tot_expand_thought",
        arguments,
        |params: ExpandThoughtParams| state.search.expand_thought(params),
    )
    .await
}

async fn handle_backtrack(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("tot_backtrack", arguments, |params: BacktrackParams| {
        state.search.backtrack(params)
    })
    .await
}

/// Arguments of the tools that only name a tree.
#[derive(Debug, Deserialize)]
struct TreeIdParams {
    tree_id: String,
}

/// Handle tot_get_tree_state - snapshot and outline of one tree
async fn handle_get_tree_state(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: TreeIdParams = parse_arguments("tot_get_tree_state", arguments)?;

    let result = state
        .search
        .get_tree_state(&params.tree_id)
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    serde_json::to_value(result).map_err(McpError::Json)
}

/// Handle tot_get_best_path - highest ranked root-to-leaf path
async fn handle_get_best_path(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: TreeIdParams = parse_arguments("tot_get_best_path", arguments)?;

    let result = state
        .search
        .best_path(&params.tree_id)
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    serde_json::to_value(result).map_err(McpError::Json)
}

/// Handle tot_list_trees - takes no arguments
async fn handle_list_trees(state: &SharedState, _arguments: Option<Value>) -> McpResult<Value> {
    let result = state
        .search
        .list_trees()
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    serde_json::to_value(result).map_err(McpError::Json)
}

/// Handle tot_delete_tree - irreversible removal
async fn handle_delete_tree(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: TreeIdParams = parse_arguments("tot_delete_tree", arguments)?;

    let result = state
        .search
        .delete_tree(&params.tree_id)
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    serde_json::to_value(result).map_err(McpError::Json)
}

async fn handle_set_criteria_weights(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    execute_handler(
        "tot_set_criteria_weights",
        arguments,
        |params: SetCriteriaWeightsParams| state.search.set_criteria_weights(params),
    )
    .await
}

// ============================================================================
// Helper functions
// ============================================================================

/// Helper to parse arguments with consistent error handling
fn parse_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        Some(args) => serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        }),
        None => Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: "Missing arguments".to_string(),
        }),
    }
}

/// Parse typed arguments, run the operation and serialize its result.
///
/// Parse failures become `InvalidParameters`; operation failures become
/// `ExecutionFailed` carrying the operation's error message.
async fn execute_handler<P, R, E, F, Fut>(
    tool_name: &str,
    arguments: Option<Value>,
    operation: F,
) -> McpResult<Value>
where
    P: serde::de::DeserializeOwned,
    R: Serialize,
    E: std::fmt::Display,
    F: FnOnce(P) -> Fut,
    Fut: std::future::Future<Output = Result<R, E>>,
{
    let params: P = parse_arguments(tool_name, arguments)?;

    let result = operation(params)
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    serde_json::to_value(result).map_err(McpError::Json)
}
