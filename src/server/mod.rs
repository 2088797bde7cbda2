//! Server module for MCP protocol handling.
//!
//! This module provides:
//! - MCP server implementation over stdio
//! - Tool call handlers and routing
//! - Shared application state management

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::sync::Arc;

use crate::config::Config;
use crate::search::TreeSearch;
use crate::storage::TreeRepository;

/// Application state shared across handlers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Search controller owning the tree repository.
    pub search: TreeSearch,
}

impl AppState {
    /// Create new application state over an already-opened repository.
    pub fn new(config: Config, repo: TreeRepository) -> Self {
        tracing::info!(
            data_dir = %config.storage.data_dir.display(),
            default_criteria = ?config.search.default_criteria,
            default_max_depth = config.search.default_max_depth,
            "AppState initializing"
        );

        let search = TreeSearch::new(repo, config.search.clone());
        Self { config, search }
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;
