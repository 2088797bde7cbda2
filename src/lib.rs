//! # MCP Thought Tree Server
//!
//! A Model Context Protocol (MCP) server that keeps Tree-of-Thought searches as
//! durable state. The calling model proposes and scores thoughts; this server
//! owns the tree, prunes weak branches, picks the frontier to pursue and
//! remembers where the search stands across calls and restarts.
//!
//! ## Features
//!
//! - **Weighted scoring**: per-criterion scores combined with configurable weights
//! - **Pruning**: thoughts far below the best score seen are failed early
//! - **Frontier strategies**: greedy, beam, diverse and (deterministic) sampling
//! - **Backtracking**: abandon a path and get the remaining alternatives
//! - **Best path**: leaf ranking by score plus completion status
//!
//! ## Architecture
//!
//! ```text
//! MCP Client → MCP Server (stdio) → TreeSearch → TreeRepository
//!                                                     ↓
//!                                          <data_dir>/<tree_id>.json
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mcp_thought_tree::{Config, AppState, McpServer};
//! use mcp_thought_tree::storage::{FileStorage, TreeRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = FileStorage::new(&config.storage).await?;
//!     let repo = TreeRepository::new(Arc::new(storage));
//!     let state = Arc::new(AppState::new(config, repo));
//!     McpServer::new(state).run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Configuration management for the MCP server.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Tree search: scoring, frontier selection and the search controller.
pub mod search;
/// MCP server implementation and request handling.
pub mod server;
/// Durable tree records and the in-process tree cache.
pub mod storage;
/// Thought tree data model.
pub mod tree;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use search::TreeSearch;
pub use server::{AppState, McpServer, SharedState};
pub use tree::{Strategy, Thought, ThoughtStatus, ThoughtTree};
