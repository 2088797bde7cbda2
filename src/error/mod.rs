use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {message}")]
    Config {
        /// What was wrong.
        message: String,
    },

    /// A search operation failed.
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    /// The MCP layer failed.
    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    /// Anything else.
    #[error("Internal error: {message}")]
    Internal {
        /// Error description.
        message: String,
    },
}

/// Errors returned by thought tree operations.
///
/// `NoViableCandidates` is a signal rather than a fault: the search controller
/// turns it into an explicit outcome telling the caller to backtrack.
#[derive(Debug, Error)]
pub enum SearchError {
    /// No tree with this id.
    #[error("Tree not found: {tree_id}")]
    TreeNotFound {
        /// The requested tree id.
        tree_id: String,
    },

    /// No thought with this id in the tree.
    #[error("Thought not found: {thought_id}")]
    ThoughtNotFound {
        /// The requested thought id.
        thought_id: String,
    },

    /// A caller-supplied value was rejected.
    #[error("Invalid argument: {field} - {reason}")]
    InvalidArgument {
        /// Offending argument.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Every child of the thought has failed, or there are none.
    #[error("No viable candidates below thought {thought_id}")]
    NoViableCandidates {
        /// Thought whose children were ranked.
        thought_id: String,
    },

    /// The tree could not be loaded or saved.
    #[error("Persistence failure: {0}")]
    Persistence(#[from] StorageError),
}

impl SearchError {
    /// Shorthand for an `InvalidArgument` error.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        SearchError::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error means the named tree or thought does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SearchError::TreeNotFound { .. } | SearchError::ThoughtNotFound { .. }
        )
    }
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being accessed.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Record could not be encoded or decoded.
    #[error("Record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Key is not usable as a record name.
    #[error("Invalid record key: {key}")]
    InvalidKey {
        /// The rejected key.
        key: String,
    },

    /// Record was written by a newer version.
    #[error("Unsupported schema version {found} (supported up to {supported})")]
    UnsupportedSchema {
        /// Version in the record.
        found: u32,
        /// Newest version this build reads.
        supported: u32,
    },

    /// Record decoded but is structurally inconsistent.
    #[error("Corrupt record {key}: {reason}")]
    Corrupt {
        /// Record key.
        key: String,
        /// What is inconsistent.
        reason: String,
    },
}

/// MCP protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    /// Malformed request.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// What was wrong.
        message: String,
    },

    /// Tool name is not registered.
    #[error("Unknown tool: {tool_name}")]
    UnknownTool {
        /// The requested tool.
        tool_name: String,
    },

    /// Tool arguments did not match the tool's schema.
    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParameters {
        /// Tool being called.
        tool_name: String,
        /// Parse failure.
        message: String,
    },

    /// Tool ran and failed.
    #[error("Tool execution failed: {message}")]
    ExecutionFailed {
        /// Failure description.
        message: String,
    },

    /// JSON encoding or decoding failed.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<SearchError> for McpError {
    fn from(err: SearchError) -> Self {
        McpError::ExecutionFailed {
            message: err.to_string(),
        }
    }
}

impl From<AppError> for McpError {
    fn from(err: AppError) -> Self {
        McpError::ExecutionFailed {
            message: err.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for tree search operations
pub type SearchResult<T> = Result<T, SearchError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;
