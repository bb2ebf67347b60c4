//! Error types for the maistro domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] folds them together
//! for callers that drive a whole turn.

use thiserror::Error;

/// The top-level error type for all maistro operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Completion unavailable: {0}")]
    Provider(#[from] ProviderError),

    // --- Memory store errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Routing errors ---
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    // --- Reflection errors ---
    #[error("Reflection error: {0}")]
    Reflection(#[from] ReflectionError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Stored value is not valid JSON: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool server '{server}' transport failure: {reason}")]
    Transport { server: String, reason: String },

    #[error("Tool server '{server}' returned error {code}: {message}")]
    Server {
        server: String,
        code: i64,
        message: String,
    },
}

/// Failures while deciding where a turn goes next.
///
/// These abort the turn: a transcript the router cannot read is a bug upstream.
#[derive(Debug, Clone, Error)]
pub enum RoutingError {
    #[error("Malformed tool call '{call_id}': {reason}")]
    MalformedToolCall { call_id: String, reason: String },

    #[error("Router expects the latest assistant message, got a {role} message")]
    UnexpectedRole { role: String },
}

/// Failures of a single memory reflection step.
///
/// None of these leave partial writes behind.
#[derive(Debug, Clone, Error)]
pub enum ReflectionError {
    #[error("Invalid {record} record: {reason}")]
    InvalidRecordShape { record: String, reason: String },

    #[error("Completion unavailable: {0}")]
    CompletionUnavailable(ProviderError),

    #[error("No '{0}' memory update was requested by the latest message")]
    MissingInvocation(String),

    #[error("Store error: {0}")]
    Store(#[from] MemoryError),
}
