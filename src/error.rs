//! Error types for polychat

use thiserror::Error;

/// Result type alias using [`PolychatError`]
pub type Result<T> = std::result::Result<T, PolychatError>;

/// Main error type for polychat
///
/// The taxonomy distinguishes "upstream unreachable" ([`Transport`]) from
/// "upstream responded nonsense" ([`Protocol`]) from "upstream said no"
/// ([`Provider`]), because callers retry or surface these differently.
///
/// [`Transport`]: PolychatError::Transport
/// [`Protocol`]: PolychatError::Protocol
/// [`Provider`]: PolychatError::Provider
#[derive(Debug, Error)]
pub enum PolychatError {
    /// Request parameter rejected before any network call
    #[error("Invalid parameter: {0}")]
    Parameter(String),

    /// Network-level failure reaching the provider
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// WebSocket transport failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Response body not parseable or of unexpected shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error reported by the provider inside a well-formed response
    #[error("Provider {provider} error: {message}")]
    Provider {
        provider: String,
        code: Option<String>,
        message: String,
    },

    /// A streaming chat is already active for this user
    #[error("A chat is already being processed for user {user_id}")]
    SessionConflict { user_id: i64 },

    /// Chat/upload chance counters at zero
    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    /// Image task did not reach a terminal state within the poll budget
    #[error("Task {task_id} timed out after {polls} polls")]
    TaskTimeout { task_id: String, polls: u32 },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Key-value cache failure
    #[error("Cache error: {0}")]
    Cache(String),

    /// Persistence collaborator failure
    #[error("Store error: {0}")]
    Store(String),

    /// Object storage collaborator failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Provider is not configured (missing credentials)
    #[error("Provider {0} is not configured")]
    NotConfigured(String),

    /// Provider does not support the requested capability
    #[error("Provider {provider} does not support {capability}")]
    Unsupported {
        provider: String,
        capability: String,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl From<String> for PolychatError {
    fn from(s: String) -> Self {
        PolychatError::Other(s)
    }
}

impl From<&str> for PolychatError {
    fn from(s: &str) -> Self {
        PolychatError::Other(s.to_string())
    }
}

impl PolychatError {
    /// Shorthand for a provider-reported error without a code
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        PolychatError::Provider {
            provider: provider.into(),
            code: None,
            message: message.into(),
        }
    }
}
