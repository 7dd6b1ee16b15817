/// Error types shared by the coordinator and its collaborators
use thiserror::Error;

/// Failures surfaced by the dispatch router to the sender of a message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("NoDestination")]
    NoDestination,
    #[error("unknown message: {0}")]
    UnknownMessage(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl CoordinatorError {
    /// JSON reply sent back to the message sender, or None when the message
    /// belongs to another listener and must stay unanswered
    pub fn reply(&self) -> Option<serde_json::Value> {
        match self {
            CoordinatorError::NoDestination => Some(serde_json::json!({
                "accepted": false,
                "error": self.to_string(),
            })),
            CoordinatorError::UnknownMessage(_) => None,
            other => Some(serde_json::json!({ "error": other.to_string() })),
        }
    }
}

/// Network-level failure of a single HTTP round trip
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport failure: {message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        TransportError {
            message: message.into(),
        }
    }
}

/// Durable key-value storage failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("credential storage failure: {0}")]
pub struct StorageError(pub String);

/// Host (tabs / side panel) failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("host failure: {0}")]
pub struct HostError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("config is not valid: {0}")]
    Malformed(String),
    #[error("apiBaseUrl is not a valid URL: {0}")]
    InvalidBaseUrl(String),
    #[error("apiBaseUrl must use http or https, got {0}")]
    UnsupportedScheme(String),
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}
