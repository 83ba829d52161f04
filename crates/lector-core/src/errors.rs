use std::time::Duration;

/// Failure of a call into an external adapter (classifier, planner, renderers,
/// asset store).
#[derive(Clone, Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("network error: {0}")]
    Network(String),
    #[error("adapter returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("generation failed: {0}")]
    GenerationFailed(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("adapter unavailable: {0}")]
    Unavailable(String),
}

impl AdapterError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Status { .. } => "status",
            Self::InvalidResponse(_) => "invalid_response",
            Self::GenerationFailed(_) => "generation_failed",
            Self::Timeout(_) => "timeout",
            Self::Unavailable(_) => "unavailable",
        }
    }

    /// Classify an HTTP status code from an adapter backend.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            422 => Self::GenerationFailed(body),
            429 | 503 => Self::Unavailable(format!("{status}: {body}")),
            _ => Self::Status { status, body },
        }
    }
}

/// Errors raised by the persistence gateway and the durable asset store.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("offset {offset} is past the end of a {len}-slide lecture")]
    InvalidOffset { offset: usize, len: usize },

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl PersistenceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        PersistenceError::Serialization(e.to_string())
    }
}

/// A stored document that does not have the shape of a lecture.
#[derive(Debug, thiserror::Error)]
#[error("lecture document has an invalid shape: {0}")]
pub struct ShapeError(pub String);
