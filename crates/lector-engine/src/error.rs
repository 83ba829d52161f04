use lector_core::errors::{AdapterError, PersistenceError};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("plan rejected: {0}")]
    PlanRejected(String),

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}
