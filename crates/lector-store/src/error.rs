use lector_core::errors::PersistenceError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("offset {offset} is past the end of a {len}-slide lecture")]
    InvalidOffset { offset: usize, len: usize },

    #[error("invalid asset payload: {0}")]
    InvalidPayload(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for PersistenceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Database(m) => PersistenceError::Database(m),
            StoreError::NotFound(m) => PersistenceError::NotFound(m),
            StoreError::InvalidOffset { offset, len } => PersistenceError::InvalidOffset { offset, len },
            StoreError::InvalidPayload(m) => PersistenceError::Serialization(m),
            StoreError::Serialization(m) => PersistenceError::Serialization(m),
            StoreError::Io(m) => PersistenceError::Io(m),
        }
    }
}
