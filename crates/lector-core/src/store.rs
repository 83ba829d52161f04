use async_trait::async_trait;

use crate::errors::PersistenceError;
use crate::ids::LectureId;
use crate::lecture::{HydratedSlide, StylePreferences};

/// Versioned lecture document storage.
///
/// Documents are handed out raw so callers validate the shape themselves;
/// the only mutation is a whole-suffix replacement.
#[async_trait]
pub trait LectureStore: Send + Sync {
    async fn create(
        &self,
        topic: &str,
        permitted_users: &[String],
        preferences: &StylePreferences,
    ) -> Result<LectureId, PersistenceError>;

    async fn get(&self, id: &LectureId) -> Result<serde_json::Value, PersistenceError>;

    /// Discard every slide at or beyond `offset` and append `slides` in their
    /// place. Returns the new document version.
    async fn replace_suffix(
        &self,
        id: &LectureId,
        offset: usize,
        slides: &[HydratedSlide],
    ) -> Result<u64, PersistenceError>;
}
