//! Contracts of the external generators the engine consumes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{AdapterError, PersistenceError};
use crate::lecture::{DiagramDirective, HydratedSlide, ImageDirective, SlideDraft, StylePreferences};
use crate::protocol::Classification;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassifyRequest {
    pub topic: String,
    /// Slides up to and including the one the user is looking at.
    pub history: Vec<HydratedSlide>,
    pub question: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PlanRequest {
    pub topic: String,
    pub prior_slides: Vec<HydratedSlide>,
    /// Index of the last kept slide; `None` plans a lecture from scratch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cut_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub preferences: StylePreferences,
}

impl PlanRequest {
    /// Absolute index the planned batch starts at.
    pub fn offset(&self) -> usize {
        self.cut_index.map_or(0, |cut| cut + 1)
    }
}

/// Decides whether a question needs a short answer or new slides.
#[async_trait]
pub trait QuestionClassifier: Send + Sync {
    async fn classify(&self, request: &ClassifyRequest) -> Result<Classification, AdapterError>;
}

/// Plans slides continuing after a cut point.
#[async_trait]
pub trait SlidePlanner: Send + Sync {
    async fn plan(&self, request: &PlanRequest) -> Result<Vec<SlideDraft>, AdapterError>;
}

/// Renders a diagram directive into diagram source code.
#[async_trait]
pub trait DiagramRenderer: Send + Sync {
    async fn render(&self, directive: &DiagramDirective) -> Result<String, AdapterError>;
}

/// Resolves an image directive to an image URL.
#[async_trait]
pub trait ImageLookup: Send + Sync {
    async fn lookup(&self, directive: &ImageDirective) -> Result<String, AdapterError>;
}

/// Synthesizes narration audio; may return an inline `data:` payload.
#[async_trait]
pub trait VoiceoverSynthesizer: Send + Sync {
    async fn synthesize(&self, transcript: &str) -> Result<String, AdapterError>;
}

/// Durable storage for inline asset payloads.
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn persist(&self, inline_payload: &str) -> Result<String, PersistenceError>;
}

/// Whether an asset reference is a self-contained payload rather than an
/// addressable location.
pub fn is_inline_reference(reference: &str) -> bool {
    reference.starts_with("data:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_offset_follows_cut() {
        let mut req = PlanRequest::default();
        assert_eq!(req.offset(), 0);
        req.cut_index = Some(4);
        assert_eq!(req.offset(), 5);
    }

    #[test]
    fn inline_detection() {
        assert!(is_inline_reference("data:audio/mpeg;base64,AAAA"));
        assert!(!is_inline_reference("https://cdn.example.com/a.mp3"));
        assert!(!is_inline_reference("asset://abc"));
    }
}
