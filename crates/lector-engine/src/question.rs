use std::sync::Arc;

use tracing::{info, instrument, warn};

use lector_core::adapters::{ClassifyRequest, PlanRequest, QuestionClassifier, SlidePlanner};
use lector_core::ids::LectureId;
use lector_core::lecture::{Batch, LectureDocument, PartialLecture, SlideDraft};
use lector_core::protocol::Classification;

use crate::error::EngineError;
use crate::orchestrator::AssetOrchestrator;
use crate::progress::NoProgress;

/// Appended to the classifier's answer when new slides could not be planned.
pub const FALLBACK_NOTE: &str =
    "\n\nI wasn't able to prepare new slides for this question right now, so the lecture continues as it was.";

#[derive(Clone, Debug)]
pub struct QuestionOutcome {
    pub response: Classification,
    /// Present only when new slides were planned, resolved, and persisted.
    pub partial: Option<PartialLecture>,
}

/// Classify a question, and when it calls for new material, plan and
/// hydrate slides that replace the lecture after the current slide.
pub struct QuestionResponder {
    classifier: Arc<dyn QuestionClassifier>,
    planner: Arc<dyn SlidePlanner>,
    orchestrator: Arc<AssetOrchestrator>,
}

impl QuestionResponder {
    pub fn new(
        classifier: Arc<dyn QuestionClassifier>,
        planner: Arc<dyn SlidePlanner>,
        orchestrator: Arc<AssetOrchestrator>,
    ) -> Self {
        Self {
            classifier,
            planner,
            orchestrator,
        }
    }

    #[instrument(skip(self, document, question), fields(lecture_id = %lecture_id))]
    pub async fn respond(
        &self,
        lecture_id: &LectureId,
        document: &LectureDocument,
        current_slide: usize,
        question: &str,
    ) -> Result<QuestionOutcome, EngineError> {
        let history = document.history_through(current_slide).ok_or_else(|| {
            EngineError::Internal(format!(
                "slide {current_slide} is outside a {}-slide lecture",
                document.slides.len()
            ))
        })?;

        let mut response = self
            .classifier
            .classify(&ClassifyRequest {
                topic: document.topic.clone(),
                history: history.to_vec(),
                question: question.to_string(),
            })
            .await?;

        let instructions = match &response {
            Classification::Simple { .. } => {
                return Ok(QuestionOutcome {
                    response,
                    partial: None,
                })
            }
            Classification::Regenerate { instructions, .. } => instructions.clone(),
        };

        let request = PlanRequest {
            topic: document.topic.clone(),
            prior_slides: history.to_vec(),
            cut_index: Some(current_slide),
            question: Some(question.to_string()),
            instructions: Some(instructions),
            preferences: document.preferences.clone(),
        };
        let drafts = match self.plan(&request).await {
            Ok(drafts) => drafts,
            Err(e) => {
                warn!(error = %e, "slide planning failed, answering without new slides");
                response.append_to_response(FALLBACK_NOTE);
                return Ok(QuestionOutcome {
                    response,
                    partial: None,
                });
            }
        };

        let outcome = self
            .orchestrator
            .run(lecture_id, Batch::new(request.offset(), drafts), &NoProgress)
            .await?;
        info!(
            from_slide = outcome.partial.from_slide,
            slides = outcome.partial.slides.len(),
            version = outcome.version,
            "lecture regenerated"
        );

        Ok(QuestionOutcome {
            response,
            partial: Some(outcome.partial),
        })
    }

    /// Plan slides, treating an empty or malformed plan as a failure.
    async fn plan(&self, request: &PlanRequest) -> Result<Vec<SlideDraft>, EngineError> {
        let drafts = self.planner.plan(request).await?;
        if drafts.is_empty() {
            return Err(EngineError::PlanRejected("planner returned no slides".into()));
        }
        drafts
            .iter()
            .try_for_each(SlideDraft::validate)
            .map_err(EngineError::PlanRejected)?;
        Ok(drafts)
    }
}
