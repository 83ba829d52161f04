use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use lector_core::adapters::{PlanRequest, SlidePlanner};
use lector_core::ids::LectureId;
use lector_core::lecture::{Batch, SlideDraft, StylePreferences};
use lector_core::protocol::{ErrorCode, ProgressMessage};

use crate::error::EngineError;
use crate::orchestrator::{AssetOrchestrator, BatchOutcome};
use crate::progress::ProgressEmitter;

/// Parameters for a brand-new lecture.
#[derive(Clone, Debug, Deserialize)]
pub struct GenerationRequest {
    pub topic: String,
    #[serde(default)]
    pub permitted_users: Vec<String>,
    #[serde(default)]
    pub preferences: StylePreferences,
}

/// Plans a lecture from scratch and hydrates it, reporting progress.
pub struct LectureGenerator {
    planner: Arc<dyn SlidePlanner>,
    orchestrator: Arc<AssetOrchestrator>,
}

impl LectureGenerator {
    pub fn new(planner: Arc<dyn SlidePlanner>, orchestrator: Arc<AssetOrchestrator>) -> Self {
        Self { planner, orchestrator }
    }

    /// Create the document and generate it in the background. The receiver
    /// yields progress messages and closes after `completedAll` or an error.
    pub async fn start(
        self: &Arc<Self>,
        request: GenerationRequest,
        buffer: usize,
    ) -> Result<(LectureId, mpsc::Receiver<ProgressMessage>), EngineError> {
        let lecture_id = self
            .orchestrator
            .store()
            .create(&request.topic, &request.permitted_users, &request.preferences)
            .await?;

        let (emitter, rx) = ProgressEmitter::channel(buffer);
        let generator = Arc::clone(self);
        let id = lecture_id.clone();
        tokio::spawn(async move {
            let _ = generator.generate(&id, request, &emitter).await;
        });
        Ok((lecture_id, rx))
    }

    /// Plan, resolve and persist the whole lecture. Failures are reported on
    /// the emitter as a terminal error message as well as returned.
    #[instrument(skip(self, request, emitter), fields(lecture_id = %lecture_id, topic = %request.topic))]
    pub async fn generate(
        &self,
        lecture_id: &LectureId,
        request: GenerationRequest,
        emitter: &ProgressEmitter,
    ) -> Result<BatchOutcome, EngineError> {
        let result = self.run(lecture_id, request, emitter).await;
        match &result {
            Ok(outcome) => {
                info!(version = outcome.version, failed = outcome.failures.len(), "lecture generated");
                emitter.all_done().await;
            }
            Err(e) => {
                warn!(error = %e, "lecture generation failed");
                let code = if e.is_persistence() {
                    ErrorCode::PersistenceFailed
                } else {
                    ErrorCode::Internal
                };
                emitter.failed(code, e.to_string()).await;
            }
        }
        result
    }

    async fn run(
        &self,
        lecture_id: &LectureId,
        request: GenerationRequest,
        emitter: &ProgressEmitter,
    ) -> Result<BatchOutcome, EngineError> {
        let drafts = self
            .planner
            .plan(&PlanRequest {
                topic: request.topic,
                preferences: request.preferences,
                ..Default::default()
            })
            .await?;
        if drafts.is_empty() {
            return Err(EngineError::PlanRejected("planner returned no slides".into()));
        }
        drafts
            .iter()
            .try_for_each(SlideDraft::validate)
            .map_err(EngineError::PlanRejected)?;
        emitter.transcript_done().await;

        self.orchestrator.run(lecture_id, Batch::new(0, drafts), emitter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use lector_adapters::mock::{MockAssetStore, MockAssets, MockPlanner};
    use lector_core::lecture::{AssetKind, DiagramKind, LectureDocument};
    use lector_core::protocol::CompletedThing;
    use lector_core::store::LectureStore;
    use lector_store::{Database, SqliteLectureStore};

    use crate::orchestrator::{AssetAdapters, OrchestratorConfig};

    fn setup(planner: MockPlanner, assets: MockAssets) -> (Arc<SqliteLectureStore>, Arc<LectureGenerator>) {
        let assets = Arc::new(assets);
        let store = Arc::new(SqliteLectureStore::new(Database::in_memory().unwrap()));
        let orchestrator = Arc::new(AssetOrchestrator::new(
            AssetAdapters {
                diagrams: assets.clone(),
                images: assets.clone(),
                voiceover: assets,
                assets: Arc::new(MockAssetStore::new()),
            },
            store.clone(),
            OrchestratorConfig::default(),
        ));
        (store, Arc::new(LectureGenerator::new(Arc::new(planner), orchestrator)))
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            topic: "Cells".into(),
            permitted_users: vec!["alice".into()],
            preferences: StylePreferences::default(),
        }
    }

    async fn drain(mut rx: mpsc::Receiver<ProgressMessage>) -> Vec<ProgressMessage> {
        let mut out = Vec::new();
        while let Some(msg) = rx.recv().await {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn progress_stream_for_a_mixed_lecture() {
        let plan = vec![
            SlideDraft::new("Intro", "body", "hello").with_diagram(DiagramKind::Flowchart, "overview"),
            SlideDraft::new("Nucleus", "body", "the nucleus").with_image("nucleus", "photo"),
            SlideDraft::new("Wrap up", "body", "bye"),
        ];
        let (store, generator) = setup(MockPlanner::new(plan), MockAssets::new());

        let (id, rx) = generator.start(request(), 64).await.unwrap();
        let messages = drain(rx).await;

        assert_eq!(
            messages[0],
            ProgressMessage::CompletedOne {
                completed: CompletedThing::Transcript,
                counter: None
            }
        );
        assert_eq!(
            &messages[1..4],
            &[
                ProgressMessage::Enumerated {
                    thing: AssetKind::Diagram,
                    total: 1
                },
                ProgressMessage::Enumerated {
                    thing: AssetKind::Image,
                    total: 1
                },
                ProgressMessage::Enumerated {
                    thing: AssetKind::Voiceover,
                    total: 3
                },
            ]
        );
        let completions = messages
            .iter()
            .filter(|m| matches!(m, ProgressMessage::CompletedOne { counter: Some(_), .. }))
            .count();
        assert_eq!(completions, 5);
        assert_eq!(messages.last(), Some(&ProgressMessage::CompletedAll));
        assert_eq!(messages.len(), 1 + 3 + 5 + 1);

        let doc = LectureDocument::from_value(store.get(&id).await.unwrap()).unwrap();
        assert_eq!(doc.slides.len(), 3);
        assert_eq!(doc.permitted_users, vec!["alice".to_string()]);
        assert_eq!(doc.version, 1);
    }

    #[tokio::test]
    async fn planner_failure_ends_the_stream_with_an_error() {
        let (store, generator) = setup(MockPlanner::failing(), MockAssets::new());
        let (id, rx) = generator.start(request(), 8).await.unwrap();
        let messages = drain(rx).await;

        assert_eq!(messages.len(), 1);
        assert!(matches!(
            messages[0],
            ProgressMessage::Failed {
                error: ErrorCode::Internal,
                ..
            }
        ));
        let doc = LectureDocument::from_value(store.get(&id).await.unwrap()).unwrap();
        assert!(doc.slides.is_empty());
    }

    #[tokio::test]
    async fn empty_plan_is_rejected() {
        let (_store, generator) = setup(MockPlanner::new(vec![]), MockAssets::new());
        let (emitter, rx) = ProgressEmitter::channel(8);
        let err = generator
            .generate(&LectureId::from_raw("lec_x"), request(), &emitter)
            .await
            .unwrap_err();
        drop(emitter);
        assert!(matches!(err, EngineError::PlanRejected(_)));
        assert_eq!(drain(rx).await.len(), 1);
    }

    #[tokio::test]
    async fn persistence_failure_is_reported_with_its_own_code() {
        let (_store, generator) = setup(
            MockPlanner::new(vec![SlideDraft::new("a", "b", "c")]),
            MockAssets::new(),
        );
        let (emitter, rx) = ProgressEmitter::channel(16);
        let err = generator
            .generate(&LectureId::from_raw("never-created"), request(), &emitter)
            .await
            .unwrap_err();
        drop(emitter);
        assert!(err.is_persistence());
        assert!(matches!(
            drain(rx).await.last(),
            Some(ProgressMessage::Failed {
                error: ErrorCode::PersistenceFailed,
                ..
            })
        ));
    }
}
