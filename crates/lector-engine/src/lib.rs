pub mod error;
pub mod generation;
pub mod orchestrator;
pub mod pool;
pub mod progress;
pub mod question;

pub use error::EngineError;
pub use generation::{GenerationRequest, LectureGenerator};
pub use orchestrator::{AssetAdapters, AssetOrchestrator, BatchOutcome, JobFailure, OrchestratorConfig};
pub use pool::BoundedPool;
pub use progress::{AssetEvent, NoProgress, ProgressEmitter, ProgressSink};
pub use question::{QuestionOutcome, QuestionResponder, FALLBACK_NOTE};
