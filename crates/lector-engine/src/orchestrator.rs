//! Resolves a batch's asset directives and merges the results into the
//! lecture document.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use lector_core::adapters::{is_inline_reference, AssetStore, DiagramRenderer, ImageLookup, VoiceoverSynthesizer};
use lector_core::errors::AdapterError;
use lector_core::ids::LectureId;
use lector_core::lecture::{AssetKind, Batch, HydratedSlide, PartialLecture};
use lector_core::store::LectureStore;
use lector_telemetry::MetricsRecorder;

use crate::error::EngineError;
use crate::pool::BoundedPool;
use crate::progress::{AssetEvent, ProgressSink};

/// Pool capacity per resource class.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub image_capacity: usize,
    pub diagram_capacity: usize,
    pub voiceover_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            image_capacity: 15,
            diagram_capacity: 32,
            voiceover_capacity: 32,
        }
    }
}

/// The generators and stores asset jobs call into.
#[derive(Clone)]
pub struct AssetAdapters {
    pub diagrams: Arc<dyn DiagramRenderer>,
    pub images: Arc<dyn ImageLookup>,
    pub voiceover: Arc<dyn VoiceoverSynthesizer>,
    pub assets: Arc<dyn AssetStore>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobFailure {
    pub kind: AssetKind,
    /// Position of the slide within its batch.
    pub slide: usize,
    pub error: String,
}

#[derive(Clone, Debug)]
pub struct BatchOutcome {
    pub partial: PartialLecture,
    /// Document version after the batch was written.
    pub version: u64,
    pub failures: Vec<JobFailure>,
}

struct Settled {
    kind: AssetKind,
    slide: usize,
    result: Result<String, String>,
}

pub struct AssetOrchestrator {
    adapters: AssetAdapters,
    store: Arc<dyn LectureStore>,
    images: BoundedPool,
    diagrams: BoundedPool,
    voiceovers: BoundedPool,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl AssetOrchestrator {
    pub fn new(adapters: AssetAdapters, store: Arc<dyn LectureStore>, config: OrchestratorConfig) -> Self {
        Self {
            adapters,
            store,
            images: BoundedPool::new("images", config.image_capacity),
            diagrams: BoundedPool::new("diagrams", config.diagram_capacity),
            voiceovers: BoundedPool::new("tts", config.voiceover_capacity),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn pool(&self, kind: AssetKind) -> &BoundedPool {
        match kind {
            AssetKind::Diagram => &self.diagrams,
            AssetKind::Image => &self.images,
            AssetKind::Voiceover => &self.voiceovers,
        }
    }

    pub fn store(&self) -> &Arc<dyn LectureStore> {
        &self.store
    }

    /// Resolve every directive in `batch`, then replace the document's tail
    /// at `batch.offset` with the hydrated slides in one write.
    ///
    /// Job failures leave their field empty and are reported in the outcome.
    /// Only a rejected batch or a failed write is an error.
    #[instrument(skip_all, fields(lecture_id = %lecture_id, offset = batch.offset, slides = batch.len()))]
    pub async fn run(
        &self,
        lecture_id: &LectureId,
        batch: Batch,
        progress: &dyn ProgressSink,
    ) -> Result<BatchOutcome, EngineError> {
        batch.validate().map_err(EngineError::PlanRejected)?;

        for kind in AssetKind::ALL {
            progress
                .emit(AssetEvent::Enumerated {
                    kind,
                    total: batch.job_count(kind) as u32,
                })
                .await;
        }

        let mut jobs = FuturesUnordered::new();
        for (slide, draft) in batch.drafts.iter().enumerate() {
            if let Some(directive) = draft.diagram.clone() {
                let renderer = Arc::clone(&self.adapters.diagrams);
                let handle = self.submit(AssetKind::Diagram, async move { renderer.render(&directive).await });
                jobs.push(settle(AssetKind::Diagram, slide, handle));
            }
            if let Some(directive) = draft.image.clone() {
                let lookup = Arc::clone(&self.adapters.images);
                let handle = self.submit(AssetKind::Image, async move { lookup.lookup(&directive).await });
                jobs.push(settle(AssetKind::Image, slide, handle));
            }
            let synthesizer = Arc::clone(&self.adapters.voiceover);
            let assets = Arc::clone(&self.adapters.assets);
            let transcript = draft.transcript.clone();
            let handle = self.submit(AssetKind::Voiceover, async move {
                let reference = synthesizer.synthesize(&transcript).await?;
                Ok::<_, AdapterError>(durable_voiceover(assets.as_ref(), reference).await)
            });
            jobs.push(settle(AssetKind::Voiceover, slide, handle));
        }

        let mut counters: HashMap<AssetKind, u32> = HashMap::new();
        let mut resolved = Vec::new();
        let mut failures = Vec::new();
        while let Some(done) = jobs.next().await {
            let counter = counters.entry(done.kind).or_default();
            *counter += 1;
            progress
                .emit(AssetEvent::Settled {
                    kind: done.kind,
                    ordinal: *counter,
                    succeeded: done.result.is_ok(),
                })
                .await;

            match done.result {
                Ok(reference) => resolved.push((done.slide, done.kind, reference)),
                Err(error) => {
                    warn!(kind = %done.kind, slide = done.slide, error = %error, "asset job failed");
                    failures.push(JobFailure {
                        kind: done.kind,
                        slide: done.slide,
                        error,
                    });
                }
            }
        }

        let mut slides: Vec<HydratedSlide> = batch.drafts.into_iter().map(HydratedSlide::from_draft).collect();
        for (slide, kind, reference) in resolved {
            *slides[slide].cell_mut(kind) = Some(reference);
        }

        let version = self.store.replace_suffix(lecture_id, batch.offset, &slides).await?;
        if let Some(metrics) = &self.metrics {
            metrics.counter_inc("batches_persisted_total", &[], 1);
        }
        info!(version, failed = failures.len(), "batch persisted");

        Ok(BatchOutcome {
            partial: PartialLecture {
                from_slide: batch.offset,
                slides,
            },
            version,
            failures,
        })
    }

    /// Spawn one job on its kind's pool.
    fn submit<F>(&self, kind: AssetKind, job: F) -> JoinHandle<Result<String, AdapterError>>
    where
        F: Future<Output = Result<String, AdapterError>> + Send + 'static,
    {
        let metrics = self.metrics.clone();
        let pool = self.pool(kind);
        trace!(pool = pool.name(), active = pool.active(), queued = pool.queued(), "submitting asset job");
        pool.submit(async move {
            let started = Instant::now();
            let result = job.await;
            if let Some(metrics) = metrics {
                let kind_label = kind.as_str();
                let outcome = if result.is_ok() { "ok" } else { "failed" };
                metrics.counter_inc("asset_jobs_total", &[("kind", kind_label), ("outcome", outcome)], 1);
                metrics.histogram_observe(
                    "asset_job_duration_ms",
                    &[("kind", kind_label)],
                    started.elapsed().as_secs_f64() * 1000.0,
                );
            }
            result
        })
    }
}

/// Wait for a spawned job, folding a panic into a job failure.
async fn settle(kind: AssetKind, slide: usize, handle: JoinHandle<Result<String, AdapterError>>) -> Settled {
    let result = match handle.await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(join) => Err(format!("job did not complete: {join}")),
    };
    Settled { kind, slide, result }
}

/// Swap an inline narration payload for a durable reference. If the store
/// rejects it, the inline payload is kept.
async fn durable_voiceover(assets: &dyn AssetStore, reference: String) -> String {
    if !is_inline_reference(&reference) {
        return reference;
    }
    match assets.persist(&reference).await {
        Ok(durable) => {
            debug!(reference = %durable, "inline voiceover persisted");
            durable
        }
        Err(e) => {
            warn!(error = %e, "failed to persist inline voiceover, keeping inline payload");
            reference
        }
    }
}
