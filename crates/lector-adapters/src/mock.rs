//! Scripted adapters for deterministic tests without a generation service.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use lector_core::adapters::{
    AssetStore, ClassifyRequest, DiagramRenderer, ImageLookup, PlanRequest, QuestionClassifier,
    SlidePlanner, VoiceoverSynthesizer,
};
use lector_core::errors::{AdapterError, PersistenceError};
use lector_core::lecture::{DiagramDirective, ImageDirective, SlideDraft};
use lector_core::protocol::Classification;

/// Call and concurrency accounting shared by the mocks.
#[derive(Default)]
pub struct Probe {
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Probe {
    fn enter(&self) -> ProbeGuard<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ProbeGuard { probe: self }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were in flight at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct ProbeGuard<'a> {
    probe: &'a Probe,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.probe.active.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockClassifier {
    verdict: Result<Classification, AdapterError>,
    probe: Probe,
}

impl MockClassifier {
    pub fn simple(response: &str) -> Self {
        Self {
            verdict: Ok(Classification::Simple {
                response: response.into(),
            }),
            probe: Probe::default(),
        }
    }

    pub fn regenerate(response: &str, instructions: &str) -> Self {
        Self {
            verdict: Ok(Classification::Regenerate {
                response: response.into(),
                instructions: instructions.into(),
            }),
            probe: Probe::default(),
        }
    }

    pub fn failing(error: AdapterError) -> Self {
        Self {
            verdict: Err(error),
            probe: Probe::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.probe.calls()
    }
}

#[async_trait]
impl QuestionClassifier for MockClassifier {
    async fn classify(&self, _request: &ClassifyRequest) -> Result<Classification, AdapterError> {
        let _guard = self.probe.enter();
        self.verdict.clone()
    }
}

pub struct MockPlanner {
    plan: Result<Vec<SlideDraft>, AdapterError>,
    delay: Duration,
    requests: Mutex<Vec<PlanRequest>>,
    probe: Probe,
}

impl MockPlanner {
    pub fn new(drafts: Vec<SlideDraft>) -> Self {
        Self {
            plan: Ok(drafts),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
            probe: Probe::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            plan: Err(AdapterError::GenerationFailed("mock planner always fails".into())),
            ..Self::new(Vec::new())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.probe.calls()
    }

    pub fn last_request(&self) -> Option<PlanRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl SlidePlanner for MockPlanner {
    async fn plan(&self, request: &PlanRequest) -> Result<Vec<SlideDraft>, AdapterError> {
        let _guard = self.probe.enter();
        self.requests.lock().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.plan.clone()
    }
}

/// Asset backend for all three job kinds. Fails any job whose key (diagram
/// description, image search term, or transcript) was registered as failing.
pub struct MockAssets {
    delay: Duration,
    failing: HashSet<String>,
    inline_voiceover: bool,
    pub diagrams: Probe,
    pub images: Probe,
    pub voiceovers: Probe,
}

impl Default for MockAssets {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAssets {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            failing: HashSet::new(),
            inline_voiceover: false,
            diagrams: Probe::default(),
            images: Probe::default(),
            voiceovers: Probe::default(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_for(mut self, key: &str) -> Self {
        self.failing.insert(key.to_string());
        self
    }

    /// Return narration as `data:` payloads instead of URLs.
    pub fn with_inline_voiceover(mut self) -> Self {
        self.inline_voiceover = true;
        self
    }

    async fn settle(&self, key: &str, value: String) -> Result<String, AdapterError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.contains(key) {
            Err(AdapterError::Status {
                status: 500,
                body: format!("mock failure for '{key}'"),
            })
        } else {
            Ok(value)
        }
    }
}

#[async_trait]
impl DiagramRenderer for MockAssets {
    async fn render(&self, directive: &DiagramDirective) -> Result<String, AdapterError> {
        let _guard = self.diagrams.enter();
        self.settle(&directive.description, format!("graph TD; %% {}", directive.description))
            .await
    }
}

#[async_trait]
impl ImageLookup for MockAssets {
    async fn lookup(&self, directive: &ImageDirective) -> Result<String, AdapterError> {
        let _guard = self.images.enter();
        let url = format!("https://images.test/{}.png", directive.search_term.replace(' ', "-"));
        self.settle(&directive.search_term, url).await
    }
}

#[async_trait]
impl VoiceoverSynthesizer for MockAssets {
    async fn synthesize(&self, transcript: &str) -> Result<String, AdapterError> {
        let _guard = self.voiceovers.enter();
        let reference = if self.inline_voiceover {
            format!("data:audio/mpeg;base64,{}", "QUJD".repeat(transcript.len().max(1)))
        } else {
            format!("https://audio.test/{}.mp3", transcript.len())
        };
        self.settle(transcript, reference).await
    }
}

/// In-memory asset store; optionally rejects every payload.
#[derive(Default)]
pub struct MockAssetStore {
    fail: bool,
    persisted: Mutex<Vec<String>>,
}

impl MockAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn persisted(&self) -> Vec<String> {
        self.persisted.lock().clone()
    }
}

#[async_trait]
impl AssetStore for MockAssetStore {
    async fn persist(&self, inline_payload: &str) -> Result<String, PersistenceError> {
        if self.fail {
            return Err(PersistenceError::Io("mock asset store is down".into()));
        }
        let mut persisted = self.persisted.lock();
        persisted.push(inline_payload.to_string());
        Ok(format!("asset://mock/{}", persisted.len()))
    }
}
