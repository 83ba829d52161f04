//! Lecture data model: drafts produced by the planner, hydrated slides after
//! asset resolution, batches and the persisted document.

use serde::{Deserialize, Serialize};

use crate::errors::ShapeError;

/// Instruction to look up an image for a slide.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDirective {
    pub search_term: String,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagramKind {
    Flowchart,
    Sequence,
    Class,
    State,
    Mindmap,
    Timeline,
    #[serde(untagged)]
    Other(String),
}

/// Instruction to render a diagram for a slide.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagramDirective {
    pub kind: DiagramKind,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComprehensionQuestion {
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<usize>,
}

/// A slide as planned, before any asset is resolved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideDraft {
    pub transcript: String,
    pub title: String,
    pub markdown: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<ComprehensionQuestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageDirective>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram: Option<DiagramDirective>,
}

impl SlideDraft {
    pub fn new(title: impl Into<String>, markdown: impl Into<String>, transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            title: title.into(),
            markdown: markdown.into(),
            question: None,
            image: None,
            diagram: None,
        }
    }

    pub fn with_image(mut self, search_term: impl Into<String>, description: impl Into<String>) -> Self {
        self.image = Some(ImageDirective {
            search_term: search_term.into(),
            description: description.into(),
        });
        self
    }

    pub fn with_diagram(mut self, kind: DiagramKind, description: impl Into<String>) -> Self {
        self.diagram = Some(DiagramDirective {
            kind,
            description: description.into(),
        });
        self
    }

    /// Image and diagram directives are mutually exclusive.
    pub fn validate(&self) -> Result<(), String> {
        if self.image.is_some() && self.diagram.is_some() {
            return Err(format!(
                "slide '{}' carries both an image and a diagram directive",
                self.title
            ));
        }
        Ok(())
    }
}

/// A draft plus whatever assets were resolved for it. Any asset may be absent
/// if its job failed or was never submitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HydratedSlide {
    #[serde(flatten)]
    pub draft: SlideDraft,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voiceover_url: Option<String>,
}

impl HydratedSlide {
    pub fn from_draft(draft: SlideDraft) -> Self {
        Self {
            draft,
            diagram_code: None,
            image_url: None,
            voiceover_url: None,
        }
    }

    /// The field a resolved asset of `kind` lands in.
    pub fn cell_mut(&mut self, kind: AssetKind) -> &mut Option<String> {
        match kind {
            AssetKind::Diagram => &mut self.diagram_code,
            AssetKind::Image => &mut self.image_url,
            AssetKind::Voiceover => &mut self.voiceover_url,
        }
    }
}

/// Resource class of an asset job.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetKind {
    #[serde(rename = "diagrams")]
    Diagram,
    #[serde(rename = "images")]
    Image,
    #[serde(rename = "tts")]
    Voiceover,
}

impl AssetKind {
    pub const ALL: [AssetKind; 3] = [AssetKind::Diagram, AssetKind::Image, AssetKind::Voiceover];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Diagram => "diagrams",
            Self::Image => "images",
            Self::Voiceover => "tts",
        }
    }
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Slides from one planning invocation, tagged with the absolute index at
/// which they replace the document's tail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    pub offset: usize,
    pub drafts: Vec<SlideDraft>,
}

impl Batch {
    pub fn new(offset: usize, drafts: Vec<SlideDraft>) -> Self {
        Self { offset, drafts }
    }

    pub fn len(&self) -> usize {
        self.drafts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }

    /// Number of jobs of `kind` this batch will submit.
    pub fn job_count(&self, kind: AssetKind) -> usize {
        match kind {
            AssetKind::Voiceover => self.drafts.len(),
            AssetKind::Diagram => self.drafts.iter().filter(|d| d.diagram.is_some()).count(),
            AssetKind::Image => self.drafts.iter().filter(|d| d.image.is_some()).count(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.drafts.iter().try_for_each(SlideDraft::validate)
    }
}

/// Incremental update payload: slides from `from_slide` onward.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialLecture {
    pub from_slide: usize,
    pub slides: Vec<HydratedSlide>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StylePreferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_slides: Option<u32>,
}

/// The persisted lecture.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LectureDocument {
    pub topic: String,
    #[serde(default)]
    pub preferences: StylePreferences,
    pub version: u64,
    #[serde(default)]
    pub permitted_users: Vec<String>,
    #[serde(default)]
    pub slides: Vec<HydratedSlide>,
}

impl LectureDocument {
    pub fn new(topic: impl Into<String>, permitted_users: Vec<String>, preferences: StylePreferences) -> Self {
        Self {
            topic: topic.into(),
            preferences,
            version: 0,
            permitted_users,
            slides: Vec::new(),
        }
    }

    /// Validate a raw stored document against the lecture shape.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ShapeError> {
        let doc: LectureDocument =
            serde_json::from_value(value).map_err(|e| ShapeError(e.to_string()))?;
        for (index, slide) in doc.slides.iter().enumerate() {
            slide
                .draft
                .validate()
                .map_err(|e| ShapeError(format!("slide {index}: {e}")))?;
        }
        Ok(doc)
    }

    /// Slides up to and including `current`, or `None` if out of range.
    pub fn history_through(&self, current: usize) -> Option<&[HydratedSlide]> {
        if current < self.slides.len() {
            Some(&self.slides[..=current])
        } else {
            None
        }
    }
}

/// Remove `null` members from every object in `value`, recursively.
pub fn strip_unset(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(strip_unset);
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(strip_unset),
        _ => {}
    }
}

/// Serialize `value` with unset fields stripped.
pub fn to_stripped_value<T: Serialize>(value: &T) -> Result<serde_json::Value, serde_json::Error> {
    let mut v = serde_json::to_value(value)?;
    strip_unset(&mut v);
    Ok(v)
}
