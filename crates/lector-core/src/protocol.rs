//! Wire protocol for lecture sessions and the generation progress stream.

use serde::{Deserialize, Serialize};

use crate::ids::LectureId;
use crate::lecture::{AssetKind, HydratedSlide, LectureDocument, PartialLecture};

/// Messages a client may send over a session.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    GetLectureRequest {
        lecture_id: LectureId,
    },
    UserQuestionRequest {
        lecture_id: LectureId,
        current_slide: usize,
        question: String,
    },
    /// Reserved; accepted by the parser but not served.
    BackendQuestionRequest {
        #[serde(flatten)]
        payload: serde_json::Map<String, serde_json::Value>,
    },
}

pub const GET_LECTURE_REQUEST: &str = "get_lecture_request";

/// A frame that failed structural validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundError {
    /// The frame's `type` tag, if one could be read.
    pub kind: Option<String>,
    pub reason: String,
}

impl InboundError {
    pub fn is_init_request(&self) -> bool {
        self.kind.as_deref() == Some(GET_LECTURE_REQUEST)
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl InboundMessage {
    pub fn parse(raw: &str) -> Result<Self, InboundError> {
        serde_json::from_str(raw).map_err(|e| {
            let kind = serde_json::from_str::<Envelope>(raw)
                .ok()
                .and_then(|env| env.kind);
            InboundError {
                kind,
                reason: e.to_string(),
            }
        })
    }
}

/// Classifier verdict on a user question.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum Classification {
    Simple {
        response: String,
    },
    Regenerate {
        response: String,
        instructions: String,
    },
}

impl Classification {
    pub fn response(&self) -> &str {
        match self {
            Self::Simple { response } | Self::Regenerate { response, .. } => response,
        }
    }

    pub fn append_to_response(&mut self, note: &str) {
        match self {
            Self::Simple { response } | Self::Regenerate { response, .. } => response.push_str(note),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LectureSnapshot {
    pub version: u64,
    pub permitted_users: Vec<String>,
    pub slides: Vec<HydratedSlide>,
}

impl From<&LectureDocument> for LectureSnapshot {
    fn from(doc: &LectureDocument) -> Self {
        Self {
            version: doc.version,
            permitted_users: doc.permitted_users.clone(),
            slides: doc.slides.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    NotFound,
    InvalidLecture,
    AlreadyInitialized,
    NotInitialized,
    Busy,
    Unsupported,
    PersistenceFailed,
    Internal,
}

/// Messages the server sends over a session.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    GetLectureResponse {
        lecture: LectureSnapshot,
    },
    UserQuestionResponse {
        response: Classification,
        #[serde(skip_serializing_if = "Option::is_none")]
        partial_lecture: Option<PartialLecture>,
    },
    Error {
        error: ErrorCode,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl OutboundMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            error: code,
            message: Some(message.into()),
        }
    }

    pub fn bare_error(code: ErrorCode) -> Self {
        Self::Error {
            error: code,
            message: None,
        }
    }
}

/// What a `completedOne` progress message reports on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletedThing {
    #[serde(rename = "transcript")]
    Transcript,
    #[serde(rename = "images")]
    Images,
    #[serde(rename = "diagrams")]
    Diagrams,
    #[serde(rename = "tts")]
    Tts,
}

impl From<AssetKind> for CompletedThing {
    fn from(kind: AssetKind) -> Self {
        match kind {
            AssetKind::Diagram => Self::Diagrams,
            AssetKind::Image => Self::Images,
            AssetKind::Voiceover => Self::Tts,
        }
    }
}

/// Progress stream of the initial-generation path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProgressMessage {
    #[serde(rename = "completedOne")]
    CompletedOne {
        completed: CompletedThing,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        counter: Option<u32>,
    },
    #[serde(rename = "enumerated")]
    Enumerated { thing: AssetKind, total: u32 },
    #[serde(rename = "completedAll")]
    CompletedAll,
    /// Terminates a stream whose pipeline failed.
    #[serde(rename = "error")]
    Failed { error: ErrorCode, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lecture::SlideDraft;
    use serde_json::json;

    #[test]
    fn parse_get_lecture_request() {
        let msg = InboundMessage::parse(r#"{"type":"get_lecture_request","lecture_id":"lec_1"}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::GetLectureRequest {
                lecture_id: LectureId::from_raw("lec_1")
            }
        );
    }

    #[test]
    fn parse_user_question_request() {
        let raw = r#"{"type":"user_question_request","lecture_id":"lec_1","current_slide":2,"question":"why?"}"#;
        match InboundMessage::parse(raw).unwrap() {
            InboundMessage::UserQuestionRequest {
                current_slide,
                question,
                ..
            } => {
                assert_eq!(current_slide, 2);
                assert_eq!(question, "why?");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parse_backend_question_keeps_payload() {
        let raw = r#"{"type":"backend_question_request","lecture_id":"lec_1","anything":[1,2]}"#;
        match InboundMessage::parse(raw).unwrap() {
            InboundMessage::BackendQuestionRequest { payload } => {
                assert_eq!(payload["anything"], json!([1, 2]));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn malformed_init_request_is_recognised() {
        let err = InboundMessage::parse(r#"{"type":"get_lecture_request"}"#).unwrap_err();
        assert!(err.is_init_request());

        let err = InboundMessage::parse(r#"{"type":"user_question_request","lecture_id":"x"}"#).unwrap_err();
        assert!(!err.is_init_request());
        assert_eq!(err.kind.as_deref(), Some("user_question_request"));

        let err = InboundMessage::parse("not json").unwrap_err();
        assert!(err.kind.is_none());

        let err = InboundMessage::parse(r#"{"type":"dance"}"#).unwrap_err();
        assert_eq!(err.kind.as_deref(), Some("dance"));
    }

    #[test]
    fn classification_wire_shape() {
        let c: Classification = serde_json::from_value(json!({
            "category": "regenerate",
            "response": "Let me redo that.",
            "instructions": "Add an example"
        }))
        .unwrap();
        assert!(matches!(c, Classification::Regenerate { .. }));
        assert_eq!(c.response(), "Let me redo that.");

        let mut simple = Classification::Simple {
            response: "Yes.".into(),
        };
        simple.append_to_response(" (note)");
        assert_eq!(
            serde_json::to_value(&simple).unwrap(),
            json!({"category": "simple", "response": "Yes. (note)"})
        );
    }

    #[test]
    fn outbound_question_response_omits_absent_partial() {
        let msg = OutboundMessage::UserQuestionResponse {
            response: Classification::Simple {
                response: "ok".into(),
            },
            partial_lecture: None,
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "user_question_response");
        assert!(v.get("partial_lecture").is_none());
    }

    #[test]
    fn outbound_question_response_carries_partial() {
        let msg = OutboundMessage::UserQuestionResponse {
            response: Classification::Regenerate {
                response: "ok".into(),
                instructions: "more".into(),
            },
            partial_lecture: Some(PartialLecture {
                from_slide: 3,
                slides: vec![HydratedSlide::from_draft(SlideDraft::new("a", "b", "c"))],
            }),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["partial_lecture"]["from_slide"], 3);
        assert_eq!(v["partial_lecture"]["slides"][0]["title"], "a");
        assert_eq!(v["response"]["instructions"], "more");
    }

    #[test]
    fn outbound_error_shape() {
        let v = serde_json::to_value(OutboundMessage::bare_error(ErrorCode::NotInitialized)).unwrap();
        assert_eq!(v, json!({"type": "error", "error": "not_initialized"}));

        let v = serde_json::to_value(OutboundMessage::error(ErrorCode::BadRequest, "missing field")).unwrap();
        assert_eq!(v["error"], "bad_request");
        assert_eq!(v["message"], "missing field");
    }

    #[test]
    fn progress_wire_shapes() {
        assert_eq!(
            serde_json::to_value(ProgressMessage::Enumerated {
                thing: AssetKind::Voiceover,
                total: 3
            })
            .unwrap(),
            json!({"type": "enumerated", "thing": "tts", "total": 3})
        );
        assert_eq!(
            serde_json::to_value(ProgressMessage::CompletedOne {
                completed: CompletedThing::Transcript,
                counter: None
            })
            .unwrap(),
            json!({"type": "completedOne", "completed": "transcript"})
        );
        assert_eq!(
            serde_json::to_value(ProgressMessage::CompletedOne {
                completed: AssetKind::Image.into(),
                counter: Some(2)
            })
            .unwrap(),
            json!({"type": "completedOne", "completed": "images", "counter": 2})
        );
        assert_eq!(
            serde_json::to_value(ProgressMessage::CompletedAll).unwrap(),
            json!({"type": "completedAll"})
        );
    }
}
