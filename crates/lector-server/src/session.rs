//! Per-connection protocol state machine.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn, Instrument};

use lector_core::ids::{LectureId, SessionId};
use lector_core::lecture::LectureDocument;
use lector_core::protocol::{ErrorCode, InboundMessage, LectureSnapshot, OutboundMessage};
use lector_core::store::LectureStore;
use lector_engine::{EngineError, QuestionResponder};

use crate::client::Outbox;

/// What the connection should do after a frame was handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    WaitingForInit,
    Ready { lecture_id: LectureId },
    Closed,
}

/// Services a session needs, shared by every connection.
#[derive(Clone)]
pub struct SessionDeps {
    pub lectures: Arc<dyn LectureStore>,
    pub responder: Arc<QuestionResponder>,
}

pub struct Session {
    id: SessionId,
    phase: Phase,
    deps: SessionDeps,
    outbox: Outbox,
    /// One permit: held by the question run in flight, if any.
    question_slot: Arc<Semaphore>,
}

impl Session {
    pub fn new(id: SessionId, deps: SessionDeps, outbox: Outbox) -> Self {
        Self {
            id,
            phase: Phase::WaitingForInit,
            deps,
            outbox,
            question_slot: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Handle one inbound text frame.
    pub async fn handle_text(&mut self, raw: &str) -> Flow {
        if self.phase == Phase::Closed {
            return Flow::Close;
        }

        let message = match InboundMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                debug!(session_id = %self.id, reason = %e.reason, "malformed frame");
                self.outbox.send(&OutboundMessage::error(ErrorCode::BadRequest, e.reason.clone()));
                if e.is_init_request() && self.phase == Phase::WaitingForInit {
                    return self.close();
                }
                return Flow::Continue;
            }
        };

        match message {
            InboundMessage::GetLectureRequest { lecture_id } => self.initialize(lecture_id).await,
            InboundMessage::UserQuestionRequest {
                lecture_id,
                current_slide,
                question,
            } => self.question(lecture_id, current_slide, question),
            InboundMessage::BackendQuestionRequest { .. } => {
                self.outbox.send(&OutboundMessage::error(
                    ErrorCode::Unsupported,
                    "backend questions are not served",
                ));
                Flow::Continue
            }
        }
    }

    /// Binary frames carry no protocol message.
    pub fn handle_binary(&mut self) -> Flow {
        if self.phase == Phase::Closed {
            return Flow::Close;
        }
        debug!(session_id = %self.id, "binary frame");
        self.outbox.send(&OutboundMessage::error(
            ErrorCode::BadRequest,
            "binary frames are not supported",
        ));
        Flow::Continue
    }

    async fn initialize(&mut self, lecture_id: LectureId) -> Flow {
        if self.phase != Phase::WaitingForInit {
            self.outbox.send(&OutboundMessage::bare_error(ErrorCode::AlreadyInitialized));
            return self.close();
        }

        let raw = match self.deps.lectures.get(&lecture_id).await {
            Ok(raw) => raw,
            Err(e) if e.is_not_found() => {
                self.outbox.send(&OutboundMessage::error(ErrorCode::NotFound, e.to_string()));
                return self.close();
            }
            Err(e) => {
                warn!(session_id = %self.id, lecture_id = %lecture_id, error = %e, "failed to load lecture");
                self.outbox.send(&OutboundMessage::error(ErrorCode::PersistenceFailed, e.to_string()));
                return self.close();
            }
        };
        let document = match LectureDocument::from_value(raw) {
            Ok(document) => document,
            Err(e) => {
                warn!(session_id = %self.id, lecture_id = %lecture_id, error = %e, "stored lecture has an invalid shape");
                self.outbox.send(&OutboundMessage::error(ErrorCode::InvalidLecture, e.to_string()));
                return self.close();
            }
        };

        self.outbox.send(&OutboundMessage::GetLectureResponse {
            lecture: LectureSnapshot::from(&document),
        });
        info!(session_id = %self.id, lecture_id = %lecture_id, slides = document.slides.len(), "session ready");
        self.phase = Phase::Ready { lecture_id };
        Flow::Continue
    }

    /// Validate a question and start its run in the background. Replies are
    /// sent by the run itself so the connection keeps reading frames.
    fn question(&mut self, lecture_id: LectureId, current_slide: usize, question: String) -> Flow {
        let bound = match &self.phase {
            Phase::Ready { lecture_id } => lecture_id.clone(),
            _ => {
                self.outbox.send(&OutboundMessage::bare_error(ErrorCode::NotInitialized));
                return Flow::Continue;
            }
        };
        if lecture_id != bound {
            self.outbox.send(&OutboundMessage::error(
                ErrorCode::BadRequest,
                format!("session is bound to lecture {bound}"),
            ));
            return Flow::Continue;
        }
        let Ok(permit) = Arc::clone(&self.question_slot).try_acquire_owned() else {
            self.outbox.send(&OutboundMessage::error(
                ErrorCode::Busy,
                "a question is already being answered",
            ));
            return Flow::Continue;
        };

        let deps = self.deps.clone();
        let outbox = self.outbox.clone();
        let span = tracing::info_span!("question", session_id = %self.id, lecture_id = %bound, current_slide);
        tokio::spawn(
            async move {
                let _permit = permit;
                let reply = answer(&deps, &bound, current_slide, &question).await;
                if !outbox.send(&reply) {
                    warn!("question answered after the client left, response dropped");
                }
            }
            .instrument(span),
        );
        Flow::Continue
    }

    fn close(&mut self) -> Flow {
        self.phase = Phase::Closed;
        self.outbox.close();
        Flow::Close
    }
}

async fn answer(deps: &SessionDeps, lecture_id: &LectureId, current_slide: usize, question: &str) -> OutboundMessage {
    let document = match deps.lectures.get(lecture_id).await {
        Ok(raw) => match LectureDocument::from_value(raw) {
            Ok(document) => document,
            Err(e) => return OutboundMessage::error(ErrorCode::InvalidLecture, e.to_string()),
        },
        Err(e) if e.is_not_found() => return OutboundMessage::error(ErrorCode::NotFound, e.to_string()),
        Err(e) => return OutboundMessage::error(ErrorCode::PersistenceFailed, e.to_string()),
    };
    if current_slide >= document.slides.len() {
        return OutboundMessage::error(
            ErrorCode::BadRequest,
            format!(
                "current_slide {current_slide} is outside a {}-slide lecture",
                document.slides.len()
            ),
        );
    }

    match deps.responder.respond(lecture_id, &document, current_slide, question).await {
        Ok(outcome) => OutboundMessage::UserQuestionResponse {
            response: outcome.response,
            partial_lecture: outcome.partial,
        },
        Err(e) => {
            warn!(error = %e, "question run failed");
            let code = match e {
                EngineError::Persistence(_) => ErrorCode::PersistenceFailed,
                _ => ErrorCode::Internal,
            };
            OutboundMessage::error(code, e.to_string())
        }
    }
}
