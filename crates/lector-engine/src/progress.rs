use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use lector_core::lecture::AssetKind;
use lector_core::protocol::{CompletedThing, ErrorCode, ProgressMessage};

/// Orchestrator lifecycle events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssetEvent {
    /// Emitted once per kind before any job of the batch is submitted.
    Enumerated { kind: AssetKind, total: u32 },
    /// The `ordinal`-th job of `kind` to settle, successfully or not.
    Settled {
        kind: AssetKind,
        ordinal: u32,
        succeeded: bool,
    },
}

#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, event: AssetEvent);
}

/// Discards every event. Used by the regeneration path, which reports the
/// batch only in its final response.
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn emit(&self, _event: AssetEvent) {}
}

/// Translates lifecycle events into progress messages on a channel.
#[derive(Clone)]
pub struct ProgressEmitter {
    tx: mpsc::Sender<ProgressMessage>,
}

impl ProgressEmitter {
    pub fn new(tx: mpsc::Sender<ProgressMessage>) -> Self {
        Self { tx }
    }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ProgressMessage>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }

    pub async fn transcript_done(&self) {
        self.send(ProgressMessage::CompletedOne {
            completed: CompletedThing::Transcript,
            counter: None,
        })
        .await;
    }

    pub async fn all_done(&self) {
        self.send(ProgressMessage::CompletedAll).await;
    }

    pub async fn failed(&self, error: ErrorCode, message: impl Into<String>) {
        self.send(ProgressMessage::Failed {
            error,
            message: message.into(),
        })
        .await;
    }

    async fn send(&self, msg: ProgressMessage) {
        if self.tx.send(msg).await.is_err() {
            debug!("progress receiver gone, message dropped");
        }
    }
}

#[async_trait]
impl ProgressSink for ProgressEmitter {
    async fn emit(&self, event: AssetEvent) {
        let msg = match event {
            AssetEvent::Enumerated { kind, total } => ProgressMessage::Enumerated { thing: kind, total },
            AssetEvent::Settled { kind, ordinal, .. } => ProgressMessage::CompletedOne {
                completed: kind.into(),
                counter: Some(ordinal),
            },
        };
        self.send(msg).await;
    }
}
