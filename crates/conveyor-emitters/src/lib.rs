// Conveyor emitters
//
// An emitter is a trigger source: it turns some external signal (a
// counter, the wall clock, a server-sent-event stream) into a sequence of
// events. The contract is deliberately split in three so that one worker
// loop can serve many workflows:
//
// - worker_config distills a workflow's trigger config down to the
//   smallest identity that names a worker loop; equal identities share
//   one worker.
// - events runs that worker loop as a lazy, possibly-infinite stream.
// - payload shapes (or rejects) one emitted event for one workflow.

use std::fmt;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use conveyor_core::types::{EmitterConfig, EventArgs, EventPayload, WorkerArgs};
use conveyor_core::ExprError;
use conveyor_storage::StoreError;

pub mod limit;
pub mod schedule;
pub mod sse;

pub use limit::LimitEmitter;
pub use schedule::ScheduleEmitter;
pub use sse::SseEmitter;

/// Stable type tag of an emitter implementation.
///
/// Queue payloads and emitter-worker fingerprints carry this tag; a worker
/// reconstructs the concrete emitter from it via the coordinator's
/// registry, never from a serialized object graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmitterKind {
    Limit,
    Schedule,
    Sse,
}

impl fmt::Display for EmitterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limit => write!(f, "limit"),
            Self::Schedule => write!(f, "schedule"),
            Self::Sse => write!(f, "sse"),
        }
    }
}

/// Errors raised by emitters.
#[derive(Debug, thiserror::Error)]
pub enum EmitterError {
    /// The workflow's trigger config is invalid for this emitter.
    #[error("invalid emitter config: {0}")]
    Config(String),

    /// The event did not pass the workflow's filter expression.
    #[error("event rejected by filter")]
    FilterRejected,

    /// No schedule entry matched the tick.
    #[error("no schedule entry satisfied")]
    NotSatisfied,

    /// An event payload could not be decoded.
    #[error("invalid event payload: {0}")]
    Payload(String),

    /// The underlying event source failed.
    #[error("stream error: {0}")]
    Stream(String),

    /// A filter expression failed to evaluate.
    #[error(transparent)]
    Expr(#[from] ExprError),

    /// The resume-cursor store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EmitterError {
    /// Whether this is a deliberate per-workflow rejection rather than a
    /// fault. Rejections are expected and logged quietly.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::FilterRejected | Self::NotSatisfied)
    }
}

/// The lazy event sequence produced by one emitter worker.
pub type EventStream = BoxStream<'static, Result<EventArgs, EmitterError>>;

/// A trigger source.
pub trait Emitter: Send + Sync {
    /// The stable type tag.
    fn kind(&self) -> EmitterKind;

    /// Distill `(event_name, config)` down to the smallest identity that
    /// uniquely names a worker loop. Validates the config.
    fn worker_config(
        &self,
        event_name: &str,
        config: &EmitterConfig,
    ) -> Result<WorkerArgs, EmitterError>;

    /// Run a worker loop. The stream may be infinite and is not
    /// restartable; cancellation is cooperative (dropping the stream ends
    /// the producer).
    fn events(&self, args: WorkerArgs) -> EventStream;

    /// Shape one emitted event for one workflow, or reject it.
    fn payload(
        &self,
        config: &EmitterConfig,
        args: &EventArgs,
    ) -> Result<EventPayload, EmitterError>;
}
