//! Queue task payloads and the emitter-worker fingerprint.
//!
//! Tasks travel through the substrate as JSON. They carry the emitter's
//! type tag, never a serialized emitter: the receiving worker
//! reconstructs the concrete emitter from its own registry.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use conveyor_core::types::{
    Environment, EventArgs, EventName, VolumeMap, WorkerArgs, Workflow, WorkflowId,
};
use conveyor_emitters::EmitterKind;

/// Queue of long-running emitter workers; no execution timeout.
pub const EMITTER_QUEUE: &str = "emitter";

/// Queue of per-event fan-out tasks.
pub const EVENT_QUEUE: &str = "event";

/// Queue of job DAG runs.
pub const JOB_QUEUE: &str = "job";

/// Run one emitter worker loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitterTask {
    pub event_name: EventName,
    pub emitter: EmitterKind,
    pub args: WorkerArgs,
}

/// Fan one emitted event out to the subscribed workflows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTask {
    pub event_name: EventName,
    pub workflow_ids: Vec<WorkflowId>,
    pub emitter: EmitterKind,
    pub event_args: EventArgs,
}

/// Run one workflow's job DAG with a seeded environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTask {
    pub workflow: Workflow,
    pub env: Environment,
    pub volumes: VolumeMap,
}

/// Deterministic fingerprint of `(emitter identity, worker args)`.
///
/// Doubles as the subscription-list key in the KV store, so it must be
/// stable across process restarts and equal iff both parts are
/// semantically equal. A readable canonical JSON encoding, not a hash.
pub fn emitter_key(kind: EmitterKind, args: &WorkerArgs) -> String {
    format!("emitter:{kind}:{}", canonical(args))
}

fn canonical(value: &Value) -> String {
    canonicalize(value).to_string()
}

/// Recursively sorts object keys so semantically equal args encode
/// identically.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut keys: Vec<&String> = object.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::with_capacity(object.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&object[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
