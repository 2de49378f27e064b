//! Typed workflow records and the aliases shared across the workspace.
//!
//! A workflow pairs event triggers (`on`) with a DAG of jobs. The trigger
//! configs are opaque at this layer; only the owning emitter knows their
//! shape. Job and trigger maps preserve manifest order.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of an event trigger, e.g. `schedule` or `sse`.
pub type EventName = String;

/// Identity of a registered workflow: the manifest path it was loaded from.
pub type WorkflowId = String;

/// Emitter-specific trigger configuration, opaque to the coordinator.
pub type EmitterConfig = Value;

/// The distilled identity of one emitter worker loop.
pub type WorkerArgs = Value;

/// One production of an emitter, before per-workflow shaping.
pub type EventArgs = Value;

/// Per-workflow-shaped event data; the initial variable environment seed.
pub type EventPayload = Value;

/// Variable bindings visible to expressions. Immutable by convention:
/// mutation always goes through [`crate::expressions::assign`].
pub type Environment = serde_json::Map<String, Value>;

/// Host path → container path bind mounts, in declaration order.
pub type VolumeMap = IndexMap<String, String>;

/// A validated workflow manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Event triggers and their emitter-specific configs.
    pub on: IndexMap<EventName, EmitterConfig>,

    /// The job DAG, keyed by job name.
    pub jobs: IndexMap<String, JobConfig>,
}

/// A single job: a container image, optional dependencies and a step list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Container image the job's steps execute in.
    #[serde(rename = "runs-on")]
    pub runs_on: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs: Option<Needs>,

    pub steps: Vec<StepConfig>,
}

impl JobConfig {
    /// Declared dependencies, normalized to a slice of job names.
    pub fn dependencies(&self) -> &[String] {
        match &self.needs {
            None => &[],
            Some(Needs::One(name)) => std::slice::from_ref(name),
            Some(Needs::Many(names)) => names,
        }
    }
}

/// `needs` accepts a single job name or a list of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Needs {
    One(String),
    Many(Vec<String>),
}

/// A single step inside a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Skip condition, evaluated against the current environment.
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Expression>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<RunCommand>,
}

/// The `run` union: a shell line or an argv vector. The two branches have
/// different shelling behavior and are preserved verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunCommand {
    /// Interpolated, then handed to the shell as one line.
    Shell(String),
    /// Interpolated per argument, executed without a shell.
    Argv(Vec<String>),
}

/// An expression: a single source string, or nested lists of expressions
/// joined by depth-alternating connectives (OR outermost, then AND, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expression {
    Single(String),
    Nested(Vec<Expression>),
}

impl From<&str> for Expression {
    fn from(source: &str) -> Self {
        Expression::Single(source.to_string())
    }
}

/// What the KV store holds per workflow id: the manifest plus the volumes
/// it was registered with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub workflow: Workflow,
    #[serde(default)]
    pub volumes: VolumeMap,
}
