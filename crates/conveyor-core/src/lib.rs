// Conveyor core
//
// The shared foundation of the orchestrator: the typed workflow data
// model, the embedded expression language, and manifest loading and
// validation. Everything here is substrate- and runtime-agnostic; the
// storage, emitter and runner crates build on top of it.

pub mod expressions;
pub mod types;
pub mod workflows;

// Re-exports for convenience
pub use expressions::{assign, evaluate, interpolate, stringify, truthy, ExprError};
pub use types::{
    EmitterConfig, Environment, EventArgs, EventName, EventPayload, Expression, JobConfig, Needs,
    RunCommand, StepConfig, VolumeMap, WorkerArgs, Workflow, WorkflowId, WorkflowRecord,
};
pub use workflows::{load_from_file, load_from_str, validate, WorkflowError};
