// Conveyor runner
//
// Turns one workflow's job DAG plus an initial variable environment into
// container executions: topological ordering, per-job container
// lifecycle, sequential steps with interpolation, and guaranteed
// teardown. The container engine sits behind a trait so the whole crate
// is testable without a docker daemon.

pub mod engine;
pub mod jobs;
pub mod volumes;

pub use engine::{Bind, ContainerEngine, DockerCli, EngineError};
pub use jobs::{sort_jobs, JobError, JobRunner};
pub use volumes::host_path;
