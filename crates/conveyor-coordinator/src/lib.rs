// Conveyor coordinator
//
// The heart of the orchestrator: registers workflows, deduplicates
// long-running emitter workers through a stable fingerprint, fans emitted
// events out to subscribed workflows, and drives job DAG runs — all over
// three FIFO queues on the shared substrate.

pub mod coordinator;
pub mod tasks;
pub mod worker;

pub use coordinator::{Coordinator, CoordinatorError, QueueConfig};
pub use tasks::{
    emitter_key, EmitterTask, EventTask, JobTask, EMITTER_QUEUE, EVENT_QUEUE, JOB_QUEUE,
};
pub use worker::{WorkerPool, WorkerPoolConfig};
