//! The coordinator: workflow registration, emitter-worker deduplication,
//! and the three task handlers executed by queue workers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use conveyor_core::types::{Environment, EventName, VolumeMap, Workflow, WorkflowRecord};
use conveyor_core::{assign, workflows, WorkflowError};
use conveyor_emitters::{Emitter, EmitterError, EmitterKind};
use conveyor_runner::{JobError, JobRunner};
use conveyor_storage::{KeyValueStore, StoreError};

use crate::tasks::{
    emitter_key, EmitterTask, EventTask, JobTask, EMITTER_QUEUE, EVENT_QUEUE, JOB_QUEUE,
};

/// Errors raised by coordinator operations.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// A workflow names a trigger no registered emitter serves.
    #[error("no emitter found for {0}")]
    UnknownEmitter(String),

    /// The workflow failed validation.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// An emitter rejected its config or failed mid-stream.
    #[error(transparent)]
    Emitter(#[from] EmitterError),

    /// The substrate failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The job runner failed the whole DAG.
    #[error(transparent)]
    Job(#[from] JobError),

    /// A queue payload could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Per-queue execution policy.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long a dequeued task may execute. `None` means unbounded,
    /// which only the emitter queue uses: its workers run forever.
    pub default_timeout: Option<Duration>,
}

impl QueueConfig {
    pub fn unbounded() -> Self {
        Self {
            default_timeout: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            default_timeout: Some(timeout),
        }
    }
}

const ONE_HOUR: Duration = Duration::from_secs(60 * 60);

/// Mediates the three work-queues, the workflow table and the emitter
/// registry. Owned by the daemon; cloned handles are shared with the
/// worker pool.
pub struct Coordinator {
    emitters: HashMap<EventName, Arc<dyn Emitter>>,
    store: Arc<dyn KeyValueStore>,
    runner: JobRunner,
    emitter_queue: QueueConfig,
    event_queue: QueueConfig,
    job_queue: QueueConfig,
    container_prune_timeout: Option<String>,
}

impl Coordinator {
    /// A coordinator with the default queue policies: no timeout for
    /// emitter workers, one hour for event and job tasks.
    pub fn new(
        emitters: HashMap<EventName, Arc<dyn Emitter>>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            emitters,
            store,
            runner: JobRunner::docker(),
            emitter_queue: QueueConfig::unbounded(),
            event_queue: QueueConfig::with_timeout(ONE_HOUR),
            job_queue: QueueConfig::with_timeout(ONE_HOUR),
            container_prune_timeout: None,
        }
    }

    /// Replace the job runner (tests inject an engine double here).
    pub fn with_runner(mut self, runner: JobRunner) -> Self {
        self.runner = runner;
        self
    }

    /// Set the event-queue policy.
    pub fn with_event_queue(mut self, config: QueueConfig) -> Self {
        self.event_queue = config;
        self
    }

    /// Set the job-queue policy.
    pub fn with_job_queue(mut self, config: QueueConfig) -> Self {
        self.job_queue = config;
        self
    }

    /// Prune containers older than `age` before every job DAG run.
    pub fn with_container_prune_timeout(mut self, age: Option<String>) -> Self {
        self.container_prune_timeout = age;
        self
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// The execution timeout for tasks of the given queue.
    pub fn queue_timeout(&self, queue: &str) -> Option<Duration> {
        match queue {
            EMITTER_QUEUE => self.emitter_queue.default_timeout,
            EVENT_QUEUE => self.event_queue.default_timeout,
            _ => self.job_queue.default_timeout,
        }
    }

    /// Registers (or re-registers) a workflow: validates it, subscribes it
    /// to one emitter worker per trigger (enqueuing the worker on first
    /// subscription), and stores the record.
    ///
    /// Idempotent by construction: the fingerprint's presence in the KV
    /// store prevents duplicate emitter tasks, and the membership check
    /// prevents duplicate subscriptions.
    pub async fn register_workflow(
        &self,
        workflow_id: &str,
        workflow: Workflow,
        volumes: VolumeMap,
    ) -> Result<(), CoordinatorError> {
        workflows::validate(&workflow)?;

        for (event_name, config) in &workflow.on {
            let emitter = self
                .emitters
                .get(event_name)
                .ok_or_else(|| CoordinatorError::UnknownEmitter(event_name.clone()))?;

            let args = emitter.worker_config(event_name, config)?;
            let key = emitter_key(emitter.kind(), &args);

            // The key's presence (created by the subscription below) is
            // the dedup lock for the worker task.
            if !self.store.exists(&key).await? {
                let task = EmitterTask {
                    event_name: event_name.clone(),
                    emitter: emitter.kind(),
                    args,
                };
                self.store
                    .queue_push(EMITTER_QUEUE, &serde_json::to_string(&task)?)
                    .await?;
                info!(%key, "emitter worker enqueued");
            }

            let subscribed = self.store.list_range(&key).await?;
            if !subscribed.iter().any(|id| id == workflow_id) {
                self.store.list_push(&key, workflow_id).await?;
            }
        }

        let record = WorkflowRecord { workflow, volumes };
        self.store
            .set(workflow_id, &serde_json::to_string(&record)?)
            .await?;
        info!(workflow = workflow_id, "workflow registered");

        Ok(())
    }

    /// Emitter-queue handler: runs one worker loop, enqueuing one event
    /// task per emitted event. The subscriber list is snapshotted once at
    /// start; late subscribers ride the key after a worker restart.
    pub async fn run_emitter(&self, task: EmitterTask) -> Result<(), CoordinatorError> {
        let emitter = self.emitter_for(&task.event_name, task.emitter)?;
        let key = emitter_key(task.emitter, &task.args);
        let workflow_ids = self.store.list_range(&key).await?;

        info!(%key, subscribers = workflow_ids.len(), "emitter worker started");

        let mut events = emitter.events(task.args);
        while let Some(event) = events.next().await {
            let event_args = event?;
            let event_task = EventTask {
                event_name: task.event_name.clone(),
                workflow_ids: workflow_ids.clone(),
                emitter: task.emitter,
                event_args,
            };
            self.store
                .queue_push(EVENT_QUEUE, &serde_json::to_string(&event_task)?)
                .await?;
        }

        info!(%key, "emitter worker finished");
        Ok(())
    }

    /// Event-queue handler: shapes the event per subscribed workflow and
    /// enqueues a job run for each workflow that accepts it.
    pub async fn run_event(&self, task: EventTask) -> Result<(), CoordinatorError> {
        let emitter = self.emitter_for(&task.event_name, task.emitter)?;

        for workflow_id in &task.workflow_ids {
            let Some(raw) = self.store.get(workflow_id).await? else {
                // Workflow was unregistered since the worker snapshot.
                continue;
            };
            let record: WorkflowRecord = serde_json::from_str(&raw)?;
            let Some(config) = record.workflow.on.get(&task.event_name) else {
                continue;
            };

            match emitter.payload(config, &task.event_args) {
                Ok(payload) => {
                    let env = seed_environment(&task.event_name, payload);
                    let job_task = JobTask {
                        workflow: record.workflow,
                        env,
                        volumes: record.volumes,
                    };
                    self.store
                        .queue_push(JOB_QUEUE, &serde_json::to_string(&job_task)?)
                        .await?;
                }
                Err(err) if err.is_rejection() => {
                    debug!(workflow = %workflow_id, event = %task.event_name, "event rejected");
                }
                Err(err) => {
                    warn!(workflow = %workflow_id, event = %task.event_name, error = %err,
                        "payload shaping failed");
                }
            }
        }

        Ok(())
    }

    /// Job-queue handler: optional prune, then the DAG run.
    pub async fn run_jobs(
        &self,
        task: JobTask,
    ) -> Result<IndexMap<String, String>, CoordinatorError> {
        if let Some(age) = &self.container_prune_timeout {
            if let Err(err) = self.runner.clean(age).await {
                warn!(error = %err, "container prune failed");
            }
        }

        let outputs = self
            .runner
            .run(&task.workflow.jobs, task.env, &task.volumes)
            .await?;
        info!(
            workflow = task.workflow.name.as_deref().unwrap_or_default(),
            ?outputs,
            "workflow jobs finished"
        );
        Ok(outputs)
    }

    /// Reconstructs the concrete emitter for a dequeued task from the
    /// event name and type tag.
    fn emitter_for(
        &self,
        event_name: &str,
        kind: EmitterKind,
    ) -> Result<&Arc<dyn Emitter>, CoordinatorError> {
        self.emitters
            .get(event_name)
            .filter(|emitter| emitter.kind() == kind)
            .ok_or_else(|| CoordinatorError::UnknownEmitter(format!("{event_name} ({kind})")))
    }
}

/// Seeds the initial variable environment of a job DAG: the payload's own
/// keys become top-level bindings, then the event name and the `payload`
/// alias are bound on top of them.
fn seed_environment(event_name: &str, payload: serde_json::Value) -> Environment {
    let mut env = Environment::new();
    if let serde_json::Value::Object(object) = &payload {
        env.extend(object.clone());
    }
    assign(event_name, payload, &env)
}
