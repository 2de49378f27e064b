//! Queue workers with graceful shutdown.
//!
//! Each worker is a long-running task pulling one payload at a time from
//! its queue and executing it to completion. Task failures are caught and
//! logged at the worker boundary so a bad payload never poisons the
//! queue; the shutdown signal is the only thing that ends a worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::coordinator::{Coordinator, CoordinatorError};
use crate::tasks::{EMITTER_QUEUE, EVENT_QUEUE, JOB_QUEUE};

/// Worker pool configuration.
///
/// Emitter workers are occupied indefinitely by the worker loop they
/// dequeue, so their count bounds how many distinct emitter identities
/// the process can serve.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub emitter_workers: usize,
    pub event_workers: usize,
    pub job_workers: usize,

    /// How long one dequeue attempt blocks before rechecking shutdown.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            emitter_workers: 4,
            event_workers: 2,
            job_workers: 2,
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the emitter worker count.
    pub fn with_emitter_workers(mut self, count: usize) -> Self {
        self.emitter_workers = count.max(1);
        self
    }

    /// Set the event worker count.
    pub fn with_event_workers(mut self, count: usize) -> Self {
        self.event_workers = count.max(1);
        self
    }

    /// Set the job worker count.
    pub fn with_job_workers(mut self, count: usize) -> Self {
        self.job_workers = count.max(1);
        self
    }
}

/// The set of workers draining the three queues.
pub struct WorkerPool {
    coordinator: Arc<Coordinator>,
    config: WorkerPoolConfig,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(coordinator: Arc<Coordinator>, config: WorkerPoolConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            coordinator,
            config,
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// Spawns every worker. Idempotence is not needed here: the daemon
    /// calls this once.
    pub fn start(&mut self) {
        let queues = [
            (EMITTER_QUEUE, self.config.emitter_workers),
            (EVENT_QUEUE, self.config.event_workers),
            (JOB_QUEUE, self.config.job_workers),
        ];
        for (queue, count) in queues {
            for _ in 0..count {
                let coordinator = Arc::clone(&self.coordinator);
                let shutdown_rx = self.shutdown_tx.subscribe();
                let poll_interval = self.config.poll_interval;
                let worker_id = format!("{queue}-worker-{}", Uuid::now_v7());
                self.handles.push(tokio::spawn(worker_loop(
                    coordinator,
                    queue,
                    worker_id,
                    poll_interval,
                    shutdown_rx,
                )));
            }
        }
        info!(workers = self.handles.len(), "worker pool started");
    }

    /// Signals every worker to stop after its current task.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Waits for every worker to stop.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(err) = handle.await {
                error!(error = %err, "worker task join failed");
            }
        }
    }
}

async fn worker_loop(
    coordinator: Arc<Coordinator>,
    queue: &'static str,
    worker_id: String,
    poll_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(worker = %worker_id, queue, "worker started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let popped = tokio::select! {
            popped = coordinator.store().queue_pop(queue, poll_interval) => popped,
            _ = shutdown_rx.changed() => break,
        };

        match popped {
            Ok(Some(payload)) => execute(&coordinator, queue, &worker_id, payload).await,
            Ok(None) => {}
            Err(err) => {
                error!(worker = %worker_id, queue, error = %err, "queue pop failed");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }

    info!(worker = %worker_id, queue, "worker stopped");
}

/// Runs one task under its queue's execution timeout. Errors stop here:
/// they are logged and dropped, like the tasks themselves.
async fn execute(coordinator: &Coordinator, queue: &str, worker_id: &str, payload: String) {
    let result = match coordinator.queue_timeout(queue) {
        Some(timeout) => {
            match tokio::time::timeout(timeout, run_task(coordinator, queue, &payload)).await {
                Ok(result) => result,
                Err(_) => {
                    error!(worker = %worker_id, queue, ?timeout, "task timed out, dropping");
                    return;
                }
            }
        }
        None => run_task(coordinator, queue, &payload).await,
    };

    if let Err(err) = result {
        error!(worker = %worker_id, queue, error = %err, "task failed");
    }
}

async fn run_task(
    coordinator: &Coordinator,
    queue: &str,
    payload: &str,
) -> Result<(), CoordinatorError> {
    match queue {
        EMITTER_QUEUE => coordinator.run_emitter(serde_json::from_str(payload)?).await,
        EVENT_QUEUE => coordinator.run_event(serde_json::from_str(payload)?).await,
        _ => coordinator
            .run_jobs(serde_json::from_str(payload)?)
            .await
            .map(|_| ()),
    }
}
