//! End-to-end fan-out: one limit trigger travels through all three
//! queues, from registration down to container exec calls, with real
//! workers draining an in-memory substrate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use conveyor_coordinator::{Coordinator, WorkerPool, WorkerPoolConfig};
use conveyor_core::types::{EventName, VolumeMap};
use conveyor_emitters::{Emitter, LimitEmitter};
use conveyor_runner::{Bind, ContainerEngine, EngineError, JobRunner};
use conveyor_storage::{KeyValueStore, MemoryStore};

/// Engine double that answers `echo` and records the container lifecycle.
#[derive(Default)]
struct RecordingEngine {
    launched: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    outputs: Mutex<Vec<String>>,
}

#[async_trait]
impl ContainerEngine for RecordingEngine {
    async fn launch(&self, image: &str, _binds: &[Bind]) -> Result<String, EngineError> {
        let mut launched = self.launched.lock();
        let id = format!("container-{}", launched.len());
        launched.push(image.to_string());
        Ok(id)
    }

    async fn exec(&self, _container_id: &str, argv: &[String]) -> Result<String, EngineError> {
        self.exec_shell(_container_id, &argv.join(" ")).await
    }

    async fn exec_shell(
        &self,
        _container_id: &str,
        command: &str,
    ) -> Result<String, EngineError> {
        let output = command.strip_prefix("echo ").unwrap_or("").to_string();
        self.outputs.lock().push(output.clone());
        Ok(format!("{output}\n"))
    }

    async fn remove(&self, container_id: &str) -> Result<(), EngineError> {
        self.removed.lock().push(container_id.to_string());
        Ok(())
    }

    async fn prune(&self, _age: &str) -> Result<(), EngineError> {
        Ok(())
    }
}

#[tokio::test]
async fn limit_trigger_runs_one_job_dag_per_index() {
    let store = MemoryStore::new();
    let shared: Arc<dyn KeyValueStore> = Arc::new(store.clone());
    let engine = Arc::new(RecordingEngine::default());

    let mut emitters: HashMap<EventName, Arc<dyn Emitter>> = HashMap::new();
    emitters.insert("limit".to_string(), Arc::new(LimitEmitter));

    let coordinator = Arc::new(
        Coordinator::new(emitters, shared).with_runner(JobRunner::new(
            Arc::clone(&engine) as Arc<dyn ContainerEngine>
        )),
    );

    // Single worker per queue keeps the fan-out order deterministic.
    let config = WorkerPoolConfig::new()
        .with_emitter_workers(1)
        .with_event_workers(1)
        .with_job_workers(1);
    let mut pool = WorkerPool::new(Arc::clone(&coordinator), config);
    pool.start();

    let workflow = conveyor_core::load_from_str(
        r#"
on:
  limit: 3
jobs:
  echo:
    runs-on: alpine
    steps:
      - run: echo ${{ index }}
"#,
    )
    .unwrap();
    coordinator
        .register_workflow("limit.yaml", workflow, VolumeMap::new())
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while engine.outputs.lock().len() < 3 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "fan-out did not finish in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    pool.shutdown();
    pool.join().await;

    assert_eq!(*engine.outputs.lock(), ["0", "1", "2"]);
    assert_eq!(engine.launched.lock().len(), 3);
    assert_eq!(*engine.launched.lock(), ["alpine", "alpine", "alpine"]);
    assert_eq!(engine.removed.lock().len(), 3);
}
