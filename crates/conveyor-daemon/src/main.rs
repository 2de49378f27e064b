// Conveyor daemon
//
// The long-running driver: connects to the substrate, registers the
// built-in emitters, spawns the queue workers, loads the shipped system
// workflows once, then polls the user workflows directory for new
// manifests until told to stop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use conveyor_coordinator::{Coordinator, WorkerPool, WorkerPoolConfig};
use conveyor_core::types::{EventName, VolumeMap};
use conveyor_emitters::{Emitter, LimitEmitter, ScheduleEmitter, SseEmitter};
use conveyor_storage::{KeyValueStore, RedisStore};

mod discover;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("conveyor daemon starting...");

    let redis_url = std::env::var("REDIS").context("REDIS environment variable required")?;
    let container_prune_timeout = std::env::var("CONTAINER_PRUNE_TIMEOUT").ok();

    let store: Arc<dyn KeyValueStore> = Arc::new(RedisStore::from_url(&redis_url).await?);
    tracing::info!("substrate connection established");

    let mut emitters: HashMap<EventName, Arc<dyn Emitter>> = HashMap::new();
    emitters.insert("limit".to_string(), Arc::new(LimitEmitter));
    emitters.insert("schedule".to_string(), Arc::new(ScheduleEmitter));
    emitters.insert(
        "sse".to_string(),
        Arc::new(SseEmitter::new(Arc::clone(&store))),
    );

    let coordinator = Arc::new(
        Coordinator::new(emitters, store).with_container_prune_timeout(container_prune_timeout),
    );

    let mut pool = WorkerPool::new(Arc::clone(&coordinator), WorkerPoolConfig::default());
    pool.start();

    let root = match std::env::var("CONVEYOR_WORKFLOWS_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => std::env::current_dir()?.join("workflows"),
    };
    let system_dir = root.join("system");
    let user_dir = root.join("user");
    let example_dir = root.join("example");

    // System workflows are the ones the codebase ships with; they may
    // bring in user workflows by monitoring events, so they see the user
    // directory (and the shipped examples) as volumes. User workflows get
    // no volumes: exposing these would be a vector for abuse.
    let mut system_volumes = VolumeMap::new();
    system_volumes.insert(user_dir.display().to_string(), "/workflows".to_string());
    system_volumes.insert(
        example_dir.display().to_string(),
        "/workflows_example".to_string(),
    );

    let system_manifests = discover::manifests_since(&system_dir, SystemTime::UNIX_EPOCH);
    register_all(&coordinator, &system_manifests, &system_volumes).await;

    // Poll the user directory every minute for new or changed manifests.
    let mut previous_check = SystemTime::UNIX_EPOCH;
    loop {
        let manifests = discover::manifests_since(&user_dir, previous_check);
        previous_check = SystemTime::now();
        register_all(&coordinator, &manifests, &VolumeMap::new()).await;

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(60)) => {}
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("shutdown signal received");
    pool.shutdown();
    pool.join().await;

    Ok(())
}

/// Registers each manifest, logging and skipping the ones that fail so a
/// broken file never blocks its siblings.
async fn register_all(coordinator: &Coordinator, manifests: &[PathBuf], volumes: &VolumeMap) {
    for path in manifests {
        let workflow_id = path.display().to_string();
        match conveyor_core::load_from_file(path) {
            Ok(workflow) => {
                if let Err(err) = coordinator
                    .register_workflow(&workflow_id, workflow, volumes.clone())
                    .await
                {
                    tracing::error!(workflow = %workflow_id, error = %err, "error registering workflow");
                }
            }
            Err(err) => {
                tracing::error!(workflow = %workflow_id, error = %err, "error loading workflow");
            }
        }
    }
}
