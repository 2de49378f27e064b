//! Job DAG execution.
//!
//! Jobs run in topological order; each job gets a fresh container, its
//! steps run sequentially inside it, and the last step's stdout becomes
//! the job's output, bound into the environment for downstream jobs. One
//! job's failure never aborts its siblings; whatever depended on it fails
//! its dependency check instead.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use conveyor_core::types::{Environment, JobConfig, RunCommand, StepConfig, VolumeMap};
use conveyor_core::{assign, evaluate, interpolate, truthy, ExprError};

use crate::engine::{trim_newline, Bind, ContainerEngine, DockerCli, EngineError};
use crate::volumes::host_path;

/// Errors raised while running a job DAG.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// A declared dependency is not bound in the environment.
    #[error("dependency not fulfilled: {job} needs {dependency}")]
    UnmetDependency { job: String, dependency: String },

    /// The `needs` edges contain a cycle; the whole run is aborted.
    #[error("job dependency cycle involving: {jobs}")]
    Cycle { jobs: String },

    /// The container engine failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// An `if` condition or interpolation failed.
    #[error(transparent)]
    Expr(#[from] ExprError),
}

/// Executes job DAGs against a container engine.
pub struct JobRunner {
    engine: Arc<dyn ContainerEngine>,
}

impl JobRunner {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    /// A runner backed by the local docker CLI.
    pub fn docker() -> Self {
        Self::new(Arc::new(DockerCli))
    }

    /// Runs every job of `jobs` in dependency order, threading outputs
    /// through the environment. Returns the output map of the jobs that
    /// completed.
    pub async fn run(
        &self,
        jobs: &IndexMap<String, JobConfig>,
        env: Environment,
        volumes: &VolumeMap,
    ) -> Result<IndexMap<String, String>, JobError> {
        let order = sort_jobs(jobs)?;
        let binds: Vec<Bind> = volumes
            .iter()
            .map(|(source, target)| Bind {
                source: host_path(source),
                target: target.clone(),
            })
            .collect();

        let mut env = env;
        let mut outputs = IndexMap::new();
        'jobs: for name in order {
            let Some(job) = jobs.get(&name) else {
                continue;
            };

            for dependency in job.dependencies() {
                if !env.contains_key(dependency) {
                    let err = JobError::UnmetDependency {
                        job: name.clone(),
                        dependency: dependency.clone(),
                    };
                    warn!(job = %name, error = %err, "skipping job");
                    continue 'jobs;
                }
            }

            match self.run_job(&name, job, &env, &binds).await {
                Ok(output) => {
                    env = assign(&name, Value::String(output.clone()), &env);
                    outputs.insert(name, output);
                }
                Err(err) => {
                    // Remaining jobs still get their chance; dependents of
                    // this one fail their dependency check above.
                    warn!(job = %name, error = %err, "job failed");
                }
            }
        }

        Ok(outputs)
    }

    /// Prune engine state older than `age`.
    pub async fn clean(&self, age: &str) -> Result<(), JobError> {
        Ok(self.engine.prune(age).await?)
    }

    async fn run_job(
        &self,
        name: &str,
        job: &JobConfig,
        env: &Environment,
        binds: &[Bind],
    ) -> Result<String, JobError> {
        if job.steps.is_empty() {
            return Ok(String::new());
        }

        let container_id = self.engine.launch(&job.runs_on, binds).await?;
        info!(job = name, container = %container_id, image = %job.runs_on, "container launched");

        let result = self.run_steps(name, job, env.clone(), &container_id).await;

        // Exactly one teardown attempt per launched container, on every
        // exit path.
        if let Err(err) = self.engine.remove(&container_id).await {
            warn!(container = %container_id, error = %err, "container removal failed");
        }

        result
    }

    async fn run_steps(
        &self,
        name: &str,
        job: &JobConfig,
        mut env: Environment,
        container_id: &str,
    ) -> Result<String, JobError> {
        let mut last_output = String::new();
        for step in &job.steps {
            let Some(output) = self.run_step(container_id, step, &env).await? else {
                continue;
            };
            env = assign(name, Value::String(output.clone()), &env);
            last_output = output;
        }
        Ok(last_output)
    }

    /// Executes one step, or returns `None` when its condition skipped it.
    async fn run_step(
        &self,
        container_id: &str,
        step: &StepConfig,
        env: &Environment,
    ) -> Result<Option<String>, JobError> {
        if let Some(condition) = &step.condition {
            if !truthy(&evaluate(condition, env)?) {
                debug!(
                    step = step.name.as_deref().unwrap_or_default(),
                    "step condition not satisfied, skipping"
                );
                return Ok(None);
            }
        }

        let Some(run) = &step.run else {
            return Ok(Some(String::new()));
        };

        let stdout = match run {
            RunCommand::Argv(args) => {
                let argv = args
                    .iter()
                    .map(|arg| interpolate(arg, env))
                    .collect::<Result<Vec<_>, _>>()?;
                self.engine.exec(container_id, &argv).await?
            }
            RunCommand::Shell(line) => {
                self.engine
                    .exec_shell(container_id, &interpolate(line, env)?)
                    .await?
            }
        };

        Ok(Some(trim_newline(stdout)))
    }
}

/// Kahn sort over the `needs` edges, with the ready set ordered by job
/// name for determinism. Dependencies that name no job in the map are
/// left to the runtime environment check.
pub fn sort_jobs(jobs: &IndexMap<String, JobConfig>) -> Result<Vec<String>, JobError> {
    let mut indegree: HashMap<&str, usize> =
        jobs.keys().map(|name| (name.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for (name, job) in jobs {
        for dependency in job.dependencies() {
            if !jobs.contains_key(dependency) {
                continue;
            }
            if let Some(depth) = indegree.get_mut(name.as_str()) {
                *depth += 1;
            }
            dependents
                .entry(dependency.as_str())
                .or_default()
                .push(name.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = indegree
        .iter()
        .filter(|(_, depth)| **depth == 0)
        .map(|(name, _)| *name)
        .collect();

    let mut order = Vec::with_capacity(jobs.len());
    while let Some(&name) = ready.iter().next() {
        ready.remove(name);
        order.push(name.to_string());
        for dependent in dependents.remove(name).unwrap_or_default() {
            if let Some(depth) = indegree.get_mut(dependent) {
                *depth -= 1;
                if *depth == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if order.len() != jobs.len() {
        let stuck: Vec<&str> = jobs
            .keys()
            .map(String::as_str)
            .filter(|name| !order.iter().any(|done| done == name))
            .collect();
        return Err(JobError::Cycle {
            jobs: stuck.join(", "),
        });
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;

    /// Engine double that answers `echo` like a shell would and records
    /// every lifecycle call.
    #[derive(Default)]
    struct FakeEngine {
        launched: Mutex<Vec<String>>,
        removed: Mutex<Vec<String>>,
        execs: Mutex<Vec<Vec<String>>>,
        pruned: Mutex<Vec<String>>,
        /// Shell commands containing this marker fail.
        poison: Option<String>,
    }

    impl FakeEngine {
        fn poisoned(marker: &str) -> Self {
            Self {
                poison: Some(marker.to_string()),
                ..Self::default()
            }
        }

        fn echo(&self, command: &str) -> Result<String, EngineError> {
            if let Some(poison) = &self.poison {
                if command.contains(poison.as_str()) {
                    return Err(EngineError::Command {
                        command: command.to_string(),
                        stderr: "poisoned".to_string(),
                    });
                }
            }
            match command.strip_prefix("echo ") {
                Some(rest) => Ok(format!("{rest}\n")),
                None => Ok(String::new()),
            }
        }
    }

    #[async_trait]
    impl ContainerEngine for FakeEngine {
        async fn launch(&self, image: &str, _binds: &[Bind]) -> Result<String, EngineError> {
            let mut launched = self.launched.lock();
            let id = format!("container-{}", launched.len());
            launched.push(image.to_string());
            Ok(id)
        }

        async fn exec(
            &self,
            _container_id: &str,
            argv: &[String],
        ) -> Result<String, EngineError> {
            self.execs.lock().push(argv.to_vec());
            self.echo(&argv.join(" "))
        }

        async fn exec_shell(
            &self,
            _container_id: &str,
            command: &str,
        ) -> Result<String, EngineError> {
            self.execs.lock().push(vec![command.to_string()]);
            self.echo(command)
        }

        async fn remove(&self, container_id: &str) -> Result<(), EngineError> {
            self.removed.lock().push(container_id.to_string());
            Ok(())
        }

        async fn prune(&self, age: &str) -> Result<(), EngineError> {
            self.pruned.lock().push(age.to_string());
            Ok(())
        }
    }

    fn jobs(yaml: &str) -> IndexMap<String, JobConfig> {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn runner() -> (Arc<FakeEngine>, JobRunner) {
        let engine = Arc::new(FakeEngine::default());
        (Arc::clone(&engine), JobRunner::new(engine))
    }

    #[test]
    fn sort_puts_dependencies_before_dependents() {
        let jobs = jobs(
            r#"
            d: { runs-on: alpine, needs: [b, c], steps: [] }
            c: { runs-on: alpine, needs: a, steps: [] }
            b: { runs-on: alpine, needs: a, steps: [] }
            a: { runs-on: alpine, steps: [] }
            "#,
        );
        let order = sort_jobs(&jobs).unwrap();
        assert_eq!(order, ["a", "b", "c", "d"]);
    }

    #[test]
    fn sort_detects_cycles() {
        let jobs = jobs(
            r#"
            a: { runs-on: alpine, needs: b, steps: [] }
            b: { runs-on: alpine, needs: a, steps: [] }
            "#,
        );
        assert!(matches!(
            sort_jobs(&jobs).unwrap_err(),
            JobError::Cycle { .. }
        ));
    }

    #[test]
    fn sort_detects_self_cycles() {
        let jobs = jobs("a: { runs-on: alpine, needs: a, steps: [] }");
        assert!(matches!(
            sort_jobs(&jobs).unwrap_err(),
            JobError::Cycle { .. }
        ));
    }

    #[tokio::test]
    async fn outputs_propagate_to_dependent_jobs() {
        let (_, runner) = runner();
        let jobs = jobs(
            r#"
            a:
              runs-on: alpine
              steps:
                - run: echo hi
            b:
              runs-on: alpine
              needs: a
              steps:
                - run: echo ${{ a }}
            "#,
        );
        let outputs = runner
            .run(&jobs, Environment::new(), &VolumeMap::new())
            .await
            .unwrap();
        assert_eq!(outputs["a"], "hi");
        assert_eq!(outputs["b"], "hi");
    }

    #[tokio::test]
    async fn every_launch_gets_exactly_one_teardown() {
        let engine = Arc::new(FakeEngine::poisoned("boom"));
        let runner = JobRunner::new(Arc::clone(&engine) as Arc<dyn ContainerEngine>);
        let jobs = jobs(
            r#"
            ok:
              runs-on: alpine
              steps:
                - run: echo fine
            bad:
              runs-on: alpine
              steps:
                - run: echo boom
            "#,
        );
        let outputs = runner
            .run(&jobs, Environment::new(), &VolumeMap::new())
            .await
            .unwrap();

        // The failing job is absent from the outputs, but both containers
        // were launched and both were torn down.
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs["ok"], "fine");
        assert_eq!(engine.launched.lock().len(), 2);
        assert_eq!(engine.removed.lock().len(), 2);
    }

    #[tokio::test]
    async fn failed_jobs_leave_dependents_unfulfilled() {
        let engine = Arc::new(FakeEngine::poisoned("boom"));
        let runner = JobRunner::new(Arc::clone(&engine) as Arc<dyn ContainerEngine>);
        let jobs = jobs(
            r#"
            a:
              runs-on: alpine
              steps:
                - run: echo boom
            b:
              runs-on: alpine
              needs: a
              steps:
                - run: echo ${{ a }}
            "#,
        );
        let outputs = runner
            .run(&jobs, Environment::new(), &VolumeMap::new())
            .await
            .unwrap();
        assert!(outputs.is_empty());
        // b never launched a container.
        assert_eq!(engine.launched.lock().len(), 1);
    }

    #[tokio::test]
    async fn argv_steps_interpolate_per_argument_without_a_shell() {
        let (engine, runner) = runner();
        let jobs = jobs(
            r#"
            a:
              runs-on: alpine
              steps:
                - run: [echo, "${{ index }}", plain]
            "#,
        );
        let mut env = Environment::new();
        env.insert("index".to_string(), serde_json::json!(7));
        let outputs = runner.run(&jobs, env, &VolumeMap::new()).await.unwrap();
        assert_eq!(outputs["a"], "7 plain");
        assert_eq!(
            engine.execs.lock()[0],
            vec!["echo".to_string(), "7".to_string(), "plain".to_string()]
        );
    }

    #[tokio::test]
    async fn falsy_conditions_skip_the_step_but_not_the_job() {
        let (engine, runner) = runner();
        let jobs = jobs(
            r#"
            a:
              runs-on: alpine
              steps:
                - if: "false"
                  run: echo skipped
                - run: echo ran
            "#,
        );
        let outputs = runner
            .run(&jobs, Environment::new(), &VolumeMap::new())
            .await
            .unwrap();
        assert_eq!(outputs["a"], "ran");
        assert_eq!(engine.execs.lock().len(), 1);
    }

    #[tokio::test]
    async fn broken_expressions_fail_the_job() {
        let (engine, runner) = runner();
        let jobs = jobs(
            r#"
            a:
              runs-on: alpine
              steps:
                - run: echo ${{ nonexistent }}
            "#,
        );
        let outputs = runner
            .run(&jobs, Environment::new(), &VolumeMap::new())
            .await
            .unwrap();
        assert!(outputs.is_empty());
        // The container was still torn down.
        assert_eq!(engine.removed.lock().len(), 1);
    }

    #[tokio::test]
    async fn jobs_without_steps_record_empty_output_without_a_container() {
        let (engine, runner) = runner();
        let jobs = jobs("a: { runs-on: alpine, steps: [] }");
        let outputs = runner
            .run(&jobs, Environment::new(), &VolumeMap::new())
            .await
            .unwrap();
        assert_eq!(outputs["a"], "");
        assert!(engine.launched.lock().is_empty());
    }

    #[tokio::test]
    async fn steps_see_earlier_step_output_under_job_name_and_payload() {
        let (_, runner) = runner();
        let jobs = jobs(
            r#"
            a:
              runs-on: alpine
              steps:
                - run: echo first
                - run: echo ${{ a }}-${{ payload }}
            "#,
        );
        let outputs = runner
            .run(&jobs, Environment::new(), &VolumeMap::new())
            .await
            .unwrap();
        assert_eq!(outputs["a"], "first-first");
    }

    #[tokio::test]
    async fn clean_delegates_to_engine_prune() {
        let (engine, runner) = runner();
        runner.clean("24h").await.unwrap();
        assert_eq!(*engine.pruned.lock(), ["24h".to_string()]);
    }
}
