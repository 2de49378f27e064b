//! The container engine contract and its docker CLI implementation.
//!
//! The engine is an opaque subprocess with a four-verb contract: launch a
//! detached container, exec inside it, force-remove it, prune by age.
//! The trait exists so the job runner can be exercised without a docker
//! daemon.

use async_trait::async_trait;
use tokio::process::Command;

/// A host-path → container-path bind mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bind {
    pub source: String,
    pub target: String,
}

/// Errors from the container engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine binary could not be spawned.
    #[error("failed to spawn container engine: {0}")]
    Spawn(#[from] std::io::Error),

    /// The engine ran but reported failure.
    #[error("container engine failed ({command}): {stderr}")]
    Command { command: String, stderr: String },
}

/// Minimal CLI contract of the container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// `run -d -i [-v src:dst]… <image>`; returns the container id.
    async fn launch(&self, image: &str, binds: &[Bind]) -> Result<String, EngineError>;

    /// `exec -i <cid> <argv…>`; returns captured stdout.
    async fn exec(&self, container_id: &str, argv: &[String]) -> Result<String, EngineError>;

    /// `exec -i <cid> <command>` through the shell; returns captured stdout.
    async fn exec_shell(&self, container_id: &str, command: &str)
        -> Result<String, EngineError>;

    /// `rm -f <cid>`.
    async fn remove(&self, container_id: &str) -> Result<(), EngineError>;

    /// `system prune -f until=<age>`.
    async fn prune(&self, age: &str) -> Result<(), EngineError>;
}

/// The real engine: shells out to `docker`.
pub struct DockerCli;

impl DockerCli {
    async fn run(command: &mut Command) -> Result<String, EngineError> {
        let rendered = format!("{:?}", command.as_std());
        let output = command.output().await?;
        if !output.status.success() {
            return Err(EngineError::Command {
                command: rendered,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn launch(&self, image: &str, binds: &[Bind]) -> Result<String, EngineError> {
        let mut command = Command::new("docker");
        command.arg("run").arg("-d").arg("-i");
        for bind in binds {
            command.arg("-v").arg(format!("{}:{}", bind.source, bind.target));
        }
        command.arg(image);

        let stdout = Self::run(&mut command).await?;
        Ok(trim_newline(stdout))
    }

    async fn exec(&self, container_id: &str, argv: &[String]) -> Result<String, EngineError> {
        let mut command = Command::new("docker");
        command.arg("exec").arg("-i").arg(container_id).args(argv);
        Self::run(&mut command).await
    }

    async fn exec_shell(
        &self,
        container_id: &str,
        shell_command: &str,
    ) -> Result<String, EngineError> {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(format!("docker exec -i {container_id} {shell_command}"));
        Self::run(&mut command).await
    }

    async fn remove(&self, container_id: &str) -> Result<(), EngineError> {
        let mut command = Command::new("docker");
        command.arg("rm").arg("-f").arg(container_id);
        Self::run(&mut command).await.map(|_| ())
    }

    async fn prune(&self, age: &str) -> Result<(), EngineError> {
        let mut command = Command::new("docker");
        command
            .arg("system")
            .arg("prune")
            .arg("-f")
            .arg(format!("until={age}"));
        Self::run(&mut command).await.map(|_| ())
    }
}

/// Trims one trailing newline from captured stdout.
pub(crate) fn trim_newline(mut output: String) -> String {
    if output.ends_with('\n') {
        output.pop();
        if output.ends_with('\r') {
            output.pop();
        }
    }
    output
}
