//! Container runtime adapter
//!
//! The runtime itself is a black box: keel shells out to `<program> compose`
//! with the compiled manifest and rendered env files, and reads service state
//! back from `compose ps --format json`. The traits here are the seam the
//! orchestrator is tested through.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// One environment's compose project
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComposeProject {
    /// Project name (`<project>-<env>`)
    pub name: String,
    /// Compiled manifest
    pub manifest: PathBuf,
    /// Rendered env files, passed to the runtime for interpolation
    pub env_files: Vec<PathBuf>,
}

/// Observed state of one service
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceHealth {
    /// Running and its health check passes
    Healthy,
    /// Running without a health check
    Running,
    /// Created, restarting, or health check still in its start period
    Starting,
    /// Health check failed its retries
    Unhealthy,
    /// Container stopped
    Exited { code: i32 },
}

impl ServiceHealth {
    /// Whether dependents may proceed: healthy, or started when the service
    /// has no health check
    pub fn is_ready(&self, has_healthcheck: bool) -> bool {
        match self {
            Self::Healthy => true,
            Self::Running => !has_healthcheck,
            _ => false,
        }
    }

    /// Whether the service can no longer become ready without intervention
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Unhealthy | Self::Exited { .. })
    }
}

impl fmt::Display for ServiceHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => f.write_str("healthy"),
            Self::Running => f.write_str("running"),
            Self::Starting => f.write_str("starting"),
            Self::Unhealthy => f.write_str("unhealthy"),
            Self::Exited { code } => write!(f, "exited with code {}", code),
        }
    }
}

/// Errors from invoking the runtime
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Runtime binary could not be spawned
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// Runtime ran and exited non-zero
    #[error("{command} exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    /// Runtime output could not be parsed
    #[error("unexpected runtime output: {message}")]
    InvalidOutput { message: String },
}

/// Operations the orchestrator needs from a container runtime
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start every service in the background
    async fn up(&self, project: &ComposeProject) -> Result<(), RuntimeError>;

    /// Stop and remove containers, and volumes when `remove_volumes` is set
    async fn down(&self, project: &ComposeProject, remove_volumes: bool) -> Result<(), RuntimeError>;

    /// Current state of every service that has a container
    async fn service_health(
        &self,
        project: &ComposeProject,
    ) -> Result<BTreeMap<String, ServiceHealth>, RuntimeError>;
}

/// Runtime driven through a `compose` subcommand (`docker compose`, `podman compose`)
#[derive(Clone, Debug)]
pub struct ComposeRuntime {
    program: String,
}

impl ComposeRuntime {
    /// Runtime invoking `<program> compose ...`
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn base_args(project: &ComposeProject) -> Vec<String> {
        let mut args = vec![
            "compose".to_string(),
            "--project-name".to_string(),
            project.name.clone(),
            "--file".to_string(),
            project.manifest.display().to_string(),
        ];
        for env_file in &project.env_files {
            args.push("--env-file".to_string());
            args.push(env_file.display().to_string());
        }
        args
    }

    async fn run(&self, project: &ComposeProject, extra: &[&str]) -> Result<String, RuntimeError> {
        let mut args = Self::base_args(project);
        args.extend(extra.iter().map(|s| s.to_string()));
        let command = format!("{} compose {}", self.program, extra.join(" "));
        debug!(command = %command, project = %project.name, "invoking runtime");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| RuntimeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(RuntimeError::Failed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ContainerRuntime for ComposeRuntime {
    async fn up(&self, project: &ComposeProject) -> Result<(), RuntimeError> {
        self.run(project, &["up", "--detach", "--remove-orphans"])
            .await
            .map(|_| ())
    }

    async fn down(&self, project: &ComposeProject, remove_volumes: bool) -> Result<(), RuntimeError> {
        let mut args = vec!["down", "--remove-orphans"];
        if remove_volumes {
            args.push("--volumes");
        }
        self.run(project, &args).await.map(|_| ())
    }

    async fn service_health(
        &self,
        project: &ComposeProject,
    ) -> Result<BTreeMap<String, ServiceHealth>, RuntimeError> {
        let stdout = self.run(project, &["ps", "--all", "--format", "json"]).await?;
        parse_ps_output(&stdout)
    }
}

#[derive(Deserialize)]
struct PsEntry {
    #[serde(rename = "Service")]
    service: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Health", default)]
    health: String,
    #[serde(rename = "ExitCode", default)]
    exit_code: i32,
}

impl PsEntry {
    fn health(&self) -> ServiceHealth {
        match self.state.as_str() {
            "running" => match self.health.as_str() {
                "healthy" => ServiceHealth::Healthy,
                "unhealthy" => ServiceHealth::Unhealthy,
                "starting" => ServiceHealth::Starting,
                _ => ServiceHealth::Running,
            },
            "exited" | "dead" => ServiceHealth::Exited {
                code: self.exit_code,
            },
            _ => ServiceHealth::Starting,
        }
    }
}

/// Parse `compose ps --format json`.
///
/// Older compose releases print one JSON array, newer ones one object per line.
pub fn parse_ps_output(stdout: &str) -> Result<BTreeMap<String, ServiceHealth>, RuntimeError> {
    let trimmed = stdout.trim();
    let entries: Vec<PsEntry> = if trimmed.is_empty() {
        Vec::new()
    } else if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(|e| RuntimeError::InvalidOutput {
            message: e.to_string(),
        })?
    } else {
        trimmed
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str::<PsEntry>)
            .collect::<Result<_, _>>()
            .map_err(|e| RuntimeError::InvalidOutput {
                message: e.to_string(),
            })?
    };
    Ok(entries
        .into_iter()
        .map(|e| {
            let health = e.health();
            (e.service, health)
        })
        .collect())
}

/// Reports how many GPUs the host can hand to containers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GpuProbe: Send + Sync {
    /// Number of GPUs detected, `None` when detection is unavailable
    async fn available_gpus(&self) -> Option<u32>;
}

/// Counts devices listed by `nvidia-smi --list-gpus`
#[derive(Clone, Copy, Debug, Default)]
pub struct NvidiaSmiProbe;

#[async_trait]
impl GpuProbe for NvidiaSmiProbe {
    async fn available_gpus(&self) -> Option<u32> {
        let output = Command::new("nvidia-smi")
            .arg("--list-gpus")
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let count = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| l.trim_start().starts_with("GPU "))
            .count();
        u32::try_from(count).ok()
    }
}
