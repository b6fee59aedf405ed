//! Environment Orchestrator
//!
//! Sequences compile → render → validate → launch → health-wait for one
//! environment, and the confirmed wipe of everything that environment owns.
//! Every step goes through [`OrchestratorState`]; an error anywhere in the
//! start pipeline returns the orchestrator to `Idle`, and a failed launch
//! tears down whatever the runtime had started.

mod state;

pub use state::OrchestratorState;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use keel_common::fs::{read_if_exists, remove_dir_if_exists, remove_file_if_exists};
use keel_common::graph::DependencyGraph;
use keel_common::retry::{retry_with_backoff, RetryConfig};
use keel_common::schema::Schema;
use keel_common::EnvironmentLabel;
use keel_compiler::ManifestArtifact;
use keel_secrets::{PolicyEngine, ValidationReport};

use crate::config::Workspace;
use crate::pipeline;
use crate::runtime::{ComposeProject, ContainerRuntime, GpuProbe, RuntimeError};
use crate::{Error, Result};

/// Orchestration failures
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    /// Operation not allowed from the current state
    #[error("illegal state transition {from} -> {to}")]
    IllegalTransition {
        from: OrchestratorState,
        to: OrchestratorState,
    },

    /// Blocking credential findings
    #[error("{report}\ncredential validation blocked launch")]
    ValidationFailed { report: ValidationReport },

    /// `up` failed on every attempt
    #[error("runtime failed to launch after {attempts} attempt(s): {source}")]
    Launch {
        attempts: u32,
        source: RuntimeError,
    },

    /// A service exited or went unhealthy during the wait
    #[error("service '{service}' is {health}")]
    ServiceFailed { service: String, health: String },

    /// Services still not ready at the deadline
    #[error("timed out after {}s waiting for: {}", .timeout.as_secs(), .services.join(", "))]
    HealthTimeout {
        services: Vec<String>,
        timeout: Duration,
    },

    /// Cancellation token fired
    #[error("launch cancelled")]
    Cancelled,

    /// Wipe confirmed with the wrong token
    #[error("confirmation token does not match; pass --confirm {expected}")]
    ConfirmationMismatch { expected: String },
}

/// Token `wipe` must be confirmed with
pub fn confirmation_token(label: EnvironmentLabel) -> String {
    format!("wipe-{}", label)
}

/// Launch tuning
#[derive(Clone, Debug)]
pub struct LaunchSettings {
    /// Bound on the whole health wait
    pub health_timeout: Duration,
    /// Delay between health polls
    pub poll_interval: Duration,
    /// Backoff for `up`
    pub retry: RetryConfig,
    /// Treat warnings as blocking
    pub strict: bool,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            health_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
            retry: RetryConfig::with_max_attempts(3),
            strict: false,
        }
    }
}

/// What a wipe removed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WipeReport {
    /// Containers and volumes were taken down
    pub containers: bool,
    /// Compose manifest existed and was removed
    pub manifest: bool,
    /// Rendered env directory existed and was removed
    pub rendered: bool,
    /// Secret store existed and was removed
    pub store: bool,
}

#[derive(Deserialize)]
struct ManifestName {
    name: String,
}

/// Drives one environment through the state machine
pub struct Orchestrator {
    workspace: Workspace,
    label: EnvironmentLabel,
    runtime: Arc<dyn ContainerRuntime>,
    gpu: Arc<dyn GpuProbe>,
    settings: LaunchSettings,
    state: OrchestratorState,
}

impl Orchestrator {
    /// Idle orchestrator for `label` with default [`LaunchSettings`]
    pub fn new(
        workspace: Workspace,
        label: EnvironmentLabel,
        runtime: Arc<dyn ContainerRuntime>,
        gpu: Arc<dyn GpuProbe>,
    ) -> Self {
        Self {
            workspace,
            label,
            runtime,
            gpu,
            settings: LaunchSettings::default(),
            state: OrchestratorState::Idle,
        }
    }

    /// Replace the launch tuning
    pub fn with_settings(mut self, settings: LaunchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Current state
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    fn transition(&mut self, next: OrchestratorState) -> std::result::Result<(), OrchestrationError> {
        if !self.state.can_transition_to(next) {
            return Err(OrchestrationError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(environment = %self.label, from = %self.state, to = %next, "state transition");
        self.state = next;
        Ok(())
    }

    fn abort(&mut self) {
        if self.state.is_in_flight() {
            warn!(environment = %self.label, state = %self.state, "aborting to idle");
            self.state = OrchestratorState::Idle;
        }
    }

    /// Compile, render, validate, launch, and wait for every service.
    ///
    /// Returns the launched artifact once the environment is `Running`.
    pub async fn start(
        &mut self,
        schema: &Schema,
        cancel: &CancellationToken,
    ) -> Result<ManifestArtifact> {
        self.transition(OrchestratorState::Compiling)?;
        match self.run_start(schema, cancel).await {
            Ok(artifact) => Ok(artifact),
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    async fn run_start(
        &mut self,
        schema: &Schema,
        cancel: &CancellationToken,
    ) -> Result<ManifestArtifact> {
        let artifact = pipeline::compile_environment(schema, self.label)?;
        pipeline::write_manifest(&self.workspace, &artifact)?;

        self.transition(OrchestratorState::Rendering)?;
        let engine = PolicyEngine::from_schema(schema);
        pipeline::ensure_secrets(&self.workspace, &engine, &artifact)?;
        pipeline::render_environment(&self.workspace, &artifact)?;

        self.transition(OrchestratorState::Validating)?;
        let report = pipeline::validate_environment(&self.workspace, &engine, &artifact)?;
        for finding in report.warnings() {
            warn!(environment = %self.label, "{}", finding);
        }
        if report.is_blocking(self.settings.strict) {
            return Err(OrchestrationError::ValidationFailed { report }.into());
        }

        self.transition(OrchestratorState::Launching)?;
        self.check_gpus(&artifact).await;
        let project = self.workspace.compose_project(&artifact);
        if let Err(e) = self.launch(&artifact, &project, cancel).await {
            if let Err(down) = self.runtime.down(&project, false).await {
                warn!(environment = %self.label, error = %down, "teardown after failed launch failed");
            }
            return Err(e);
        }

        self.transition(OrchestratorState::Running)?;
        info!(
            environment = %self.label,
            project = %project.name,
            services = artifact.services.len(),
            "environment running"
        );
        Ok(artifact)
    }

    async fn check_gpus(&self, artifact: &ManifestArtifact) {
        let wanted = artifact.total_gpus();
        if wanted == 0 {
            return;
        }
        match self.gpu.available_gpus().await {
            Some(found) if found >= wanted => {
                debug!(environment = %self.label, wanted, found, "GPU capacity sufficient")
            }
            Some(found) => warn!(
                environment = %self.label,
                wanted,
                found,
                "manifest reserves more GPUs than detected; services may fail to schedule"
            ),
            None => warn!(
                environment = %self.label,
                wanted,
                "GPU detection unavailable; cannot verify reservations"
            ),
        }
    }

    async fn launch(
        &self,
        artifact: &ManifestArtifact,
        project: &ComposeProject,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let runtime = &self.runtime;
        let up = retry_with_backoff(&self.settings.retry, "compose up", move || runtime.up(project));
        tokio::select! {
            _ = cancel.cancelled() => return Err(OrchestrationError::Cancelled.into()),
            result = up => result.map_err(|source| OrchestrationError::Launch {
                attempts: self.settings.retry.max_attempts.max(1),
                source,
            })?,
        }
        self.wait_until_ready(artifact, project, cancel).await
    }

    /// Poll each service in dependency order until it is ready.
    ///
    /// Bounded by `health_timeout` overall; a failed service or a cancelled
    /// token stops the wait immediately.
    async fn wait_until_ready(
        &self,
        artifact: &ManifestArtifact,
        project: &ComposeProject,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let order = start_order(artifact);
        let deadline = Instant::now() + self.settings.health_timeout;

        for (idx, service) in order.iter().enumerate() {
            let has_healthcheck = artifact
                .service(service)
                .is_some_and(|s| s.healthcheck.is_some());
            loop {
                match self.runtime.service_health(project).await {
                    Ok(states) => match states.get(service) {
                        Some(health) if health.is_ready(has_healthcheck) => break,
                        Some(health) if health.is_failed() => {
                            return Err(OrchestrationError::ServiceFailed {
                                service: service.clone(),
                                health: health.to_string(),
                            }
                            .into());
                        }
                        _ => {}
                    },
                    Err(e) => debug!(environment = %self.label, error = %e, "health poll failed"),
                }

                if Instant::now() >= deadline {
                    return Err(OrchestrationError::HealthTimeout {
                        services: order[idx..].to_vec(),
                        timeout: self.settings.health_timeout,
                    }
                    .into());
                }
                tokio::select! {
                    _ = cancel.cancelled() => return Err(OrchestrationError::Cancelled.into()),
                    _ = tokio::time::sleep(self.settings.poll_interval) => {}
                }
            }
            info!(environment = %self.label, service = %service, "service ready");
        }
        Ok(())
    }

    /// Stop the environment's containers, keeping volumes.
    ///
    /// Returns false when nothing was ever generated for this environment.
    pub async fn stop(&mut self) -> Result<bool> {
        let Some(project) = self.deployed_project()? else {
            return Ok(false);
        };
        self.runtime.down(&project, false).await?;
        if self.state == OrchestratorState::Running {
            self.transition(OrchestratorState::Idle)?;
        }
        info!(environment = %self.label, project = %project.name, "environment stopped");
        Ok(true)
    }

    /// Remove workloads, volumes, secrets, and every artifact of the
    /// environment. Requires the exact [`confirmation_token`].
    pub async fn wipe(&mut self, token: &str) -> Result<WipeReport> {
        self.transition(OrchestratorState::ConfirmPending)?;
        let expected = confirmation_token(self.label);
        if token != expected {
            self.transition(OrchestratorState::Idle)?;
            return Err(OrchestrationError::ConfirmationMismatch { expected }.into());
        }

        self.transition(OrchestratorState::Wiping)?;
        let result = self.wipe_resources().await;
        self.transition(OrchestratorState::Idle)?;
        result
    }

    /// Local removal always runs; a runtime failure is returned after it.
    async fn wipe_resources(&self) -> Result<WipeReport> {
        let mut report = WipeReport::default();
        let mut runtime_failure = None;

        if let Some(project) = self.deployed_project()? {
            match self.runtime.down(&project, true).await {
                Ok(()) => report.containers = true,
                Err(e) => {
                    warn!(
                        environment = %self.label,
                        project = %project.name,
                        error = %e,
                        "removing containers failed; removing local state anyway"
                    );
                    runtime_failure = Some(e);
                }
            }
        }
        report.manifest = remove_file_if_exists(&self.workspace.manifest_path(self.label))?;
        report.rendered = remove_dir_if_exists(&self.workspace.rendered_dir(self.label))?;
        report.store = self.workspace.store(self.label).wipe()?;

        info!(
            environment = %self.label,
            containers = report.containers,
            manifest = report.manifest,
            rendered = report.rendered,
            store = report.store,
            "environment wiped"
        );
        match runtime_failure {
            Some(e) => Err(e.into()),
            None => Ok(report),
        }
    }

    /// Project described by the manifest on disk, with whatever env files exist
    fn deployed_project(&self) -> Result<Option<ComposeProject>> {
        let manifest = self.workspace.manifest_path(self.label);
        let Some(contents) = read_if_exists(&manifest)? else {
            debug!(environment = %self.label, "no manifest on disk");
            return Ok(None);
        };
        let ManifestName { name } = serde_yaml::from_str(&contents)?;
        Ok(Some(ComposeProject {
            name,
            manifest,
            env_files: existing_env_files(&self.workspace.rendered_dir(self.label))?,
        }))
    }
}

/// Services in an order where dependencies come first
fn start_order(artifact: &ManifestArtifact) -> Vec<String> {
    DependencyGraph::from_edges(artifact.services.iter().map(|s| {
        (
            s.name.as_str(),
            s.depends_on.iter().map(|(dep, _)| dep.as_str()),
        )
    }))
    .start_order()
    .unwrap_or_else(|| artifact.services.iter().map(|s| s.name.clone()).collect())
}

fn existing_env_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::Common(keel_common::Error::read(dir, e))),
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "env"))
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockContainerRuntime, MockGpuProbe, ServiceHealth};
    use keel_common::schema::parse_schema;
    use std::collections::BTreeMap;

    const SCHEMA: &str = r#"
project: shop
services:
  - name: db
    image: postgres:16
    healthcheck:
      test: ["CMD-SHELL", "pg_isready"]
    environment:
      POSTGRES_PASSWORD: { secret: true, class: core-credential, shares: DB_PASSWORD }
  - name: api
    image: shop/api
    depends_on: [db]
    environment:
      DB_PASSWORD: { secret: true, class: core-credential }
  - name: trainer
    image: shop/trainer
    profiles: [gpu]
    resources: { gpus: 2 }
environments:
  production: {}
  gpu:
    profiles: [gpu]
"#;

    fn fast_settings() -> LaunchSettings {
        LaunchSettings {
            health_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(5),
            retry: RetryConfig {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                backoff_multiplier: 2.0,
            },
            strict: false,
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        workspace: Workspace,
        schema: Schema,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path().join("keel.yaml"), dir.path().join(".keel"));
        Fixture {
            _dir: dir,
            workspace,
            schema: parse_schema(SCHEMA, "test").unwrap(),
        }
    }

    fn orchestrator(
        fx: &Fixture,
        label: EnvironmentLabel,
        runtime: MockContainerRuntime,
        gpu: MockGpuProbe,
    ) -> Orchestrator {
        Orchestrator::new(fx.workspace.clone(), label, Arc::new(runtime), Arc::new(gpu))
            .with_settings(fast_settings())
    }

    fn all_ready() -> BTreeMap<String, ServiceHealth> {
        BTreeMap::from([
            ("db".to_string(), ServiceHealth::Healthy),
            ("api".to_string(), ServiceHealth::Running),
            ("trainer".to_string(), ServiceHealth::Running),
        ])
    }

    #[tokio::test]
    async fn test_start_reaches_running() {
        let fx = fixture();
        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_up()
            .withf(|p| p.name == "shop-production" && p.env_files.len() == 2)
            .times(1)
            .returning(|_| Ok(()));
        runtime
            .expect_service_health()
            .returning(|_| Ok(all_ready()));
        let mut orch = orchestrator(&fx, EnvironmentLabel::Production, runtime, MockGpuProbe::new());

        let artifact = orch.start(&fx.schema, &CancellationToken::new()).await.unwrap();
        assert_eq!(orch.state(), OrchestratorState::Running);
        assert_eq!(artifact.services.len(), 2);
        assert!(fx.workspace.manifest_path(EnvironmentLabel::Production).exists());
        assert!(fx
            .workspace
            .rendered_dir(EnvironmentLabel::Production)
            .join("api.env")
            .exists());
    }

    #[tokio::test]
    async fn test_waits_for_dependency_to_become_healthy() {
        let fx = fixture();
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_up().returning(|_| Ok(()));
        let mut polls = 0;
        runtime.expect_service_health().returning(move |_| {
            polls += 1;
            let db = if polls < 3 {
                ServiceHealth::Starting
            } else {
                ServiceHealth::Healthy
            };
            Ok(BTreeMap::from([
                ("db".to_string(), db),
                ("api".to_string(), ServiceHealth::Running),
            ]))
        });
        let mut orch = orchestrator(&fx, EnvironmentLabel::Production, runtime, MockGpuProbe::new());
        orch.start(&fx.schema, &CancellationToken::new()).await.unwrap();
        assert_eq!(orch.state(), OrchestratorState::Running);
    }

    #[tokio::test]
    async fn test_up_failure_is_retried_then_aborts_to_idle() {
        let fx = fixture();
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_up().times(2).returning(|_| {
            Err(RuntimeError::InvalidOutput {
                message: "daemon not running".into(),
            })
        });
        runtime
            .expect_down()
            .withf(|_, remove_volumes| !*remove_volumes)
            .times(1)
            .returning(|_, _| Ok(()));
        let mut orch = orchestrator(&fx, EnvironmentLabel::Production, runtime, MockGpuProbe::new());

        let err = orch.start(&fx.schema, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Orchestration(OrchestrationError::Launch { attempts: 2, .. })
        ));
        assert_eq!(orch.state(), OrchestratorState::Idle);
    }

    #[tokio::test]
    async fn test_health_timeout_names_pending_services() {
        let fx = fixture();
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_up().returning(|_| Ok(()));
        runtime.expect_service_health().returning(|_| {
            Ok(BTreeMap::from([("db".to_string(), ServiceHealth::Starting)]))
        });
        runtime.expect_down().times(1).returning(|_, _| Ok(()));
        let mut orch = orchestrator(&fx, EnvironmentLabel::Production, runtime, MockGpuProbe::new());

        let err = orch.start(&fx.schema, &CancellationToken::new()).await.unwrap_err();
        let Error::Orchestration(OrchestrationError::HealthTimeout { services, .. }) = err else {
            panic!("expected health timeout, got {err}");
        };
        assert_eq!(services, vec!["db", "api"]);
        assert_eq!(orch.state(), OrchestratorState::Idle);
    }

    #[tokio::test]
    async fn test_exited_service_fails_fast() {
        let fx = fixture();
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_up().returning(|_| Ok(()));
        runtime.expect_service_health().times(1).returning(|_| {
            Ok(BTreeMap::from([(
                "db".to_string(),
                ServiceHealth::Exited { code: 1 },
            )]))
        });
        runtime.expect_down().returning(|_, _| Ok(()));
        let mut orch = orchestrator(&fx, EnvironmentLabel::Production, runtime, MockGpuProbe::new());

        let err = orch.start(&fx.schema, &CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("exited with code 1"));
    }

    #[tokio::test]
    async fn test_cancelled_health_wait_returns_to_idle() {
        let fx = fixture();
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_up().returning(|_| Ok(()));
        runtime
            .expect_service_health()
            .returning(|_| Ok(BTreeMap::new()));
        runtime.expect_down().returning(|_, _| Ok(()));
        let mut orch = orchestrator(&fx, EnvironmentLabel::Production, runtime, MockGpuProbe::new());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = orch.start(&fx.schema, &cancel).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Orchestration(OrchestrationError::Cancelled)
        ));
        assert_eq!(orch.state(), OrchestratorState::Idle);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_up_retries() {
        let fx = fixture();
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_up().returning(|_| {
            Err(RuntimeError::InvalidOutput {
                message: "daemon not running".into(),
            })
        });
        runtime.expect_service_health().times(0);
        runtime.expect_down().returning(|_, _| Ok(()));
        let settings = LaunchSettings {
            retry: RetryConfig {
                max_attempts: 10,
                initial_delay: Duration::from_secs(60),
                max_delay: Duration::from_secs(60),
                backoff_multiplier: 1.0,
            },
            ..fast_settings()
        };
        let mut orch = orchestrator(&fx, EnvironmentLabel::Production, runtime, MockGpuProbe::new())
            .with_settings(settings);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = tokio::time::timeout(Duration::from_secs(5), orch.start(&fx.schema, &cancel))
            .await
            .expect("cancellation should stop the retry loop")
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Orchestration(OrchestrationError::Cancelled)
        ));
        assert_eq!(orch.state(), OrchestratorState::Idle);
    }

    #[tokio::test]
    async fn test_blocking_findings_never_launch() {
        let fx = fixture();
        let store = fx.workspace.store(EnvironmentLabel::Production);
        let engine = PolicyEngine::from_schema(&fx.schema);
        let policy = engine
            .policy_for_secret(EnvironmentLabel::Production, "DB_PASSWORD", "core-credential")
            .unwrap();
        store
            .import("DB_PASSWORD", zeroize::Zeroizing::new("changeme".to_string()), &policy)
            .unwrap();

        let mut runtime = MockContainerRuntime::new();
        runtime.expect_up().times(0);
        let mut orch = orchestrator(&fx, EnvironmentLabel::Production, runtime, MockGpuProbe::new());

        let err = orch.start(&fx.schema, &CancellationToken::new()).await.unwrap_err();
        let Error::Orchestration(OrchestrationError::ValidationFailed { report }) = err else {
            panic!("expected validation failure, got {err}");
        };
        assert!(report.is_blocking(false));
        assert_eq!(orch.state(), OrchestratorState::Idle);
    }

    #[tokio::test]
    async fn test_missing_overlay_aborts_before_writing() {
        let fx = fixture();
        let mut orch = orchestrator(
            &fx,
            EnvironmentLabel::Staging,
            MockContainerRuntime::new(),
            MockGpuProbe::new(),
        );
        let err = orch.start(&fx.schema, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Compile(_)));
        assert_eq!(orch.state(), OrchestratorState::Idle);
        assert!(!fx.workspace.manifest_path(EnvironmentLabel::Staging).exists());
    }

    #[tokio::test]
    async fn test_gpu_probe_consulted_for_reservations() {
        let fx = fixture();
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_up().returning(|_| Ok(()));
        runtime
            .expect_service_health()
            .returning(|_| Ok(all_ready()));
        let mut gpu = MockGpuProbe::new();
        gpu.expect_available_gpus().times(1).returning(|| Some(1));
        let mut orch = orchestrator(&fx, EnvironmentLabel::Gpu, runtime, gpu);
        orch.start(&fx.schema, &CancellationToken::new()).await.unwrap();
        assert_eq!(orch.state(), OrchestratorState::Running);
    }

    #[tokio::test]
    async fn test_wipe_requires_exact_token() {
        let fx = fixture();
        let manifest = fx.workspace.manifest_path(EnvironmentLabel::Production);
        let artifact = pipeline::compile_environment(&fx.schema, EnvironmentLabel::Production).unwrap();
        pipeline::write_manifest(&fx.workspace, &artifact).unwrap();

        let mut runtime = MockContainerRuntime::new();
        runtime.expect_down().times(0);
        let mut orch = orchestrator(&fx, EnvironmentLabel::Production, runtime, MockGpuProbe::new());

        let err = orch.wipe("wipe-staging").await.unwrap_err();
        assert!(err.to_string().contains("wipe-production"));
        assert_eq!(orch.state(), OrchestratorState::Idle);
        assert!(manifest.exists());
    }

    #[tokio::test]
    async fn test_wipe_removes_everything_and_is_idempotent() {
        let fx = fixture();
        let label = EnvironmentLabel::Production;
        let artifact = pipeline::compile_environment(&fx.schema, label).unwrap();
        let engine = PolicyEngine::from_schema(&fx.schema);
        pipeline::write_manifest(&fx.workspace, &artifact).unwrap();
        pipeline::ensure_secrets(&fx.workspace, &engine, &artifact).unwrap();
        pipeline::render_environment(&fx.workspace, &artifact).unwrap();

        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_down()
            .withf(|p, remove_volumes| {
                *remove_volumes && p.name == "shop-production" && p.env_files.len() == 2
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let mut orch = orchestrator(&fx, label, runtime, MockGpuProbe::new());

        let first = orch.wipe("wipe-production").await.unwrap();
        assert_eq!(
            first,
            WipeReport {
                containers: true,
                manifest: true,
                rendered: true,
                store: true
            }
        );
        assert!(!fx.workspace.manifest_path(label).exists());
        assert!(!fx.workspace.rendered_dir(label).exists());
        assert!(!fx.workspace.store(label).path().exists());

        let second = orch.wipe("wipe-production").await.unwrap();
        assert_eq!(second, WipeReport::default());
        assert_eq!(orch.state(), OrchestratorState::Idle);
    }

    #[tokio::test]
    async fn test_wipe_removes_local_state_when_runtime_fails() {
        let fx = fixture();
        let label = EnvironmentLabel::Production;
        let artifact = pipeline::compile_environment(&fx.schema, label).unwrap();
        let engine = PolicyEngine::from_schema(&fx.schema);
        pipeline::write_manifest(&fx.workspace, &artifact).unwrap();
        pipeline::ensure_secrets(&fx.workspace, &engine, &artifact).unwrap();

        let mut runtime = MockContainerRuntime::new();
        runtime.expect_down().times(1).returning(|_, _| {
            Err(RuntimeError::Failed {
                command: "docker compose down".into(),
                status: "exit status: 15".into(),
                stderr: "required variable DB_PASSWORD is missing a value".into(),
            })
        });
        let mut orch = orchestrator(&fx, label, runtime, MockGpuProbe::new());

        let err = orch.wipe("wipe-production").await.unwrap_err();
        assert!(matches!(err, Error::Runtime(RuntimeError::Failed { .. })));
        assert_eq!(orch.state(), OrchestratorState::Idle);
        assert!(!fx.workspace.manifest_path(label).exists());
        assert!(!fx.workspace.store(label).path().exists());

        let again = orch.wipe("wipe-production").await.unwrap();
        assert_eq!(again, WipeReport::default());
    }

    #[tokio::test]
    async fn test_wipe_leaves_other_environments_alone() {
        let fx = fixture();
        let engine = PolicyEngine::from_schema(&fx.schema);
        for label in [EnvironmentLabel::Production, EnvironmentLabel::Gpu] {
            let artifact = pipeline::compile_environment(&fx.schema, label).unwrap();
            pipeline::ensure_secrets(&fx.workspace, &engine, &artifact).unwrap();
        }
        let mut orch = orchestrator(
            &fx,
            EnvironmentLabel::Gpu,
            MockContainerRuntime::new(),
            MockGpuProbe::new(),
        );
        orch.wipe("wipe-gpu").await.unwrap();
        assert!(!fx.workspace.store(EnvironmentLabel::Gpu).path().exists());
        assert!(fx.workspace.store(EnvironmentLabel::Production).path().exists());
    }

    #[tokio::test]
    async fn test_stop_without_manifest_is_a_no_op() {
        let fx = fixture();
        let mut orch = orchestrator(
            &fx,
            EnvironmentLabel::Production,
            MockContainerRuntime::new(),
            MockGpuProbe::new(),
        );
        assert!(!orch.stop().await.unwrap());
    }

    #[test]
    fn test_start_order_puts_db_first() {
        let schema = parse_schema(SCHEMA, "test").unwrap();
        let artifact = pipeline::compile_environment(&schema, EnvironmentLabel::Production).unwrap();
        assert_eq!(start_order(&artifact), vec!["db", "api"]);
    }
}
