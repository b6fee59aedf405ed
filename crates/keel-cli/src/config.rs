//! Workspace layout under the state directory.
//!
//! Every persisted path is scoped by environment:
//! - `<state>/manifests/docker-compose.<env>.yml`: compiled manifest
//! - `<state>/secrets/<env>.json`: secret store (owner-only), lock `<env>.lock`
//! - `<state>/rendered/<env>/<service>.env`: rendered env files and `.digests.json`
//!
//! Paths come from `--schema`/`KEEL_SCHEMA` and `--state-dir`/`KEEL_STATE_DIR`.

use std::path::{Path, PathBuf};

use keel_common::schema::{load_schema, Schema};
use keel_common::EnvironmentLabel;
use keel_compiler::ManifestArtifact;
use keel_secrets::renderer::env_file_name;
use keel_secrets::SecretStore;

use crate::runtime::ComposeProject;
use crate::Result;

const MANIFESTS_DIR: &str = "manifests";
const SECRETS_DIR: &str = "secrets";
const RENDERED_DIR: &str = "rendered";

/// Resolved locations of the schema and all environment-scoped state
#[derive(Clone, Debug)]
pub struct Workspace {
    schema_path: PathBuf,
    state_dir: PathBuf,
}

impl Workspace {
    pub fn new(schema_path: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            schema_path: schema_path.into(),
            state_dir: state_dir.into(),
        }
    }

    pub fn schema_path(&self) -> &Path {
        &self.schema_path
    }

    /// Load and validate the schema
    pub fn load_schema(&self) -> Result<Schema> {
        Ok(load_schema(&self.schema_path)?)
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.state_dir.join(MANIFESTS_DIR)
    }

    /// Compiled manifest for one environment
    pub fn manifest_path(&self, label: EnvironmentLabel) -> PathBuf {
        self.manifests_dir()
            .join(format!("docker-compose.{}.yml", label))
    }

    pub fn secrets_dir(&self) -> PathBuf {
        self.state_dir.join(SECRETS_DIR)
    }

    /// Secret store for one environment
    pub fn store(&self, label: EnvironmentLabel) -> SecretStore {
        SecretStore::new(self.secrets_dir(), label)
    }

    /// Directory holding one environment's rendered env files
    pub fn rendered_dir(&self, label: EnvironmentLabel) -> PathBuf {
        self.state_dir.join(RENDERED_DIR).join(label.as_str())
    }

    /// Rendered env file paths for every service of `artifact`
    pub fn env_files(&self, artifact: &ManifestArtifact) -> Vec<PathBuf> {
        let dir = self.rendered_dir(artifact.environment);
        artifact
            .services
            .iter()
            .map(|s| dir.join(env_file_name(&s.name)))
            .collect()
    }

    /// Everything the container runtime needs to address this environment
    pub fn compose_project(&self, artifact: &ManifestArtifact) -> ComposeProject {
        ComposeProject {
            name: artifact.project_name(),
            manifest: self.manifest_path(artifact.environment),
            env_files: self.env_files(artifact),
        }
    }
}
