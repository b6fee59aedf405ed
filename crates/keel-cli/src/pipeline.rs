//! Pipeline stages shared by the commands and the orchestrator
//!
//! Each stage takes the environment label explicitly and touches only that
//! environment's state.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use keel_common::fs::{read_if_exists, write_atomic};
use keel_common::schema::Schema;
use keel_common::EnvironmentLabel;
use keel_compiler::{compile, to_compose_yaml, ManifestArtifact, VariableBinding};
use keel_secrets::renderer::{hand_edited, read_rendered};
use keel_secrets::{
    render, render_partial, write_rendered, CredentialValidator, EnsureAction, Finding,
    PolicyEngine, SecretPolicy, ValidationReport, VariableClass, WriteReport,
};

use crate::config::Workspace;
use crate::{Error, Result};

/// Compile one environment
pub fn compile_environment(schema: &Schema, label: EnvironmentLabel) -> Result<ManifestArtifact> {
    let artifact = compile(schema, label)?;
    debug!(
        environment = %label,
        services = artifact.services.len(),
        "compiled manifest"
    );
    Ok(artifact)
}

/// Write the compiled manifest atomically; returns its path
pub fn write_manifest(workspace: &Workspace, artifact: &ManifestArtifact) -> Result<PathBuf> {
    let path = workspace.manifest_path(artifact.environment);
    let yaml = to_compose_yaml(artifact)?;
    write_atomic(&path, yaml.as_bytes(), None)?;
    info!(environment = %artifact.environment, path = %path.display(), "wrote manifest");
    Ok(path)
}

/// Policy for every logical secret the manifest needs
pub fn secret_policies(
    engine: &PolicyEngine,
    artifact: &ManifestArtifact,
) -> Result<Vec<(String, SecretPolicy)>> {
    artifact
        .secret_requirements()
        .into_iter()
        .map(|r| {
            let policy = engine.policy_for_secret(artifact.environment, &r.name, &r.class)?;
            Ok((r.name, policy))
        })
        .collect()
}

/// Generate every missing or due secret of `artifact`
pub fn ensure_secrets(
    workspace: &Workspace,
    engine: &PolicyEngine,
    artifact: &ManifestArtifact,
) -> Result<Vec<(String, EnsureAction)>> {
    let policies = secret_policies(engine, artifact)?;
    let store = workspace.store(artifact.environment);
    let actions = store.ensure_all(policies.iter().map(|(n, p)| (n.as_str(), p)))?;

    for (name, action) in &actions {
        match action {
            EnsureAction::Created | EnsureAction::Rotated => {
                info!(environment = %artifact.environment, secret = %name, %action, "secret ready")
            }
            EnsureAction::AwaitingOperator | EnsureAction::RotationDue => warn!(
                environment = %artifact.environment,
                secret = %name,
                %action,
                "set it with `keel set-secret --environment {} --name {}`",
                artifact.environment,
                name
            ),
            EnsureAction::Unchanged => {}
        }
    }
    Ok(actions)
}

/// Policy used to store an operator-supplied value under `name`.
///
/// Logical secrets use their own policy. Unset non-secret variables are
/// stored like operator-supplied keys: never generated, never due.
pub fn policy_for_name(
    engine: &PolicyEngine,
    artifact: &ManifestArtifact,
    name: &str,
) -> Result<SecretPolicy> {
    if let Some(requirement) = artifact
        .secret_requirements()
        .into_iter()
        .find(|r| r.name == name)
    {
        return Ok(engine.policy_for_secret(artifact.environment, name, &requirement.class)?);
    }
    let declared_unset = artifact
        .services
        .iter()
        .any(|s| matches!(s.variables.get(name), Some(VariableBinding::Unset { .. })));
    if declared_unset {
        return Ok(engine.policy_for(artifact.environment, VariableClass::ExternalApiKey.as_str())?);
    }
    Err(Error::validation(format!(
        "'{}' is neither a secret nor an unset variable in environment '{}'",
        name, artifact.environment
    )))
}

/// Render every service's env file from the store and write the set
pub fn render_environment(workspace: &Workspace, artifact: &ManifestArtifact) -> Result<WriteReport> {
    let store = workspace.store(artifact.environment);
    let entries = store.load_all()?;
    let files = render(artifact, &entries)?;
    let report = write_rendered(
        &workspace.rendered_dir(artifact.environment),
        &files,
        store.now(),
    )?;
    for backup in &report.backups {
        warn!(
            environment = %artifact.environment,
            backup = %backup.display(),
            "hand-edited env file backed up before replacement"
        );
    }
    Ok(report)
}

/// Validate the rendered set of one environment.
///
/// When nothing has been rendered yet the set is rendered in memory; an
/// unresolved required variable then becomes an `unresolved` finding.
pub fn validate_environment(
    workspace: &Workspace,
    engine: &PolicyEngine,
    artifact: &ManifestArtifact,
) -> Result<ValidationReport> {
    let label = artifact.environment;
    let store = workspace.store(label);
    let entries = store.load_all()?;
    let rendered_dir = workspace.rendered_dir(label);
    let validator = CredentialValidator::new(engine, artifact).with_store(&entries, store.now());

    let mut report = match read_rendered(&rendered_dir, artifact)? {
        Some(files) => validator.validate(&files)?,
        None => {
            debug!(environment = %label, "env files not rendered yet; rendering in memory");
            let (files, missing) = render_partial(artifact, &entries);
            if !missing.is_empty() {
                debug!(environment = %label, unresolved = missing.len(), "validating a partial render");
            }
            validator.validate(&files)?
        }
    };

    let services: Vec<&str> = artifact.services.iter().map(|s| s.name.as_str()).collect();
    for service in hand_edited(&rendered_dir, &services)? {
        report.push(Finding::hand_edited(label, &service));
    }
    if let Some(cause) = manifest_drift(workspace, artifact)? {
        report.push(Finding::manifest_drift(label, cause));
    }
    Ok(report)
}

/// Why the manifest on disk does not match a fresh compile, if it does not
pub fn manifest_drift(workspace: &Workspace, artifact: &ManifestArtifact) -> Result<Option<String>> {
    let path = workspace.manifest_path(artifact.environment);
    let fresh = to_compose_yaml(artifact)?;
    Ok(match read_if_exists(&path)? {
        None => Some(format!(
            "manifest {} has not been generated; run `keel generate-compose --environment {}`",
            path.display(),
            artifact.environment
        )),
        Some(on_disk) if on_disk != fresh => Some(format!(
            "manifest {} differs from a fresh compile; run `keel generate-compose --environment {}`",
            path.display(),
            artifact.environment
        )),
        Some(_) => None,
    })
}
