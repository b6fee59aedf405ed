//! `keel setup-secrets`, `keel rotate-secrets`, `keel set-secret`

use std::io::Read;

use clap::Args;
use zeroize::Zeroizing;

use keel_common::EnvironmentLabel;
use keel_compiler::ManifestArtifact;
use keel_secrets::{PolicyEngine, RenderError};

use crate::commands::EnvironmentArgs;
use crate::config::Workspace;
use crate::{pipeline, Error, Result};

#[derive(Args, Debug)]
pub struct RotateArgs {
    /// Environment whose secrets to rotate
    #[arg(short, long)]
    pub environment: EnvironmentLabel,

    /// Rotate only this logical secret
    #[arg(long)]
    pub variable: Option<String>,
}

#[derive(Args, Debug)]
pub struct SetSecretArgs {
    /// Environment to store the value in
    #[arg(short, long)]
    pub environment: EnvironmentLabel,

    /// Logical secret or unset variable name
    #[arg(long)]
    pub name: String,
}

/// Generate every missing or due secret, then render the env files
pub fn setup(workspace: &Workspace, args: EnvironmentArgs) -> Result<()> {
    let schema = workspace.load_schema()?;
    let artifact = pipeline::compile_environment(&schema, args.environment)?;
    let engine = PolicyEngine::from_schema(&schema);

    for (name, action) in pipeline::ensure_secrets(workspace, &engine, &artifact)? {
        println!("{}: {}", name, action);
    }
    render_or_explain(workspace, &artifact)
}

/// Force new versions, keeping the previous ones for their grace window
pub fn rotate(workspace: &Workspace, args: RotateArgs) -> Result<()> {
    let schema = workspace.load_schema()?;
    let artifact = pipeline::compile_environment(&schema, args.environment)?;
    let engine = PolicyEngine::from_schema(&schema);
    let store = workspace.store(args.environment);

    let mut policies = pipeline::secret_policies(&engine, &artifact)?;
    if let Some(name) = &args.variable {
        policies.retain(|(n, _)| n == name);
        match policies.first() {
            None => {
                return Err(Error::validation(format!(
                    "'{}' is not a secret of environment '{}'",
                    name, args.environment
                )))
            }
            Some((_, policy)) if !policy.generate => {
                return Err(Error::validation(format!(
                    "'{}' is operator-supplied; replace it with `keel set-secret`",
                    name
                )))
            }
            Some(_) => {}
        }
    }

    for (name, policy) in &policies {
        if !policy.generate {
            println!("{}: skipped (operator-supplied)", name);
            continue;
        }
        let entry = store.rotate(name, policy)?;
        println!("{}: rotated to version {}", name, entry.version);
    }
    render_or_explain(workspace, &artifact)
}

/// Store a value read from stdin
pub fn set(workspace: &Workspace, args: SetSecretArgs) -> Result<()> {
    let schema = workspace.load_schema()?;
    let artifact = pipeline::compile_environment(&schema, args.environment)?;
    let engine = PolicyEngine::from_schema(&schema);
    let policy = pipeline::policy_for_name(&engine, &artifact, &args.name)?;

    let mut raw = Zeroizing::new(String::new());
    std::io::stdin().read_to_string(&mut raw)?;
    let value = Zeroizing::new(
        raw.strip_suffix('\n')
            .map(|v| v.strip_suffix('\r').unwrap_or(v))
            .unwrap_or(raw.as_str())
            .to_string(),
    );

    let entry = workspace
        .store(args.environment)
        .import(&args.name, value, &policy)?;
    println!(
        "{}: stored version {}; run `keel render --environment {}` to apply",
        args.name, entry.version, args.environment
    );
    Ok(())
}

fn render_or_explain(workspace: &Workspace, artifact: &ManifestArtifact) -> Result<()> {
    match pipeline::render_environment(workspace, artifact) {
        Ok(report) => {
            println!(
                "rendered {} env file(s) into {}",
                report.written.len(),
                workspace.rendered_dir(artifact.environment).display()
            );
            Ok(())
        }
        Err(Error::Render(RenderError::Unresolved {
            environment,
            missing,
        })) => {
            for m in &missing {
                println!("unresolved: {}", m);
            }
            Err(Error::validation(format!(
                "{} required variable(s) in {} have no value; supply them with `keel set-secret`",
                missing.len(),
                environment
            )))
        }
        Err(e) => Err(e),
    }
}
