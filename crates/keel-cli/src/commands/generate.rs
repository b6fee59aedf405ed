//! `keel generate-compose`
//!
//! With `--environment`, compiles that one environment. Without it, compiles
//! every environment the schema declares concurrently; nothing is written
//! unless all of them compile.

use std::sync::Arc;

use clap::Args;

use keel_common::EnvironmentLabel;
use keel_compiler::compile_all;

use crate::config::Workspace;
use crate::pipeline;
use crate::{Error, Result};

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Environment to compile (default: every declared environment)
    #[arg(short, long)]
    pub environment: Option<EnvironmentLabel>,
}

pub async fn run(workspace: &Workspace, args: GenerateArgs) -> Result<()> {
    let schema = workspace.load_schema()?;

    if let Some(label) = args.environment {
        let artifact = pipeline::compile_environment(&schema, label)?;
        let path = pipeline::write_manifest(workspace, &artifact)?;
        println!("{}: {}", label, path.display());
        return Ok(());
    }

    let results = compile_all(Arc::new(schema)).await;
    if results.is_empty() {
        return Err(Error::validation("schema declares no environments"));
    }

    let mut artifacts = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for (_, result) in results {
        match result {
            Ok(artifact) => artifacts.push(artifact),
            Err(e) => failures.push(e.to_string()),
        }
    }
    if !failures.is_empty() {
        return Err(Error::command_failed(format!(
            "{} environment(s) failed to compile; no manifest written\n{}",
            failures.len(),
            failures.join("\n")
        )));
    }

    for artifact in &artifacts {
        let path = pipeline::write_manifest(workspace, artifact)?;
        println!("{}: {}", artifact.environment, path.display());
    }
    Ok(())
}
