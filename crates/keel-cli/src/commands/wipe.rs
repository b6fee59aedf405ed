//! `keel wipe`
//!
//! Destroys an environment's containers, volumes, secret store, manifest,
//! and rendered files. Requires `--confirm wipe-<environment>`.

use std::sync::Arc;

use clap::Args;

use keel_common::EnvironmentLabel;

use crate::config::Workspace;
use crate::orchestrator::Orchestrator;
use crate::runtime::{ComposeRuntime, NvidiaSmiProbe};
use crate::Result;

#[derive(Args, Debug)]
pub struct WipeArgs {
    /// Environment to destroy
    #[arg(short, long)]
    pub environment: EnvironmentLabel,

    /// Confirmation token, `wipe-<environment>`
    #[arg(long)]
    pub confirm: String,
}

pub async fn run(workspace: &Workspace, runtime: &str, args: WipeArgs) -> Result<()> {
    let mut orchestrator = Orchestrator::new(
        workspace.clone(),
        args.environment,
        Arc::new(ComposeRuntime::new(runtime)),
        Arc::new(NvidiaSmiProbe),
    );
    let report = orchestrator.wipe(&args.confirm).await?;

    let describe = |removed: bool| if removed { "removed" } else { "absent" };
    println!("{} wiped", args.environment);
    println!("  containers and volumes: {}", describe(report.containers));
    println!("  manifest: {}", describe(report.manifest));
    println!("  rendered files: {}", describe(report.rendered));
    println!("  secret store: {}", describe(report.store));
    Ok(())
}
