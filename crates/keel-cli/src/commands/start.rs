//! `keel start` and `keel stop`

use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use keel_common::retry::RetryConfig;
use keel_common::EnvironmentLabel;

use crate::commands::EnvironmentArgs;
use crate::config::Workspace;
use crate::orchestrator::{LaunchSettings, Orchestrator};
use crate::runtime::{ComposeRuntime, NvidiaSmiProbe};
use crate::Result;

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Environment to launch
    #[arg(short, long)]
    pub environment: EnvironmentLabel,

    /// Seconds to wait for every service to become ready
    #[arg(long, default_value_t = 120)]
    pub health_timeout: u64,

    /// Seconds between health polls
    #[arg(long, default_value_t = 2)]
    pub poll_interval: u64,

    /// Attempts at bringing the project up before giving up
    #[arg(long, default_value_t = 3)]
    pub launch_attempts: u32,

    /// Treat validation warnings as blocking
    #[arg(long)]
    pub strict: bool,
}

fn orchestrator(workspace: &Workspace, runtime: &str, label: EnvironmentLabel) -> Orchestrator {
    Orchestrator::new(
        workspace.clone(),
        label,
        Arc::new(ComposeRuntime::new(runtime)),
        Arc::new(NvidiaSmiProbe),
    )
}

pub async fn start(workspace: &Workspace, runtime: &str, args: StartArgs) -> Result<()> {
    let schema = workspace.load_schema()?;
    let settings = LaunchSettings {
        health_timeout: Duration::from_secs(args.health_timeout),
        poll_interval: Duration::from_secs(args.poll_interval),
        retry: RetryConfig::with_max_attempts(args.launch_attempts),
        strict: args.strict,
    };
    let mut orchestrator =
        orchestrator(workspace, runtime, args.environment).with_settings(settings);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling launch");
            on_interrupt.cancel();
        }
    });

    let result = orchestrator.start(&schema, &cancel).await;
    watcher.abort();
    let artifact = result?;

    println!(
        "{} is running ({} service(s))",
        artifact.project_name(),
        artifact.services.len()
    );
    Ok(())
}

pub async fn stop(workspace: &Workspace, runtime: &str, args: EnvironmentArgs) -> Result<()> {
    let mut orchestrator = orchestrator(workspace, runtime, args.environment);
    if orchestrator.stop().await? {
        println!("{} stopped", args.environment);
    } else {
        println!("{} has no manifest; nothing to stop", args.environment);
    }
    Ok(())
}
