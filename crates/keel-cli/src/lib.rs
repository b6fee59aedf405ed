//! keel CLI library

pub mod commands;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod runtime;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::EnvironmentArgs;
use config::Workspace;

/// keel - one schema, many environments, consistent secrets
#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Schema describing every service and environment
    #[arg(long, global = true, env = "KEEL_SCHEMA", default_value = "keel.yaml")]
    pub schema: PathBuf,

    /// Directory holding manifests, secret stores, and rendered env files
    #[arg(long, global = true, env = "KEEL_STATE_DIR", default_value = ".keel")]
    pub state_dir: PathBuf,

    /// Program providing the `compose` subcommand
    #[arg(long, global = true, env = "KEEL_RUNTIME", default_value = "docker")]
    pub runtime: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check the schema and list every violation
    ValidateSchema,
    /// Compile manifests for one environment, or every declared one
    GenerateCompose(commands::generate::GenerateArgs),
    /// Generate missing secrets and render env files
    SetupSecrets(EnvironmentArgs),
    /// Check rendered credentials against the environment's policy
    ValidateCredentials(commands::validate::ValidateArgs),
    /// Compile, render, validate, launch, and wait for health
    Start(commands::start::StartArgs),
    /// Stop containers, keeping volumes and secrets
    Stop(EnvironmentArgs),
    /// Destroy workloads, volumes, secrets, and artifacts of an environment
    Wipe(commands::wipe::WipeArgs),
    /// Re-render env files from the secret store
    Render(EnvironmentArgs),
    /// Generate new versions of secrets now
    RotateSecrets(commands::secrets::RotateArgs),
    /// Store an operator-supplied value read from stdin
    SetSecret(commands::secrets::SetSecretArgs),
    /// Show manifest drift, secret versions, and rendered files
    Status(EnvironmentArgs),
}

impl Cli {
    fn workspace(&self) -> Workspace {
        Workspace::new(&self.schema, &self.state_dir)
    }

    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let workspace = self.workspace();
        match self.command {
            Commands::ValidateSchema => commands::validate_schema::run(&workspace),
            Commands::GenerateCompose(args) => commands::generate::run(&workspace, args).await,
            Commands::SetupSecrets(args) => commands::secrets::setup(&workspace, args),
            Commands::ValidateCredentials(args) => commands::validate::run(&workspace, args),
            Commands::Start(args) => commands::start::start(&workspace, &self.runtime, args).await,
            Commands::Stop(args) => commands::start::stop(&workspace, &self.runtime, args).await,
            Commands::Wipe(args) => commands::wipe::run(&workspace, &self.runtime, args).await,
            Commands::Render(args) => commands::render::run(&workspace, args),
            Commands::RotateSecrets(args) => commands::secrets::rotate(&workspace, args),
            Commands::SetSecret(args) => commands::secrets::set(&workspace, args),
            Commands::Status(args) => commands::status::run(&workspace, args),
        }
    }
}
