//! `keel validate-credentials`

use clap::Args;

use keel_common::EnvironmentLabel;
use keel_secrets::PolicyEngine;

use crate::commands::print_report;
use crate::config::Workspace;
use crate::{pipeline, Error, Result};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Environment to validate
    #[arg(short, long)]
    pub environment: EnvironmentLabel,

    /// Treat warnings as blocking
    #[arg(long)]
    pub strict: bool,
}

pub fn run(workspace: &Workspace, args: ValidateArgs) -> Result<()> {
    let schema = workspace.load_schema()?;
    let artifact = pipeline::compile_environment(&schema, args.environment)?;
    let engine = PolicyEngine::from_schema(&schema);
    let report = pipeline::validate_environment(workspace, &engine, &artifact)?;
    print_report(&report);

    if report.is_blocking(args.strict) {
        let blocking = if args.strict {
            report.findings.len()
        } else {
            report.errors().count()
        };
        return Err(Error::validation(format!(
            "{} blocking finding(s) in {}",
            blocking, args.environment
        )));
    }
    Ok(())
}
