//! CLI commands

use clap::Args;

use keel_common::EnvironmentLabel;
use keel_secrets::ValidationReport;

pub mod generate;
pub mod render;
pub mod secrets;
pub mod start;
pub mod status;
pub mod validate;
pub mod validate_schema;
pub mod wipe;

/// Every command that touches state names its environment explicitly
#[derive(Args, Debug, Clone)]
pub struct EnvironmentArgs {
    /// Environment label (development, testing, staging, production, gpu, monitoring)
    #[arg(short, long)]
    pub environment: EnvironmentLabel,
}

/// Print a report to stdout, errors first
pub fn print_report(report: &ValidationReport) {
    println!(
        "{}: {} error(s), {} warning(s)",
        report.environment,
        report.errors().count(),
        report.warnings().count()
    );
    for finding in report.errors().chain(report.warnings()) {
        println!("  {}", finding);
    }
}
