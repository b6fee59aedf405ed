//! `keel render`

use crate::commands::EnvironmentArgs;
use crate::config::Workspace;
use crate::{pipeline, Result};

pub fn run(workspace: &Workspace, args: EnvironmentArgs) -> Result<()> {
    let schema = workspace.load_schema()?;
    let artifact = pipeline::compile_environment(&schema, args.environment)?;
    let report = pipeline::render_environment(workspace, &artifact)?;
    for path in &report.written {
        println!("rendered {}", path.display());
    }
    for path in &report.backups {
        println!("backed up hand-edited file to {}", path.display());
    }
    Ok(())
}
