//! `keel validate-schema`

use crate::config::Workspace;
use crate::Result;

pub fn run(workspace: &Workspace) -> Result<()> {
    let schema = workspace.load_schema()?;
    let environments: Vec<&str> = schema.environments.keys().map(|l| l.as_str()).collect();
    println!(
        "{} is valid: project '{}', {} service(s), environments: {}",
        workspace.schema_path().display(),
        schema.project,
        schema.services.len(),
        if environments.is_empty() {
            "none".to_string()
        } else {
            environments.join(", ")
        }
    );
    Ok(())
}
