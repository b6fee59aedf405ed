//! `keel status`

use keel_secrets::renderer::{env_file_name, hand_edited};
use keel_secrets::PolicyEngine;

use crate::commands::EnvironmentArgs;
use crate::config::Workspace;
use crate::{pipeline, Result};

pub fn run(workspace: &Workspace, args: EnvironmentArgs) -> Result<()> {
    let label = args.environment;
    let schema = workspace.load_schema()?;
    let artifact = pipeline::compile_environment(&schema, label)?;
    let engine = PolicyEngine::from_schema(&schema);

    println!("environment: {} (project {})", label, artifact.project_name());
    match pipeline::manifest_drift(workspace, &artifact)? {
        Some(cause) => println!("manifest: {}", cause),
        None => println!("manifest: up to date"),
    }

    let store = workspace.store(label);
    let entries = store.load_all()?;
    let now = store.now();
    println!("secrets:");
    for (name, policy) in pipeline::secret_policies(&engine, &artifact)? {
        let line = match entries.get(&name) {
            None if policy.generate => "missing; run `keel setup-secrets`".to_string(),
            None => "awaiting operator; run `keel set-secret`".to_string(),
            Some(entry) => {
                let due = match entry.rotation_due {
                    Some(due) if entry.is_due(now) => format!("rotation overdue since {}", due),
                    Some(due) => format!("rotation due {}", due),
                    None => "never rotates".to_string(),
                };
                let grace = entry
                    .previous
                    .as_ref()
                    .filter(|p| now <= p.valid_until)
                    .map(|p| format!(", version {} valid until {}", p.version, p.valid_until))
                    .unwrap_or_default();
                format!("version {}, {}{}", entry.version, due, grace)
            }
        };
        println!("  {}: {}", name, line);
    }

    let dir = workspace.rendered_dir(label);
    let services: Vec<&str> = artifact.services.iter().map(|s| s.name.as_str()).collect();
    let edited = hand_edited(&dir, &services)?;
    println!("rendered files ({}):", dir.display());
    for service in &services {
        let state = if !dir.join(env_file_name(service)).exists() {
            "missing"
        } else if edited.iter().any(|e| e == service) {
            "edited by hand"
        } else {
            "present"
        };
        println!("  {}: {}", env_file_name(service), state);
    }
    Ok(())
}
