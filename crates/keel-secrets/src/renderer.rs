//! Template Renderer
//!
//! Resolves every variable of every compiled service to a value and writes
//! one env file per service:
//!
//! - secret bindings take the store value of their logical secret
//! - literal bindings take the compiled literal
//! - unset non-secret bindings take an operator-supplied store value
//!
//! Resolution happens for all services before anything is written, so an
//! unresolved required variable leaves the previous files untouched.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use keel_common::fs::{
    ensure_private_dir, read_if_exists, sha256_hex, write_atomic, PRIVATE_FILE_MODE,
};
use keel_common::EnvironmentLabel;
use keel_compiler::{ManifestArtifact, VariableBinding};

use crate::error::{RenderError, UnresolvedVariable};
use crate::store::SecretEntry;

/// Digest record file name inside the rendered directory
pub const DIGEST_FILE: &str = ".digests.json";

/// Resolved variables for one service. `Debug` never prints values.
#[derive(Clone, PartialEq, Eq)]
pub struct RenderedEnvironmentFile {
    /// Environment rendered for
    pub environment: EnvironmentLabel,
    /// Service the file belongs to
    pub service: String,
    /// Variable values keyed by name
    pub values: BTreeMap<String, Zeroizing<String>>,
}

impl fmt::Debug for RenderedEnvironmentFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderedEnvironmentFile")
            .field("environment", &self.environment)
            .field("service", &self.service)
            .field("variables", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RenderedEnvironmentFile {
    /// File name within the rendered directory
    pub fn file_name(&self) -> String {
        env_file_name(&self.service)
    }

    /// Env file contents: a header comment, then sorted `KEY=VALUE` lines
    pub fn to_env_string(&self) -> Zeroizing<String> {
        let mut out = Zeroizing::new(format!(
            "# Rendered by keel for environment {}, service {}.\n\
             # Hand edits are backed up and replaced on the next render.\n",
            self.environment, self.service
        ));
        for (key, value) in &self.values {
            out.push_str(key);
            out.push('=');
            out.push_str(&quote_value(value));
            out.push('\n');
        }
        out
    }
}

/// `<service>.env`
pub fn env_file_name(service: &str) -> String {
    format!("{}.env", service)
}

/// Resolve every variable of `artifact`.
///
/// `entries` are the store entries for the artifact's environment. Fails
/// listing every unresolved required variable; optional ones are omitted.
pub fn render(
    artifact: &ManifestArtifact,
    entries: &BTreeMap<String, SecretEntry>,
) -> Result<Vec<RenderedEnvironmentFile>, RenderError> {
    let (files, missing) = render_partial(artifact, entries);
    if !missing.is_empty() {
        return Err(RenderError::Unresolved {
            environment: artifact.environment,
            missing,
        });
    }
    Ok(files)
}

/// Resolve what can be resolved. Returns the files with every value that has
/// one, plus the required variables that do not. Never written to disk.
pub fn render_partial(
    artifact: &ManifestArtifact,
    entries: &BTreeMap<String, SecretEntry>,
) -> (Vec<RenderedEnvironmentFile>, Vec<UnresolvedVariable>) {
    let mut missing = Vec::new();
    let mut files = Vec::with_capacity(artifact.services.len());

    for service in &artifact.services {
        let mut values = BTreeMap::new();
        for (variable, binding) in &service.variables {
            let (value, required, secret) = match binding {
                VariableBinding::Literal { value } => {
                    (Some(Zeroizing::new(value.clone())), true, None)
                }
                VariableBinding::Secret {
                    logical, required, ..
                } => (stored_value(entries, logical), *required, Some(logical)),
                VariableBinding::Unset { required } => {
                    (stored_value(entries, variable), *required, None)
                }
            };
            match value {
                Some(value) => {
                    values.insert(variable.clone(), value);
                }
                None if required => missing.push(UnresolvedVariable {
                    service: service.name.clone(),
                    variable: variable.clone(),
                    secret: secret.cloned(),
                }),
                None => debug!(
                    environment = %artifact.environment,
                    service = %service.name,
                    variable = %variable,
                    "optional variable has no value"
                ),
            }
        }
        files.push(RenderedEnvironmentFile {
            environment: artifact.environment,
            service: service.name.clone(),
            values,
        });
    }
    (files, missing)
}

/// A stored value; empty values count as absent
fn stored_value(entries: &BTreeMap<String, SecretEntry>, name: &str) -> Option<Zeroizing<String>> {
    entries
        .get(name)
        .filter(|e| !e.value.is_empty())
        .map(|e| e.value.clone())
}

/// Result of writing a rendered set
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Files written
    pub written: Vec<PathBuf>,
    /// Backups of hand-edited files
    pub backups: Vec<PathBuf>,
}

/// Write rendered files into `dir`, backing up any hand-edited file first.
///
/// A file is hand-edited when its content no longer matches the digest
/// recorded at the last render, or when no digest was ever recorded.
pub fn write_rendered(
    dir: &Path,
    files: &[RenderedEnvironmentFile],
    now: DateTime<Utc>,
) -> Result<WriteReport, RenderError> {
    ensure_private_dir(dir)?;
    let mut digests = read_digests(dir)?;
    let mut report = WriteReport::default();

    for file in files {
        let path = dir.join(file.file_name());
        let contents = file.to_env_string();
        let digest = sha256_hex(contents.as_bytes());

        if let Some(existing) = read_if_exists(&path)?.map(Zeroizing::new) {
            let existing_digest = sha256_hex(existing.as_bytes());
            let recorded = digests.get(&file.service);
            if existing_digest != digest && recorded != Some(&existing_digest) {
                let backup = dir.join(format!(
                    "{}.bak-{}",
                    file.file_name(),
                    now.format("%Y%m%dT%H%M%SZ")
                ));
                write_atomic(&backup, existing.as_bytes(), Some(PRIVATE_FILE_MODE))?;
                warn!(
                    environment = %file.environment,
                    service = %file.service,
                    backup = %backup.display(),
                    "rendered file was edited by hand; backed up before replacing"
                );
                report.backups.push(backup);
            }
        }

        write_atomic(&path, contents.as_bytes(), Some(PRIVATE_FILE_MODE))?;
        digests.insert(file.service.clone(), digest);
        report.written.push(path);
    }

    write_digests(dir, &digests)?;
    info!(
        dir = %dir.display(),
        files = report.written.len(),
        backups = report.backups.len(),
        "rendered environment files"
    );
    Ok(report)
}

/// Services whose file on disk differs from its recorded digest
pub fn hand_edited(dir: &Path, services: &[&str]) -> Result<Vec<String>, RenderError> {
    let digests = read_digests(dir)?;
    let mut edited = Vec::new();
    for service in services {
        let Some(recorded) = digests.get(*service) else {
            continue;
        };
        if let Some(contents) = read_if_exists(&dir.join(env_file_name(service)))?.map(Zeroizing::new) {
            if sha256_hex(contents.as_bytes()) != *recorded {
                edited.push(service.to_string());
            }
        }
    }
    Ok(edited)
}

/// Read back the rendered set for `artifact`.
///
/// Returns `None` when any service's file is missing (not yet rendered).
pub fn read_rendered(
    dir: &Path,
    artifact: &ManifestArtifact,
) -> Result<Option<Vec<RenderedEnvironmentFile>>, RenderError> {
    let mut files = Vec::with_capacity(artifact.services.len());
    for service in &artifact.services {
        let path = dir.join(env_file_name(&service.name));
        let Some(contents) = read_if_exists(&path)?.map(Zeroizing::new) else {
            return Ok(None);
        };
        let values = parse_env_file(&contents).map_err(|message| RenderError::Parse {
            path: path.clone(),
            message,
        })?;
        files.push(RenderedEnvironmentFile {
            environment: artifact.environment,
            service: service.name.clone(),
            values,
        });
    }
    Ok(Some(files))
}

fn read_digests(dir: &Path) -> Result<BTreeMap<String, String>, RenderError> {
    let path = dir.join(DIGEST_FILE);
    match read_if_exists(&path)? {
        Some(contents) => serde_json::from_str(&contents).map_err(|e| RenderError::CorruptDigests {
            path,
            message: e.to_string(),
        }),
        None => Ok(BTreeMap::new()),
    }
}

fn write_digests(dir: &Path, digests: &BTreeMap<String, String>) -> Result<(), RenderError> {
    let path = dir.join(DIGEST_FILE);
    let json = serde_json::to_vec_pretty(digests).map_err(|e| RenderError::CorruptDigests {
        path: path.clone(),
        message: e.to_string(),
    })?;
    write_atomic(&path, &json, Some(PRIVATE_FILE_MODE))?;
    Ok(())
}

fn is_bare(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_./:@%+,~-".contains(c)
}

/// Quote a value for an env file
pub fn quote_value(value: &str) -> String {
    if !value.is_empty() && value.chars().all(is_bare) {
        return value.to_string();
    }
    if !value.contains('\'') && !value.contains('\n') {
        return format!("'{}'", value);
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '$' => out.push_str("\\$"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Parse env file contents with dotenvy.
///
/// Errors keep only the position dotenvy reports; the offending line may
/// hold a secret and is dropped.
pub fn parse_env_file(contents: &str) -> Result<BTreeMap<String, Zeroizing<String>>, String> {
    let mut values = BTreeMap::new();
    for item in dotenvy::from_read_iter(contents.as_bytes()) {
        match item {
            Ok((key, value)) => {
                values.insert(key, Zeroizing::new(value));
            }
            Err(dotenvy::Error::LineParse(_, column)) => {
                return Err(format!("malformed entry near column {}", column))
            }
            Err(e) => return Err(e.to_string()),
        }
    }
    Ok(values)
}
