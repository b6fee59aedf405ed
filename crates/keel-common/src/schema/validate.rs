//! Schema rule checking
//!
//! Every rule runs on every load and every violation is collected, so an
//! author fixes a schema in one pass instead of one error at a time.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use thiserror::Error;

use super::{HealthCheck, Schema, ServiceDefinition};
use crate::graph::DependencyGraph;

/// Longest accepted rotation interval
pub const MAX_ROTATION_DAYS: u32 = 3650;

/// Longest accepted grace window
pub const MAX_GRACE_WINDOW_HOURS: u32 = 8760;

/// Longest accepted secret length
pub const MAX_SECRET_LENGTH: usize = 4096;

/// A schema failed validation
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub struct SchemaError {
    /// Every violation found, in rule order
    pub violations: Vec<Violation>,
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "schema has {} violation(s):", self.violations.len())?;
        for v in &self.violations {
            write!(f, "\n  - {}", v)?;
        }
        Ok(())
    }
}

/// One broken schema rule
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Violation {
    /// The project name is empty
    #[error("project name is empty")]
    MissingProject,

    /// Two services share a name
    #[error("service '{name}' is defined more than once")]
    DuplicateService {
        /// Repeated name
        name: String,
    },

    /// A service name is empty or contains characters the runtime rejects
    #[error("service name '{name}' must match [a-z0-9][a-z0-9_-]*")]
    InvalidServiceName {
        /// Offending name
        name: String,
    },

    /// A service has no image
    #[error("service '{service}' has no image")]
    EmptyImage {
        /// Service name
        service: String,
    },

    /// `depends_on` names a service that does not exist
    #[error("service '{service}' depends on undeclared service '{dependency}'")]
    UnknownDependency {
        /// Dependent service
        service: String,
        /// Missing dependency
        dependency: String,
    },

    /// A service lists itself in `depends_on`
    #[error("service '{service}' depends on itself")]
    SelfDependency {
        /// Service name
        service: String,
    },

    /// A health check interpolates a variable nobody declares
    #[error("health check of service '{service}' references undeclared variable '{variable}'")]
    UndeclaredHealthcheckVariable {
        /// Service name
        service: String,
        /// Referenced variable
        variable: String,
    },

    /// The dependency graph has a cycle
    #[error("dependency cycle: {}", .path.join(" -> "))]
    DependencyCycle {
        /// Closed cycle path, first node repeated at the end
        path: Vec<String>,
    },

    /// An overlay activates a profile no service carries
    #[error("environment '{environment}' activates profile '{profile}' which no service carries")]
    UnknownProfile {
        /// Overlay label
        environment: String,
        /// Unknown profile tag
        profile: String,
    },

    /// An overlay key is not a known environment label
    #[error("unknown environment '{label}'")]
    UnknownEnvironment {
        /// Label as written
        label: String,
    },

    /// A service joins a network missing from `networks:`
    #[error("service '{service}' joins undeclared network '{network}'")]
    UndeclaredNetwork {
        /// Service name
        service: String,
        /// Network name
        network: String,
    },

    /// A service mounts a named volume missing from `volumes:`
    #[error("service '{service}' mounts undeclared volume '{volume}'")]
    UndeclaredVolume {
        /// Service name
        service: String,
        /// Volume name
        volume: String,
    },

    /// `class` set on a variable that is not secret
    #[error("variable '{variable}' of service '{service}' has a class but is not secret")]
    ClassOnPlainVariable {
        /// Service name
        service: String,
        /// Variable name
        variable: String,
    },

    /// `shares` set on a variable that is not secret
    #[error("variable '{variable}' of service '{service}' shares a secret but is not secret")]
    SharesOnPlainVariable {
        /// Service name
        service: String,
        /// Variable name
        variable: String,
    },

    /// A secret variable without a class
    #[error("secret variable '{variable}' of service '{service}' has no class")]
    MissingClass {
        /// Service name
        service: String,
        /// Variable name
        variable: String,
    },

    /// A secret variable carries a literal default
    #[error("secret variable '{variable}' of service '{service}' declares a literal default")]
    SecretWithDefault {
        /// Service name
        service: String,
        /// Variable name
        variable: String,
    },

    /// One logical secret bound with two different classes
    #[error("secret '{secret}' is declared both as '{first}' and '{second}'")]
    ConflictingClass {
        /// Logical secret name
        secret: String,
        /// Class seen first
        first: String,
        /// Conflicting class
        second: String,
    },

    /// One variable name bound differently by two services
    #[error("variable '{variable}' is bound as {first} in one service and {second} in another")]
    ConflictingBinding {
        /// Variable name
        variable: String,
        /// Binding seen first
        first: String,
        /// Conflicting binding
        second: String,
    },

    /// A policy number exceeds its accepted maximum
    #[error("{field} is {value}, above the maximum of {max}")]
    OutOfRange {
        /// Dotted path of the setting
        field: String,
        /// Value as written
        value: u64,
        /// Largest accepted value
        max: u64,
    },

    /// A `secrets:` annotation no variable binds to
    #[error("secret annotation '{secret}' is not bound by any service variable")]
    OrphanSecretAnnotation {
        /// Logical secret name
        secret: String,
    },
}

/// Check every rule against `schema`
pub fn validate_schema(schema: &Schema) -> Result<(), SchemaError> {
    let mut violations = Vec::new();

    if schema.project.trim().is_empty() {
        violations.push(Violation::MissingProject);
    }

    check_names(schema, &mut violations);
    check_dependencies(schema, &mut violations);
    check_healthchecks(schema, &mut violations);
    check_cycles(schema, &mut violations);
    check_profiles(schema, &mut violations);
    check_networks_and_volumes(schema, &mut violations);
    check_variables(schema, &mut violations);
    check_policy_bounds(schema, &mut violations);

    if violations.is_empty() {
        Ok(())
    } else {
        Err(SchemaError { violations })
    }
}

fn check_names(schema: &Schema, violations: &mut Vec<Violation>) {
    let mut seen = BTreeSet::new();
    let mut reported = BTreeSet::new();
    for service in &schema.services {
        if !is_valid_name(&service.name) {
            violations.push(Violation::InvalidServiceName {
                name: service.name.clone(),
            });
        }
        if !seen.insert(service.name.as_str()) && reported.insert(service.name.as_str()) {
            violations.push(Violation::DuplicateService {
                name: service.name.clone(),
            });
        }
        if service.image.trim().is_empty() {
            violations.push(Violation::EmptyImage {
                service: service.name.clone(),
            });
        }
    }
}

/// Service names become container names and env file names
pub(crate) fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

fn check_dependencies(schema: &Schema, violations: &mut Vec<Violation>) {
    let names: BTreeSet<&str> = schema.services.iter().map(|s| s.name.as_str()).collect();
    for service in &schema.services {
        for dep in &service.depends_on {
            if dep == &service.name {
                violations.push(Violation::SelfDependency {
                    service: service.name.clone(),
                });
            } else if !names.contains(dep.as_str()) {
                violations.push(Violation::UnknownDependency {
                    service: service.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }
}

/// Base health checks and overlay replacements alike end up in a manifest
fn check_healthchecks(schema: &Schema, violations: &mut Vec<Violation>) {
    let declared = schema.declared_variables();
    let overrides = schema.environments.values().flat_map(|overlay| {
        overlay
            .overrides
            .iter()
            .filter_map(|(target, o)| Some((target, o.healthcheck.as_ref()?)))
    });
    let checks = schema
        .services
        .iter()
        .filter_map(|s| Some((&s.name, s.healthcheck.as_ref()?)))
        .chain(overrides);

    let mut reported = BTreeSet::new();
    for (service, healthcheck) in checks {
        for variable in undeclared_references(healthcheck, &declared) {
            if reported.insert((service.as_str(), variable)) {
                violations.push(Violation::UndeclaredHealthcheckVariable {
                    service: service.clone(),
                    variable: variable.to_string(),
                });
            }
        }
    }
}

fn undeclared_references<'a>(
    healthcheck: &'a HealthCheck,
    declared: &'a BTreeSet<&'a str>,
) -> impl Iterator<Item = &'a str> + 'a {
    healthcheck
        .test
        .iter()
        .flat_map(|t| variable_references(t))
        .filter(move |v| !declared.contains(*v))
}

fn check_cycles(schema: &Schema, violations: &mut Vec<Violation>) {
    // Self-dependencies are already reported on their own.
    let graph = DependencyGraph::from_edges(schema.services.iter().map(|s| {
        (
            s.name.as_str(),
            s.depends_on
                .iter()
                .map(String::as_str)
                .filter(move |d| *d != s.name),
        )
    }));
    for path in graph.find_cycles() {
        violations.push(Violation::DependencyCycle { path });
    }
}

fn check_profiles(schema: &Schema, violations: &mut Vec<Violation>) {
    let tags = schema.profile_tags();
    for (label, overlay) in &schema.environments {
        for profile in &overlay.profiles {
            if !tags.contains(profile.as_str()) {
                violations.push(Violation::UnknownProfile {
                    environment: label.to_string(),
                    profile: profile.clone(),
                });
            }
        }
    }
}

fn check_networks_and_volumes(schema: &Schema, violations: &mut Vec<Violation>) {
    let mut check = |service: &str, networks: &[String], mounts: &[String]| {
        for network in networks {
            if !schema.networks.contains_key(network) {
                violations.push(Violation::UndeclaredNetwork {
                    service: service.to_string(),
                    network: network.clone(),
                });
            }
        }
        for volume in mounts.iter().filter_map(|m| named_volume(m)) {
            if !schema.volumes.contains_key(volume) {
                violations.push(Violation::UndeclaredVolume {
                    service: service.to_string(),
                    volume: volume.to_string(),
                });
            }
        }
    };

    for service in &schema.services {
        check(&service.name, &service.networks, &service.volumes);
    }
    for overlay in schema.environments.values() {
        for (target, o) in &overlay.overrides {
            check(
                target,
                o.networks.as_deref().unwrap_or(&[]),
                o.volumes.as_deref().unwrap_or(&[]),
            );
        }
    }
}

fn check_variables(schema: &Schema, violations: &mut Vec<Violation>) {
    let mut classes: BTreeMap<&str, &str> = BTreeMap::new();
    let mut conflicts: BTreeSet<(&str, &str)> = BTreeSet::new();

    for service in &schema.services {
        for (name, spec) in &service.environment {
            let service_name = || service.name.clone();
            if !spec.secret {
                if spec.class.is_some() {
                    violations.push(Violation::ClassOnPlainVariable {
                        service: service_name(),
                        variable: name.clone(),
                    });
                }
                if spec.shares.is_some() {
                    violations.push(Violation::SharesOnPlainVariable {
                        service: service_name(),
                        variable: name.clone(),
                    });
                }
                continue;
            }

            if spec.default.is_some() {
                violations.push(Violation::SecretWithDefault {
                    service: service_name(),
                    variable: name.clone(),
                });
            }

            let Some(class) = spec.class.as_deref() else {
                violations.push(Violation::MissingClass {
                    service: service_name(),
                    variable: name.clone(),
                });
                continue;
            };

            let logical = spec.logical_name(name);
            match classes.get(logical) {
                None => {
                    classes.insert(logical, class);
                }
                Some(first) if *first != class && conflicts.insert((logical, class)) => {
                    violations.push(Violation::ConflictingClass {
                        secret: logical.to_string(),
                        first: first.to_string(),
                        second: class.to_string(),
                    });
                }
                Some(_) => {}
            }
        }
    }

    check_bindings(schema, violations);

    let bound = secret_bindings(&schema.services);
    for secret in schema.secrets.keys() {
        if !bound.contains(secret.as_str()) {
            violations.push(Violation::OrphanSecretAnnotation {
                secret: secret.clone(),
            });
        }
    }
}

/// Rotation and grace offsets are added to timestamps, lengths size buffers
fn check_policy_bounds(schema: &Schema, violations: &mut Vec<Violation>) {
    let mut check = |field: String, value: u64, max: u64| {
        if value > max {
            violations.push(Violation::OutOfRange { field, value, max });
        }
    };

    if let Some(hours) = schema.policy.grace_window_hours {
        check(
            "policy.grace_window_hours".to_string(),
            u64::from(hours),
            u64::from(MAX_GRACE_WINDOW_HOURS),
        );
    }
    for (secret, a) in &schema.secrets {
        if let Some(days) = a.rotation_days {
            check(
                format!("secrets.{}.rotation_days", secret),
                u64::from(days),
                u64::from(MAX_ROTATION_DAYS),
            );
        }
        if let Some(hours) = a.grace_window_hours {
            check(
                format!("secrets.{}.grace_window_hours", secret),
                u64::from(hours),
                u64::from(MAX_GRACE_WINDOW_HOURS),
            );
        }
        for (name, length) in [("length", a.length), ("min_length", a.min_length)] {
            if let Some(length) = length {
                check(
                    format!("secrets.{}.{}", secret, name),
                    length as u64,
                    MAX_SECRET_LENGTH as u64,
                );
            }
        }
    }
}

/// The manifest interpolates by variable name, so every service must bind a
/// given name the same way.
fn check_bindings(schema: &Schema, violations: &mut Vec<Violation>) {
    let mut bindings: BTreeMap<&str, String> = BTreeMap::new();
    let mut reported = BTreeSet::new();
    for service in &schema.services {
        for (name, spec) in &service.environment {
            let binding = if spec.secret {
                format!("secret '{}'", spec.logical_name(name))
            } else {
                "a plain variable".to_string()
            };
            match bindings.get(name.as_str()) {
                None => {
                    bindings.insert(name, binding);
                }
                Some(first) if *first != binding && reported.insert(name.as_str()) => {
                    violations.push(Violation::ConflictingBinding {
                        variable: name.clone(),
                        first: first.clone(),
                        second: binding,
                    });
                }
                Some(_) => {}
            }
        }
    }
}

fn secret_bindings(services: &[ServiceDefinition]) -> BTreeSet<&str> {
    services
        .iter()
        .flat_map(|s| {
            s.environment
                .iter()
                .filter(|(_, spec)| spec.secret)
                .map(|(name, spec)| spec.logical_name(name))
        })
        .collect()
}

/// Source of a mount if it is a named volume (`name:/path`), not a bind mount
fn named_volume(mount: &str) -> Option<&str> {
    let (source, _) = mount.split_once(':')?;
    if source.is_empty() || source.starts_with(['/', '.', '~', '$']) {
        None
    } else {
        Some(source)
    }
}

/// Variable names interpolated in `text` as `${NAME}`, `${NAME:-x}` or `$NAME`.
///
/// `$$` is an escaped dollar and starts no reference.
pub fn variable_references(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut refs = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        match bytes.get(i + 1) {
            Some(b'$') => i += 2,
            Some(b'{') => {
                let start = i + 2;
                let end = start + ident_len(&bytes[start..]);
                if end > start {
                    refs.push(&text[start..end]);
                }
                i = end;
            }
            Some(_) => {
                let start = i + 1;
                let end = start + ident_len(&bytes[start..]);
                if end > start {
                    refs.push(&text[start..end]);
                }
                i = end.max(start);
            }
            None => i += 1,
        }
    }
    refs
}

fn ident_len(bytes: &[u8]) -> usize {
    let mut len = 0;
    for (idx, b) in bytes.iter().enumerate() {
        let ok = b.is_ascii_alphabetic() || *b == b'_' || (idx > 0 && b.is_ascii_digit());
        if !ok {
            break;
        }
        len += 1;
    }
    len
}
