//! Compiled manifest types
//!
//! A [`ManifestArtifact`] is the fully merged, environment-resolved topology.
//! It is regenerated wholesale on every compile and never edited in place.

use std::collections::BTreeMap;

use keel_common::schema::{HealthCheck, NetworkSpec, ResourceHints, VolumeSpec};
use keel_common::EnvironmentLabel;

/// How a variable gets its value in the emitted manifest
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VariableBinding {
    /// Secret material, interpolated from the rendered environment files
    Secret {
        /// Logical secret the value comes from
        logical: String,
        /// Secret class
        class: String,
        /// Whether the service refuses to start without it
        required: bool,
    },
    /// A literal, already templated
    Literal {
        /// Unescaped value
        value: String,
    },
    /// A non-secret variable with no value in the schema; supplied at render time
    Unset {
        /// Whether the service refuses to start without it
        required: bool,
    },
}

impl VariableBinding {
    /// Value written into the manifest for `variable`.
    ///
    /// Interpolated bindings never carry a fallback: required ones fail the
    /// runtime with `:?` when unset, optional ones expand to empty.
    pub fn manifest_value(&self, variable: &str) -> String {
        match self {
            Self::Literal { value } => escape_literal(value),
            Self::Secret { required, .. } | Self::Unset { required } => {
                interpolation(variable, *required)
            }
        }
    }

    /// Whether the value is read from the rendered environment files
    pub fn is_interpolated(&self) -> bool {
        !matches!(self, Self::Literal { .. })
    }

    /// Whether the variable must have a value before launch
    pub fn is_required(&self) -> bool {
        match self {
            Self::Secret { required, .. } | Self::Unset { required } => *required,
            Self::Literal { .. } => true,
        }
    }
}

/// `${VAR:?VAR is required}` or `${VAR}`
pub fn interpolation(variable: &str, required: bool) -> String {
    if required {
        format!("${{{}:?{} is required}}", variable, variable)
    } else {
        format!("${{{}}}", variable)
    }
}

/// Escape `$` so the runtime passes a literal through untouched
pub fn escape_literal(value: &str) -> String {
    value.replace('$', "$$")
}

/// When a dependent may start relative to its dependency
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DependencyCondition {
    /// Dependency's health check passes
    ServiceHealthy,
    /// Dependency's container started
    ServiceStarted,
}

impl DependencyCondition {
    /// Runtime spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServiceHealthy => "service_healthy",
            Self::ServiceStarted => "service_started",
        }
    }
}

/// One service after overlay merge
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledService {
    /// Service name
    pub name: String,
    /// Image reference
    pub image: String,
    /// Command override
    pub command: Option<Vec<String>>,
    /// Port mappings
    pub ports: Vec<String>,
    /// Volume mounts
    pub volumes: Vec<String>,
    /// Joined networks
    pub networks: Vec<String>,
    /// Dependencies with their start condition
    pub depends_on: Vec<(String, DependencyCondition)>,
    /// Restart policy
    pub restart: Option<String>,
    /// Memory limit
    pub memory: Option<String>,
    /// GPUs reserved; zero unless the gpu profile is active
    pub gpus: u32,
    /// Health check
    pub healthcheck: Option<HealthCheck>,
    /// Variable bindings keyed by variable name
    pub variables: BTreeMap<String, VariableBinding>,
}

impl CompiledService {
    /// Resource hints as applied in this environment
    pub fn resources(&self) -> ResourceHints {
        ResourceHints {
            memory: self.memory.clone(),
            gpus: self.gpus,
        }
    }
}

/// A logical secret and everything that consumes it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretRequirement {
    /// Logical secret name
    pub name: String,
    /// Secret class
    pub class: String,
    /// Whether any consumer requires it
    pub required: bool,
    /// `(service, variable)` pairs bound to this secret
    pub consumers: Vec<(String, String)>,
}

/// The compiled, environment-resolved topology
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestArtifact {
    /// Environment compiled for
    pub environment: EnvironmentLabel,
    /// Schema project name
    pub project: String,
    /// SHA-256 of the schema source
    pub schema_digest: String,
    /// Selected services, sorted by name
    pub services: Vec<CompiledService>,
    /// Networks used by selected services
    pub networks: BTreeMap<String, NetworkSpec>,
    /// Named volumes used by selected services
    pub volumes: BTreeMap<String, VolumeSpec>,
}

impl ManifestArtifact {
    /// Runtime project name, scoped by environment
    pub fn project_name(&self) -> String {
        format!("{}-{}", self.project, self.environment)
    }

    /// Look up a compiled service
    pub fn service(&self, name: &str) -> Option<&CompiledService> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Total GPUs reserved across services
    pub fn total_gpus(&self) -> u32 {
        self.services.iter().map(|s| s.gpus).sum()
    }

    /// Logical secrets this manifest needs, sorted by name
    pub fn secret_requirements(&self) -> Vec<SecretRequirement> {
        let mut requirements: BTreeMap<&str, SecretRequirement> = BTreeMap::new();
        for service in &self.services {
            for (variable, binding) in &service.variables {
                let VariableBinding::Secret {
                    logical,
                    class,
                    required,
                } = binding
                else {
                    continue;
                };
                let entry = requirements
                    .entry(logical.as_str())
                    .or_insert_with(|| SecretRequirement {
                        name: logical.clone(),
                        class: class.clone(),
                        required: false,
                        consumers: Vec::new(),
                    });
                entry.required |= *required;
                entry
                    .consumers
                    .push((service.name.clone(), variable.clone()));
            }
        }
        requirements.into_values().collect()
    }
}
