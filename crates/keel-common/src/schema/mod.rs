//! Schema model
//!
//! The schema is the single declarative description of every service,
//! network, volume, variable contract, and environment overlay. These types
//! are pure data: loading lives in [`load`], rule checking in [`validate`].

mod load;
mod validate;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::environment::EnvironmentLabel;

pub use load::{load_schema, parse_schema};
pub use validate::{
    validate_schema, variable_references, SchemaError, Violation, MAX_GRACE_WINDOW_HOURS,
    MAX_ROTATION_DAYS, MAX_SECRET_LENGTH,
};

/// Profile that turns on GPU device reservations
pub const GPU_PROFILE: &str = "gpu";

/// A validated topology description
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schema {
    /// Project name, used as the compose project prefix
    pub project: String,
    /// Services in declaration order
    pub services: Vec<ServiceDefinition>,
    /// Declared networks
    pub networks: BTreeMap<String, NetworkSpec>,
    /// Declared named volumes
    pub volumes: BTreeMap<String, VolumeSpec>,
    /// Policy data (placeholder denylist, grace window)
    pub policy: PolicySettings,
    /// Per logical secret policy annotations
    pub secrets: BTreeMap<String, SecretAnnotation>,
    /// One overlay per environment the schema supports
    pub environments: BTreeMap<EnvironmentLabel, EnvironmentOverlay>,
    /// SHA-256 of the source document (empty for schemas built in code)
    pub digest: String,
}

impl Schema {
    /// Look up a service by name
    pub fn service(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Overlay for an environment, if the schema declares one
    pub fn overlay(&self, label: EnvironmentLabel) -> Option<&EnvironmentOverlay> {
        self.environments.get(&label)
    }

    /// Every variable name declared by any service
    pub fn declared_variables(&self) -> BTreeSet<&str> {
        self.services
            .iter()
            .flat_map(|s| s.environment.keys().map(String::as_str))
            .collect()
    }

    /// Every profile tag carried by any service
    pub fn profile_tags(&self) -> BTreeSet<&str> {
        self.services
            .iter()
            .flat_map(|s| s.profiles.iter().map(String::as_str))
            .collect()
    }
}

/// One service in the topology
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceDefinition {
    /// Unique service name
    pub name: String,
    /// Container image reference
    pub image: String,
    /// Command override
    #[serde(default)]
    pub command: Option<Vec<String>>,
    /// Port mappings in runtime syntax (`"8080:80"`)
    #[serde(default)]
    pub ports: Vec<String>,
    /// Volume mounts (`"pgdata:/var/lib/postgresql/data"`)
    #[serde(default)]
    pub volumes: Vec<String>,
    /// Networks the service joins
    #[serde(default)]
    pub networks: Vec<String>,
    /// Services that must be up first
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Restart policy
    #[serde(default)]
    pub restart: Option<String>,
    /// Profile tags; empty means "always included"
    #[serde(default)]
    pub profiles: BTreeSet<String>,
    /// Resource hints
    #[serde(default)]
    pub resources: ResourceHints,
    /// Health check descriptor
    #[serde(default)]
    pub healthcheck: Option<HealthCheck>,
    /// Variable contract, keyed by variable name
    #[serde(default)]
    pub environment: BTreeMap<String, VariableSpec>,
}

/// Memory and GPU hints for a service
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceHints {
    /// Memory limit in runtime syntax (`"2g"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// Number of GPUs to reserve when the gpu profile is active
    #[serde(default)]
    pub gpus: u32,
}

/// Container health check
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthCheck {
    /// Test command in runtime syntax (`["CMD-SHELL", "pg_isready"]`)
    pub test: Vec<String>,
    /// Seconds between checks
    #[serde(default = "default_interval")]
    pub interval_secs: u32,
    /// Seconds before a single check times out
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
    /// Consecutive failures before unhealthy
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Grace period after start
    #[serde(default)]
    pub start_period_secs: u32,
}

fn default_interval() -> u32 {
    10
}

fn default_timeout() -> u32 {
    5
}

fn default_retries() -> u32 {
    5
}

/// Contract for one environment variable of one service
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableSpec {
    /// Whether a value must be present before the service may start
    #[serde(default = "default_required")]
    pub required: bool,
    /// Whether the value is secret material
    #[serde(default)]
    pub secret: bool,
    /// Secret classification (`core-credential`, `external-api-key`, `signing-key`)
    #[serde(default)]
    pub class: Option<String>,
    /// Literal default (non-secret variables only)
    #[serde(default)]
    pub default: Option<String>,
    /// Logical secret this variable is bound to, when not its own name
    #[serde(default)]
    pub shares: Option<String>,
}

fn default_required() -> bool {
    true
}

impl Default for VariableSpec {
    fn default() -> Self {
        Self {
            required: true,
            secret: false,
            class: None,
            default: None,
            shares: None,
        }
    }
}

impl VariableSpec {
    /// A required secret of the given class
    pub fn secret(class: &str) -> Self {
        Self {
            secret: true,
            class: Some(class.to_string()),
            ..Default::default()
        }
    }

    /// A non-secret variable with a default
    pub fn plain(default: &str) -> Self {
        Self {
            default: Some(default.to_string()),
            ..Default::default()
        }
    }

    /// Mark the variable optional
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Name of the logical secret backing this variable
    pub fn logical_name<'a>(&'a self, variable: &'a str) -> &'a str {
        self.shares.as_deref().unwrap_or(variable)
    }
}

/// Network declaration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkSpec {
    /// Network driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Whether the network is managed outside the project
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub external: bool,
}

/// Named volume declaration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeSpec {
    /// Volume driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Whether the volume is managed outside the project
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub external: bool,
}

/// Character set used when generating a secret
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Charset {
    /// `A-Z a-z 0-9`
    Alphanumeric,
    /// Alphanumerics plus `-_.~`
    AlphanumericSymbols,
    /// `0-9 a-f`
    Hex,
}

/// How strictly a secret's value is judged in a given environment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strictness {
    /// Placeholders and weak values block progression
    Strict,
    /// An optional external credential; problems are surfaced as warnings
    OptionalExternal,
    /// Local environments; problems are surfaced as warnings
    Lenient,
}

/// Explicit schema annotation overriding the class policy for one logical secret
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretAnnotation {
    /// Generated length
    #[serde(default)]
    pub length: Option<usize>,
    /// Shortest acceptable value
    #[serde(default)]
    pub min_length: Option<usize>,
    /// Generation character set
    #[serde(default)]
    pub charset: Option<Charset>,
    /// Rotation interval in days; 0 disables rotation
    #[serde(default)]
    pub rotation_days: Option<u32>,
    /// How long a rotated-out value stays valid
    #[serde(default)]
    pub grace_window_hours: Option<u32>,
    /// Strictness applied in every environment
    #[serde(default)]
    pub strictness: Option<Strictness>,
    /// Whether keel may generate the value (false for operator-supplied keys)
    #[serde(default)]
    pub generate: Option<bool>,
}

/// Schema-wide policy data
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySettings {
    /// Default grace window for rotated secrets
    #[serde(default)]
    pub grace_window_hours: Option<u32>,
    /// Values that are always placeholders (replaces the built-in list)
    #[serde(default)]
    pub placeholders: Option<Vec<String>>,
    /// Substrings that mark a placeholder (replaces the built-in list)
    #[serde(default)]
    pub placeholder_substrings: Option<Vec<String>>,
}

/// Environment-specific overrides and active profiles
#[derive(Clone, Debug, PartialEq)]
pub struct EnvironmentOverlay {
    /// Environment this overlay applies to
    pub label: EnvironmentLabel,
    /// Active profile tags
    pub profiles: BTreeSet<String>,
    /// Field overrides keyed by service name
    pub overrides: BTreeMap<String, ServiceOverride>,
}

impl EnvironmentOverlay {
    /// An overlay with no profiles and no overrides
    pub fn empty(label: EnvironmentLabel) -> Self {
        Self {
            label,
            profiles: BTreeSet::new(),
            overrides: BTreeMap::new(),
        }
    }

    /// Whether the gpu profile is active
    pub fn gpu_enabled(&self) -> bool {
        self.profiles.contains(GPU_PROFILE)
    }
}

/// Whole-field replacements for one service in one environment
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceOverride {
    /// Replacement image
    #[serde(default)]
    pub image: Option<String>,
    /// Replacement command
    #[serde(default)]
    pub command: Option<Vec<String>>,
    /// Replacement port list
    #[serde(default)]
    pub ports: Option<Vec<String>>,
    /// Replacement volume mounts
    #[serde(default)]
    pub volumes: Option<Vec<String>>,
    /// Replacement network list
    #[serde(default)]
    pub networks: Option<Vec<String>>,
    /// Replacement restart policy
    #[serde(default)]
    pub restart: Option<String>,
    /// Replacement resource hints
    #[serde(default)]
    pub resources: Option<ResourceHints>,
    /// Replacement health check
    #[serde(default)]
    pub healthcheck: Option<HealthCheck>,
    /// Literal values for individual variables
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}
