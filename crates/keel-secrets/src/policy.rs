//! Secret Policy Engine
//!
//! Maps `(environment, class)` to a [`SecretPolicy`]: generation length and
//! character set, rotation interval, and how strictly values are judged.
//! Class defaults come from a fixed table; `secrets:` annotations in the
//! schema override individual fields for one logical secret.
//!
//! | class            | development | staging           | production |
//! |------------------|-------------|-------------------|------------|
//! | core-credential  | lenient     | strict            | strict     |
//! | external-api-key | lenient     | optional-external | strict     |
//! | signing-key      | lenient     | strict            | strict     |

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::Duration;

use keel_common::schema::{Charset, PolicySettings, Schema, SecretAnnotation, Strictness};
use keel_common::{EnvironmentLabel, Tier};

use crate::error::PolicyError;

/// Rotated-out values stay valid this long unless configured otherwise
pub const DEFAULT_GRACE_WINDOW_HOURS: u32 = 24;

/// Values that are always placeholders (compared case-insensitively)
pub const DEFAULT_PLACEHOLDERS: &[&str] = &[
    "changeme",
    "change-me",
    "change_me",
    "password",
    "secret",
    "placeholder",
    "todo",
    "tbd",
    "xxx",
    "xxxx",
    "test",
    "dummy",
    "default",
    "example",
    "none",
    "null",
];

/// Substrings that mark a placeholder (compared case-insensitively)
pub const DEFAULT_PLACEHOLDER_SUBSTRINGS: &[&str] = &[
    "changeme",
    "change_me",
    "change-me",
    "placeholder",
    "your_",
    "your-",
    "replace_me",
    "replace-me",
    "<",
    ">",
];

/// Secret classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VariableClass {
    /// Database and service passwords
    CoreCredential,
    /// Keys issued by third parties
    ExternalApiKey,
    /// Keys that sign tokens or sessions
    SigningKey,
}

impl VariableClass {
    /// Every class
    pub const ALL: [VariableClass; 3] = [
        VariableClass::CoreCredential,
        VariableClass::ExternalApiKey,
        VariableClass::SigningKey,
    ];

    /// Schema spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CoreCredential => "core-credential",
            Self::ExternalApiKey => "external-api-key",
            Self::SigningKey => "signing-key",
        }
    }

    fn defaults(&self) -> ClassDefaults {
        match self {
            Self::CoreCredential => ClassDefaults {
                length: 32,
                min_length: 16,
                charset: Charset::Alphanumeric,
                rotation_days: 90,
                generate: true,
            },
            Self::ExternalApiKey => ClassDefaults {
                length: 40,
                min_length: 20,
                charset: Charset::Alphanumeric,
                rotation_days: 0,
                generate: false,
            },
            Self::SigningKey => ClassDefaults {
                length: 64,
                min_length: 32,
                charset: Charset::AlphanumericSymbols,
                rotation_days: 30,
                generate: true,
            },
        }
    }

    fn strictness(&self, tier: Tier) -> Strictness {
        match (self, tier) {
            (_, Tier::Development) => Strictness::Lenient,
            (Self::ExternalApiKey, Tier::Staging) => Strictness::OptionalExternal,
            _ => Strictness::Strict,
        }
    }
}

impl fmt::Display for VariableClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VariableClass {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VariableClass::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| PolicyError::UnknownClass {
                class: s.to_string(),
            })
    }
}

struct ClassDefaults {
    length: usize,
    min_length: usize,
    charset: Charset,
    rotation_days: u32,
    generate: bool,
}

/// Severity of a validation finding
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Blocks the orchestrator
    Error,
    /// Surfaced; blocking only under `--strict`
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Warning => "warning",
        })
    }
}

/// Effective policy for one secret in one environment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretPolicy {
    /// Classification
    pub class: VariableClass,
    /// Generated length
    pub length: usize,
    /// Shortest acceptable value
    pub min_length: usize,
    /// Generation character set
    pub charset: Charset,
    /// Rotation interval; `None` never rotates
    pub rotation: Option<Duration>,
    /// How long a rotated-out value stays valid
    pub grace_window: Duration,
    /// How strictly values are judged
    pub strictness: Strictness,
    /// Whether keel generates the value
    pub generate: bool,
}

impl SecretPolicy {
    /// Severity of a placeholder or weak value under this policy
    pub fn severity(&self) -> Severity {
        match self.strictness {
            Strictness::Strict => Severity::Error,
            Strictness::OptionalExternal | Strictness::Lenient => Severity::Warning,
        }
    }
}

/// Derives secret policies from the class table, schema policy settings,
/// and per-secret annotations
#[derive(Clone, Debug)]
pub struct PolicyEngine {
    annotations: BTreeMap<String, SecretAnnotation>,
    grace_window_hours: u32,
    placeholders: Vec<String>,
    placeholder_substrings: Vec<String>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new(&PolicySettings::default(), BTreeMap::new())
    }
}

impl PolicyEngine {
    /// Create an engine from schema policy settings and annotations
    pub fn new(settings: &PolicySettings, annotations: BTreeMap<String, SecretAnnotation>) -> Self {
        Self {
            annotations,
            grace_window_hours: settings
                .grace_window_hours
                .unwrap_or(DEFAULT_GRACE_WINDOW_HOURS),
            placeholders: settings
                .placeholders
                .as_deref()
                .map(lowercased)
                .unwrap_or_else(|| lowercased_defaults(DEFAULT_PLACEHOLDERS)),
            placeholder_substrings: settings
                .placeholder_substrings
                .as_deref()
                .map(lowercased)
                .unwrap_or_else(|| lowercased_defaults(DEFAULT_PLACEHOLDER_SUBSTRINGS)),
        }
    }

    /// Engine configured by a schema's `policy:` and `secrets:` sections
    pub fn from_schema(schema: &Schema) -> Self {
        Self::new(&schema.policy, schema.secrets.clone())
    }

    /// Class policy for an environment, without annotations
    pub fn policy_for(
        &self,
        environment: EnvironmentLabel,
        class: &str,
    ) -> Result<SecretPolicy, PolicyError> {
        let class: VariableClass = class.parse()?;
        let defaults = class.defaults();
        Ok(SecretPolicy {
            class,
            length: defaults.length,
            min_length: defaults.min_length,
            charset: defaults.charset,
            rotation: rotation(defaults.rotation_days),
            grace_window: Duration::hours(i64::from(self.grace_window_hours)),
            strictness: class.strictness(environment.tier()),
            generate: defaults.generate,
        })
    }

    /// Policy for one logical secret, with its annotation applied
    pub fn policy_for_secret(
        &self,
        environment: EnvironmentLabel,
        secret: &str,
        class: &str,
    ) -> Result<SecretPolicy, PolicyError> {
        let mut policy = self.policy_for(environment, class)?;
        let Some(a) = self.annotations.get(secret) else {
            return Ok(policy);
        };

        if let Some(min_length) = a.min_length {
            policy.min_length = min_length;
        }
        if let Some(length) = a.length {
            policy.length = length;
        }
        if let Some(charset) = a.charset {
            policy.charset = charset;
        }
        if let Some(days) = a.rotation_days {
            policy.rotation = rotation(days);
        }
        if let Some(hours) = a.grace_window_hours {
            policy.grace_window = Duration::hours(i64::from(hours));
        }
        if let Some(strictness) = a.strictness {
            policy.strictness = strictness;
        }
        if let Some(generate) = a.generate {
            policy.generate = generate;
        }

        if policy.generate && policy.length < policy.min_length.max(1) {
            return Err(PolicyError::InvalidAnnotation {
                secret: secret.to_string(),
                message: format!(
                    "length {} is below min_length {}",
                    policy.length, policy.min_length
                ),
            });
        }
        Ok(policy)
    }

    /// Whether `value` matches the placeholder denylist
    pub fn is_placeholder(&self, value: &str) -> bool {
        let value = value.trim().to_lowercase();
        self.placeholders.iter().any(|p| *p == value)
            || self
                .placeholder_substrings
                .iter()
                .any(|s| !s.is_empty() && value.contains(s.as_str()))
    }
}

fn lowercased(items: &[String]) -> Vec<String> {
    items.iter().map(|s| s.to_lowercase()).collect()
}

fn lowercased_defaults(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_lowercase()).collect()
}

fn rotation(days: u32) -> Option<Duration> {
    (days > 0).then(|| Duration::days(i64::from(days)))
}
