//! Environment labels
//!
//! The closed set of environments a schema can be compiled for. Every command
//! takes the label explicitly; nothing reads an ambient "current environment".

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Environment a schema is compiled, rendered, and validated for
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentLabel {
    /// Local developer machines
    Development,
    /// Automated test runs
    Testing,
    /// Pre-production
    Staging,
    /// Production traffic
    Production,
    /// GPU-optimized production deployment
    Gpu,
    /// Observability stack
    Monitoring,
}

/// Policy column an environment label falls into.
///
/// The secret policy table is defined per tier rather than per label so that
/// adding a label never requires a new table column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    /// Purely local traffic; placeholders are tolerated
    Development,
    /// Shared pre-production; optional external services may be unset
    Staging,
    /// Real traffic; nothing may remain a placeholder
    Production,
}

impl EnvironmentLabel {
    /// All labels, in declaration order
    pub const ALL: [EnvironmentLabel; 6] = [
        EnvironmentLabel::Development,
        EnvironmentLabel::Testing,
        EnvironmentLabel::Staging,
        EnvironmentLabel::Production,
        EnvironmentLabel::Gpu,
        EnvironmentLabel::Monitoring,
    ];

    /// Lowercase name used in file paths, compose project names, and CLI flags
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Testing => "testing",
            Self::Staging => "staging",
            Self::Production => "production",
            Self::Gpu => "gpu",
            Self::Monitoring => "monitoring",
        }
    }

    /// Policy tier for this label
    pub fn tier(&self) -> Tier {
        match self {
            Self::Development | Self::Testing => Tier::Development,
            Self::Staging | Self::Monitoring => Tier::Staging,
            Self::Production | Self::Gpu => Tier::Production,
        }
    }
}

impl fmt::Display for EnvironmentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown environment label
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown environment '{0}' (expected one of: development, testing, staging, production, gpu, monitoring)")]
pub struct UnknownEnvironment(pub String);

impl FromStr for EnvironmentLabel {
    type Err = UnknownEnvironment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EnvironmentLabel::ALL
            .into_iter()
            .find(|label| label.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| UnknownEnvironment(s.to_string()))
    }
}
