//! Error types for the secrets subsystem

use std::fmt;
use std::path::PathBuf;

use keel_common::EnvironmentLabel;
use thiserror::Error;

/// Policy lookup failed
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// The class is not in the classification table
    #[error("unknown secret class '{class}' (expected core-credential, external-api-key, or signing-key)")]
    UnknownClass {
        /// Class as written
        class: String,
    },

    /// An annotation produces a policy that cannot be satisfied
    #[error("invalid policy for secret '{secret}': {message}")]
    InvalidAnnotation {
        /// Logical secret name
        secret: String,
        /// What is wrong
        message: String,
    },
}

/// Secret generation failed
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// The OS entropy source failed; there is no weaker fallback
    #[error("entropy source unavailable: {message}")]
    EntropyUnavailable {
        /// Source error
        message: String,
    },

    /// The policy asks for an impossible value
    #[error("cannot generate a {length}-character value with minimum length {min_length}")]
    InvalidLength {
        /// Requested length
        length: usize,
        /// Policy minimum
        min_length: usize,
    },
}

/// Secret store operation failed
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem or lock failure
    #[error(transparent)]
    Io(#[from] keel_common::Error),

    /// The store file is not valid JSON of the expected shape
    #[error("secret store {path} is corrupt: {message}")]
    Corrupt {
        /// Store file
        path: PathBuf,
        /// Parser message (never includes values)
        message: String,
    },

    /// The store file belongs to another environment
    #[error("secret store {path} belongs to environment '{found}', expected '{expected}'")]
    EnvironmentMismatch {
        /// Store file
        path: PathBuf,
        /// Environment requested
        expected: EnvironmentLabel,
        /// Environment recorded in the file
        found: EnvironmentLabel,
    },

    /// The store file was written by an incompatible version
    #[error("secret store {path} has unsupported format version {version}")]
    UnsupportedVersion {
        /// Store file
        path: PathBuf,
        /// Recorded version
        version: u32,
    },

    /// The secret is operator-supplied and has not been set
    #[error("secret '{name}' is not generated by keel; set it with `keel set-secret`")]
    NotGeneratable {
        /// Logical secret name
        name: String,
    },

    /// An operator-supplied value is empty or fails the policy minimum
    #[error("value for secret '{name}' rejected: {reason}")]
    RejectedValue {
        /// Logical secret name
        name: String,
        /// Why
        reason: String,
    },

    /// A rotation date or grace deadline falls outside the calendar range
    #[error("rotation interval or grace window of {seconds}s is out of range")]
    DateOutOfRange {
        /// Offset that overflowed
        seconds: i64,
    },

    /// Generation failed
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// A required variable with no value
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnresolvedVariable {
    /// Service declaring the variable
    pub service: String,
    /// Variable name
    pub variable: String,
    /// Logical secret, for secret variables
    pub secret: Option<String>,
}

impl fmt::Display for UnresolvedVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (service '{}'", self.variable, self.service)?;
        if let Some(secret) = &self.secret {
            if secret != &self.variable {
                write!(f, ", secret '{}'", secret)?;
            }
        }
        write!(f, ")")
    }
}

/// Rendering failed; nothing was written
#[derive(Debug, Error)]
pub enum RenderError {
    /// One or more required variables have no value
    #[error("environment '{environment}' has unresolved required variables: {}", .missing.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    Unresolved {
        /// Environment rendered
        environment: EnvironmentLabel,
        /// Every unresolved variable
        missing: Vec<UnresolvedVariable>,
    },

    /// A rendered file on disk cannot be parsed
    #[error("cannot parse {path}: {message}")]
    Parse {
        /// Env file
        path: PathBuf,
        /// What is wrong (never the value)
        message: String,
    },

    /// The digest record is not valid JSON
    #[error("digest record {path} is corrupt: {message}")]
    CorruptDigests {
        /// Digest file
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// Filesystem failure
    #[error(transparent)]
    Io(#[from] keel_common::Error),
}
