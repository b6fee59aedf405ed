//! Compile errors
//!
//! Compilation reports every issue it finds for an environment before
//! failing, and fails before anything is written.

use std::fmt;

use keel_common::EnvironmentLabel;
use thiserror::Error;

/// Compiling one environment failed
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub struct CompileError {
    /// Environment being compiled
    pub environment: EnvironmentLabel,
    /// Every issue found
    pub issues: Vec<CompileIssue>,
}

impl CompileError {
    /// Error with a single issue
    pub fn single(environment: EnvironmentLabel, issue: CompileIssue) -> Self {
        Self {
            environment,
            issues: vec![issue],
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "compiling environment '{}' failed with {} issue(s):",
            self.environment,
            self.issues.len()
        )?;
        for issue in &self.issues {
            write!(f, "\n  - {}", issue)?;
        }
        Ok(())
    }
}

/// One reason an environment cannot be compiled
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CompileIssue {
    /// The schema declares no overlay for the environment
    #[error("schema has no overlay for this environment")]
    MissingOverlay,

    /// The overlay activates a profile no service carries
    #[error("profile '{profile}' is not carried by any service")]
    UnresolvedProfile {
        /// Profile tag
        profile: String,
    },

    /// An override names a service the schema does not define
    #[error("override targets unknown service '{service}'")]
    MissingOverrideTarget {
        /// Override key
        service: String,
    },

    /// An override sets a variable the service does not declare
    #[error("override for service '{service}' sets undeclared variable '{variable}'")]
    UnknownOverrideVariable {
        /// Service name
        service: String,
        /// Variable name
        variable: String,
    },

    /// A secret variable was given a literal value
    #[error("secret variable '{variable}' of service '{service}' has a literal fallback")]
    SecretWithFallback {
        /// Service name
        service: String,
        /// Variable name
        variable: String,
    },

    /// A selected service depends on one the overlay's profiles exclude
    #[error("service '{service}' depends on '{dependency}' which is not active in this environment")]
    InactiveDependency {
        /// Dependent service
        service: String,
        /// Deselected dependency
        dependency: String,
    },

    /// A default value template failed to render
    #[error("default for variable '{variable}' of service '{service}' failed to render: {message}")]
    Template {
        /// Service name
        service: String,
        /// Variable name
        variable: String,
        /// minijinja error
        message: String,
    },

    /// The compile task did not finish
    #[error("compile task aborted: {message}")]
    Aborted {
        /// Join error
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_environment_and_issues() {
        let err = CompileError {
            environment: EnvironmentLabel::Production,
            issues: vec![
                CompileIssue::MissingOverrideTarget {
                    service: "ghost".into(),
                },
                CompileIssue::SecretWithFallback {
                    service: "api".into(),
                    variable: "DB_PASSWORD".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("'production'"));
        assert!(msg.contains("ghost"));
        assert!(msg.contains("DB_PASSWORD"));
    }
}
