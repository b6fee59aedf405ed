//! Error types shared by the keel crates
//!
//! I/O failures always carry the path that failed, so a listing printed by
//! the CLI points at the exact file to inspect.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::schema::SchemaError;

/// Main error type for schema loading and shared filesystem helpers
#[derive(Debug, Error)]
pub enum Error {
    /// Reading a file failed
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that could not be read
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Writing a file failed
    #[error("failed to write {path}: {source}")]
    Write {
        /// File that could not be written
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Removing a file or directory failed
    #[error("failed to remove {path}: {source}")]
    Remove {
        /// Path that could not be removed
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The document is not valid YAML
    #[error("invalid YAML in {origin}: {message}")]
    Yaml {
        /// Where the document came from (usually a path)
        origin: String,
        /// Parser message
        message: String,
    },

    /// The document is valid YAML but does not match the schema shape
    #[error("malformed schema {origin}: {message}")]
    Malformed {
        /// Where the document came from (usually a path)
        origin: String,
        /// Deserializer message, including the offending field
        message: String,
    },

    /// The schema parsed but violates one or more validation rules
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A lock file stayed held past the acquisition timeout
    #[error("timed out waiting for lock {path}")]
    LockTimeout {
        /// Lock file path
        path: PathBuf,
    },
}

impl Error {
    /// Create a read error for `path`
    pub fn read(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a write error for `path`
    pub fn write(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a remove error for `path`
    pub fn remove(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Remove {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a malformed-document error
    pub fn malformed(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            origin: origin.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_name_the_path() {
        let err = Error::read(
            "/tmp/keel.yaml",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/tmp/keel.yaml"));
        assert!(msg.contains("gone"));
    }

    #[test]
    fn test_malformed_display() {
        let err = Error::malformed("keel.yaml", "unknown field `imagee`");
        assert!(err.to_string().contains("imagee"));
    }
}
