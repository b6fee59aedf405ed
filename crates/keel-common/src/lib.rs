//! Common types for keel: the schema model, loading and validation, and the
//! filesystem, retry, and clock utilities shared by the other crates.

#![deny(missing_docs)]

pub mod clock;
pub mod environment;
pub mod error;
pub mod fs;
pub mod graph;
pub mod retry;
pub mod schema;
pub mod yaml;

pub use environment::{EnvironmentLabel, Tier};
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
