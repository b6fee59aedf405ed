//! Manifest compiler for keel
//!
//! Turns a validated [`Schema`](keel_common::schema::Schema) into one compose
//! manifest per environment.
//!
//! # Usage
//!
//! ```rust,ignore
//! let schema = load_schema(Path::new("keel.yaml"))?;
//! let artifact = ManifestCompiler::new(&schema).compile(EnvironmentLabel::Production)?;
//! let yaml = to_compose_yaml(&artifact)?;
//! ```

#![deny(missing_docs)]

mod artifact;
mod compiler;
pub mod compose;
mod error;
pub mod template;

pub use artifact::{
    escape_literal, interpolation, CompiledService, DependencyCondition, ManifestArtifact,
    SecretRequirement, VariableBinding,
};
pub use compiler::{compile, compile_all, ManifestCompiler};
pub use compose::to_compose_yaml;
pub use error::{CompileError, CompileIssue};
