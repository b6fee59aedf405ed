//! Secret lifecycle for keel
//!
//! Classifies variables into policies, generates and stores secrets per
//! environment, renders per-service env files, and validates what was
//! rendered before anything starts.
//!
//! # Usage
//!
//! ```rust,ignore
//! let engine = PolicyEngine::from_schema(&schema);
//! let store = SecretStore::new(".keel/secrets", EnvironmentLabel::Production);
//! for requirement in artifact.secret_requirements() {
//!     let policy = engine.policy_for_secret(artifact.environment, &requirement.name, &requirement.class)?;
//!     store.ensure(&requirement.name, &policy)?;
//! }
//! let files = render(&artifact, &store.load_all()?)?;
//! let report = CredentialValidator::new(&engine, &artifact).validate(&files)?;
//! ```

#![deny(missing_docs)]

mod error;
pub mod generator;
pub mod policy;
pub mod renderer;
pub mod store;
pub mod validator;

pub use error::{GenerationError, PolicyError, RenderError, StoreError, UnresolvedVariable};
pub use generator::{generate, EntropySource, OsEntropy};
pub use policy::{PolicyEngine, SecretPolicy, Severity, VariableClass};
pub use renderer::{render, render_partial, write_rendered, RenderedEnvironmentFile, WriteReport};
pub use store::{Acceptance, EnsureAction, SecretEntry, SecretStore};
pub use validator::{CredentialValidator, Finding, FindingKind, ValidationReport};
