//! Schema loading: YAML source → typed [`Schema`] → validated [`Schema`]

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use super::validate::{validate_schema, SchemaError, Violation};
use super::{
    EnvironmentOverlay, NetworkSpec, PolicySettings, Schema, SecretAnnotation, ServiceDefinition,
    ServiceOverride, VolumeSpec,
};
use crate::environment::EnvironmentLabel;
use crate::fs::sha256_hex;
use crate::{yaml, Error};

/// On-disk shape of the schema. Environment keys stay strings here so that
/// unknown labels are reported alongside every other violation.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SchemaDocument {
    project: String,
    #[serde(default)]
    networks: BTreeMap<String, NetworkSpec>,
    #[serde(default)]
    volumes: BTreeMap<String, VolumeSpec>,
    #[serde(default)]
    policy: PolicySettings,
    #[serde(default)]
    secrets: BTreeMap<String, SecretAnnotation>,
    #[serde(default)]
    services: Vec<ServiceDefinition>,
    #[serde(default)]
    environments: BTreeMap<String, OverlayDocument>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct OverlayDocument {
    #[serde(default)]
    profiles: BTreeSet<String>,
    #[serde(default)]
    overrides: BTreeMap<String, ServiceOverride>,
}

/// Load and validate the schema at `path`
pub fn load_schema(path: &Path) -> Result<Schema, Error> {
    let source = std::fs::read_to_string(path).map_err(|e| Error::read(path, e))?;
    parse_schema(&source, &path.display().to_string())
}

/// Parse and validate a schema from source text.
///
/// `origin` names the document in error messages.
pub fn parse_schema(source: &str, origin: &str) -> Result<Schema, Error> {
    let value = yaml::parse_document(source, origin)?;
    if value.is_null() {
        return Err(Error::malformed(origin, "document is empty"));
    }
    let document: SchemaDocument =
        serde_json::from_value(value).map_err(|e| Error::malformed(origin, e.to_string()))?;

    let mut violations = Vec::new();
    let mut environments = BTreeMap::new();
    for (raw_label, overlay) in document.environments {
        match raw_label.parse::<EnvironmentLabel>() {
            Ok(label) => {
                environments.insert(
                    label,
                    EnvironmentOverlay {
                        label,
                        profiles: overlay.profiles,
                        overrides: overlay.overrides,
                    },
                );
            }
            Err(_) => violations.push(Violation::UnknownEnvironment { label: raw_label }),
        }
    }

    let schema = Schema {
        project: document.project,
        services: document.services,
        networks: document.networks,
        volumes: document.volumes,
        policy: document.policy,
        secrets: document.secrets,
        environments,
        digest: sha256_hex(source.as_bytes()),
    };

    if let Err(SchemaError { violations: found }) = validate_schema(&schema) {
        violations.extend(found);
    }
    if !violations.is_empty() {
        return Err(SchemaError { violations }.into());
    }

    debug!(
        origin = %origin,
        services = schema.services.len(),
        environments = schema.environments.len(),
        "schema loaded"
    );
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
project: platform
services:
  - name: db
    image: postgres:16
    environment:
      DB_PASSWORD: { secret: true, class: core-credential }
environments:
  production: {}
"#;

    #[test]
    fn test_minimal_schema_loads() {
        let schema = parse_schema(MINIMAL, "test").unwrap();
        assert_eq!(schema.project, "platform");
        assert_eq!(schema.services.len(), 1);
        let var = &schema.services[0].environment["DB_PASSWORD"];
        assert!(var.secret && var.required);
        assert!(schema.overlay(EnvironmentLabel::Production).is_some());
        assert_eq!(schema.digest.len(), 64);
    }

    #[test]
    fn test_unknown_field_is_malformed() {
        let source = "project: p\nservices:\n  - name: a\n    imagee: x\n";
        let err = parse_schema(source, "keel.yaml").unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));
        assert!(err.to_string().contains("imagee"));
    }

    #[test]
    fn test_unknown_environment_reported_with_other_violations() {
        let source = r#"
project: p
services:
  - name: a
    image: x
    depends_on: [ghost]
environments:
  qa: {}
"#;
        let err = parse_schema(source, "test").unwrap_err();
        let Error::Schema(schema_err) = err else {
            panic!("expected schema error");
        };
        assert_eq!(schema_err.violations.len(), 2);
        assert!(schema_err
            .violations
            .contains(&Violation::UnknownEnvironment { label: "qa".into() }));
    }

    #[test]
    fn test_override_healthcheck_and_huge_grace_window_rejected() {
        let source = r#"
project: p
policy:
  grace_window_hours: 4294967295
services:
  - name: api
    image: x
environments:
  production:
    overrides:
      api:
        healthcheck:
          test: ["CMD-SHELL", "curl -H ${GHOST_TOKEN} localhost"]
"#;
        let Error::Schema(schema_err) = parse_schema(source, "test").unwrap_err() else {
            panic!("expected schema error");
        };
        assert_eq!(schema_err.violations.len(), 2, "{}", schema_err);
        assert!(schema_err
            .violations
            .contains(&Violation::UndeclaredHealthcheckVariable {
                service: "api".into(),
                variable: "GHOST_TOKEN".into()
            }));
        assert!(schema_err
            .violations
            .iter()
            .any(|v| matches!(v, Violation::OutOfRange { field, .. } if field == "policy.grace_window_hours")));
    }

    #[test]
    fn test_empty_document_rejected() {
        assert!(matches!(
            parse_schema("", "test").unwrap_err(),
            Error::Malformed { .. }
        ));
    }

    #[test]
    fn test_load_from_missing_path_names_path() {
        let err = load_schema(Path::new("/nonexistent/keel.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/keel.yaml"));
    }
}
