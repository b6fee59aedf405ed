//! Credential Validator
//!
//! Re-reads rendered values and judges them against the environment's
//! policy. Findings are either errors, which block launch, or warnings,
//! which block only under `--strict`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::debug;

use keel_common::EnvironmentLabel;
use keel_compiler::{ManifestArtifact, VariableBinding};

use crate::error::PolicyError;
use crate::policy::{PolicyEngine, SecretPolicy, Severity};
use crate::renderer::RenderedEnvironmentFile;
use crate::store::{Acceptance, SecretEntry};

/// Values with fewer distinct characters than this are weak
pub const MIN_DISTINCT_CHARS: usize = 4;

/// What a finding is about
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FindingKind {
    /// A required variable has no value
    Unresolved,
    /// An optional variable has no value
    OptionalUnset,
    /// The value is on the placeholder denylist
    Placeholder,
    /// The value is too short, too repetitive, or equals its name
    Weak,
    /// One logical secret rendered with different values
    Inconsistent,
    /// The value is not the store's current version
    StaleSecret,
    /// A rendered file was changed after rendering
    HandEdited,
    /// The manifest on disk differs from a fresh compile
    ManifestDrift,
}

impl FindingKind {
    /// Kebab-case name used in output
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::OptionalUnset => "optional-unset",
            Self::Placeholder => "placeholder",
            Self::Weak => "weak",
            Self::Inconsistent => "inconsistent",
            Self::StaleSecret => "stale-secret",
            Self::HandEdited => "hand-edited",
            Self::ManifestDrift => "manifest-drift",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validation result. Never contains a secret value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Finding {
    /// Error or warning
    pub severity: Severity,
    /// Category
    pub kind: FindingKind,
    /// Environment validated
    pub environment: EnvironmentLabel,
    /// Service, when the finding is about one
    pub service: Option<String>,
    /// Variable or logical secret, when the finding is about one
    pub variable: Option<String>,
    /// Human-readable cause
    pub cause: String,
}

impl Finding {
    /// A finding about one variable of one service
    pub fn variable(
        severity: Severity,
        kind: FindingKind,
        environment: EnvironmentLabel,
        service: &str,
        variable: &str,
        cause: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            kind,
            environment,
            service: Some(service.to_string()),
            variable: Some(variable.to_string()),
            cause: cause.into(),
        }
    }

    /// A rendered file changed by hand
    pub fn hand_edited(environment: EnvironmentLabel, service: &str) -> Self {
        Self {
            severity: Severity::Warning,
            kind: FindingKind::HandEdited,
            environment,
            service: Some(service.to_string()),
            variable: None,
            cause: format!(
                "{}.env was edited after rendering; the next render backs it up and replaces it",
                service
            ),
        }
    }

    /// The manifest on disk is missing or stale
    pub fn manifest_drift(environment: EnvironmentLabel, cause: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            kind: FindingKind::ManifestDrift,
            environment,
            service: None,
            variable: None,
            cause: cause.into(),
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.severity, self.kind, self.environment)?;
        if let Some(variable) = &self.variable {
            write!(f, " {}", variable)?;
        }
        if let Some(service) = &self.service {
            write!(f, " (service {})", service)?;
        }
        write!(f, ": {}", self.cause)
    }
}

/// All findings for one environment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationReport {
    /// Environment validated
    pub environment: EnvironmentLabel,
    /// Findings in discovery order
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    /// Empty report
    pub fn new(environment: EnvironmentLabel) -> Self {
        Self {
            environment,
            findings: Vec::new(),
        }
    }

    /// Add a finding
    pub fn push(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    /// Error findings
    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
    }

    /// Warning findings
    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
    }

    /// Whether the report stops the orchestrator. Under `strict` any
    /// finding blocks.
    pub fn is_blocking(&self, strict: bool) -> bool {
        if strict {
            !self.findings.is_empty()
        } else {
            self.errors().next().is_some()
        }
    }

    /// Findings of one kind
    pub fn of_kind(&self, kind: FindingKind) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.kind == kind)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let errors = self.errors().count();
        let warnings = self.warnings().count();
        write!(
            f,
            "{}: {} error(s), {} warning(s)",
            self.environment, errors, warnings
        )?;
        for finding in &self.findings {
            write!(f, "\n  {}", finding)?;
        }
        Ok(())
    }
}

struct StoreView<'a> {
    entries: &'a BTreeMap<String, SecretEntry>,
    now: DateTime<Utc>,
}

/// Checks rendered values for one compiled environment
pub struct CredentialValidator<'a> {
    policy: &'a PolicyEngine,
    artifact: &'a ManifestArtifact,
    store: Option<StoreView<'a>>,
}

impl<'a> CredentialValidator<'a> {
    /// Validator for `artifact` under `policy`
    pub fn new(policy: &'a PolicyEngine, artifact: &'a ManifestArtifact) -> Self {
        Self {
            policy,
            artifact,
            store: None,
        }
    }

    /// Also check values against the secret store's versions
    pub fn with_store(mut self, entries: &'a BTreeMap<String, SecretEntry>, now: DateTime<Utc>) -> Self {
        self.store = Some(StoreView { entries, now });
        self
    }

    /// Validate a rendered set
    pub fn validate(
        &self,
        files: &[RenderedEnvironmentFile],
    ) -> Result<ValidationReport, PolicyError> {
        let environment = self.artifact.environment;
        let mut report = ValidationReport::new(environment);
        let mut shared: BTreeMap<&str, Vec<(&str, &str, &str)>> = BTreeMap::new();

        for service in &self.artifact.services {
            let file = files.iter().find(|f| f.service == service.name);
            for (variable, binding) in &service.variables {
                let value = file
                    .and_then(|f| f.values.get(variable))
                    .map(|v| v.as_str())
                    .filter(|v| !v.is_empty());

                let (logical, class, required) = match binding {
                    VariableBinding::Literal { .. } => continue,
                    VariableBinding::Unset { required } => {
                        if value.is_none() {
                            report.push(missing(environment, &service.name, variable, None, *required));
                        }
                        continue;
                    }
                    VariableBinding::Secret {
                        logical,
                        class,
                        required,
                    } => (logical.as_str(), class.as_str(), *required),
                };

                let Some(value) = value else {
                    report.push(missing(environment, &service.name, variable, Some(logical), required));
                    continue;
                };

                let policy = self.policy.policy_for_secret(environment, logical, class)?;
                shared
                    .entry(logical)
                    .or_default()
                    .push((service.name.as_str(), variable.as_str(), value));

                if self.policy.is_placeholder(value) {
                    report.push(Finding::variable(
                        policy.severity(),
                        FindingKind::Placeholder,
                        environment,
                        &service.name,
                        variable,
                        format!("value is a placeholder ({} policy)", policy.class),
                    ));
                } else if let Some(reason) = weakness(value, variable, logical, &policy) {
                    report.push(Finding::variable(
                        policy.severity(),
                        FindingKind::Weak,
                        environment,
                        &service.name,
                        variable,
                        reason,
                    ));
                }

                if let Some(finding) = self.staleness(&service.name, variable, logical, value, &policy) {
                    report.push(finding);
                }
            }
        }

        for (logical, uses) in shared {
            let distinct: BTreeSet<&str> = uses.iter().map(|(_, _, v)| *v).collect();
            if distinct.len() > 1 {
                let consumers: Vec<String> = uses
                    .iter()
                    .map(|(service, variable, _)| format!("{}/{}", service, variable))
                    .collect();
                report.push(Finding {
                    severity: Severity::Error,
                    kind: FindingKind::Inconsistent,
                    environment,
                    service: None,
                    variable: Some(logical.to_string()),
                    cause: format!(
                        "shared secret rendered with {} different values across {}",
                        distinct.len(),
                        consumers.join(", ")
                    ),
                });
            }
        }

        debug!(
            environment = %environment,
            findings = report.findings.len(),
            "validated rendered credentials"
        );
        Ok(report)
    }

    fn staleness(
        &self,
        service: &str,
        variable: &str,
        logical: &str,
        value: &str,
        policy: &SecretPolicy,
    ) -> Option<Finding> {
        let store = self.store.as_ref()?;
        let (severity, cause) = match store.entries.get(logical) {
            None => (policy.severity(), "value was not issued by the secret store".to_string()),
            Some(entry) => match entry.accepts(value, store.now) {
                Acceptance::Current => return None,
                Acceptance::Grace => (
                    Severity::Warning,
                    format!(
                        "value is the previous version of '{}', valid only within its grace window; re-render",
                        logical
                    ),
                ),
                Acceptance::Unknown => (
                    policy.severity(),
                    format!("value does not match any live version of '{}'", logical),
                ),
            },
        };
        Some(Finding::variable(
            severity,
            FindingKind::StaleSecret,
            self.artifact.environment,
            service,
            variable,
            cause,
        ))
    }
}

fn missing(
    environment: EnvironmentLabel,
    service: &str,
    variable: &str,
    logical: Option<&str>,
    required: bool,
) -> Finding {
    if !required {
        return Finding::variable(
            Severity::Warning,
            FindingKind::OptionalUnset,
            environment,
            service,
            variable,
            "optional variable is not set",
        );
    }
    let cause = match logical {
        Some(secret) if secret != variable => {
            format!("required variable has no value (secret '{}' is not set)", secret)
        }
        _ => "required variable has no value".to_string(),
    };
    Finding::variable(
        Severity::Error,
        FindingKind::Unresolved,
        environment,
        service,
        variable,
        cause,
    )
}

/// Why a value is weak, if it is
fn weakness(value: &str, variable: &str, logical: &str, policy: &SecretPolicy) -> Option<String> {
    if value.chars().count() < policy.min_length {
        return Some(format!(
            "value is shorter than the minimum length {}",
            policy.min_length
        ));
    }
    if value.eq_ignore_ascii_case(variable) || value.eq_ignore_ascii_case(logical) {
        return Some("value equals the variable name".to_string());
    }
    let distinct: BTreeSet<char> = value.chars().collect();
    if distinct.len() < MIN_DISTINCT_CHARS {
        return Some(format!(
            "value has fewer than {} distinct characters",
            MIN_DISTINCT_CHARS
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use keel_common::schema::parse_schema;
    use keel_compiler::compile;
    use rstest::rstest;
    use zeroize::Zeroizing;

    const SCHEMA: &str = r#"
project: shop
services:
  - name: db
    image: postgres:16
    environment:
      POSTGRES_PASSWORD: { secret: true, class: core-credential, shares: DB_PASSWORD }
  - name: api
    image: shop/api
    environment:
      DB_PASSWORD: { secret: true, class: core-credential }
      STRIPE_KEY: { secret: true, class: external-api-key, required: false }
      LOG_LEVEL: { default: info }
environments:
  development: {}
  staging: {}
  production: {}
"#;

    const GOOD: &str = "Vq7mZ2xLp9RtK4wNc8HbYd3F";

    fn artifact(label: EnvironmentLabel) -> ManifestArtifact {
        compile(&parse_schema(SCHEMA, "test").unwrap(), label).unwrap()
    }

    fn files(
        label: EnvironmentLabel,
        api_password: &str,
        db_password: &str,
    ) -> Vec<RenderedEnvironmentFile> {
        let file = |service: &str, pairs: &[(&str, &str)]| RenderedEnvironmentFile {
            environment: label,
            service: service.to_string(),
            values: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), Zeroizing::new(v.to_string())))
                .collect(),
        };
        vec![
            file("api", &[("DB_PASSWORD", api_password), ("LOG_LEVEL", "info")]),
            file("db", &[("POSTGRES_PASSWORD", db_password)]),
        ]
    }

    fn validate(label: EnvironmentLabel, files: &[RenderedEnvironmentFile]) -> ValidationReport {
        let artifact = artifact(label);
        let engine = PolicyEngine::default();
        CredentialValidator::new(&engine, &artifact)
            .validate(files)
            .unwrap()
    }

    #[test]
    fn test_good_values_only_warn_about_optional() {
        let report = validate(EnvironmentLabel::Production, &files(EnvironmentLabel::Production, GOOD, GOOD));
        assert!(!report.is_blocking(false));
        let kinds: Vec<_> = report.findings.iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![FindingKind::OptionalUnset]);
        assert!(report.is_blocking(true));
    }

    #[rstest]
    #[case::production(EnvironmentLabel::Production, Severity::Error)]
    #[case::staging(EnvironmentLabel::Staging, Severity::Error)]
    #[case::development(EnvironmentLabel::Development, Severity::Warning)]
    fn test_placeholder_core_credential(#[case] label: EnvironmentLabel, #[case] expected: Severity) {
        let report = validate(label, &files(label, "changeme", "changeme"));
        let placeholders: Vec<_> = report.of_kind(FindingKind::Placeholder).collect();
        assert_eq!(placeholders.len(), 2);
        assert!(placeholders.iter().all(|f| f.severity == expected));
        assert_eq!(report.is_blocking(false), expected == Severity::Error);
    }

    #[rstest]
    #[case::development(EnvironmentLabel::Development, Severity::Warning)]
    #[case::staging(EnvironmentLabel::Staging, Severity::Warning)]
    #[case::production(EnvironmentLabel::Production, Severity::Error)]
    fn test_placeholder_external_key(#[case] label: EnvironmentLabel, #[case] expected: Severity) {
        let mut rendered = files(label, GOOD, GOOD);
        rendered[0].values.insert(
            "STRIPE_KEY".to_string(),
            Zeroizing::new("your-api-key-here-0000".to_string()),
        );
        let report = validate(label, &rendered);

        let placeholders: Vec<_> = report.of_kind(FindingKind::Placeholder).collect();
        assert_eq!(placeholders.len(), 1, "{}", report);
        assert_eq!(placeholders[0].variable.as_deref(), Some("STRIPE_KEY"));
        assert_eq!(placeholders[0].severity, expected);
        assert_eq!(report.is_blocking(false), expected == Severity::Error);
        assert!(report.is_blocking(true));
    }

    #[rstest]
    #[case::too_short("Ab3dEf9h")]
    #[case::equals_name("DB_PASSWORD")]
    #[case::repetitive("abababababababababab")]
    fn test_weak_values(#[case] value: &str) {
        let report = validate(EnvironmentLabel::Production, &files(EnvironmentLabel::Production, value, value));
        assert_eq!(report.of_kind(FindingKind::Weak).count(), 2, "{}", report);
        assert!(report.is_blocking(false));
    }

    #[test]
    fn test_inconsistent_shared_secret_is_always_an_error() {
        let other = "Pz4nQ8wLs2KxV7mRt9JcBy6H";
        let report = validate(EnvironmentLabel::Development, &files(EnvironmentLabel::Development, GOOD, other));
        let inconsistent: Vec<_> = report.of_kind(FindingKind::Inconsistent).collect();
        assert_eq!(inconsistent.len(), 1);
        assert_eq!(inconsistent[0].severity, Severity::Error);
        assert_eq!(inconsistent[0].variable.as_deref(), Some("DB_PASSWORD"));
        assert!(inconsistent[0].cause.contains("api/DB_PASSWORD"));
        assert!(inconsistent[0].cause.contains("db/POSTGRES_PASSWORD"));
    }

    #[test]
    fn test_missing_required_is_unresolved() {
        let mut rendered = files(EnvironmentLabel::Production, GOOD, GOOD);
        rendered[0].values.remove("DB_PASSWORD");
        let report = validate(EnvironmentLabel::Production, &rendered);
        let unresolved: Vec<_> = report.of_kind(FindingKind::Unresolved).collect();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].variable.as_deref(), Some("DB_PASSWORD"));
    }

    #[test]
    fn test_store_versions_are_checked() {
        let label = EnvironmentLabel::Production;
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let old = "Hq2mW8zKx4LpR7tNc9VbYd3F";
        let entries = BTreeMap::from([(
            "DB_PASSWORD".to_string(),
            SecretEntry {
                value: Zeroizing::new(GOOD.to_string()),
                version: 2,
                created_at: now,
                rotation_due: None,
                previous: Some(crate::store::PreviousValue {
                    value: Zeroizing::new(old.to_string()),
                    version: 1,
                    retired_at: now,
                    valid_until: now + chrono::Duration::hours(24),
                }),
            },
        )]);
        let artifact = artifact(label);
        let engine = PolicyEngine::default();
        let validator = CredentialValidator::new(&engine, &artifact).with_store(&entries, now);

        let current = validator.validate(&files(label, GOOD, GOOD)).unwrap();
        assert_eq!(current.of_kind(FindingKind::StaleSecret).count(), 0);

        let grace = validator.validate(&files(label, old, old)).unwrap();
        assert!(grace
            .of_kind(FindingKind::StaleSecret)
            .all(|f| f.severity == Severity::Warning));
        assert!(!grace.is_blocking(false));

        let forged = "Xw3nB7qLm2RzK8tPc4VhYd9G";
        let unknown = validator.validate(&files(label, forged, forged)).unwrap();
        assert_eq!(unknown.of_kind(FindingKind::StaleSecret).count(), 2);
        assert!(unknown.is_blocking(false));
    }

    #[test]
    fn test_findings_never_contain_values() {
        let report = validate(
            EnvironmentLabel::Production,
            &files(EnvironmentLabel::Production, "Ab3dEf9h", "Zz9yXx8w"),
        );
        let text = report.to_string();
        assert!(!text.contains("Ab3dEf9h"));
        assert!(!text.contains("Zz9yXx8w"));
    }
}
