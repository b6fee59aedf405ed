//! ManifestCompiler: schema + environment label → ManifestArtifact
//!
//! Pipeline for one environment:
//! 1. select services whose profiles intersect the overlay's (or that have none)
//! 2. apply overlay overrides, whole-field replace
//! 3. inject resource policy (GPU reservations only under the gpu profile)
//! 4. bind every variable (secret → interpolation, non-secret → literal)
//!
//! Compilation is pure: no clock, no filesystem, no randomness.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info};

use keel_common::schema::{
    EnvironmentOverlay, Schema, ServiceDefinition, ServiceOverride, VariableSpec,
};
use keel_common::EnvironmentLabel;

use crate::artifact::{CompiledService, DependencyCondition, ManifestArtifact, VariableBinding};
use crate::error::{CompileError, CompileIssue};
use crate::template::{DefaultTemplates, TemplateContext};

/// Compiles one schema into per-environment manifests
pub struct ManifestCompiler<'a> {
    schema: &'a Schema,
    templates: DefaultTemplates,
}

impl<'a> ManifestCompiler<'a> {
    /// Create a compiler for a validated schema
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            templates: DefaultTemplates::new(),
        }
    }

    /// Compile the manifest for `label`
    pub fn compile(&self, label: EnvironmentLabel) -> Result<ManifestArtifact, CompileError> {
        let overlay = self
            .schema
            .overlay(label)
            .ok_or_else(|| CompileError::single(label, CompileIssue::MissingOverlay))?;

        let mut issues = Vec::new();

        let tags = self.schema.profile_tags();
        for profile in &overlay.profiles {
            if !tags.contains(profile.as_str()) {
                issues.push(CompileIssue::UnresolvedProfile {
                    profile: profile.clone(),
                });
            }
        }

        let selected: Vec<&ServiceDefinition> = self
            .schema
            .services
            .iter()
            .filter(|s| is_selected(s, overlay))
            .collect();
        let selected_names: BTreeSet<&str> = selected.iter().map(|s| s.name.as_str()).collect();

        for target in overlay.overrides.keys() {
            if self.schema.service(target).is_none() {
                issues.push(CompileIssue::MissingOverrideTarget {
                    service: target.clone(),
                });
            } else if !selected_names.contains(target.as_str()) {
                debug!(
                    environment = %label,
                    service = %target,
                    "skipping override for service not active in this environment"
                );
            }
        }

        let mut services: Vec<CompiledService> = selected
            .iter()
            .map(|service| {
                self.compile_service(service, overlay.overrides.get(&service.name), overlay, &mut issues)
            })
            .collect();

        // Conditions depend on the dependency's effective health check, which
        // is only known once every override has been applied.
        let healthy: BTreeSet<String> = services
            .iter()
            .filter(|s| s.healthcheck.is_some())
            .map(|s| s.name.clone())
            .collect();
        for (service, definition) in services.iter_mut().zip(&selected) {
            for dependency in &definition.depends_on {
                if !selected_names.contains(dependency.as_str()) {
                    issues.push(CompileIssue::InactiveDependency {
                        service: service.name.clone(),
                        dependency: dependency.clone(),
                    });
                    continue;
                }
                let condition = if healthy.contains(dependency) {
                    DependencyCondition::ServiceHealthy
                } else {
                    DependencyCondition::ServiceStarted
                };
                service.depends_on.push((dependency.clone(), condition));
            }
        }

        if !issues.is_empty() {
            return Err(CompileError {
                environment: label,
                issues,
            });
        }

        services.sort_by(|a, b| a.name.cmp(&b.name));

        let networks = services
            .iter()
            .flat_map(|s| s.networks.iter())
            .filter_map(|n| self.schema.networks.get_key_value(n))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let volumes = services
            .iter()
            .flat_map(|s| s.volumes.iter())
            .filter_map(|m| m.split_once(':').map(|(source, _)| source))
            .filter_map(|source| self.schema.volumes.get_key_value(source))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        debug!(
            environment = %label,
            services = services.len(),
            "compiled manifest"
        );

        Ok(ManifestArtifact {
            environment: label,
            project: self.schema.project.clone(),
            schema_digest: self.schema.digest.clone(),
            services,
            networks,
            volumes,
        })
    }

    fn compile_service(
        &self,
        service: &ServiceDefinition,
        overrides: Option<&ServiceOverride>,
        overlay: &EnvironmentOverlay,
        issues: &mut Vec<CompileIssue>,
    ) -> CompiledService {
        let empty = ServiceOverride::default();
        let o = overrides.unwrap_or(&empty);

        let resources = o.resources.as_ref().unwrap_or(&service.resources);
        let gpus = if overlay.gpu_enabled() {
            resources.gpus
        } else {
            0
        };

        for variable in o.variables.keys() {
            if !service.environment.contains_key(variable) {
                issues.push(CompileIssue::UnknownOverrideVariable {
                    service: service.name.clone(),
                    variable: variable.clone(),
                });
            }
        }

        let ctx = TemplateContext {
            environment: overlay.label.as_str(),
            service: &service.name,
            project: &self.schema.project,
        };
        let variables = service
            .environment
            .iter()
            .filter_map(|(name, spec)| {
                self.bind_variable(&service.name, name, spec, o.variables.get(name), &ctx, issues)
                    .map(|binding| (name.clone(), binding))
            })
            .collect::<BTreeMap<_, _>>();

        CompiledService {
            name: service.name.clone(),
            image: o.image.clone().unwrap_or_else(|| service.image.clone()),
            command: o.command.clone().or_else(|| service.command.clone()),
            ports: o.ports.clone().unwrap_or_else(|| service.ports.clone()),
            volumes: o.volumes.clone().unwrap_or_else(|| service.volumes.clone()),
            networks: o.networks.clone().unwrap_or_else(|| service.networks.clone()),
            depends_on: Vec::new(),
            restart: o.restart.clone().or_else(|| service.restart.clone()),
            memory: resources.memory.clone(),
            gpus,
            healthcheck: o.healthcheck.clone().or_else(|| service.healthcheck.clone()),
            variables,
        }
    }

    fn bind_variable(
        &self,
        service: &str,
        name: &str,
        spec: &VariableSpec,
        override_value: Option<&String>,
        ctx: &TemplateContext<'_>,
        issues: &mut Vec<CompileIssue>,
    ) -> Option<VariableBinding> {
        if spec.secret {
            if override_value.is_some() || spec.default.is_some() {
                issues.push(CompileIssue::SecretWithFallback {
                    service: service.to_string(),
                    variable: name.to_string(),
                });
                return None;
            }
            // Validated schemas always carry a class; an empty one fails policy lookup.
            let class = spec.class.clone().unwrap_or_default();
            return Some(VariableBinding::Secret {
                logical: spec.logical_name(name).to_string(),
                class,
                required: spec.required,
            });
        }

        match override_value.or(spec.default.as_ref()) {
            Some(template) => match self.templates.render(template, ctx) {
                Ok(value) => Some(VariableBinding::Literal { value }),
                Err(message) => {
                    issues.push(CompileIssue::Template {
                        service: service.to_string(),
                        variable: name.to_string(),
                        message,
                    });
                    None
                }
            },
            None => Some(VariableBinding::Unset {
                required: spec.required,
            }),
        }
    }
}

fn is_selected(service: &ServiceDefinition, overlay: &EnvironmentOverlay) -> bool {
    service.profiles.is_empty() || !service.profiles.is_disjoint(&overlay.profiles)
}

/// Compile the manifest for one environment
pub fn compile(schema: &Schema, label: EnvironmentLabel) -> Result<ManifestArtifact, CompileError> {
    ManifestCompiler::new(schema).compile(label)
}

/// Compile every environment the schema declares an overlay for.
///
/// Environments compile concurrently on the blocking pool; results are
/// returned in label order.
pub async fn compile_all(
    schema: Arc<Schema>,
) -> Vec<(EnvironmentLabel, Result<ManifestArtifact, CompileError>)> {
    let labels: Vec<EnvironmentLabel> = schema.environments.keys().copied().collect();
    let tasks = labels.iter().map(|&label| {
        let schema = Arc::clone(&schema);
        tokio::task::spawn_blocking(move || compile(&schema, label))
    });
    let results = join_all(tasks).await;

    let compiled: Vec<_> = labels
        .into_iter()
        .zip(results)
        .map(|(label, joined)| {
            let result = joined.unwrap_or_else(|e| {
                Err(CompileError::single(
                    label,
                    CompileIssue::Aborted {
                        message: e.to_string(),
                    },
                ))
            });
            (label, result)
        })
        .collect();
    info!(
        environments = compiled.len(),
        failed = compiled.iter().filter(|(_, r)| r.is_err()).count(),
        "compiled all environments"
    );
    compiled
}
