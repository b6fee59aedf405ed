//! Compose document emission
//!
//! Serializes a [`ManifestArtifact`] to the compose file format. Every map
//! is a `BTreeMap` and every list keeps artifact order, so identical input
//! always yields identical bytes.

use std::collections::BTreeMap;

use serde::Serialize;

use keel_common::schema::{HealthCheck, NetworkSpec, VolumeSpec};

use crate::artifact::{CompiledService, ManifestArtifact};

#[derive(Serialize)]
struct ComposeFile<'a> {
    name: String,
    services: BTreeMap<&'a str, ComposeService<'a>>,
    #[serde(skip_serializing_if = "map_is_empty")]
    networks: &'a BTreeMap<String, NetworkSpec>,
    #[serde(skip_serializing_if = "map_is_empty")]
    volumes: &'a BTreeMap<String, VolumeSpec>,
}

#[derive(Serialize)]
struct ComposeService<'a> {
    image: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<&'a Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    restart: Option<&'a str>,
    #[serde(skip_serializing_if = "slice_is_empty")]
    ports: &'a [String],
    #[serde(skip_serializing_if = "slice_is_empty")]
    volumes: &'a [String],
    #[serde(skip_serializing_if = "slice_is_empty")]
    networks: &'a [String],
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    depends_on: BTreeMap<&'a str, DependsOn>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    environment: BTreeMap<&'a str, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    healthcheck: Option<ComposeHealthCheck<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deploy: Option<Deploy<'a>>,
}

fn map_is_empty<K, V>(map: &&BTreeMap<K, V>) -> bool {
    map.is_empty()
}

fn slice_is_empty<T>(slice: &&[T]) -> bool {
    slice.is_empty()
}

#[derive(Serialize)]
struct DependsOn {
    condition: &'static str,
}

#[derive(Serialize)]
struct ComposeHealthCheck<'a> {
    test: &'a [String],
    interval: String,
    timeout: String,
    retries: u32,
    start_period: String,
}

impl<'a> From<&'a HealthCheck> for ComposeHealthCheck<'a> {
    fn from(h: &'a HealthCheck) -> Self {
        Self {
            test: &h.test,
            interval: format!("{}s", h.interval_secs),
            timeout: format!("{}s", h.timeout_secs),
            retries: h.retries,
            start_period: format!("{}s", h.start_period_secs),
        }
    }
}

#[derive(Serialize)]
struct Deploy<'a> {
    resources: DeployResources<'a>,
}

#[derive(Serialize)]
struct DeployResources<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    limits: Option<Limits<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reservations: Option<Reservations>,
}

#[derive(Serialize)]
struct Limits<'a> {
    memory: &'a str,
}

#[derive(Serialize)]
struct Reservations {
    devices: Vec<Device>,
}

#[derive(Serialize)]
struct Device {
    driver: &'static str,
    count: u32,
    capabilities: [&'static str; 1],
}

fn deploy(service: &CompiledService) -> Option<Deploy<'_>> {
    let limits = service
        .memory
        .as_deref()
        .map(|memory| Limits { memory });
    let reservations = (service.gpus > 0).then(|| Reservations {
        devices: vec![Device {
            driver: "nvidia",
            count: service.gpus,
            capabilities: ["gpu"],
        }],
    });
    if limits.is_none() && reservations.is_none() {
        return None;
    }
    Some(Deploy {
        resources: DeployResources {
            limits,
            reservations,
        },
    })
}

fn compose_service(service: &CompiledService) -> ComposeService<'_> {
    ComposeService {
        image: &service.image,
        command: service.command.as_ref(),
        restart: service.restart.as_deref(),
        ports: &service.ports,
        volumes: &service.volumes,
        networks: &service.networks,
        depends_on: service
            .depends_on
            .iter()
            .map(|(name, condition)| {
                (
                    name.as_str(),
                    DependsOn {
                        condition: condition.as_str(),
                    },
                )
            })
            .collect(),
        environment: service
            .variables
            .iter()
            .map(|(name, binding)| (name.as_str(), binding.manifest_value(name)))
            .collect(),
        healthcheck: service.healthcheck.as_ref().map(ComposeHealthCheck::from),
        deploy: deploy(service),
    }
}

/// Header comment naming the schema digest and environment
pub fn header(artifact: &ManifestArtifact) -> String {
    format!(
        "# Generated by keel from schema sha256:{digest}\n\
         # environment: {env}\n\
         # Do not edit. Regenerate with: keel generate-compose --environment {env}\n",
        digest = artifact.schema_digest,
        env = artifact.environment,
    )
}

/// Serialize the artifact to a compose document, header included
pub fn to_compose_yaml(artifact: &ManifestArtifact) -> Result<String, serde_yaml::Error> {
    let file = ComposeFile {
        name: artifact.project_name(),
        services: artifact
            .services
            .iter()
            .map(|s| (s.name.as_str(), compose_service(s)))
            .collect(),
        networks: &artifact.networks,
        volumes: &artifact.volumes,
    };
    let body = serde_yaml::to_string(&file)?;
    Ok(format!("{}{}", header(artifact), body))
}
