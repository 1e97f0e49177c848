//! Workload Deployment for the instance.
//!
//! The pod template embeds the config hash and the consolidated plugin
//! list as environment variables. Both are pure functions of desired
//! state, so any change to either makes the template differ byte-for-byte
//! and forces a rolling update.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapEnvSource, ConfigMapVolumeSource, Container, ContainerPort, EnvFromSource, EnvVar,
    HTTPGetAction, PodSpec, PodTemplateSpec, Probe, SecretEnvSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use vigil_common::crd::{PluginRequirement, Vigil, WorkloadSpec};
use vigil_common::{ENV_CONFIG_HASH, ENV_INSTALL_PLUGINS, INSTANCE_HTTP_PORT};

use super::{config_map_name, datasource_config_map_name, labels, object_meta};
use crate::plugins::install_list;

/// Container image used when the spec does not name one
pub const DEFAULT_IMAGE: &str = "ghcr.io/vigil-dev/vigil:1.4.2";

const CONFIG_MOUNT_PATH: &str = "/etc/vigil";
const DATASOURCE_MOUNT_PATH: &str = "/etc/vigil/provisioning/datasources";

/// Desired Deployment for the instance
pub fn deployment(
    namespace: &str,
    instance: &str,
    vigil: &Vigil,
    config_hash: Option<&str>,
    plugins: &[PluginRequirement],
) -> Deployment {
    let workload = vigil.spec.workload.clone().unwrap_or_default();

    Deployment {
        metadata: object_meta(namespace, instance, instance),
        spec: Some(DeploymentSpec {
            replicas: Some(workload.replicas.unwrap_or(1)),
            selector: LabelSelector {
                match_labels: Some(labels(instance)),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                    labels: Some(labels(instance)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(instance.to_string()),
                    containers: vec![container(&workload, config_hash, plugins)],
                    volumes: Some(volumes(instance)),
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    }
}

fn container(
    workload: &WorkloadSpec,
    config_hash: Option<&str>,
    plugins: &[PluginRequirement],
) -> Container {
    let mut env = Vec::new();
    if let Some(hash) = config_hash {
        env.push(EnvVar {
            name: ENV_CONFIG_HASH.to_string(),
            value: Some(hash.to_string()),
            ..EnvVar::default()
        });
    }
    if !plugins.is_empty() {
        env.push(EnvVar {
            name: ENV_INSTALL_PLUGINS.to_string(),
            value: Some(install_list(plugins)),
            ..EnvVar::default()
        });
    }

    Container {
        name: "vigil".to_string(),
        image: Some(
            workload
                .image
                .clone()
                .unwrap_or_else(|| DEFAULT_IMAGE.to_string()),
        ),
        ports: Some(vec![ContainerPort {
            name: Some("http".to_string()),
            container_port: INSTANCE_HTTP_PORT,
            ..ContainerPort::default()
        }]),
        env: (!env.is_empty()).then_some(env),
        env_from: env_from(workload),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/api/health".to_string()),
                port: IntOrString::Int(INSTANCE_HTTP_PORT),
                ..HTTPGetAction::default()
            }),
            initial_delay_seconds: Some(5),
            period_seconds: Some(10),
            ..Probe::default()
        }),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "config".to_string(),
                mount_path: CONFIG_MOUNT_PATH.to_string(),
                ..VolumeMount::default()
            },
            VolumeMount {
                name: "datasources".to_string(),
                mount_path: DATASOURCE_MOUNT_PATH.to_string(),
                ..VolumeMount::default()
            },
        ]),
        ..Container::default()
    }
}

fn env_from(workload: &WorkloadSpec) -> Option<Vec<EnvFromSource>> {
    let mut sources = Vec::new();
    for secret in &workload.env_from_secrets {
        sources.push(EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: secret.clone(),
                optional: Some(false),
            }),
            ..EnvFromSource::default()
        });
    }
    for config_map in &workload.env_from_config_maps {
        sources.push(EnvFromSource {
            config_map_ref: Some(ConfigMapEnvSource {
                name: config_map.clone(),
                optional: Some(false),
            }),
            ..EnvFromSource::default()
        });
    }
    (!sources.is_empty()).then_some(sources)
}

fn volumes(instance: &str) -> Vec<Volume> {
    vec![
        Volume {
            name: "config".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: config_map_name(instance),
                ..ConfigMapVolumeSource::default()
            }),
            ..Volume::default()
        },
        Volume {
            name: "datasources".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: datasource_config_map_name(instance),
                ..ConfigMapVolumeSource::default()
            }),
            ..Volume::default()
        },
    ]
}
