use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource, ObjectFieldSelector, PodSpec,
    PodTemplateSpec, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use super::config::{configmap_name, CONFIG_MOUNT_PATH};
use crate::api::{PageServer, PageServerProfile};
use crate::util::meta::{controller_owner_ref, object_labels};

const TLS_MOUNT_PATH: &str = "/etc/pageserver/certs";

fn pod_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "pageserver".to_string()),
        ("component".to_string(), "pageserver-statefulset".to_string()),
    ])
}

fn downward_env() -> Vec<EnvVar> {
    let field_env = |name: &str, path: &str| EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };
    vec![
        field_env("POD_NAME", "metadata.name"),
        field_env("POD_NAMESPACE", "metadata.namespace"),
    ]
}

/// Init container writing the pod's identity file next to the mounted config.
fn identity_init_container(image: &str) -> Container {
    Container {
        name: "pageserver-init".to_string(),
        image: Some(image.to_string()),
        command: Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("echo \"id=$(hostname)\" > {CONFIG_MOUNT_PATH}/identity.toml"),
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: "config".to_string(),
            mount_path: CONFIG_MOUNT_PATH.to_string(),
            read_only: Some(false),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

pub fn desired_statefulset(ps: &PageServer, psp: &PageServerProfile) -> StatefulSet {
    let spec = &psp.spec;
    let cpf = &spec.common;
    let image = cpf.image();
    let security = spec.security.clone().unwrap_or_default();

    let replicas = ps
        .spec
        .replicas
        .unwrap_or(spec.min_replicas.unwrap_or(1) as i32)
        .max(1);

    let labels = pod_labels();

    let mut mounts = spec.volume_mounts.clone().unwrap_or_default();
    let mut volumes = spec.volumes.clone().unwrap_or_default();
    let mut claim_templates = Vec::new();

    if let Some(storage) = &spec.storage {
        if let Some(volume) = storage.data_volume() {
            volumes.push(volume);
        } else {
            mounts.push(VolumeMount {
                name: "data".to_string(),
                mount_path: "/data".to_string(),
                ..Default::default()
            });
            claim_templates.push(
                storage
                    .volume_claim_template
                    .clone()
                    .unwrap_or_default()
                    .claim_template(),
            );
        }
    }

    mounts.push(VolumeMount {
        name: "config".to_string(),
        mount_path: CONFIG_MOUNT_PATH.to_string(),
        read_only: Some(false),
        ..Default::default()
    });
    volumes.push(Volume {
        name: "config".to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: configmap_name(&ps.name_any()),
            ..Default::default()
        }),
        ..Default::default()
    });

    if security.enable_tls {
        mounts.push(VolumeMount {
            name: "tls-certs".to_string(),
            mount_path: TLS_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
        let secret_name = security
            .tls_secret_ref
            .as_ref()
            .and_then(|r| r.name.clone())
            .unwrap_or_else(|| format!("{}-tls", ps.name_any()));
        volumes.push(Volume {
            name: "tls-certs".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret_name),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    let container = Container {
        name: "pageserver".to_string(),
        image: Some(image.clone()),
        image_pull_policy: cpf.image_pull_policy.clone(),
        resources: cpf.resources.clone(),
        env: Some(downward_env()),
        ports: Some(vec![
            ContainerPort {
                name: Some("pg".to_string()),
                container_port: 6400,
                ..Default::default()
            },
            ContainerPort {
                name: Some("http".to_string()),
                container_port: 9898,
                ..Default::default()
            },
            ContainerPort {
                name: Some("https".to_string()),
                container_port: 9899,
                ..Default::default()
            },
        ]),
        volume_mounts: Some(mounts),
        ..Default::default()
    };

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(ps.name_any()),
            namespace: ps.namespace(),
            labels: Some(object_labels(ps.labels().clone())),
            owner_references: controller_owner_ref(ps).map(|oref| vec![oref]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            service_name: Some(ps.name_any()),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    init_containers: Some(vec![identity_init_container(&image)]),
                    containers: vec![container],
                    image_pull_secrets: cpf.image_pull_secrets.clone(),
                    node_selector: cpf.node_selector.clone(),
                    affinity: cpf.affinity.clone(),
                    security_context: cpf.security_context.clone(),
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            volume_claim_templates: if claim_templates.is_empty() {
                None
            } else {
                Some(claim_templates)
            },
            persistent_volume_claim_retention_policy: spec.persistent_volume_claim_retention_policy.clone(),
            ..Default::default()
        }),
        ..Default::default()
    }
}
