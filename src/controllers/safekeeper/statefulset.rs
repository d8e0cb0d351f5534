use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ObjectFieldSelector, PodSpec, PodTemplateSpec,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use super::args::build_safekeeper_args;
use crate::api::{SafeKeeper, SafeKeeperProfile};
use crate::util::meta::{controller_owner_ref, object_labels};

const SAFEKEEPER_BINARY: &str = "/usr/local/bin/safekeeper";

/// Shell fragment validating that the pod hostname ends in a numeric ordinal.
const ORDINAL_CHECK: &str = r#"ORDINAL=${HOSTNAME##*-}
if ! echo "$ORDINAL" | grep -qE '^[0-9]+$'; then
  echo "Failed to extract ordinal from pod name: $HOSTNAME" >&2
  exit 1
fi
echo "Pod: $HOSTNAME, Ordinal: $ORDINAL" >&2"#;

fn pod_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "safekeeper".to_string()),
        ("component".to_string(), "safekeeper-statefulset".to_string()),
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
        field_env("HOSTNAME", "metadata.name"),
    ]
}

/// Command wrapper substituting the pod ordinal as the safekeeper id at
/// process start. Pod ordinal and replica id are identical by contract, so a
/// restarted pod keeps its id without any state held by the operator.
pub(crate) fn safekeeper_command(cluster_name: &str, profile: &SafeKeeperProfile) -> Vec<String> {
    let args = build_safekeeper_args(cluster_name, &profile.spec.options);
    vec![
        "/bin/bash".to_string(),
        "-c".to_string(),
        format!("exec {SAFEKEEPER_BINARY} --id=${{HOSTNAME##*-}} {}", args.join(" ")),
    ]
}

pub fn desired_statefulset(sk: &SafeKeeper, skp: &SafeKeeperProfile) -> StatefulSet {
    let spec = &skp.spec;
    let cpf = &spec.common;
    let image = cpf.image();

    // WAL quorum never drops below three replicas
    let replicas = sk
        .spec
        .replicas
        .unwrap_or(spec.min_replicas.unwrap_or(3) as i32)
        .max(3);

    let labels = pod_labels();
    let cluster_name = sk.labels().get("cluster").cloned().unwrap_or_default();

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

    let init_container = Container {
        name: "safekeeper-init".to_string(),
        image: Some(image.clone()),
        command: Some(vec!["sh".to_string(), "-c".to_string(), ORDINAL_CHECK.to_string()]),
        env: Some(downward_env()),
        ..Default::default()
    };

    let container = Container {
        name: "safekeeper".to_string(),
        image: Some(image),
        image_pull_policy: cpf.image_pull_policy.clone(),
        resources: cpf.resources.clone(),
        command: Some(safekeeper_command(&cluster_name, skp)),
        env: Some(downward_env()),
        ports: Some(vec![
            ContainerPort {
                name: Some("pg".to_string()),
                container_port: 5432,
                ..Default::default()
            },
            ContainerPort {
                name: Some("http".to_string()),
                container_port: 9898,
                ..Default::default()
            },
        ]),
        volume_mounts: if mounts.is_empty() { None } else { Some(mounts) },
        ..Default::default()
    };

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(sk.name_any()),
            namespace: sk.namespace(),
            labels: Some(object_labels(sk.labels().clone())),
            owner_references: controller_owner_ref(sk).map(|oref| vec![oref]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            service_name: Some("safekeeper".to_string()),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    init_containers: Some(vec![init_container]),
                    containers: vec![container],
                    image_pull_secrets: cpf.image_pull_secrets.clone(),
                    node_selector: cpf.node_selector.clone(),
                    affinity: cpf.affinity.clone(),
                    security_context: cpf.security_context.clone(),
                    volumes: if volumes.is_empty() { None } else { Some(volumes) },
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ProfileReference, SafeKeeperProfileSpec, SafeKeeperSpec, StorageSpec};

    fn safekeeper() -> SafeKeeper {
        SafeKeeper {
            metadata: ObjectMeta {
                name: Some("c1".into()),
                namespace: Some("ns1".into()),
                uid: Some("uid-1".into()),
                labels: Some(BTreeMap::from([("cluster".to_string(), "c1".to_string())])),
                ..Default::default()
            },
            spec: SafeKeeperSpec {
                profile_ref: ProfileReference::new("default-safekeeper", "op-ns"),
                replicas: None,
            },
            status: None,
        }
    }

    fn profile(spec: SafeKeeperProfileSpec) -> SafeKeeperProfile {
        SafeKeeperProfile::new("default-safekeeper", spec)
    }

    fn default_profile() -> SafeKeeperProfile {
        profile(serde_json::from_str("{}").unwrap())
    }

    #[test]
    fn replicas_floor_at_three() {
        let sts = desired_statefulset(&safekeeper(), &default_profile());
        assert_eq!(sts.spec.as_ref().unwrap().replicas, Some(3));

        let undersized = profile(serde_json::from_str(r#"{"minReplicas": 1}"#).unwrap());
        let sts = desired_statefulset(&safekeeper(), &undersized);
        assert_eq!(sts.spec.as_ref().unwrap().replicas, Some(3));

        let mut sk = safekeeper();
        sk.spec.replicas = Some(5);
        let sts = desired_statefulset(&sk, &default_profile());
        assert_eq!(sts.spec.as_ref().unwrap().replicas, Some(5));
    }

    #[test]
    fn command_substitutes_the_pod_ordinal() {
        let command = safekeeper_command("c1", &default_profile());
        assert_eq!(command[0], "/bin/bash");
        assert_eq!(command[1], "-c");
        assert!(command[2].starts_with("exec /usr/local/bin/safekeeper --id=${HOSTNAME##*-} "));
        assert!(command[2].contains("--broker_endpoint=http://c1-broker:50051"));
        assert!(command[2].contains("--listen_pg=0.0.0.0:5432"));
        assert!(command[2].contains("--listen_http=0.0.0.0:9898"));
    }

    #[test]
    fn init_container_validates_numeric_ordinal() {
        let sts = desired_statefulset(&safekeeper(), &default_profile());
        let pod = sts.spec.unwrap().template.spec.unwrap();
        let init = &pod.init_containers.unwrap()[0];
        let script = &init.command.as_ref().unwrap()[2];
        assert!(script.contains("ORDINAL=${HOSTNAME##*-}"));
        assert!(script.contains("^[0-9]+$"));
    }

    #[test]
    fn downward_api_env_is_present() {
        let sts = desired_statefulset(&safekeeper(), &default_profile());
        let pod = sts.spec.unwrap().template.spec.unwrap();
        let env = pod.containers[0].env.as_ref().unwrap();
        let names: Vec<&str> = env.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["POD_NAME", "POD_NAMESPACE", "HOSTNAME"]);
        assert!(env.iter().all(|e| e.value_from.is_some()));
    }

    #[test]
    fn service_name_is_the_shared_safekeeper_domain() {
        let sts = desired_statefulset(&safekeeper(), &default_profile());
        assert_eq!(sts.spec.unwrap().service_name.as_deref(), Some("safekeeper"));
    }

    #[test]
    fn persistent_storage_mounts_data() {
        let spec: SafeKeeperProfileSpec = serde_json::from_str("{}").unwrap();
        let skp = profile(SafeKeeperProfileSpec {
            storage: Some(StorageSpec::default()),
            ..spec
        });
        let sts = desired_statefulset(&safekeeper(), &skp);
        let spec = sts.spec.unwrap();
        assert_eq!(
            spec.volume_claim_templates.as_ref().unwrap()[0].metadata.name.as_deref(),
            Some("data")
        );
        let pod = spec.template.spec.unwrap();
        let mounts = pod.containers[0].volume_mounts.as_ref().unwrap();
        assert!(mounts.iter().any(|m| m.name == "data" && m.mount_path == "/data"));
    }
}
