use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Controller},
        reflector::ObjectRef,
        watcher,
    },
    ResourceExt,
};
use tokio::time::Duration;
use tracing::*;

use super::{ensure_leaf, Context};
use crate::api::{StorageBroker, StorageBrokerProfile};
use crate::util::errors::{Error, Result};
use crate::util::hash::{input_hash, INPUT_HASH_ANNOTATION};
use crate::util::meta::{controller_owner_ref, object_labels};

const CONTROLLER_NAME: &str = "storagebroker";

/// Pod template labels; the service selector must equal them exactly.
fn pod_labels(sb: &StorageBroker) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), sb.name_any()),
        ("component".to_string(), "storagebroker-deployment".to_string()),
    ])
}

/// Broker argument vector, built from the profile's channel and keepalive
/// settings.
pub(crate) fn broker_args(sbp: &StorageBrokerProfile) -> Vec<String> {
    let spec = &sbp.spec;
    let mut args = vec![
        "--listen-addr=0.0.0.0:50051".to_string(),
        "--listen-https-addr=0.0.0.0:50052".to_string(),
        format!("--timeline-chan-size={}", spec.timeline_chan_size),
        format!("--all-keys-chan-size={}", spec.all_keys_chan_size),
        format!("--http2-keepalive-interval={}", spec.http2_keepalive_interval),
        format!("--log-format={}", spec.log_format),
    ];
    if let Some(period) = &spec.ssl_cert_reload_period {
        args.push(format!("--ssl-cert-reload-period={period}"));
    }
    args
}

pub fn desired_deployment(sb: &StorageBroker, sbp: &StorageBrokerProfile) -> Deployment {
    let spec = &sbp.spec;
    let cpf = &spec.common;

    // the workload's explicit replica count wins over the profile floor
    let replicas = sb
        .spec
        .replicas
        .unwrap_or(spec.min_replicas.unwrap_or(1) as i32)
        .max(1);

    let labels = pod_labels(sb);

    let container = Container {
        name: "storagebroker".to_string(),
        image: Some(cpf.image()),
        image_pull_policy: cpf.image_pull_policy.clone(),
        resources: cpf.resources.clone(),
        command: Some(vec!["storage_broker".to_string()]),
        args: Some(broker_args(sbp)),
        ports: Some(vec![
            ContainerPort {
                name: Some("http".to_string()),
                container_port: 50051,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                name: Some("https".to_string()),
                container_port: 50052,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(sb.name_any()),
            namespace: sb.namespace(),
            labels: Some(object_labels(sb.labels().clone())),
            owner_references: controller_owner_ref(sb).map(|oref| vec![oref]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    image_pull_secrets: cpf.image_pull_secrets.clone(),
                    node_selector: cpf.node_selector.clone(),
                    affinity: cpf.affinity.clone(),
                    security_context: cpf.security_context.clone(),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// ClusterIP service in front of the broker pods, mirroring the container
/// ports.
pub fn desired_service(sb: &StorageBroker) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(sb.name_any()),
            namespace: sb.namespace(),
            labels: Some(object_labels(sb.labels().clone())),
            owner_references: controller_owner_ref(sb).map(|oref| vec![oref]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(pod_labels(sb)),
            ports: Some(vec![
                ServicePort {
                    name: Some("http".to_string()),
                    port: 50051,
                    target_port: Some(IntOrString::Int(50051)),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
                ServicePort {
                    name: Some("https".to_string()),
                    port: 50052,
                    target_port: Some(IntOrString::Int(50052)),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

async fn resolve_profile(client: &Client, sb: &StorageBroker) -> Result<StorageBrokerProfile> {
    let namespace = sb
        .spec
        .profile_ref
        .namespace
        .clone()
        .filter(|ns| !ns.is_empty())
        .or_else(|| sb.namespace())
        .unwrap_or_default();
    let name = &sb.spec.profile_ref.name;

    let api: Api<StorageBrokerProfile> = Api::namespaced(client.clone(), &namespace);
    match api.get(name).await {
        Ok(profile) => Ok(profile),
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => Err(Error::ProfileNotFound {
            kind: "StorageBrokerProfile".to_string(),
            namespace,
            name: name.clone(),
        }),
        Err(e) => Err(e.into()),
    }
}

pub async fn reconcile(sb: Arc<StorageBroker>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure(CONTROLLER_NAME);
    ctx.diagnostics.write().await.last_event = Utc::now();
    let client = &ctx.client;

    let name = sb
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::MetadataMissing("Name should always be set on an existing object".to_string()))?;
    let ns = sb.namespace().unwrap_or_default();
    info!("Reconciling StorageBroker '{name}' in namespace '{ns}'");

    let profile = resolve_profile(client, &sb).await?;

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), &ns);
    let mut deployment = desired_deployment(&sb, &profile);
    let hash = input_hash(&sb.metadata, &deployment.spec)?;
    deployment
        .annotations_mut()
        .insert(INPUT_HASH_ANNOTATION.to_string(), hash);
    ensure_leaf(&deployments, &name, &deployment).await?;

    let services: Api<Service> = Api::namespaced(client.clone(), &ns);
    let mut svc = desired_service(&sb);
    let hash = input_hash(&sb.metadata, &svc.spec)?;
    svc.annotations_mut().insert(INPUT_HASH_ANNOTATION.to_string(), hash);
    ensure_leaf(&services, &name, &svc).await?;

    Ok(Action::requeue(Duration::from_secs(5 * 60)))
}

pub fn error_policy(sb: Arc<StorageBroker>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed: {:?}", error);
    ctx.metrics.reconcile_failure(CONTROLLER_NAME, &sb.name_any(), error);
    Action::requeue(Duration::from_secs(5 * 60))
}

pub async fn run(client: Client, ctx: Arc<Context>) {
    let brokers = Api::<StorageBroker>::all(client.clone());
    let controller = Controller::new(brokers, watcher::Config::default().any_semantic());
    let store = controller.store();

    controller
        .owns(Api::<Deployment>::all(client.clone()), watcher::Config::default())
        .owns(Api::<Service>::all(client.clone()), watcher::Config::default())
        .watches(
            Api::<StorageBrokerProfile>::all(client.clone()),
            watcher::Config::default(),
            move |profile| {
                let profile_ns = profile.namespace().unwrap_or_default();
                let profile_name = profile.name_any();
                store
                    .state()
                    .into_iter()
                    .filter(move |sb: &Arc<StorageBroker>| {
                        sb.spec.profile_ref.matches(&profile_name, &profile_ns)
                    })
                    .map(|sb| ObjectRef::from_obj(&*sb))
                    .collect::<Vec<_>>()
            },
        )
        .run(reconcile, error_policy, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ProfileReference, StorageBrokerProfileSpec, StorageBrokerSpec};

    fn broker(replicas: Option<i32>) -> StorageBroker {
        StorageBroker {
            metadata: ObjectMeta {
                name: Some("c1".into()),
                namespace: Some("ns1".into()),
                uid: Some("uid-1".into()),
                labels: Some(BTreeMap::from([("cluster".to_string(), "c1".to_string())])),
                ..Default::default()
            },
            spec: StorageBrokerSpec {
                profile_ref: ProfileReference::new("default-storage-broker", "op-ns"),
                replicas,
                tls_secret_ref: None,
            },
            status: None,
        }
    }

    fn profile(json: &str) -> StorageBrokerProfile {
        StorageBrokerProfile::new("default-storage-broker", serde_json::from_str(json).unwrap())
    }

    #[test]
    fn default_args_mirror_profile_defaults() {
        let args = broker_args(&profile("{}"));
        assert_eq!(
            args,
            vec![
                "--listen-addr=0.0.0.0:50051",
                "--listen-https-addr=0.0.0.0:50052",
                "--timeline-chan-size=32",
                "--all-keys-chan-size=16384",
                "--http2-keepalive-interval=5000ms",
                "--log-format=plain",
            ]
        );
    }

    #[test]
    fn cert_reload_period_appends_when_configured() {
        let args = broker_args(&profile(r#"{"sslCertReloadPeriod": "30s"}"#));
        assert_eq!(args.last().unwrap(), "--ssl-cert-reload-period=30s");
    }

    #[test]
    fn replica_precedence_workload_over_profile() {
        let sbp = profile(r#"{"minReplicas": 2}"#);
        assert_eq!(
            desired_deployment(&broker(None), &sbp).spec.unwrap().replicas,
            Some(2)
        );
        assert_eq!(
            desired_deployment(&broker(Some(3)), &sbp).spec.unwrap().replicas,
            Some(3)
        );
        // floor 1 when nothing is set
        assert_eq!(
            desired_deployment(&broker(None), &profile("{}")).spec.unwrap().replicas,
            Some(1)
        );
    }

    #[test]
    fn service_selector_equals_template_labels() {
        let sb = broker(None);
        let deployment = desired_deployment(&sb, &profile("{}"));
        let template_labels = deployment
            .spec
            .unwrap()
            .template
            .metadata
            .unwrap()
            .labels
            .unwrap();

        let svc = desired_service(&sb);
        assert_eq!(svc.spec.as_ref().unwrap().selector.as_ref().unwrap(), &template_labels);

        let ports: Vec<i32> = svc.spec.unwrap().ports.unwrap().iter().map(|p| p.port).collect();
        assert_eq!(ports, vec![50051, 50052]);
    }

    #[test]
    fn command_is_the_broker_binary() {
        let deployment = desired_deployment(&broker(None), &profile("{}"));
        let pod = deployment.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.containers[0].command.as_ref().unwrap(), &vec!["storage_broker".to_string()]);
    }
}
