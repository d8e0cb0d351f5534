use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
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
use crate::api::{PageServer, PageServerProfile};
use crate::util::errors::{Error, Result};
use crate::util::hash::{input_hash, INPUT_HASH_ANNOTATION};

pub mod config;
pub mod service;
pub mod statefulset;

const CONTROLLER_NAME: &str = "pageserver";

/// Resolves the workload's profile reference; a missing profile is a hard
/// error that requeues until the profile appears.
async fn resolve_profile(client: &Client, ps: &PageServer) -> Result<PageServerProfile> {
    let namespace = ps
        .spec
        .profile_ref
        .namespace
        .clone()
        .filter(|ns| !ns.is_empty())
        .or_else(|| ps.namespace())
        .unwrap_or_default();
    let name = &ps.spec.profile_ref.name;

    let api: Api<PageServerProfile> = Api::namespaced(client.clone(), &namespace);
    match api.get(name).await {
        Ok(profile) => Ok(profile),
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => Err(Error::ProfileNotFound {
            kind: "PageServerProfile".to_string(),
            namespace,
            name: name.clone(),
        }),
        Err(e) => Err(e.into()),
    }
}

pub async fn reconcile(ps: Arc<PageServer>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure(CONTROLLER_NAME);
    ctx.diagnostics.write().await.last_event = Utc::now();
    let client = &ctx.client;

    let name = ps
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::MetadataMissing("Name should always be set on an existing object".to_string()))?;
    let ns = ps.namespace().unwrap_or_default();
    info!("Reconciling PageServer '{name}' in namespace '{ns}'");

    let profile = resolve_profile(client, &ps).await?;

    let services: Api<Service> = Api::namespaced(client.clone(), &ns);
    let mut svc = service::desired_headless_service(&ps);
    let hash = input_hash(&ps.metadata, &svc.spec)?;
    svc.annotations_mut().insert(INPUT_HASH_ANNOTATION.to_string(), hash);
    ensure_leaf(&services, &name, &svc).await?;

    let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), &ns);
    let cm_name = config::configmap_name(&name);
    let mut cm = config::desired_configmap(&ps, &profile);
    let hash = input_hash(&ps.metadata, &cm.data)?;
    cm.annotations_mut().insert(INPUT_HASH_ANNOTATION.to_string(), hash);
    ensure_leaf(&configmaps, &cm_name, &cm).await?;

    let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), &ns);
    let mut sts = statefulset::desired_statefulset(&ps, &profile);
    let hash = input_hash(&ps.metadata, &sts.spec)?;
    sts.annotations_mut().insert(INPUT_HASH_ANNOTATION.to_string(), hash);
    ensure_leaf(&statefulsets, &name, &sts).await?;

    Ok(Action::requeue(Duration::from_secs(300)))
}

pub fn error_policy(ps: Arc<PageServer>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed: {:?}", error);
    ctx.metrics.reconcile_failure(CONTROLLER_NAME, &ps.name_any(), error);
    Action::requeue(Duration::from_secs(5 * 60))
}

pub async fn run(client: Client, ctx: Arc<Context>) {
    let pageservers = Api::<PageServer>::all(client.clone());
    let controller = Controller::new(pageservers, watcher::Config::default().any_semantic());
    let store = controller.store();

    controller
        .owns(Api::<StatefulSet>::all(client.clone()), watcher::Config::default())
        .owns(Api::<Service>::all(client.clone()), watcher::Config::default())
        .owns(Api::<ConfigMap>::all(client.clone()), watcher::Config::default())
        .watches(
            Api::<PageServerProfile>::all(client.clone()),
            watcher::Config::default(),
            move |profile| {
                let profile_ns = profile.namespace().unwrap_or_default();
                let profile_name = profile.name_any();
                store
                    .state()
                    .into_iter()
                    .filter(move |ps: &Arc<PageServer>| {
                        ps.spec.profile_ref.matches(&profile_name, &profile_ns)
                    })
                    .map(|ps| ObjectRef::from_obj(&*ps))
                    .collect::<Vec<_>>()
            },
        )
        .run(reconcile, error_policy, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
