use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
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
use crate::api::{SafeKeeper, SafeKeeperProfile};
use crate::util::errors::{Error, Result};
use crate::util::hash::{input_hash, INPUT_HASH_ANNOTATION};

pub mod args;
pub mod statefulset;

const CONTROLLER_NAME: &str = "safekeeper";

async fn resolve_profile(client: &Client, sk: &SafeKeeper) -> Result<SafeKeeperProfile> {
    let namespace = sk
        .spec
        .profile_ref
        .namespace
        .clone()
        .filter(|ns| !ns.is_empty())
        .or_else(|| sk.namespace())
        .unwrap_or_default();
    let name = &sk.spec.profile_ref.name;

    let api: Api<SafeKeeperProfile> = Api::namespaced(client.clone(), &namespace);
    match api.get(name).await {
        Ok(profile) => Ok(profile),
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => Err(Error::ProfileNotFound {
            kind: "SafeKeeperProfile".to_string(),
            namespace,
            name: name.clone(),
        }),
        Err(e) => Err(e.into()),
    }
}

pub async fn reconcile(sk: Arc<SafeKeeper>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure(CONTROLLER_NAME);
    ctx.diagnostics.write().await.last_event = Utc::now();
    let client = &ctx.client;

    let name = sk
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::MetadataMissing("Name should always be set on an existing object".to_string()))?;
    let ns = sk.namespace().unwrap_or_default();
    info!("Reconciling SafeKeeper '{name}' in namespace '{ns}'");

    let profile = resolve_profile(client, &sk).await?;

    let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), &ns);
    let mut sts = statefulset::desired_statefulset(&sk, &profile);
    let hash = input_hash(&sk.metadata, &sts.spec)?;
    sts.annotations_mut().insert(INPUT_HASH_ANNOTATION.to_string(), hash);
    ensure_leaf(&statefulsets, &name, &sts).await?;

    Ok(Action::requeue(Duration::from_secs(300)))
}

pub fn error_policy(sk: Arc<SafeKeeper>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed: {:?}", error);
    ctx.metrics.reconcile_failure(CONTROLLER_NAME, &sk.name_any(), error);
    Action::requeue(Duration::from_secs(5 * 60))
}

pub async fn run(client: Client, ctx: Arc<Context>) {
    let safekeepers = Api::<SafeKeeper>::all(client.clone());
    let controller = Controller::new(safekeepers, watcher::Config::default().any_semantic());
    let store = controller.store();

    controller
        .owns(Api::<StatefulSet>::all(client.clone()), watcher::Config::default())
        .watches(
            Api::<SafeKeeperProfile>::all(client.clone()),
            watcher::Config::default(),
            move |profile| {
                let profile_ns = profile.namespace().unwrap_or_default();
                let profile_name = profile.name_any();
                store
                    .state()
                    .into_iter()
                    .filter(move |sk: &Arc<SafeKeeper>| {
                        sk.spec.profile_ref.matches(&profile_name, &profile_ns)
                    })
                    .map(|sk| ObjectRef::from_obj(&*sk))
                    .collect::<Vec<_>>()
            },
        )
        .run(reconcile, error_policy, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
