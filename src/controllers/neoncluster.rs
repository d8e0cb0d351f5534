use std::fmt::Debug;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, ObjectMeta, Time};
use kube::{
    api::{Api, Patch, PatchParams, PostParams},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        events::{Event, EventType},
        reflector::{ObjectRef, Store},
        watcher,
    },
    Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::time::Duration;
use tracing::*;

use super::{Context, FIELD_MANAGER};
use crate::api::{
    NeonCluster, PageServer, PageServerProfile, PageServerSpec, ProfileReference, SafeKeeper,
    SafeKeeperProfile, SafeKeeperSpec, StorageBroker, StorageBrokerProfile, StorageBrokerSpec,
};
use crate::util::errors::{Error, Result};
use crate::util::meta::{controller_owner_ref, object_labels, operator_namespace};
use crate::util::status::set_status_condition;

const CONTROLLER_NAME: &str = "neoncluster";

/// Profiles looked up when a cluster leaves a tier's reference unset; they
/// live in the operator's own namespace.
pub const DEFAULT_PAGESERVER_PROFILE: &str = "default-pageserver";
pub const DEFAULT_SAFEKEEPER_PROFILE: &str = "default-safekeeper";
pub const DEFAULT_STORAGE_BROKER_PROFILE: &str = "default-storage-broker";

/// Resolves a tier's profile reference into a concrete name and namespace.
/// An unset reference selects the tier default in the operator namespace; a
/// reference without a namespace resolves next to the cluster.
fn resolve_ref(nc: &NeonCluster, tier_ref: Option<&ProfileReference>, default_name: &str) -> (String, String) {
    match tier_ref {
        Some(r) => {
            let namespace = r
                .namespace
                .clone()
                .filter(|ns| !ns.is_empty())
                .or_else(|| nc.namespace())
                .unwrap_or_else(|| operator_namespace().to_string());
            (r.name.clone(), namespace)
        }
        None => (default_name.to_string(), operator_namespace().to_string()),
    }
}

async fn get_profile<K>(client: &Client, namespace: &str, name: &str) -> Result<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    match api.get(name).await {
        Ok(profile) => Ok(profile),
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => Err(Error::ProfileNotFound {
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

struct ResolvedProfiles {
    pageserver: (String, String),
    safekeeper: (String, String),
    storagebroker: (String, String),
}

/// Fetches all three tier profiles, failing with a descriptive error for the
/// first tier whose referenced or default profile does not exist. Only the
/// resolved coordinates are kept; the children re-resolve on their own
/// reconcile.
async fn resolve_profiles(client: &Client, nc: &NeonCluster) -> Result<ResolvedProfiles> {
    let pageserver = resolve_ref(nc, nc.spec.page_server_profile_ref.as_ref(), DEFAULT_PAGESERVER_PROFILE);
    get_profile::<PageServerProfile>(client, &pageserver.1, &pageserver.0).await?;

    let safekeeper = resolve_ref(nc, nc.spec.safe_keeper_profile_ref.as_ref(), DEFAULT_SAFEKEEPER_PROFILE);
    get_profile::<SafeKeeperProfile>(client, &safekeeper.1, &safekeeper.0).await?;

    let storagebroker = resolve_ref(
        nc,
        nc.spec.storage_broker_profile_ref.as_ref(),
        DEFAULT_STORAGE_BROKER_PROFILE,
    );
    get_profile::<StorageBrokerProfile>(client, &storagebroker.1, &storagebroker.0).await?;

    Ok(ResolvedProfiles {
        pageserver,
        safekeeper,
        storagebroker,
    })
}

fn child_metadata(nc: &NeonCluster, app: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(nc.name_any()),
        namespace: nc.namespace(),
        labels: Some(object_labels([
            ("cluster".to_string(), nc.name_any()),
            ("app".to_string(), app.to_string()),
        ])),
        owner_references: controller_owner_ref(nc).map(|oref| vec![oref]),
        ..Default::default()
    }
}

pub(crate) fn desired_pageserver(nc: &NeonCluster, profile_name: &str, profile_namespace: &str) -> PageServer {
    PageServer {
        metadata: child_metadata(nc, "pageserver"),
        spec: PageServerSpec {
            profile_ref: ProfileReference::new(profile_name, profile_namespace),
            replicas: None,
            node_id: None,
            object_storage: Some(nc.spec.object_storage.clone()),
        },
        status: None,
    }
}

pub(crate) fn desired_safekeeper(nc: &NeonCluster, profile_name: &str, profile_namespace: &str) -> SafeKeeper {
    SafeKeeper {
        metadata: child_metadata(nc, "safekeeper"),
        spec: SafeKeeperSpec {
            profile_ref: ProfileReference::new(profile_name, profile_namespace),
            replicas: None,
        },
        status: None,
    }
}

pub(crate) fn desired_storagebroker(nc: &NeonCluster, profile_name: &str, profile_namespace: &str) -> StorageBroker {
    StorageBroker {
        metadata: child_metadata(nc, "storagebroker"),
        spec: StorageBrokerSpec {
            profile_ref: ProfileReference::new(profile_name, profile_namespace),
            replicas: None,
            tls_secret_ref: None,
        },
        status: None,
    }
}

async fn ensure_pageserver(client: &Client, nc: &NeonCluster, profile: &(String, String)) -> Result<bool> {
    let ns = nc.namespace().unwrap_or_default();
    let api: Api<PageServer> = Api::namespaced(client.clone(), &ns);
    let wanted = ProfileReference::new(&profile.0, &profile.1);

    match api.get(&nc.name_any()).await {
        Ok(existing) if existing.spec.profile_ref == wanted => Ok(false),
        Ok(existing) => {
            // the child reconciler owns the rest of the spec; only the
            // profile reference is corrected here
            let mut updated = existing.clone();
            updated.spec.profile_ref = wanted;
            api.replace(&nc.name_any(), &PostParams::default(), &updated).await?;
            info!("Updated PageServer '{}' profileRef", nc.name_any());
            Ok(true)
        }
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
            api.create(&PostParams::default(), &desired_pageserver(nc, &profile.0, &profile.1))
                .await?;
            info!("Created PageServer '{}'", nc.name_any());
            Ok(true)
        }
        Err(e) => Err(e.into()),
    }
}

async fn ensure_safekeeper(client: &Client, nc: &NeonCluster, profile: &(String, String)) -> Result<bool> {
    let ns = nc.namespace().unwrap_or_default();
    let api: Api<SafeKeeper> = Api::namespaced(client.clone(), &ns);
    let wanted = ProfileReference::new(&profile.0, &profile.1);

    match api.get(&nc.name_any()).await {
        Ok(existing) if existing.spec.profile_ref == wanted => Ok(false),
        Ok(existing) => {
            let mut updated = existing.clone();
            updated.spec.profile_ref = wanted;
            api.replace(&nc.name_any(), &PostParams::default(), &updated).await?;
            info!("Updated SafeKeeper '{}' profileRef", nc.name_any());
            Ok(true)
        }
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
            api.create(&PostParams::default(), &desired_safekeeper(nc, &profile.0, &profile.1))
                .await?;
            info!("Created SafeKeeper '{}'", nc.name_any());
            Ok(true)
        }
        Err(e) => Err(e.into()),
    }
}

async fn ensure_storagebroker(client: &Client, nc: &NeonCluster, profile: &(String, String)) -> Result<bool> {
    let ns = nc.namespace().unwrap_or_default();
    let api: Api<StorageBroker> = Api::namespaced(client.clone(), &ns);
    let wanted = ProfileReference::new(&profile.0, &profile.1);

    match api.get(&nc.name_any()).await {
        Ok(existing) if existing.spec.profile_ref == wanted => Ok(false),
        Ok(existing) => {
            let mut updated = existing.clone();
            updated.spec.profile_ref = wanted;
            api.replace(&nc.name_any(), &PostParams::default(), &updated).await?;
            info!("Updated StorageBroker '{}' profileRef", nc.name_any());
            Ok(true)
        }
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
            api.create(&PostParams::default(), &desired_storagebroker(nc, &profile.0, &profile.1))
                .await?;
            info!("Created StorageBroker '{}'", nc.name_any());
            Ok(true)
        }
        Err(e) => Err(e.into()),
    }
}

fn condition(nc: &NeonCluster, type_: &str, status: &str, reason: &str, message: &str) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: status.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: Time(Utc::now()),
        observed_generation: nc.metadata.generation,
    }
}

/// Best-effort status write; condition failures never fail a reconcile.
async fn publish_conditions(client: &Client, nc: &NeonCluster, updates: Vec<Condition>) {
    let ns = match nc.namespace() {
        Some(ns) => ns,
        None => return,
    };

    let mut conditions = nc
        .status
        .as_ref()
        .map(|status| status.conditions.clone())
        .unwrap_or_default();
    let mut changed = false;
    for update in updates {
        let (next, this_changed) = set_status_condition(&conditions, update);
        conditions = next;
        changed |= this_changed;
    }
    if !changed {
        return;
    }

    let api: Api<NeonCluster> = Api::namespaced(client.clone(), &ns);
    let patch = Patch::Apply(json!({
        "apiVersion": "core.stateless-pg.io/v1alpha1",
        "kind": "NeonCluster",
        "status": { "conditions": conditions },
    }));
    let params = PatchParams::apply(FIELD_MANAGER).force();
    if let Err(e) = api.patch_status(&nc.name_any(), &params, &patch).await {
        warn!("failed to update NeonCluster '{}' conditions: {e}", nc.name_any());
    }
}

pub async fn reconcile(nc: Arc<NeonCluster>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure(CONTROLLER_NAME);
    ctx.diagnostics.write().await.last_event = Utc::now();
    let client = &ctx.client;

    let ns = nc
        .namespace()
        .ok_or_else(|| Error::MetadataMissing("NeonCluster without namespace".to_string()))?;
    info!("Reconciling NeonCluster \"{}\" in {}", nc.name_any(), ns);

    let profiles = match resolve_profiles(client, &nc).await {
        Ok(profiles) => profiles,
        Err(e) => {
            if let Error::ProfileNotFound { .. } = e {
                publish_conditions(
                    client,
                    &nc,
                    vec![condition(&nc, "Degraded", "True", "ProfileNotFound", &e.to_string())],
                )
                .await;
            }
            return Err(e);
        }
    };

    let mut created = false;
    created |= ensure_pageserver(client, &nc, &profiles.pageserver).await?;
    created |= ensure_safekeeper(client, &nc, &profiles.safekeeper).await?;
    created |= ensure_storagebroker(client, &nc, &profiles.storagebroker).await?;

    if created {
        let recorder = ctx.diagnostics.read().await.recorder(client.clone());
        let _ = recorder
            .publish(
                &Event {
                    type_: EventType::Normal,
                    reason: "ChildrenReconciled".into(),
                    note: Some(format!("Reconciled tier workloads for `{}`", nc.name_any())),
                    action: "Reconciling".into(),
                    secondary: None,
                },
                &nc.object_ref(&()),
            )
            .await;
    }

    publish_conditions(
        client,
        &nc,
        vec![
            condition(&nc, "Available", "True", "ChildrenReconciled", "all tier workloads exist"),
            condition(
                &nc,
                "Progressing",
                if created { "True" } else { "False" },
                if created { "Reconciling" } else { "Stable" },
                "tier workloads match the referenced profiles",
            ),
            condition(&nc, "Degraded", "False", "AsExpected", "all referenced profiles resolve"),
        ],
    )
    .await;

    Ok(Action::requeue(Duration::from_secs(5 * 60)))
}

pub fn error_policy(nc: Arc<NeonCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed: {:?}", error);
    ctx.metrics.reconcile_failure(CONTROLLER_NAME, &nc.name_any(), error);
    Action::requeue(Duration::from_secs(5 * 60))
}

/// Enqueues every cluster whose tier reference points at the changed profile.
/// Reads the reflector store only; a cold store yields an empty set and the
/// periodic requeue closes the gap.
fn clusters_referencing<F>(store: &Store<NeonCluster>, profile_namespace: &str, profile_name: &str, tier_ref: F) -> Vec<ObjectRef<NeonCluster>>
where
    F: Fn(&NeonCluster) -> Option<&ProfileReference>,
{
    store
        .state()
        .into_iter()
        .filter(|nc| {
            tier_ref(nc).map_or(false, |r| r.matches(profile_name, profile_namespace))
        })
        .map(|nc| ObjectRef::from_obj(&*nc))
        .collect()
}

pub async fn run(client: Client, ctx: Arc<Context>) {
    let clusters = Api::<NeonCluster>::all(client.clone());
    let controller = Controller::new(clusters, watcher::Config::default().any_semantic());
    let store = controller.store();

    let psp_store = store.clone();
    let skp_store = store.clone();
    let sbp_store = store;

    controller
        .owns(Api::<PageServer>::all(client.clone()), watcher::Config::default())
        .owns(Api::<SafeKeeper>::all(client.clone()), watcher::Config::default())
        .owns(Api::<StorageBroker>::all(client.clone()), watcher::Config::default())
        .watches(
            Api::<PageServerProfile>::all(client.clone()),
            watcher::Config::default(),
            move |profile| {
                clusters_referencing(
                    &psp_store,
                    profile.namespace().unwrap_or_default().as_str(),
                    &profile.name_any(),
                    |nc| nc.spec.page_server_profile_ref.as_ref(),
                )
            },
        )
        .watches(
            Api::<SafeKeeperProfile>::all(client.clone()),
            watcher::Config::default(),
            move |profile| {
                clusters_referencing(
                    &skp_store,
                    profile.namespace().unwrap_or_default().as_str(),
                    &profile.name_any(),
                    |nc| nc.spec.safe_keeper_profile_ref.as_ref(),
                )
            },
        )
        .watches(
            Api::<StorageBrokerProfile>::all(client.clone()),
            watcher::Config::default(),
            move |profile| {
                clusters_referencing(
                    &sbp_store,
                    profile.namespace().unwrap_or_default().as_str(),
                    &profile.name_any(),
                    |nc| nc.spec.storage_broker_profile_ref.as_ref(),
                )
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
    use crate::api::{NeonClusterSpec, ObjectStorageSpec};
    use crate::util::meta::{MANAGED_BY, MANAGED_BY_LABEL_KEY};

    fn cluster() -> NeonCluster {
        let mut nc = NeonCluster::new(
            "c1",
            NeonClusterSpec {
                region_name: "eu-north".into(),
                page_server_profile_ref: None,
                safe_keeper_profile_ref: None,
                storage_broker_profile_ref: None,
                object_storage: ObjectStorageSpec {
                    endpoint: "http://minio".into(),
                    bucket: "pages".into(),
                    region: "eu-north-1".into(),
                    ..Default::default()
                },
            },
        );
        nc.metadata.namespace = Some("ns1".into());
        nc.metadata.uid = Some("uid-1234".into());
        nc
    }

    #[test]
    fn children_share_name_namespace_and_owner() {
        let nc = cluster();
        let ps = desired_pageserver(&nc, DEFAULT_PAGESERVER_PROFILE, "op-ns");
        let sk = desired_safekeeper(&nc, DEFAULT_SAFEKEEPER_PROFILE, "op-ns");
        let sb = desired_storagebroker(&nc, DEFAULT_STORAGE_BROKER_PROFILE, "op-ns");

        for (meta, app) in [
            (&ps.metadata, "pageserver"),
            (&sk.metadata, "safekeeper"),
            (&sb.metadata, "storagebroker"),
        ] {
            assert_eq!(meta.name.as_deref(), Some("c1"));
            assert_eq!(meta.namespace.as_deref(), Some("ns1"));

            let labels = meta.labels.as_ref().unwrap();
            assert_eq!(labels.get("cluster").unwrap(), "c1");
            assert_eq!(labels.get("app").unwrap(), app);
            assert_eq!(labels.get(MANAGED_BY_LABEL_KEY).unwrap(), MANAGED_BY);
            assert_eq!(labels.get("managed-by").unwrap(), MANAGED_BY);

            let owners = meta.owner_references.as_ref().unwrap();
            assert_eq!(owners.len(), 1);
            assert_eq!(owners[0].kind, "NeonCluster");
            assert_eq!(owners[0].name, "c1");
            assert_eq!(owners[0].controller, Some(true));
            assert_eq!(owners[0].block_owner_deletion, Some(true));
        }
    }

    #[test]
    fn children_reference_the_resolved_profiles() {
        let nc = cluster();
        let ps = desired_pageserver(&nc, DEFAULT_PAGESERVER_PROFILE, "op-ns");
        assert_eq!(
            ps.spec.profile_ref,
            ProfileReference::new(DEFAULT_PAGESERVER_PROFILE, "op-ns")
        );
        // the cluster's object storage is copied down to the page tier
        assert_eq!(ps.spec.object_storage.as_ref().unwrap().bucket, "pages");

        let sk = desired_safekeeper(&nc, "custom-wal", "team-a");
        assert_eq!(sk.spec.profile_ref, ProfileReference::new("custom-wal", "team-a"));
    }

    #[test]
    fn explicit_refs_win_over_defaults() {
        let mut nc = cluster();
        nc.spec.page_server_profile_ref = Some(ProfileReference::new("fast-pages", "team-a"));

        let (name, ns) = resolve_ref(&nc, nc.spec.page_server_profile_ref.as_ref(), DEFAULT_PAGESERVER_PROFILE);
        assert_eq!((name.as_str(), ns.as_str()), ("fast-pages", "team-a"));

        // a ref without a namespace resolves next to the cluster
        nc.spec.page_server_profile_ref = Some(ProfileReference {
            name: "fast-pages".into(),
            namespace: None,
        });
        let (_, ns) = resolve_ref(&nc, nc.spec.page_server_profile_ref.as_ref(), DEFAULT_PAGESERVER_PROFILE);
        assert_eq!(ns, "ns1");
    }
}
