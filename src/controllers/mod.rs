use std::fmt::Debug;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::{
    api::{Api, ListParams, Patch, PatchParams, PostParams},
    client::Client,
    runtime::events::{Recorder, Reporter},
    Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use tracing::*;

use crate::api::NeonCluster;
use crate::util::hash::INPUT_HASH_ANNOTATION;
use crate::util::{errors::Result, metrics};

pub mod neoncluster;
pub mod pageserver;
pub mod safekeeper;
pub mod storagebroker;

/// Field manager for server-side apply writes.
pub const FIELD_MANAGER: &str = "stateless-pg-operator";

/// State shared between the controllers and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconcilers
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
}

/// State wrapper around the controller outputs for the web server
impl State {
    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    // Create a Controller Context that can update State
    pub fn to_context(&self, client: Client) -> Arc<Context> {
        Arc::new(Context {
            client,
            metrics: metrics::Metrics::default().register(&self.registry).unwrap(),
            diagnostics: self.diagnostics.clone(),
        })
    }
}

// Context for the reconcilers
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: metrics::Metrics,
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "stateless-pg-operator".into(),
        }
    }
}

impl Diagnostics {
    pub(crate) fn recorder(&self, client: Client) -> Recorder {
        Recorder::new(client, self.reporter.clone())
    }
}

/// Writes `desired` as `name` unless the existing leaf already carries the
/// same input hash. The desired object must be stamped with its hash
/// annotation before the call. Returns whether a write happened.
pub(crate) async fn ensure_leaf<K>(api: &Api<K>, name: &str, desired: &K) -> Result<bool>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug,
{
    let kind = K::kind(&());
    let desired_hash = desired.meta().annotations.as_ref().and_then(|a| a.get(INPUT_HASH_ANNOTATION));

    match api.get(name).await {
        Ok(existing) => {
            let existing_hash = existing
                .meta()
                .annotations
                .as_ref()
                .and_then(|a| a.get(INPUT_HASH_ANNOTATION));
            if existing_hash == desired_hash {
                debug!("{kind} '{name}' is up to date");
                return Ok(false);
            }
            info!("Updating {kind} '{name}'");
            api.patch(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(desired))
                .await?;
            Ok(true)
        }
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
            info!("Creating {kind} '{name}'");
            api.create(&PostParams::default(), desired).await?;
            Ok(true)
        }
        Err(e) => Err(e.into()),
    }
}

/// Initialize all four controllers against shared state (given the CRDs are
/// installed)
pub async fn run(state: State) {
    let client = Client::try_default().await.expect("failed to create kube Client");

    let clusters = Api::<NeonCluster>::all(client.clone());
    if let Err(e) = clusters.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        std::process::exit(1);
    }

    let ctx = state.to_context(client.clone());

    tokio::join!(
        neoncluster::run(client.clone(), ctx.clone()),
        pageserver::run(client.clone(), ctx.clone()),
        safekeeper::run(client.clone(), ctx.clone()),
        storagebroker::run(client.clone(), ctx.clone()),
    );
}
