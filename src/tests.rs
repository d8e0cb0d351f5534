use kube::api::{Api, ObjectMeta, Patch, PatchParams};
use kube::Client;
use std::sync::Arc;

use crate::api::{
    NeonCluster, NeonClusterSpec, ObjectStorageSpec, PageServer, SafeKeeper, StorageBroker,
};
use crate::controllers::{neoncluster, State};
use crate::util::status::is_status_condition_true;

fn test_cluster() -> NeonCluster {
    NeonCluster {
        metadata: ObjectMeta {
            name: Some("test-cluster".to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: NeonClusterSpec {
            region_name: "local".to_string(),
            page_server_profile_ref: None,
            safe_keeper_profile_ref: None,
            storage_broker_profile_ref: None,
            object_storage: ObjectStorageSpec {
                endpoint: "http://minio".to_string(),
                bucket: "neon-test".to_string(),
                region: "us-east-1".to_string(),
                ..Default::default()
            },
        },
        status: None,
    }
}

#[tokio::test]
#[ignore = "uses k8s current-context and default profiles in $OPERATOR_NAMESPACE"]
async fn integration_bootstrap_creates_tier_workloads() {
    let client = Client::try_default().await.unwrap();
    let ctx = State::default().to_context(client.clone());

    let clusters: Api<NeonCluster> = Api::namespaced(client.clone(), "default");
    let ssapply = PatchParams::apply("ctrltest").force();
    let patch = Patch::Apply(&test_cluster());
    clusters.patch("test-cluster", &ssapply, &patch).await.unwrap();
    let applied = clusters.get("test-cluster").await.unwrap();

    neoncluster::reconcile(Arc::new(applied), ctx).await.unwrap();

    // one child workload per tier, sharing the aggregate's name
    let pageservers: Api<PageServer> = Api::namespaced(client.clone(), "default");
    let ps = pageservers.get("test-cluster").await.unwrap();
    assert_eq!(ps.spec.profile_ref.name, neoncluster::DEFAULT_PAGESERVER_PROFILE);

    let safekeepers: Api<SafeKeeper> = Api::namespaced(client.clone(), "default");
    let sk = safekeepers.get("test-cluster").await.unwrap();
    assert_eq!(sk.spec.profile_ref.name, neoncluster::DEFAULT_SAFEKEEPER_PROFILE);

    let brokers: Api<StorageBroker> = Api::namespaced(client.clone(), "default");
    let sb = brokers.get("test-cluster").await.unwrap();
    assert_eq!(sb.spec.profile_ref.name, neoncluster::DEFAULT_STORAGE_BROKER_PROFILE);

    let output = clusters.get("test-cluster").await.unwrap();
    let conditions = output.status.unwrap().conditions;
    assert!(is_status_condition_true(&conditions, "Available"));
}
