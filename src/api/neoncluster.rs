use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::api::{conditions_schema, ObjectStorageSpec, ProfileReference};

/// Top-level declaration of one storage-disaggregated Postgres cluster.
///
/// The cluster controller materializes one PageServer, one SafeKeeper and one
/// StorageBroker workload from this resource, each wired to the referenced
/// (or default) profile of its tier.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "NeonCluster",
    group = "core.stateless-pg.io",
    version = "v1alpha1",
    namespaced
)]
#[kube(status = "NeonClusterStatus", shortname = "nc")]
#[kube(printcolumn = r#"{"name":"PageServer Profile","type":"string","jsonPath":".spec.pageServerProfileRef.name"}"#)]
#[kube(printcolumn = r#"{"name":"SafeKeeper Profile","type":"string","jsonPath":".spec.safeKeeperProfileRef.name"}"#)]
#[kube(printcolumn = r#"{"name":"Available","type":"string","jsonPath":".status.conditions[?(@.type == 'Available')].status"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct NeonClusterSpec {
    /// Region this cluster is placed in, recorded for placement tooling.
    #[serde(default)]
    pub region_name: String,

    /// Profile for the page tier; `default-pageserver` in the operator
    /// namespace when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_server_profile_ref: Option<ProfileReference>,

    /// Profile for the WAL tier; `default-safekeeper` in the operator
    /// namespace when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe_keeper_profile_ref: Option<ProfileReference>,

    /// Profile for the broker tier; `default-storage-broker` in the operator
    /// namespace when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_broker_profile_ref: Option<ProfileReference>,

    /// Object storage backing page and WAL data.
    pub object_storage: ObjectStorageSpec,
}

/// The status object of `NeonCluster`
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NeonClusterStatus {
    /// Conditions keyed by type: Available, Progressing, Degraded.
    #[schemars(schema_with = "conditions_schema")]
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
