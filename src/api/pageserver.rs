use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::api::{conditions_schema, ObjectStorageSpec, ProfileReference};

/// One page-tier instance. Materializes a StatefulSet, a headless service and
/// the `pageserver.toml` ConfigMap.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "PageServer",
    group = "core.stateless-pg.io",
    version = "v1alpha1",
    namespaced
)]
#[kube(status = "PageServerStatus", shortname = "ps")]
#[kube(printcolumn = r#"{"name":"Available","type":"string","jsonPath":".status.conditions[?(@.type == 'Available')].status"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct PageServerSpec {
    pub profile_ref: ProfileReference,

    /// Desired replicas; overrides the profile's minReplicas when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Unique identifier for this PageServer instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<i32>,

    /// Object storage for page data; copied down from the owning cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_storage: Option<ObjectStorageSpec>,
}

/// The status object of `PageServer`
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PageServerStatus {
    #[schemars(schema_with = "conditions_schema")]
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
