use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::api::{conditions_schema, ProfileReference};

/// One WAL-tier instance. Materializes a StatefulSet whose pods derive their
/// safekeeper id from the pod ordinal.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "SafeKeeper",
    group = "core.stateless-pg.io",
    version = "v1alpha1",
    namespaced
)]
#[kube(status = "SafeKeeperStatus", shortname = "sk")]
#[kube(printcolumn = r#"{"name":"Available","type":"string","jsonPath":".status.conditions[?(@.type == 'Available')].status"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct SafeKeeperSpec {
    pub profile_ref: ProfileReference,

    /// Desired replicas; overrides the profile's minReplicas when set.
    /// The WAL tier never drops below three replicas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

/// The status object of `SafeKeeper`
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SafeKeeperStatus {
    #[schemars(schema_with = "conditions_schema")]
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
