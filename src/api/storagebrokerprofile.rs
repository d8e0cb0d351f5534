use k8s_openapi::api::core::v1::SecretReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::api::{CommonFields, LogFormat};

/// Reusable broker-tier configuration template.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "StorageBrokerProfile",
    group = "core.stateless-pg.io",
    version = "v1alpha1",
    namespaced
)]
#[kube(shortname = "sbp")]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct StorageBrokerProfileSpec {
    #[serde(flatten)]
    pub common: CommonFields,

    /// Replicas projected to the Deployment; floor 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i64>,

    /// Recorded for a future autoscaler; not projected anywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i64>,

    /// Buffer size of the per-timeline update channel (>= 1).
    #[serde(default = "default_timeline_chan_size")]
    pub timeline_chan_size: i64,

    /// Buffer size of the all-keys update channel (>= 1).
    #[serde(default = "default_all_keys_chan_size")]
    pub all_keys_chan_size: i64,

    /// HTTP/2 keepalive ping interval.
    #[serde(default = "default_http2_keepalive_interval")]
    pub http2_keepalive_interval: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// TLS on the broker's HTTPS listener.
    #[serde(default, rename = "enableTLS")]
    pub enable_tls: bool,

    /// Cert/key secret for the HTTPS listener.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "tlsSecretRef")]
    pub tls_secret_ref: Option<SecretReference>,

    /// Certificate reload interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_cert_reload_period: Option<String>,
}

fn default_timeline_chan_size() -> i64 {
    32
}
fn default_all_keys_chan_size() -> i64 {
    16384
}
fn default_http2_keepalive_interval() -> String {
    "5000ms".to_string()
}
