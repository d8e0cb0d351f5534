use std::fmt;

use k8s_openapi::api::apps::v1::StatefulSetPersistentVolumeClaimRetentionPolicy;
use k8s_openapi::api::core::v1::{SecretReference, Volume, VolumeMount};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::api::{CommonFields, StorageSpec};

/// Reusable page-tier configuration template. Referenced by PageServer
/// workloads and by clusters; never owned by either.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "PageServerProfile",
    group = "core.stateless-pg.io",
    version = "v1alpha1",
    namespaced
)]
#[kube(shortname = "psp")]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct PageServerProfileSpec {
    /// Whether the pageserver runs standalone or against a control plane.
    #[serde(default)]
    pub mode: PageServerMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane: Option<ControlPlaneSpec>,

    /// Checkpointing and WAL safety.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durability: Option<DurabilitySpec>,

    /// GC, PITR and history retention.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<RetentionSpec>,

    /// IO and ingestion tuning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance: Option<PerformanceSpec>,

    /// Auth and TLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecuritySpec>,

    /// Logs and metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilitySpec>,

    /// Expert-only raw overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advanced: Option<AdvancedSpec>,

    #[serde(flatten)]
    pub common: CommonFields,

    /// Replicas projected to the StatefulSet; floor 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i64>,

    /// Recorded for a future autoscaler; not projected anywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageSpec>,

    /// Additional volumes appended to the generated StatefulSet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<Volume>>,

    /// Additional mounts appended to the pageserver container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_mounts: Option<Vec<VolumeMount>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim_retention_policy: Option<StatefulSetPersistentVolumeClaimRetentionPolicy>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Default, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PageServerMode {
    Standalone,
    #[default]
    Managed,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneSpec {
    /// Control plane API URL.
    pub endpoint: String,

    /// Disables the controller dependency (dev/CI only).
    #[serde(default)]
    pub emergency_mode: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DurabilitySpec {
    /// WAL accumulated before a checkpoint flush.
    #[serde(default = "default_checkpoint_distance")]
    pub checkpoint_distance: String,

    /// Upper bound guaranteeing eventual upload.
    #[serde(default = "default_checkpoint_timeout")]
    pub checkpoint_timeout: String,
}

fn default_checkpoint_distance() -> String {
    "256Mi".to_string()
}
fn default_checkpoint_timeout() -> String {
    "10m".to_string()
}

impl Default for DurabilitySpec {
    fn default() -> Self {
        DurabilitySpec {
            checkpoint_distance: default_checkpoint_distance(),
            checkpoint_timeout: default_checkpoint_timeout(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetentionSpec {
    /// GC horizon.
    #[serde(default = "default_retention_window")]
    pub history_retention: String,

    /// PITR branching window.
    #[serde(default = "default_retention_window", rename = "pitrRetention")]
    pub pitr_retention: String,

    /// GC frequency.
    #[serde(default = "default_gc_interval")]
    pub gc_interval: String,
}

fn default_retention_window() -> String {
    "7d".to_string()
}
fn default_gc_interval() -> String {
    "1h".to_string()
}

impl Default for RetentionSpec {
    fn default() -> Self {
        RetentionSpec {
            history_retention: default_retention_window(),
            pitr_retention: default_retention_window(),
            gc_interval: default_gc_interval(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSpec {
    /// Disk IO behavior.
    #[serde(default, rename = "ioMode")]
    pub io_mode: IoMode,

    /// WAL ingestion batch bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingest_batch_size: Option<i64>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Default, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum IoMode {
    Buffered,
    #[default]
    Direct,
}

impl fmt::Display for IoMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IoMode::Buffered => write!(f, "buffered"),
            IoMode::Direct => write!(f, "direct"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySpec {
    /// TLS for the pageserver APIs.
    #[serde(default = "default_true", rename = "enableTLS")]
    pub enable_tls: bool,

    /// Cert/key secret mounted into the pod.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "tlsSecretRef")]
    pub tls_secret_ref: Option<SecretReference>,

    /// API auth.
    #[serde(default)]
    pub auth_type: AuthType,
}

fn default_true() -> bool {
    true
}

impl Default for SecuritySpec {
    fn default() -> Self {
        SecuritySpec {
            enable_tls: true,
            tls_secret_ref: None,
            auth_type: AuthType::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Default, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    None,
    #[default]
    Jwt,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObservabilitySpec {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Prometheus metrics endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilitySpec {
    fn default() -> Self {
        ObservabilitySpec {
            log_level: LogLevel::default(),
            metrics: true,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Default, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedSpec {
    /// Raw TOML appended verbatim to the rendered config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_config: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_defaults_from_empty_document() {
        let spec: PageServerProfileSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec.mode, PageServerMode::Managed);
        assert!(spec.durability.is_none());

        let durability = spec.durability.unwrap_or_default();
        assert_eq!(durability.checkpoint_distance, "256Mi");
        assert_eq!(durability.checkpoint_timeout, "10m");

        let retention = spec.retention.unwrap_or_default();
        assert_eq!(retention.history_retention, "7d");
        assert_eq!(retention.pitr_retention, "7d");
        assert_eq!(retention.gc_interval, "1h");
    }

    #[test]
    fn partial_blocks_fill_remaining_defaults() {
        let spec: PageServerProfileSpec =
            serde_json::from_str(r#"{"durability": {"checkpointDistance": "512Mi"}}"#).unwrap();
        let durability = spec.durability.unwrap();
        assert_eq!(durability.checkpoint_distance, "512Mi");
        assert_eq!(durability.checkpoint_timeout, "10m");
    }

    #[test]
    fn security_defaults_to_tls_and_jwt() {
        let security = SecuritySpec::default();
        assert!(security.enable_tls);
        assert_eq!(security.auth_type, AuthType::Jwt);
    }
}
