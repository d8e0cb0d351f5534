use k8s_openapi::api::apps::v1::StatefulSetPersistentVolumeClaimRetentionPolicy;
use k8s_openapi::api::core::v1::{Volume, VolumeMount};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::api::{CommonFields, LogFormat, StorageSpec};

/// Reusable WAL-tier configuration template.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "SafeKeeperProfile",
    group = "core.stateless-pg.io",
    version = "v1alpha1",
    namespaced
)]
#[kube(shortname = "skp")]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct SafeKeeperProfileSpec {
    #[serde(flatten)]
    pub common: CommonFields,

    /// Replicas projected to the StatefulSet; floor 3.
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

    /// Additional mounts appended to the safekeeper container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_mounts: Option<Vec<VolumeMount>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim_retention_policy: Option<StatefulSetPersistentVolumeClaimRetentionPolicy>,

    #[serde(flatten)]
    pub options: SafeKeeperConfigOptions,
}

/// Command-line arguments of the safekeeper process. Every scalar field has a
/// server-matching default; optional fields are only emitted when set.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SafeKeeperConfigOptions {
    // Node & cluster configuration

    /// Safekeeper data directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Availability-zone identifier of this safekeeper.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,

    /// Broker keepalive ping interval.
    #[serde(default = "default_broker_keepalive_interval")]
    pub broker_keepalive_interval: String,

    /// Peer safekeeper heartbeat timeout.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout: String,

    /// Enables recovery of WAL from peer safekeepers.
    #[serde(default)]
    pub peer_recovery: bool,

    // WAL management & storage

    /// Max lag in bytes before a safekeeper is elected for offloading.
    #[serde(default = "default_max_offloader_lag")]
    pub max_offloader_lag: i64,

    /// Offloader re-election threshold in bytes.
    #[serde(default)]
    pub max_reelect_offloader_lag_bytes: i64,

    /// Max WAL disk usage per timeline in bytes (0 = disabled).
    #[serde(default)]
    pub max_timeline_disk_usage_bytes: i64,

    /// Max parallel WAL segment uploads.
    #[serde(default = "default_wal_backup_parallel_jobs")]
    pub wal_backup_parallel_jobs: i64,

    /// Disables WAL backup to remote storage.
    #[serde(default)]
    pub disable_wal_backup: bool,

    /// Max concurrent syncs to remote storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_storage_max_concurrent_syncs: Option<i64>,

    /// Max remote-storage sync errors before failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_storage_max_sync_errors: Option<i64>,

    // Authentication & security

    /// JWT public key for WAL service auth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pg_auth_public_key_path: Option<String>,

    /// JWT public key for tenant-only WAL auth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pg_tenant_only_auth_public_key_path: Option<String>,

    /// JWT public key for HTTP service auth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_auth_public_key_path: Option<String>,

    /// JWT token file for peer authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token_path: Option<String>,

    /// HTTPS private key file.
    #[serde(default = "default_ssl_key_file", skip_serializing_if = "Option::is_none")]
    pub ssl_key_file: Option<String>,

    /// HTTPS certificate file.
    #[serde(default = "default_ssl_cert_file", skip_serializing_if = "Option::is_none")]
    pub ssl_cert_file: Option<String>,

    /// Certificate reload interval.
    #[serde(default = "default_ssl_cert_reload_period", skip_serializing_if = "Option::is_none")]
    pub ssl_cert_reload_period: Option<String>,

    /// Trusted CA certificate file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_ca_file: Option<String>,

    /// Use HTTPS for the peer safekeeper API.
    #[serde(default)]
    pub use_https_safekeeper_api: bool,

    /// TLS in the WAL service API.
    #[serde(default)]
    pub enable_tls_wal_service_api: bool,

    // Safety & reliability

    /// Disables fsync; testing only.
    #[serde(default)]
    pub no_sync: bool,

    /// Automatic switching to the offloaded state.
    #[serde(default)]
    pub enable_offload: bool,

    /// Deletes local WAL after offloading.
    #[serde(default)]
    pub delete_offloaded_wal: bool,

    // Backup & maintenance

    /// Wait before uploading a partial segment.
    #[serde(default = "default_partial_backup_timeout")]
    pub partial_backup_timeout: String,

    /// Concurrent partial segment uploads.
    #[serde(default = "default_partial_backup_concurrency")]
    pub partial_backup_concurrency: i64,

    /// Control-file auto-save interval.
    #[serde(default = "default_control_file_save_interval")]
    pub control_file_save_interval: String,

    /// Minimum timeline residency before eviction.
    #[serde(default = "default_eviction_min_resident")]
    pub eviction_min_resident: String,

    /// Disables the periodic broker push; testing only.
    #[serde(default)]
    pub disable_periodic_broker_push: bool,

    // Performance & monitoring

    #[serde(default)]
    pub log_format: LogFormat,

    /// Collect metrics on each scrape.
    #[serde(default = "default_true")]
    pub force_metric_collection_on_scrape: bool,

    // Concurrency & sharding

    /// Fan WAL out to different shards.
    #[serde(default)]
    pub wal_reader_fanout: bool,

    /// Maximum position delta for fanout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delta_for_fanout: Option<i64>,

    /// Single-threaded runtime; debugging only.
    #[serde(default)]
    pub current_thread_runtime: bool,

    /// Keep WAL for replication connections.
    #[serde(default)]
    pub walsenders_keep_horizon: bool,

    // Disk management

    /// Disk usage check interval.
    #[serde(default = "default_global_disk_check_interval")]
    pub global_disk_check_interval: String,

    /// Fraction of filesystem capacity for all timelines (0.0 = disabled).
    #[serde(default)]
    pub max_global_disk_usage_ratio: f64,

    // Development & debugging

    /// Development mode; disables security checks.
    #[serde(default)]
    pub dev: bool,

    /// Auto-pull timelines from peer safekeepers on startup.
    #[serde(default)]
    pub enable_pull_timeline_on_startup: bool,

    /// Tenant-scoped WAL service endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_pg_tenant_only: Option<String>,

    /// Address advertised to computes for the WAL service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_pg: Option<String>,
}

fn default_data_dir() -> String {
    "./data".to_string()
}
fn default_broker_keepalive_interval() -> String {
    "15s".to_string()
}
fn default_heartbeat_timeout() -> String {
    "5s".to_string()
}
fn default_max_offloader_lag() -> i64 {
    134217728
}
fn default_wal_backup_parallel_jobs() -> i64 {
    5
}
fn default_ssl_key_file() -> Option<String> {
    Some("server.key".to_string())
}
fn default_ssl_cert_file() -> Option<String> {
    Some("server.crt".to_string())
}
fn default_ssl_cert_reload_period() -> Option<String> {
    Some("60s".to_string())
}
fn default_partial_backup_timeout() -> String {
    "15m".to_string()
}
fn default_partial_backup_concurrency() -> i64 {
    5
}
fn default_control_file_save_interval() -> String {
    "300s".to_string()
}
fn default_eviction_min_resident() -> String {
    "15m".to_string()
}
fn default_global_disk_check_interval() -> String {
    "60s".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for SafeKeeperConfigOptions {
    fn default() -> Self {
        // serde's field defaults are the single source of truth
        serde_json::from_str("{}").expect("empty option record deserializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_record_defaults() {
        let opts = SafeKeeperConfigOptions::default();
        assert_eq!(opts.data_dir, "./data");
        assert_eq!(opts.broker_keepalive_interval, "15s");
        assert_eq!(opts.heartbeat_timeout, "5s");
        assert_eq!(opts.max_offloader_lag, 134217728);
        assert_eq!(opts.wal_backup_parallel_jobs, 5);
        assert_eq!(opts.ssl_key_file.as_deref(), Some("server.key"));
        assert_eq!(opts.ssl_cert_file.as_deref(), Some("server.crt"));
        assert_eq!(opts.ssl_cert_reload_period.as_deref(), Some("60s"));
        assert_eq!(opts.partial_backup_timeout, "15m");
        assert_eq!(opts.control_file_save_interval, "300s");
        assert_eq!(opts.log_format, LogFormat::Plain);
        assert!(opts.force_metric_collection_on_scrape);
        assert!(!opts.peer_recovery);
        assert_eq!(opts.max_global_disk_usage_ratio, 0.0);
        assert!(opts.availability_zone.is_none());
    }

    #[test]
    fn profile_spec_flattens_the_option_record() {
        let spec: SafeKeeperProfileSpec =
            serde_json::from_str(r#"{"minReplicas": 5, "heartbeatTimeout": "2s", "noSync": true}"#).unwrap();
        assert_eq!(spec.min_replicas, Some(5));
        assert_eq!(spec.options.heartbeat_timeout, "2s");
        assert!(spec.options.no_sync);
        assert_eq!(spec.options.data_dir, "./data");
    }
}
