use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::{
    Affinity, LocalObjectReference, PersistentVolumeClaimSpec, PodSecurityContext, ResourceRequirements,
    SecretReference,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod neoncluster;
pub mod pageserver;
pub mod pageserverprofile;
pub mod safekeeper;
pub mod safekeeperprofile;
pub mod storagebroker;
pub mod storagebrokerprofile;

pub use neoncluster::{NeonCluster, NeonClusterSpec, NeonClusterStatus};
pub use pageserver::{PageServer, PageServerSpec, PageServerStatus};
pub use pageserverprofile::{PageServerProfile, PageServerProfileSpec};
pub use safekeeper::{SafeKeeper, SafeKeeperSpec, SafeKeeperStatus};
pub use safekeeperprofile::{SafeKeeperConfigOptions, SafeKeeperProfile, SafeKeeperProfileSpec};
pub use storagebroker::{StorageBroker, StorageBrokerSpec, StorageBrokerStatus};
pub use storagebrokerprofile::{StorageBrokerProfile, StorageBrokerProfileSpec};

/// Image used for all three tiers when a profile does not override it.
pub const NEON_DEFAULT_IMAGE: &str = "ghcr.io/neondatabase/neon:latest";

/// Reference to a profile resource by name. Profiles are shared and never
/// owned; consumers resolve the reference on every reconcile. An empty
/// namespace means "same namespace as the profile event being matched".
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ProfileReference {
    pub fn new(name: &str, namespace: &str) -> Self {
        ProfileReference {
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
        }
    }

    /// Whether this reference points at the given profile object.
    pub fn matches(&self, profile_name: &str, profile_namespace: &str) -> bool {
        self.name == profile_name
            && self
                .namespace
                .as_deref()
                .map_or(true, |ns| ns.is_empty() || ns == profile_namespace)
    }
}

/// Pod-level settings shared by all three tier profiles.
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommonFields {
    /// Container image; defaults to the Neon release image when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// One of "", Always, Never, IfNotPresent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secrets: Option<Vec<LocalObjectReference>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<PodSecurityContext>,
}

impl CommonFields {
    pub fn image(&self) -> String {
        self.image.clone().unwrap_or_else(|| NEON_DEFAULT_IMAGE.to_string())
    }
}

/// Persistent storage for a tier. When multiple variants are set, priority is
/// emptyDir > ephemeral > volumeClaimTemplate; exactly the highest-priority
/// nonempty variant is honored.
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<k8s_openapi::api::core::v1::EmptyDirVolumeSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral: Option<k8s_openapi::api::core::v1::EphemeralVolumeSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_claim_template: Option<EmbeddedPersistentVolumeClaim>,
}

impl StorageSpec {
    /// Volume backing the data mount for the scratch and ephemeral branches.
    /// `None` selects the claim-template branch.
    pub fn data_volume(&self) -> Option<k8s_openapi::api::core::v1::Volume> {
        if let Some(empty_dir) = &self.empty_dir {
            return Some(k8s_openapi::api::core::v1::Volume {
                name: "data".to_string(),
                empty_dir: Some(empty_dir.clone()),
                ..Default::default()
            });
        }
        if let Some(ephemeral) = &self.ephemeral {
            return Some(k8s_openapi::api::core::v1::Volume {
                name: "data".to_string(),
                ephemeral: Some(ephemeral.clone()),
                ..Default::default()
            });
        }
        None
    }

    /// Whether the persistent branch is selected: no higher-priority variant
    /// is set, so storage comes from a claim template.
    pub fn uses_claim_template(&self) -> bool {
        self.empty_dir.is_none() && self.ephemeral.is_none()
    }
}

/// Embedded PersistentVolumeClaim carrying only the metadata subset relevant
/// to claim templates.
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedPersistentVolumeClaim {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EmbeddedObjectMetadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<PersistentVolumeClaimSpec>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedObjectMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl EmbeddedPersistentVolumeClaim {
    /// Projects the embedded claim into a StatefulSet claim template,
    /// defaulting the claim name to "data".
    pub fn claim_template(&self) -> k8s_openapi::api::core::v1::PersistentVolumeClaim {
        let meta = self.metadata.clone().unwrap_or_default();
        k8s_openapi::api::core::v1::PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(meta.name.unwrap_or_else(|| "data".to_string())),
                labels: meta.labels,
                annotations: meta.annotations,
                ..Default::default()
            },
            spec: self.spec.clone(),
            ..Default::default()
        }
    }
}

/// Object storage backing the cluster's page and WAL data.
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStorageSpec {
    #[serde(default)]
    pub provider: ObjectStorageProvider,

    pub endpoint: String,

    pub bucket: String,

    pub region: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_secret_ref: Option<SecretReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Upper bound on concurrent requests against the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<i64>,

    /// Provider-specific settings passed through verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Default, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStorageProvider {
    #[default]
    S3,
    Gcs,
    Azure,
    Minio,
    Local,
}

/// Log output format of the data-plane binaries.
#[derive(Deserialize, Serialize, Clone, Copy, Default, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LogFormat::Plain => write!(f, "plain"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

pub fn conditions_schema(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    serde_json::from_value(serde_json::json!({
        "type": "array",
        "x-kubernetes-list-type": "map",
        "x-kubernetes-list-map-keys": ["type"],
        "items": {
            "type": "object",
            "properties": {
                "lastTransitionTime": { "format": "date-time", "type": "string" },
                "message": { "type": "string" },
                "observedGeneration": { "type": "integer", "format": "int64", "default": 0 },
                "reason": { "type": "string" },
                "status": { "type": "string" },
                "type": { "type": "string" }
            },
            "required": [
                "lastTransitionTime",
                "message",
                "reason",
                "status",
                "type"
            ],
        },
    }))
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_reference_namespace_matching() {
        let explicit = ProfileReference::new("custom", "team-a");
        assert!(explicit.matches("custom", "team-a"));
        assert!(!explicit.matches("custom", "team-b"));
        assert!(!explicit.matches("other", "team-a"));

        let nameless_ns = ProfileReference {
            name: "custom".into(),
            namespace: None,
        };
        assert!(nameless_ns.matches("custom", "anywhere"));
    }

    #[test]
    fn claim_template_defaults_name_to_data() {
        let pvc = EmbeddedPersistentVolumeClaim::default().claim_template();
        assert_eq!(pvc.metadata.name.as_deref(), Some("data"));

        let named = EmbeddedPersistentVolumeClaim {
            metadata: Some(EmbeddedObjectMetadata {
                name: Some("wal".into()),
                ..Default::default()
            }),
            ..Default::default()
        }
        .claim_template();
        assert_eq!(named.metadata.name.as_deref(), Some("wal"));
    }
}
