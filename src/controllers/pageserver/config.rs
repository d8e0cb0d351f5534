use std::collections::BTreeMap;
use std::fmt::Write;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::api::{PageServer, PageServerProfile};
use crate::control_plane::{self, ServiceFacts};
use crate::util::meta::{controller_owner_ref, object_labels, operator_namespace};

/// Cert/key mounted into the pageserver pod when TLS is enabled.
pub const TLS_CERT_PATH: &str = "/etc/pageserver/certs/tls.crt";
pub const TLS_KEY_PATH: &str = "/etc/pageserver/certs/tls.key";

/// Where the rendered config lands inside the pod; the init container writes
/// `identity.toml` next to it.
pub const CONFIG_MOUNT_PATH: &str = "/data/.neon";

pub fn configmap_name(workload_name: &str) -> String {
    format!("{workload_name}-config")
}

/// Renders `pageserver.toml` against the process-wide control-plane facts.
pub fn render_pageserver_toml(ps: &PageServer, psp: &PageServerProfile) -> String {
    render_with(ps, psp, control_plane::service_facts(), operator_namespace())
}

/// Pure renderer. Key order is fixed; equal inputs yield byte-equal output,
/// and any change in the rendered bytes flips the leaf's input hash.
pub(crate) fn render_with(
    ps: &PageServer,
    psp: &PageServerProfile,
    facts: ServiceFacts,
    operator_ns: &str,
) -> String {
    let spec = &psp.spec;
    let durability = spec.durability.clone().unwrap_or_default();
    let retention = spec.retention.clone().unwrap_or_default();
    let performance = spec.performance.clone().unwrap_or_default();
    let security = spec.security.clone().unwrap_or_default();
    let observability = spec.observability.clone().unwrap_or_default();
    let emergency_mode = spec.control_plane.as_ref().map_or(false, |cp| cp.emergency_mode);

    let cluster_name = ps.labels().get("cluster").cloned().unwrap_or_default();
    let namespace = ps.namespace().unwrap_or_default();

    let mut out = String::new();
    let _ = writeln!(
        out,
        "control_plane_api = '{}://{}.{}.svc.cluster.local:{}'",
        facts.scheme(),
        control_plane::SERVICE_NAME,
        operator_ns,
        facts.port(),
    );
    let _ = writeln!(out, "control_plane_emergency_mode = '{emergency_mode}'");
    let _ = writeln!(
        out,
        "broker_endpoint = 'http://{cluster_name}-broker.{namespace}.svc.cluster.local:50051'"
    );
    let _ = writeln!(out, "listen_pg_addr = '0.0.0.0:6400'");
    let _ = writeln!(out, "http_listen_addr = '0.0.0.0:9898'");

    if security.enable_tls {
        let _ = writeln!(out, "listen_https_addr = '0.0.0.0:9899'");
        let _ = writeln!(out, "ssl_cert_file = '{TLS_CERT_PATH}'");
        let _ = writeln!(out, "ssl_key_file = '{TLS_KEY_PATH}'");
    }

    let _ = writeln!(out, "checkpoint_distance = '{}'", durability.checkpoint_distance);
    let _ = writeln!(out, "checkpoint_timeout = '{}'", durability.checkpoint_timeout);
    let _ = writeln!(out, "gc_horizon = '{}'", retention.history_retention);
    let _ = writeln!(out, "gc_period = '{}'", retention.gc_interval);
    let _ = writeln!(out, "pitr_interval = '{}'", retention.pitr_retention);

    if let Some(batch) = performance.ingest_batch_size {
        let _ = writeln!(out, "ingest_batch_size = {batch}");
    }
    let _ = writeln!(out, "virtual_file_io_mode = {}", performance.io_mode);
    let _ = writeln!(out, "log_level = '{}'", observability.log_level);

    if let Some(extra) = spec.advanced.as_ref().and_then(|a| a.extra_config.as_deref()) {
        if !extra.is_empty() {
            out.push_str(extra);
            if !extra.ends_with('\n') {
                out.push('\n');
            }
        }
    }

    out
}

/// ConfigMap carrying `pageserver.toml`, mounted at `/data/.neon`.
pub fn desired_configmap(ps: &PageServer, psp: &PageServerProfile) -> ConfigMap {
    let labels = object_labels(
        ps.labels()
            .clone()
            .into_iter()
            .chain([
                ("app".to_string(), "pageserver".to_string()),
                ("component".to_string(), "pageserver-config".to_string()),
            ]),
    );

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(configmap_name(&ps.name_any())),
            namespace: ps.namespace(),
            labels: Some(labels),
            owner_references: controller_owner_ref(ps).map(|oref| vec![oref]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "pageserver.toml".to_string(),
            render_pageserver_toml(ps, psp),
        )])),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::pageserverprofile::{
        DurabilitySpec, LogLevel, ObservabilitySpec, PageServerProfileSpec, PerformanceSpec, SecuritySpec,
    };
    use crate::api::{PageServerSpec, ProfileReference};

    fn pageserver() -> PageServer {
        PageServer {
            metadata: ObjectMeta {
                name: Some("c1".into()),
                namespace: Some("ns1".into()),
                labels: Some(BTreeMap::from([("cluster".to_string(), "c1".to_string())])),
                ..Default::default()
            },
            spec: PageServerSpec {
                profile_ref: ProfileReference::new("default-pageserver", "op-ns"),
                replicas: None,
                node_id: None,
                object_storage: None,
            },
            status: None,
        }
    }

    fn profile(spec: PageServerProfileSpec) -> PageServerProfile {
        PageServerProfile::new("default-pageserver", spec)
    }

    fn plain_profile() -> PageServerProfile {
        profile(PageServerProfileSpec {
            security: Some(SecuritySpec {
                enable_tls: false,
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    const HTTP: ServiceFacts = ServiceFacts { tls_enabled: false };

    #[test]
    fn renders_defaults_in_fixed_order() {
        let toml = render_with(&pageserver(), &plain_profile(), HTTP, "op-ns");
        let expected = "\
control_plane_api = 'http://control-plane.op-ns.svc.cluster.local:9090'
control_plane_emergency_mode = 'false'
broker_endpoint = 'http://c1-broker.ns1.svc.cluster.local:50051'
listen_pg_addr = '0.0.0.0:6400'
http_listen_addr = '0.0.0.0:9898'
checkpoint_distance = '256Mi'
checkpoint_timeout = '10m'
gc_horizon = '7d'
gc_period = '1h'
pitr_interval = '7d'
virtual_file_io_mode = direct
log_level = 'info'
";
        assert_eq!(toml, expected);
    }

    #[test]
    fn rendering_is_byte_stable() {
        let a = render_with(&pageserver(), &plain_profile(), HTTP, "op-ns");
        let b = render_with(&pageserver(), &plain_profile(), HTTP, "op-ns");
        assert_eq!(a, b);
    }

    #[test]
    fn tls_profile_adds_the_https_block() {
        let psp = profile(PageServerProfileSpec::default());
        // security defaults to TLS on
        let toml = render_with(&pageserver(), &psp, ServiceFacts { tls_enabled: true }, "op-ns");
        assert!(toml.starts_with("control_plane_api = 'https://control-plane.op-ns.svc.cluster.local:9443'\n"));
        assert!(toml.contains("listen_https_addr = '0.0.0.0:9899'\n"));
        assert!(toml.contains("ssl_cert_file = '/etc/pageserver/certs/tls.crt'\n"));
        assert!(toml.contains("ssl_key_file = '/etc/pageserver/certs/tls.key'\n"));
    }

    #[test]
    fn downgraded_facts_render_http_endpoint() {
        // control plane asked for TLS but fell back to HTTP at startup
        let toml = render_with(&pageserver(), &plain_profile(), HTTP, "op-ns");
        assert!(toml.contains("control_plane_api = 'http://control-plane.op-ns.svc.cluster.local:9090'"));
        assert!(!toml.contains("listen_https_addr"));
    }

    #[test]
    fn tuned_profile_overrides_and_optionals() {
        let psp = profile(PageServerProfileSpec {
            durability: Some(DurabilitySpec {
                checkpoint_distance: "512Mi".into(),
                checkpoint_timeout: "10m".into(),
            }),
            performance: Some(PerformanceSpec {
                ingest_batch_size: Some(100),
                ..Default::default()
            }),
            observability: Some(ObservabilitySpec {
                log_level: LogLevel::Warn,
                metrics: true,
            }),
            security: Some(SecuritySpec {
                enable_tls: false,
                ..Default::default()
            }),
            ..Default::default()
        });
        let toml = render_with(&pageserver(), &psp, HTTP, "op-ns");
        assert!(toml.contains("checkpoint_distance = '512Mi'\n"));
        assert!(toml.contains("ingest_batch_size = 100\n"));
        assert!(toml.contains("log_level = 'warn'\n"));
        // the batch line precedes the io mode line
        let batch = toml.find("ingest_batch_size").unwrap();
        let io = toml.find("virtual_file_io_mode").unwrap();
        assert!(batch < io);
    }

    #[test]
    fn extra_config_is_appended_verbatim() {
        let psp = profile(PageServerProfileSpec {
            security: Some(SecuritySpec {
                enable_tls: false,
                ..Default::default()
            }),
            advanced: Some(crate::api::pageserverprofile::AdvancedSpec {
                extra_config: Some("page_cache_size = 4096".into()),
            }),
            ..Default::default()
        });
        let toml = render_with(&pageserver(), &psp, HTTP, "op-ns");
        assert!(toml.ends_with("log_level = 'info'\npage_cache_size = 4096\n"));
    }
}
