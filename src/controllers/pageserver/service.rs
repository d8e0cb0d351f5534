use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::api::PageServer;
use crate::util::meta::{controller_owner_ref, object_labels};

/// Headless service giving each pageserver pod a stable DNS identity.
/// Matches the StatefulSet's `serviceName`.
pub fn desired_headless_service(ps: &PageServer) -> Service {
    let mut selector = BTreeMap::new();
    selector.insert("app".to_string(), "pageserver".to_string());

    Service {
        metadata: ObjectMeta {
            name: Some(ps.name_any()),
            namespace: ps.namespace(),
            labels: Some(object_labels(ps.labels().clone())),
            owner_references: controller_owner_ref(ps).map(|oref| vec![oref]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(selector),
            ports: Some(vec![
                ServicePort {
                    name: Some("pg".to_string()),
                    port: 6400,
                    target_port: Some(IntOrString::Int(6400)),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
                ServicePort {
                    name: Some("http".to_string()),
                    port: 9898,
                    target_port: Some(IntOrString::Int(9898)),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
                ServicePort {
                    name: Some("https".to_string()),
                    port: 9899,
                    target_port: Some(IntOrString::Int(9899)),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{PageServerSpec, ProfileReference};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta as Meta;

    fn pageserver() -> PageServer {
        PageServer {
            metadata: Meta {
                name: Some("c1".into()),
                namespace: Some("ns1".into()),
                uid: Some("uid-1".into()),
                labels: Some(std::collections::BTreeMap::from([(
                    "cluster".to_string(),
                    "c1".to_string(),
                )])),
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

    #[test]
    fn headless_service_shape() {
        let svc = desired_headless_service(&pageserver());
        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.selector.unwrap().get("app").unwrap(), "pageserver");

        let ports: Vec<i32> = spec.ports.unwrap().iter().map(|p| p.port).collect();
        assert_eq!(ports, vec![6400, 9898, 9899]);

        let owners = svc.metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "PageServer");
    }
}
