use std::collections::BTreeMap;
use std::sync::OnceLock;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;

/// Name of this operator, used as the managed-by label value.
pub const MANAGED_BY: &str = "stateless-pg-operator";

/// Standard Kubernetes managed-by label key.
pub const MANAGED_BY_LABEL_KEY: &str = "app.kubernetes.io/managed-by";

/// Legacy managed-by label key.
pub const LEGACY_MANAGED_BY_LABEL_KEY: &str = "managed-by";

const OPERATOR_NAMESPACE_ENV: &str = "OPERATOR_NAMESPACE";

static OPERATOR_NAMESPACE: OnceLock<String> = OnceLock::new();

/// Namespace the operator process runs in, injected via the downward API.
/// Read once at startup; panics when the environment variable is not set.
pub fn operator_namespace() -> &'static str {
    OPERATOR_NAMESPACE.get_or_init(|| {
        std::env::var(OPERATOR_NAMESPACE_ENV)
            .unwrap_or_else(|_| panic!("{OPERATOR_NAMESPACE_ENV} environment variable is not set"))
    })
}

/// Labels stamped onto every object this operator materializes.
pub fn managed_by_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        (LEGACY_MANAGED_BY_LABEL_KEY.to_string(), MANAGED_BY.to_string()),
        (MANAGED_BY_LABEL_KEY.to_string(), MANAGED_BY.to_string()),
    ])
}

/// Merges `extra` over the managed-by labels; `extra` wins on key collisions.
pub fn object_labels(extra: impl IntoIterator<Item = (String, String)>) -> BTreeMap<String, String> {
    let mut labels = managed_by_labels();
    labels.extend(extra);
    labels
}

/// Controller owner reference for an owned leaf. Cascade delete of the owner
/// removes the leaf; exactly one owner reference per leaf.
pub fn controller_owner_ref<K>(owner: &K) -> Option<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    owner.controller_owner_ref(&())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_labels_carry_both_managed_by_keys() {
        let labels = object_labels([("app".to_string(), "pageserver".to_string())]);
        assert_eq!(labels.get(LEGACY_MANAGED_BY_LABEL_KEY).unwrap(), MANAGED_BY);
        assert_eq!(labels.get(MANAGED_BY_LABEL_KEY).unwrap(), MANAGED_BY);
        assert_eq!(labels.get("app").unwrap(), "pageserver");
    }
}
