use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::util::errors::Result;

/// Annotation key under which every materialized leaf carries the hash of the
/// inputs it was rendered from.
pub const INPUT_HASH_ANNOTATION: &str = "neon.io/input-hash";

#[derive(Serialize)]
struct HashInputs<'a, T: Serialize> {
    labels: &'a BTreeMap<String, String>,
    annotations: BTreeMap<&'a str, &'a str>,
    generation: i64,
    spec: &'a T,
}

/// Fingerprint of (labels, annotations, generation, desired leaf spec) for a
/// primary object. The input-hash annotation itself is excluded so that
/// stamping the hash onto a leaf cannot change the next computation.
///
/// All map-typed inputs are `BTreeMap`s and the encoding is canonical JSON,
/// so equal inputs hash identically across processes and iteration orders.
pub fn input_hash<T: Serialize>(meta: &ObjectMeta, spec: &T) -> Result<String> {
    static EMPTY: BTreeMap<String, String> = BTreeMap::new();

    let annotations = meta
        .annotations
        .as_ref()
        .unwrap_or(&EMPTY)
        .iter()
        .filter(|(k, _)| k.as_str() != INPUT_HASH_ANNOTATION)
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    let inputs = HashInputs {
        labels: meta.labels.as_ref().unwrap_or(&EMPTY),
        annotations,
        generation: meta.generation.unwrap_or(0),
        spec,
    };

    let bytes = serde_json::to_vec(&inputs)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ObjectMeta {
        ObjectMeta {
            name: Some("c1".into()),
            namespace: Some("ns1".into()),
            labels: Some(BTreeMap::from([("cluster".to_string(), "c1".to_string())])),
            generation: Some(3),
            ..Default::default()
        }
    }

    #[test]
    fn equal_inputs_hash_equal() {
        let a = input_hash(&meta(), &serde_json::json!({"replicas": 3})).unwrap();
        let b = input_hash(&meta(), &serde_json::json!({"replicas": 3})).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn any_spec_difference_changes_the_hash() {
        let a = input_hash(&meta(), &serde_json::json!({"replicas": 3})).unwrap();
        let b = input_hash(&meta(), &serde_json::json!({"replicas": 4})).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn generation_and_labels_feed_the_hash() {
        let spec = serde_json::json!({});
        let base = input_hash(&meta(), &spec).unwrap();

        let mut bumped = meta();
        bumped.generation = Some(4);
        assert_ne!(base, input_hash(&bumped, &spec).unwrap());

        let mut relabeled = meta();
        relabeled
            .labels
            .get_or_insert_with(Default::default)
            .insert("app".into(), "pageserver".into());
        assert_ne!(base, input_hash(&relabeled, &spec).unwrap());
    }

    #[test]
    fn own_annotation_is_excluded() {
        let spec = serde_json::json!({"x": 1});
        let mut stamped = meta();
        stamped.annotations = Some(BTreeMap::from([(
            INPUT_HASH_ANNOTATION.to_string(),
            "deadbeef".to_string(),
        )]));
        assert_eq!(
            input_hash(&meta(), &spec).unwrap(),
            input_hash(&stamped, &spec).unwrap()
        );

        // any other annotation does count
        let mut annotated = meta();
        annotated.annotations = Some(BTreeMap::from([("team".to_string(), "db".to_string())]));
        assert_ne!(
            input_hash(&meta(), &spec).unwrap(),
            input_hash(&annotated, &spec).unwrap()
        );
    }
}
