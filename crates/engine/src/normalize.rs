//! Document validation and normalization.

#![forbid(unsafe_code)]

use kmap_core::{NormalizedRecord, RecordId, SkipReason, CLUSTER_LEVEL};
use serde_json::Value;

fn non_empty<'a>(v: Option<&'a Value>) -> Option<&'a str> {
    v.and_then(|x| x.as_str()).filter(|s| !s.is_empty())
}

/// Validate a document and build its normalized record.
///
/// Checked in order: apiVersion, kind, metadata.name. A missing namespace is
/// not an error; the record gets [`CLUSTER_LEVEL`].
pub fn normalize(id: RecordId, doc: &Value) -> Result<NormalizedRecord, SkipReason> {
    let api_version = non_empty(doc.get("apiVersion")).ok_or(SkipReason::NotAResource)?;
    let kind = non_empty(doc.get("kind")).ok_or(SkipReason::MissingKind)?;
    let name = non_empty(doc.pointer("/metadata/name"))
        .ok_or_else(|| SkipReason::MissingName { kind: kind.to_string() })?;
    let declared_ns = non_empty(doc.pointer("/metadata/namespace"));
    Ok(NormalizedRecord {
        id,
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        namespace: declared_ns.unwrap_or(CLUSTER_LEVEL).to_string(),
        name: name.to_string(),
        uid: non_empty(doc.pointer("/metadata/uid")).map(|s| s.to_string()),
        namespaced: declared_ns.is_some(),
    })
}

/// `(apiVersion, kind, namespaced)` for the type registry, available even when
/// the document is later rejected for a missing name.
pub fn resource_type(doc: &Value) -> Option<(&str, &str, bool)> {
    let api_version = non_empty(doc.get("apiVersion"))?;
    let kind = non_empty(doc.get("kind"))?;
    Some((api_version, kind, non_empty(doc.pointer("/metadata/namespace")).is_some()))
}

/// `spec.nodeName`, or `unknown`.
pub fn node_name(doc: &Value) -> &str {
    non_empty(doc.pointer("/spec/nodeName")).unwrap_or(kmap_core::UNKNOWN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_in_order() {
        assert_eq!(normalize(0, &json!("text")), Err(SkipReason::NotAResource));
        assert_eq!(normalize(0, &json!({"kind": "Pod"})), Err(SkipReason::NotAResource));
        assert_eq!(normalize(0, &json!({"apiVersion": "", "kind": "Pod"})), Err(SkipReason::NotAResource));
        assert_eq!(normalize(0, &json!({"apiVersion": "v1", "metadata": {"name": "x"}})), Err(SkipReason::MissingKind));
        assert_eq!(
            normalize(0, &json!({"apiVersion": "v1", "kind": "Pod", "metadata": {}})),
            Err(SkipReason::MissingName { kind: "Pod".into() })
        );
        assert_eq!(
            normalize(0, &json!({"apiVersion": "v1", "kind": "Pod"})),
            Err(SkipReason::MissingName { kind: "Pod".into() })
        );
    }

    #[test]
    fn defaults_namespace_to_cluster_level() {
        let rec = normalize(4, &json!({"apiVersion": "v1", "kind": "Node", "metadata": {"name": "n1", "uid": "u-1"}})).unwrap();
        assert_eq!(rec.namespace, CLUSTER_LEVEL);
        assert!(!rec.namespaced);
        assert_eq!(rec.uid.as_deref(), Some("u-1"));
        assert_eq!(rec.composite_key(), "cluster-level.Node.n1");
    }

    #[test]
    fn registry_info_survives_missing_name() {
        let doc = json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"namespace": "a"}});
        assert_eq!(resource_type(&doc), Some(("v1", "ConfigMap", true)));
        assert!(normalize(0, &doc).is_err());
    }

    #[test]
    fn node_defaults_to_unknown() {
        assert_eq!(node_name(&json!({"spec": {"nodeName": "w1"}})), "w1");
        assert_eq!(node_name(&json!({"spec": null})), "unknown");
    }
}
