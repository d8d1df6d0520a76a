//! Fact extractors. Each reads the document plus its normalized record and
//! writes only into its own tables, so the call order does not matter.

#![forbid(unsafe_code)]

use kmap_core::{net_key, NetAttrs, NetworkFact, NormalizedRecord, CLUSTER_LEVEL};
use kmap_store::{LabelCategory, ManagedEntry, Tables};
use serde_json::{Map, Value};
use tracing::debug;

use crate::project::{self, render_scalar, PathSpec};

pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const CHART_LABEL: &str = "chart";
pub const HELM_CHART_LABEL: &str = "helm.sh/chart";

/// Kinds that get an entry in the network fact table.
pub const NETWORK_KINDS: &[&str] = &[
    "Node",
    "PersistentVolumeClaim",
    "PersistentVolume",
    "StorageClass",
    "IngressClass",
    "Ingress",
    "IngressController",
    "Service",
    "Endpoints",
    "EndpointSlice",
    "CSINode",
    "Pod",
];

const CLUSTER_INGRESS_KINDS: &[&str] = &["Ingress", "IngressClass", "IngressController"];

fn network_paths(kind: &str) -> &'static [PathSpec] {
    match kind {
        "Node" => &[
            ("podCIDR", "spec.podCIDR"),
            ("address", "status.addresses[0].address"),
            ("addressType", "status.addresses[0].type"),
        ],
        "PersistentVolumeClaim" => &[
            ("volumeName", "spec.volumeName"),
            ("storageClassName", "spec.storageClassName"),
            ("phase", "status.phase"),
        ],
        "PersistentVolume" => &[
            ("storageClassName", "spec.storageClassName"),
            ("claim", "spec.claimRef.name"),
            ("claimNamespace", "spec.claimRef.namespace"),
            ("csiDriver", "spec.csi.driver"),
            ("hostPath", "spec.hostPath.path"),
        ],
        "StorageClass" => &[
            ("provisioner", "provisioner"),
            ("reclaimPolicy", "reclaimPolicy"),
            ("volumeBindingMode", "volumeBindingMode"),
        ],
        "Service" => &[
            ("type", "spec.type"),
            ("clusterIP", "spec.clusterIP"),
            ("externalName", "spec.externalName"),
            ("loadBalancerIP", "status.loadBalancer.ingress[0].ip"),
        ],
        "Endpoints" => &[
            ("address", "subsets[0].addresses[0].ip"),
            ("port", "subsets[0].ports[0].port"),
            ("targetKind", "subsets[0].addresses[0].targetRef.kind"),
            ("targetName", "subsets[0].addresses[0].targetRef.name"),
        ],
        "EndpointSlice" => &[
            ("addressType", "addressType"),
            ("address", "endpoints[0].addresses[0]"),
            ("port", "ports[0].port"),
        ],
        "CSINode" => &[
            ("driver", "spec.drivers[0].name"),
            ("nodeID", "spec.drivers[0].nodeID"),
        ],
        _ => &[],
    }
}

fn string_map(v: Option<&Value>) -> Option<&Map<String, Value>> {
    v.and_then(|x| x.as_object())
}

fn value_string(v: &Value) -> String {
    render_scalar(v).unwrap_or_else(|| v.to_string())
}

/// `metadata.annotations` into the annotation key and value indexes.
pub fn capture_annotations(tables: &mut Tables, rec: &NormalizedRecord, doc: &Value) {
    let Some(annos) = string_map(doc.pointer("/metadata/annotations")) else { return };
    for (k, v) in annos {
        tables.indexes.insert_annotation(rec.id, k, &value_string(v));
    }
}

/// `metadata.labels` under the `Labels` category.
pub fn capture_labels(tables: &mut Tables, rec: &NormalizedRecord, doc: &Value) {
    let Some(labels) = string_map(doc.pointer("/metadata/labels")) else { return };
    for (k, v) in labels {
        tables.labels.insert(LabelCategory::Labels, rec.id, k, &value_string(v));
    }
}

/// Group Helm- and operator-managed resources by the managed-by label.
pub fn capture_managed_by(tables: &mut Tables, rec: &NormalizedRecord, doc: &Value) {
    let Some(labels) = string_map(doc.pointer("/metadata/labels")) else { return };
    let Some(managed_by) = labels.get(MANAGED_BY).and_then(|v| v.as_str()) else { return };
    let entry = ManagedEntry {
        record: rec.id,
        kind: rec.kind.clone(),
        namespace: rec.namespace.clone(),
        name: rec.name.clone(),
    };
    match managed_by {
        "Helm" => {
            let chart = labels
                .get(CHART_LABEL)
                .or_else(|| labels.get(HELM_CHART_LABEL))
                .map(value_string)
                .unwrap_or_else(|| "na".to_string());
            tables.managed.helm.entry(chart).or_default().push(entry);
        }
        "operator" => tables.managed.operator.push(entry),
        other => debug!(record = rec.id, managed_by = %other, "unrecognized managed-by value"),
    }
}

/// Pod template labels (`PodLabels`) and selector labels (`MatchLabels`).
pub fn capture_template_labels(tables: &mut Tables, rec: &NormalizedRecord, doc: &Value) {
    let Some(spec) = doc.get("spec").filter(|s| s.is_object()) else { return };
    if let Some(labels) = string_map(spec.pointer("/template/metadata/labels")) {
        for (k, v) in labels {
            tables.labels.insert(LabelCategory::PodLabels, rec.id, k, &value_string(v));
        }
    }
    if let Some(labels) = string_map(spec.pointer("/selector/matchLabels")) {
        for (k, v) in labels {
            tables.labels.insert(LabelCategory::MatchLabels, rec.id, k, &value_string(v));
        }
    }
}

/// Network attributes for [`NETWORK_KINDS`]. Duplicate keys keep the first fact.
pub fn capture_network(tables: &mut Tables, rec: &NormalizedRecord, doc: &Value, node: &str) {
    let kind = rec.kind.as_str();
    if !NETWORK_KINDS.contains(&kind) { return; }
    let (key, namespace, attrs) = if kind == "Pod" {
        let pod_ips = doc
            .pointer("/status/podIPs")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|p| p.get("ip").and_then(|x| x.as_str()).or_else(|| p.as_str()))
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();
        let attrs = NetAttrs::Pod {
            host_network: doc.pointer("/spec/hostNetwork").and_then(|v| v.as_bool()).unwrap_or(false),
            pod_ip: project::str_at(doc, "status.podIP").map(|s| s.to_string()),
            pod_ips,
            qos_class: project::str_at(doc, "status.qosClass").map(|s| s.to_string()),
            node_name: node.to_string(),
        };
        (net_key(kind, &rec.namespace, &rec.name), rec.namespace.clone(), attrs)
    } else if CLUSTER_INGRESS_KINDS.contains(&kind) {
        tables.inventory.ingress_defs.entry(rec.kind.clone()).or_default().push((rec.id, doc.clone()));
        let attrs = NetAttrs::ClusterIngress { definition: doc.clone() };
        (net_key(kind, CLUSTER_LEVEL, &rec.name), CLUSTER_LEVEL.to_string(), attrs)
    } else {
        let attrs = NetAttrs::Projected { fields: project::project(doc, network_paths(kind)) };
        (net_key(kind, &rec.namespace, &rec.name), rec.namespace.clone(), attrs)
    };
    tables.net.insert(key, NetworkFact {
        record: rec.id,
        kind: rec.kind.clone(),
        namespace,
        name: rec.name.clone(),
        attrs,
    });
}

/// Pod phase into the status tables when status capture is on. Returns the phase.
pub fn capture_status(tables: &mut Tables, rec: &NormalizedRecord, doc: &Value, enabled: bool) -> Option<String> {
    if !enabled || rec.kind != "Pod" { return None; }
    let phase = project::str_at(doc, "status.phase")?;
    tables.status.record_phase(rec.id, phase);
    Some(phase.to_string())
}

/// `metadata.creationTimestamp` for Pods and network kinds.
pub fn capture_created(tables: &mut Tables, rec: &NormalizedRecord, doc: &Value) {
    if !NETWORK_KINDS.contains(&rec.kind.as_str()) { return; }
    let ts = doc
        .pointer("/metadata/creationTimestamp")
        .and_then(|v| v.as_str())
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp());
    if let Some(ts) = ts {
        tables.inventory.created.insert(rec.id, ts);
    }
}

/// Namespaces, kinds, Namespace definitions and per-kind counts.
pub fn capture_inventory(tables: &mut Tables, rec: &NormalizedRecord) {
    let inv = &mut tables.inventory;
    inv.namespaces.insert(rec.namespace.clone());
    inv.kinds.insert(rec.kind.clone());
    if rec.kind == "Namespace" {
        inv.namespace_defs.entry(rec.name.clone()).or_insert(rec.id);
    }
    tables.status.count_kind(&rec.kind, &rec.namespace);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use serde_json::json;

    fn pod(labels: Value) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web-1", "namespace": "shop", "labels": labels},
            "spec": {"nodeName": "w1", "containers": [{"name": "c", "image": "nginx"}]},
            "status": {"phase": "Running", "podIP": "10.1.0.4", "podIPs": [{"ip": "10.1.0.4"}], "qosClass": "BestEffort"}
        })
    }

    #[test]
    fn helm_chart_prefers_explicit_label() {
        let mut t = Tables::new();
        let doc = pod(json!({"app.kubernetes.io/managed-by": "Helm", "chart": "web-1.2.0", "helm.sh/chart": "other"}));
        let rec = normalize(1, &doc).unwrap();
        capture_managed_by(&mut t, &rec, &doc);
        assert_eq!(t.managed.helm["web-1.2.0"][0].record, 1);

        let doc = pod(json!({"app.kubernetes.io/managed-by": "Helm", "helm.sh/chart": "db-0.1"}));
        capture_managed_by(&mut t, &normalize(2, &doc).unwrap(), &doc);
        assert_eq!(t.managed.helm["db-0.1"].len(), 1);

        let doc = pod(json!({"app.kubernetes.io/managed-by": "Helm"}));
        capture_managed_by(&mut t, &normalize(3, &doc).unwrap(), &doc);
        assert_eq!(t.managed.helm["na"].len(), 1);

        let doc = pod(json!({"app.kubernetes.io/managed-by": "operator"}));
        capture_managed_by(&mut t, &normalize(4, &doc).unwrap(), &doc);
        let doc = pod(json!({"app.kubernetes.io/managed-by": "kustomize"}));
        capture_managed_by(&mut t, &normalize(5, &doc).unwrap(), &doc);
        assert_eq!(t.managed.operator.len(), 1);
        assert_eq!(t.managed.helm.len(), 3);
    }

    #[test]
    fn pod_network_fact() {
        let mut t = Tables::new();
        let doc = pod(json!({}));
        let rec = normalize(7, &doc).unwrap();
        capture_network(&mut t, &rec, &doc, "w1");
        let fact = t.net.get("Pod:shop:web-1").unwrap();
        match &fact.attrs {
            NetAttrs::Pod { host_network, pod_ip, pod_ips, qos_class, node_name } => {
                assert!(!host_network);
                assert_eq!(pod_ip.as_deref(), Some("10.1.0.4"));
                assert_eq!(pod_ips, &vec!["10.1.0.4".to_string()]);
                assert_eq!(qos_class.as_deref(), Some("BestEffort"));
                assert_eq!(node_name, "w1");
            }
            other => panic!("unexpected attrs: {:?}", other),
        }
        // Same key again keeps the first fact.
        let rec2 = normalize(8, &doc).unwrap();
        capture_network(&mut t, &rec2, &doc, "w1");
        assert_eq!(t.net.get("Pod:shop:web-1").unwrap().record, 7);
    }

    #[test]
    fn ingress_is_keyed_cluster_level() {
        let mut t = Tables::new();
        let doc = json!({"apiVersion": "networking.k8s.io/v1", "kind": "Ingress", "metadata": {"name": "web", "namespace": "shop"}});
        let rec = normalize(1, &doc).unwrap();
        capture_network(&mut t, &rec, &doc, "unknown");
        assert!(t.net.get("Ingress:cluster-level:web").is_some());
        assert_eq!(t.inventory.ingress_defs["Ingress"].len(), 1);
    }

    #[test]
    fn service_fields_are_projected() {
        let mut t = Tables::new();
        let doc = json!({
            "apiVersion": "v1", "kind": "Service",
            "metadata": {"name": "web", "namespace": "shop"},
            "spec": {"type": "LoadBalancer", "clusterIP": "10.96.0.12", "ports": [{"port": 80}]},
            "status": {"loadBalancer": {"ingress": [{"ip": "203.0.113.9"}]}}
        });
        capture_network(&mut t, &normalize(4, &doc).unwrap(), &doc, "unknown");
        let fact = t.net.get("Service:shop:web").unwrap();
        assert_eq!(fact.namespace, "shop");
        match &fact.attrs {
            NetAttrs::Projected { fields } => {
                let got: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
                assert_eq!(got, vec![("type", "LoadBalancer"), ("clusterIP", "10.96.0.12"), ("loadBalancerIP", "203.0.113.9")]);
            }
            other => panic!("unexpected attrs: {:?}", other),
        }
    }

    #[test]
    fn ingress_controller_keeps_definition() {
        let mut t = Tables::new();
        let doc = json!({
            "apiVersion": "operator.openshift.io/v1", "kind": "IngressController",
            "metadata": {"name": "default", "namespace": "openshift-ingress-operator"},
            "spec": {"replicas": 2}
        });
        capture_network(&mut t, &normalize(5, &doc).unwrap(), &doc, "unknown");
        let fact = t.net.get("IngressController:cluster-level:default").unwrap();
        assert_eq!(fact.namespace, CLUSTER_LEVEL);
        match &fact.attrs {
            NetAttrs::ClusterIngress { definition } => assert_eq!(definition["spec"]["replicas"], 2),
            other => panic!("unexpected attrs: {:?}", other),
        }
        assert!(t.net.get("IngressController:openshift-ingress-operator:default").is_none());
    }

    #[test]
    fn same_named_ingresses_collapse_to_first() {
        let mut t = Tables::new();
        let ing = |ns: &str| json!({"apiVersion": "networking.k8s.io/v1", "kind": "Ingress", "metadata": {"name": "web", "namespace": ns}});
        let (a, b) = (ing("a"), ing("b"));
        capture_network(&mut t, &normalize(1, &a).unwrap(), &a, "unknown");
        capture_network(&mut t, &normalize(2, &b).unwrap(), &b, "unknown");
        assert_eq!(t.net.len(), 1);
        assert_eq!(t.net.get("Ingress:cluster-level:web").unwrap().record, 1);
        // Both definitions are still inventoried.
        assert_eq!(t.inventory.ingress_defs["Ingress"].len(), 2);
    }

    #[test]
    fn status_only_when_enabled() {
        let mut t = Tables::new();
        let doc = pod(json!({}));
        let rec = normalize(1, &doc).unwrap();
        assert_eq!(capture_status(&mut t, &rec, &doc, false), None);
        assert!(t.status.pod_phases.is_empty());
        assert_eq!(capture_status(&mut t, &rec, &doc, true).as_deref(), Some("Running"));
        assert_eq!(t.status.pod_phases["Running"], 1);

        let no_phase = json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "p"}, "status": {}});
        assert_eq!(capture_status(&mut t, &normalize(2, &no_phase).unwrap(), &no_phase, true), None);
        assert_eq!(t.status.pod_phases["Running"], 1);
    }

    #[test]
    fn template_and_selector_labels_are_separate() {
        let mut t = Tables::new();
        let doc = json!({
            "apiVersion": "apps/v1", "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "shop", "labels": {"app": "web"}},
            "spec": {
                "selector": {"matchLabels": {"app": "web"}},
                "template": {"metadata": {"labels": {"app": "web", "tier": "fe"}}, "spec": {"containers": []}}
            }
        });
        let rec = normalize(3, &doc).unwrap();
        capture_labels(&mut t, &rec, &doc);
        capture_template_labels(&mut t, &rec, &doc);
        assert_eq!(t.labels.with_pair(LabelCategory::Labels, "app", "web"), &[3]);
        assert_eq!(t.labels.with_pair(LabelCategory::MatchLabels, "app", "web"), &[3]);
        assert_eq!(t.labels.with_key(LabelCategory::PodLabels, "tier"), &[3]);
        assert!(t.labels.with_key(LabelCategory::Labels, "tier").is_empty());
    }

    #[test]
    fn creation_time_parsed() {
        let mut t = Tables::new();
        let doc = json!({"apiVersion": "v1", "kind": "Service", "metadata": {"name": "s", "creationTimestamp": "2020-01-01T00:00:10Z"}});
        capture_created(&mut t, &normalize(1, &doc).unwrap(), &doc);
        assert_eq!(t.inventory.created.get(&1), Some(&1_577_836_810));
    }
}
