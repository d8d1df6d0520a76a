//! Side tables filled during ingestion: identifiers, network facts, status,
//! managed-by groupings, resource types and collaborator details.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use kmap_core::{Ident, IdentSummary, NetworkFact, OwnerRef, RecordId};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use smallvec::SmallVec;
use tracing::warn;

/// Declared (or synthetic) identifier -> record summary. First entry wins.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IdentifierTable {
    entries: FxHashMap<Ident, IdentSummary>,
}

impl IdentifierTable {
    /// Returns false when the identifier was already taken.
    pub fn insert(&mut self, ident: Ident, summary: IdentSummary) -> bool {
        if let Some(prev) = self.entries.get(&ident) {
            warn!(ident = %ident, record = summary.record, first = prev.record, "duplicate identifier; keeping first");
            return false;
        }
        self.entries.insert(ident, summary);
        true
    }

    pub fn get(&self, ident: &Ident) -> Option<&IdentSummary> { self.entries.get(ident) }

    /// Look up a `metadata.uid` as stated on an owner reference.
    pub fn get_declared(&self, uid: &str) -> Option<&IdentSummary> {
        self.entries.get(&Ident::Declared(uid.to_string()))
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = (&Ident, &IdentSummary)> { self.entries.iter() }
}

/// Network facts keyed by `kind:namespace:name`. First entry wins.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NetTable {
    facts: FxHashMap<String, NetworkFact>,
}

impl NetTable {
    pub fn insert(&mut self, key: String, fact: NetworkFact) -> bool {
        if self.facts.contains_key(&key) {
            warn!(key = %key, record = fact.record, "network fact already exists; keeping first");
            return false;
        }
        self.facts.insert(key, fact);
        true
    }

    pub fn get(&self, key: &str) -> Option<&NetworkFact> { self.facts.get(key) }
    pub fn len(&self) -> usize { self.facts.len() }
    pub fn is_empty(&self) -> bool { self.facts.is_empty() }
    pub fn iter(&self) -> impl Iterator<Item = (&String, &NetworkFact)> { self.facts.iter() }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodStatus {
    pub phase: String,
    pub count: u32,
}

/// Batch counters. Every value only grows within a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusCounters {
    pub processed: u64,
    pub skipped: u64,
    /// Pod phase -> count
    pub pod_phases: BTreeMap<String, u64>,
    pub pod_status: BTreeMap<RecordId, PodStatus>,
    /// kind -> namespace -> count
    pub per_kind: BTreeMap<String, BTreeMap<String, u64>>,
}

impl StatusCounters {
    pub fn record_phase(&mut self, id: RecordId, phase: &str) {
        match self.pod_status.get_mut(&id) {
            Some(st) => st.count += 1,
            None => { self.pod_status.insert(id, PodStatus { phase: phase.to_string(), count: 1 }); }
        }
        *self.pod_phases.entry(phase.to_string()).or_insert(0) += 1;
    }

    pub fn count_kind(&mut self, kind: &str, namespace: &str) {
        *self.per_kind.entry(kind.to_string()).or_default().entry(namespace.to_string()).or_insert(0) += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagedEntry {
    pub record: RecordId,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

/// Resources grouped by `app.kubernetes.io/managed-by`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ManagedBy {
    /// chart -> resources
    pub helm: BTreeMap<String, Vec<ManagedEntry>>,
    pub operator: Vec<ManagedEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceType {
    pub api_version: String,
    pub kind: String,
    pub namespaced: bool,
}

/// `apiVersion:kind` -> first-seen resource type. Descriptive only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TypeRegistry {
    types: BTreeMap<String, ResourceType>,
}

impl TypeRegistry {
    pub fn upsert(&mut self, api_version: &str, kind: &str, namespaced: bool) {
        let key = format!("{}:{}", api_version, kind);
        self.types.entry(key).or_insert_with(|| ResourceType {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            namespaced,
        });
    }

    pub fn get(&self, api_version: &str, kind: &str) -> Option<&ResourceType> {
        self.types.get(&format!("{}:{}", api_version, kind))
    }

    pub fn len(&self) -> usize { self.types.len() }
    pub fn is_empty(&self) -> bool { self.types.is_empty() }
    pub fn iter(&self) -> impl Iterator<Item = &ResourceType> { self.types.values() }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PodEntry {
    pub namespace: String,
    pub owners: Vec<OwnerRef>,
}

/// Pods by record id, and the DaemonSet-owned subset.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PodTable {
    pub pods: BTreeMap<RecordId, PodEntry>,
    daemonset_pods: Vec<RecordId>,
    #[serde(skip)]
    daemonset_seen: FxHashSet<RecordId>,
}

impl PodTable {
    /// First sighting wins.
    pub fn insert(&mut self, id: RecordId, entry: PodEntry) -> bool {
        if self.pods.contains_key(&id) { return false; }
        self.pods.insert(id, entry);
        true
    }

    /// Duplicate-suppressed.
    pub fn mark_daemonset_pod(&mut self, id: RecordId) -> bool {
        if !self.daemonset_seen.insert(id) { return false; }
        self.daemonset_pods.push(id);
        true
    }

    pub fn daemonset_pods(&self) -> &[RecordId] { &self.daemonset_pods }
}

/// Output of one kind-specific or generic collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detail {
    pub handler: &'static str,
    pub fields: SmallVec<[(String, String); 8]>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DetailTable {
    entries: BTreeMap<RecordId, Vec<Detail>>,
}

impl DetailTable {
    pub fn push(&mut self, id: RecordId, detail: Detail) {
        self.entries.entry(id).or_default().push(detail);
    }

    pub fn get(&self, id: RecordId) -> &[Detail] {
        self.entries.get(&id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Detail recorded by a given handler for a record.
    pub fn by_handler(&self, id: RecordId, handler: &str) -> Option<&Detail> {
        self.get(id).iter().find(|d| d.handler == handler)
    }

    pub fn field<'a>(&'a self, id: RecordId, handler: &str, key: &str) -> Option<&'a str> {
        self.by_handler(id, handler)?
            .fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Namespaces and kinds seen, and which record defines each Namespace.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Inventory {
    pub namespaces: BTreeSet<String>,
    pub kinds: BTreeSet<String>,
    /// namespace name -> first `kind: Namespace` record
    pub namespace_defs: BTreeMap<String, RecordId>,
    /// Ingress, IngressClass and IngressController definitions by kind.
    pub ingress_defs: BTreeMap<String, Vec<(RecordId, serde_json::Value)>>,
    /// `metadata.creationTimestamp` as epoch seconds.
    pub created: BTreeMap<RecordId, i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(record: RecordId) -> IdentSummary {
        IdentSummary { record, namespace: None, kind: "Pod".into(), name: "p".into(), api_version: "v1".into() }
    }

    #[test]
    fn identifier_first_wins() {
        let mut t = IdentifierTable::default();
        assert!(t.insert(Ident::Declared("u".into()), summary(1)));
        assert!(!t.insert(Ident::Declared("u".into()), summary(2)));
        assert_eq!(t.get_declared("u").map(|s| s.record), Some(1));
        assert!(t.insert(Ident::Synthetic(3), summary(3)));
        assert!(t.get_declared("3").is_none());
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn phases_accumulate() {
        let mut st = StatusCounters::default();
        st.record_phase(1, "Running");
        st.record_phase(2, "Running");
        st.record_phase(2, "Running");
        assert_eq!(st.pod_phases["Running"], 3);
        assert_eq!(st.pod_status[&2].count, 2);
    }

    #[test]
    fn daemonset_pods_deduplicated() {
        let mut pods = PodTable::default();
        assert!(pods.mark_daemonset_pod(5));
        assert!(!pods.mark_daemonset_pod(5));
        assert_eq!(pods.daemonset_pods(), &[5]);
    }

    #[test]
    fn registry_keeps_first_sighting() {
        let mut reg = TypeRegistry::default();
        reg.upsert("v1", "Pod", true);
        reg.upsert("v1", "Pod", false);
        assert_eq!(reg.get("v1", "Pod").map(|t| t.namespaced), Some(true));
        assert_eq!(reg.len(), 1);
    }
}
