//! kmap core types: record ids, identifiers, owner links and progress events.
//!
//! Everything here is plain data shared by the store, the ingestion engine and
//! the CLI. Nothing in this crate mutates global state.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

pub mod config;
pub mod error;

pub use config::EngineConfig;
pub use error::{HandlerError, HandlerFailure, RecordOutcome, SkipReason};

/// Namespace value used for resources that declare no namespace.
pub const CLUSTER_LEVEL: &str = "cluster-level";

/// Placeholder for owner-reference fields and node names that are absent.
pub const UNKNOWN: &str = "unknown";

/// Batch-scoped identifier assigned to one ingested document.
pub type RecordId = u32;

/// Parsed documents keyed by record id, in ingestion order.
///
/// Filled by the document parser; the engine only reads it.
#[derive(Debug, Clone, Default)]
pub struct DocumentStore {
    docs: BTreeMap<RecordId, Value>,
    next: RecordId,
}

impl DocumentStore {
    pub fn new() -> Self { Self::default() }

    /// Append a document under the next sequential record id.
    pub fn push(&mut self, doc: Value) -> RecordId {
        let id = self.next;
        self.docs.insert(id, doc);
        self.next = self.next.saturating_add(1);
        id
    }

    /// Insert a document under an explicit record id, replacing any previous body.
    pub fn insert(&mut self, id: RecordId, doc: Value) {
        self.docs.insert(id, doc);
        if id >= self.next {
            self.next = id.saturating_add(1);
        }
    }

    pub fn get(&self, id: RecordId) -> Option<&Value> { self.docs.get(&id) }
    pub fn len(&self) -> usize { self.docs.len() }
    pub fn is_empty(&self) -> bool { self.docs.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = (RecordId, &Value)> + '_ {
        self.docs.iter().map(|(id, v)| (*id, v))
    }
}

impl FromIterator<Value> for DocumentStore {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        let mut store = Self::new();
        for doc in iter {
            store.push(doc);
        }
        store
    }
}

/// Globally unique identifier of a record.
///
/// `Declared` carries `metadata.uid`; `Synthetic` stands in with the record id
/// when the document has none.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub enum Ident {
    Declared(String),
    Synthetic(RecordId),
}

impl Ident {
    pub fn is_synthetic(&self) -> bool { matches!(self, Ident::Synthetic(_)) }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ident::Declared(uid) => f.write_str(uid),
            Ident::Synthetic(id) => write!(f, "#{}", id),
        }
    }
}

impl From<Ident> for String {
    fn from(v: Ident) -> Self { v.to_string() }
}

/// Validated, minimal summary of one document. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub id: RecordId,
    pub api_version: String,
    pub kind: String,
    /// Declared namespace, or [`CLUSTER_LEVEL`].
    pub namespace: String,
    pub name: String,
    /// `metadata.uid` when declared.
    pub uid: Option<String>,
    /// Whether the document declared `metadata.namespace`.
    pub namespaced: bool,
}

impl NormalizedRecord {
    pub fn ident(&self) -> Ident {
        match &self.uid {
            Some(uid) => Ident::Declared(uid.clone()),
            None => Ident::Synthetic(self.id),
        }
    }

    /// `namespace.kind.name`
    pub fn composite_key(&self) -> String {
        format!("{}.{}.{}", self.namespace, self.kind, self.name)
    }

    pub fn summary(&self) -> IdentSummary {
        IdentSummary {
            record: self.id,
            namespace: self.namespaced.then(|| self.namespace.clone()),
            kind: self.kind.clone(),
            name: self.name.clone(),
            api_version: self.api_version.clone(),
        }
    }
}

/// Identifier table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentSummary {
    pub record: RecordId,
    pub namespace: Option<String>,
    pub kind: String,
    pub name: String,
    pub api_version: String,
}

/// One entry of `metadata.ownerReferences`, taken as declared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub api_version: Option<String>,
    pub kind: Option<String>,
    pub name: Option<String>,
    pub uid: Option<String>,
    pub controller: bool,
}

impl OwnerRef {
    pub fn from_value(v: &Value) -> Self {
        let s = |k: &str| v.get(k).and_then(|x| x.as_str()).map(|x| x.to_string());
        Self {
            api_version: s("apiVersion"),
            kind: s("kind"),
            name: s("name"),
            uid: s("uid"),
            controller: v.get("controller").and_then(|x| x.as_bool()).unwrap_or(false),
        }
    }

    pub fn kind_or_unknown(&self) -> &str { self.kind.as_deref().unwrap_or(UNKNOWN) }
    pub fn name_or_unknown(&self) -> &str { self.name.as_deref().unwrap_or(UNKNOWN) }
}

/// Read `metadata.ownerReferences`; non-object entries are ignored.
pub fn owner_refs(doc: &Value) -> SmallVec<[OwnerRef; 2]> {
    doc.pointer("/metadata/ownerReferences")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter(|o| o.is_object()).map(OwnerRef::from_value).collect())
        .unwrap_or_default()
}

/// Parent to child edge derived from one owner reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnerLink {
    pub child: Ident,
    pub child_record: RecordId,
    pub child_kind: String,
    pub child_name: String,
    pub namespace: String,
    /// `uid` stated on the owner reference.
    pub parent: Option<String>,
    /// Set by the resolver when `parent` matches an identifier table entry.
    pub parent_record: Option<RecordId>,
    pub parent_kind: String,
    pub parent_name: String,
}

impl OwnerLink {
    pub fn is_resolved(&self) -> bool { self.parent_record.is_some() }
}

/// Network-relevant attributes of one resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NetAttrs {
    Pod {
        host_network: bool,
        pod_ip: Option<String>,
        pod_ips: Vec<String>,
        qos_class: Option<String>,
        node_name: String,
    },
    /// Ingress, IngressClass and IngressController keep their full definition.
    ClusterIngress { definition: Value },
    /// Scalar attributes projected from well-known paths.
    Projected { fields: SmallVec<[(String, String); 8]> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkFact {
    pub record: RecordId,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub attrs: NetAttrs,
}

/// `kind:namespace:name`
pub fn net_key(kind: &str, namespace: &str, name: &str) -> String {
    format!("{}:{}:{}", kind, namespace, name)
}

/// Progress notification for an external reporting layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub msg: String,
    pub current: usize,
    pub total: usize,
}

/// Receiver of progress notifications. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, ev: ProgressEvent);
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn notify(&self, _ev: ProgressEvent) {}
}

pub mod prelude {
    pub use super::{
        DocumentStore, Ident, IdentSummary, NetAttrs, NetworkFact, NormalizedRecord, OwnerLink, OwnerRef,
        ProgressEvent, ProgressSink, RecordId, CLUSTER_LEVEL, UNKNOWN,
    };
}
