//! Owner-link collection. Append only; resolution happens after the batch.

#![forbid(unsafe_code)]

use kmap_core::{NormalizedRecord, OwnerLink, OwnerRef};
use kmap_store::{PodEntry, Tables};
use tracing::debug;

pub const DAEMONSET: &str = "DaemonSet";

/// Emit one provisional link per owner reference. Pods are also entered into
/// the pod table, and DaemonSet-owned pods into the DaemonSet list.
///
/// Returns the number of links emitted.
pub fn collect(tables: &mut Tables, rec: &NormalizedRecord, owners: &[OwnerRef]) -> usize {
    if rec.kind == "Pod" {
        tables.pods.insert(rec.id, PodEntry { namespace: rec.namespace.clone(), owners: owners.to_vec() });
        if owners.iter().any(|o| o.kind.as_deref() == Some(DAEMONSET)) && !tables.pods.mark_daemonset_pod(rec.id) {
            debug!(record = rec.id, "daemonset pod already listed");
        }
    }
    if owners.is_empty() { return 0; }

    let child = rec.ident();
    if child.is_synthetic() {
        debug!(record = rec.id, kind = %rec.kind, "owned resource has no uid; child side uses record id");
    }
    for o in owners {
        if o.uid.is_none() {
            debug!(record = rec.id, parent_kind = %o.kind_or_unknown(), "owner reference without uid; link will be an orphan");
        }
        tables.owners.push(OwnerLink {
            child: child.clone(),
            child_record: rec.id,
            child_kind: rec.kind.clone(),
            child_name: rec.name.clone(),
            namespace: rec.namespace.clone(),
            parent: o.uid.clone(),
            parent_record: None,
            parent_kind: o.kind_or_unknown().to_string(),
            parent_name: o.name_or_unknown().to_string(),
        });
    }
    owners.len()
}
