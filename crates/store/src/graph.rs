//! Ownership graph: owner links collected during ingestion, resolved in a
//! second pass once every identifier of the batch is known.

#![forbid(unsafe_code)]

use kmap_core::{Ident, OwnerLink, RecordId};
use serde::Serialize;
use tracing::{debug, warn};

use crate::tables::IdentifierTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum GraphState {
    #[default]
    Pending,
    Resolving,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct ResolveSummary {
    pub links: usize,
    pub resolved: usize,
    pub orphans: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OwnerGraph {
    links: Vec<OwnerLink>,
    state: GraphState,
    /// Positions in `links` left unresolved by the last resolution.
    orphans: Vec<usize>,
}

impl OwnerGraph {
    pub fn state(&self) -> GraphState { self.state }
    pub fn links(&self) -> &[OwnerLink] { &self.links }
    pub fn len(&self) -> usize { self.links.len() }
    pub fn is_empty(&self) -> bool { self.links.is_empty() }

    /// Append a provisional edge. Any earlier resolution becomes stale.
    pub fn push(&mut self, link: OwnerLink) {
        self.links.push(link);
        self.state = GraphState::Pending;
    }

    /// Resolve every edge's parent record from scratch against `idents`.
    ///
    /// Misses are orphans, not errors. Re-running over the same links and
    /// identifiers yields the same assignments.
    pub fn resolve(&mut self, idents: &IdentifierTable) -> ResolveSummary {
        self.state = GraphState::Resolving;
        self.orphans.clear();
        let mut resolved = 0usize;
        for (i, link) in self.links.iter_mut().enumerate() {
            link.parent_record = link
                .parent
                .as_deref()
                .and_then(|uid| idents.get_declared(uid))
                .map(|s| s.record);
            if link.parent_record.is_some() {
                resolved += 1;
            } else {
                debug!(
                    child = %link.child,
                    parent = ?link.parent,
                    parent_kind = %link.parent_kind,
                    parent_name = %link.parent_name,
                    "owner not found in batch"
                );
                self.orphans.push(i);
            }
        }
        self.state = GraphState::Resolved;
        if !self.orphans.is_empty() {
            warn!(orphans = self.orphans.len(), links = self.links.len(), "unresolved owner references");
        }
        metrics::gauge!("graph_links", self.links.len() as f64);
        metrics::gauge!("graph_orphans", self.orphans.len() as f64);
        ResolveSummary { links: self.links.len(), resolved, orphans: self.orphans.len() }
    }

    pub fn orphans(&self) -> impl Iterator<Item = &OwnerLink> + '_ {
        self.orphans.iter().filter_map(|i| self.links.get(*i))
    }

    /// Edges whose declared parent is `ident`.
    pub fn children_of<'a>(&'a self, ident: &'a Ident) -> impl Iterator<Item = &'a OwnerLink> + 'a {
        self.links.iter().filter(move |l| match ident {
            Ident::Declared(uid) => l.parent.as_deref() == Some(uid.as_str()),
            Ident::Synthetic(_) => false,
        })
    }

    /// Edges whose resolved parent is `record`.
    pub fn children_of_record(&self, record: RecordId) -> impl Iterator<Item = &OwnerLink> + '_ {
        self.links.iter().filter(move |l| l.parent_record == Some(record))
    }

    pub fn parents_of<'a>(&'a self, child: &'a Ident) -> impl Iterator<Item = &'a OwnerLink> + 'a {
        self.links.iter().filter(move |l| &l.child == child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kmap_core::IdentSummary;

    fn link(child: RecordId, parent: Option<&str>) -> OwnerLink {
        OwnerLink {
            child: Ident::Synthetic(child),
            child_record: child,
            child_kind: "Pod".into(),
            child_name: format!("pod-{}", child),
            namespace: "default".into(),
            parent: parent.map(|s| s.to_string()),
            parent_record: None,
            parent_kind: "ReplicaSet".into(),
            parent_name: "rs".into(),
        }
    }

    fn idents(pairs: &[(&str, RecordId)]) -> IdentifierTable {
        let mut t = IdentifierTable::default();
        for (uid, rec) in pairs {
            t.insert(
                Ident::Declared(uid.to_string()),
                IdentSummary { record: *rec, namespace: None, kind: "ReplicaSet".into(), name: "rs".into(), api_version: "apps/v1".into() },
            );
        }
        t
    }

    #[test]
    fn resolves_and_reports_orphans() {
        let mut g = OwnerGraph::default();
        g.push(link(1, Some("rs-1")));
        g.push(link(2, Some("rs-missing")));
        g.push(link(3, None));
        assert_eq!(g.state(), GraphState::Pending);
        let sum = g.resolve(&idents(&[("rs-1", 9)]));
        assert_eq!(g.state(), GraphState::Resolved);
        assert_eq!(sum, ResolveSummary { links: 3, resolved: 1, orphans: 2 });
        assert_eq!(g.links()[0].parent_record, Some(9));
        let orphan_children: Vec<_> = g.orphans().map(|l| l.child_record).collect();
        assert_eq!(orphan_children, vec![2, 3]);
    }

    #[test]
    fn resolution_is_idempotent() {
        let mut g = OwnerGraph::default();
        g.push(link(1, Some("a")));
        g.push(link(2, Some("b")));
        let ids = idents(&[("a", 5)]);
        g.resolve(&ids);
        let first: Vec<_> = g.links().iter().map(|l| l.parent_record).collect();
        g.resolve(&ids);
        let second: Vec<_> = g.links().iter().map(|l| l.parent_record).collect();
        assert_eq!(first, second);
        assert_eq!(g.orphans().count(), 1);
    }

    #[test]
    fn re_resolution_starts_from_scratch() {
        let mut g = OwnerGraph::default();
        g.push(link(1, Some("a")));
        g.resolve(&idents(&[("a", 5)]));
        g.resolve(&idents(&[]));
        assert_eq!(g.links()[0].parent_record, None);
    }

    #[test]
    fn navigation() {
        let mut g = OwnerGraph::default();
        g.push(link(1, Some("a")));
        g.push(link(2, Some("a")));
        g.push(link(3, Some("b")));
        g.resolve(&idents(&[("a", 5), ("b", 6)]));
        let a = Ident::Declared("a".into());
        assert_eq!(g.children_of(&a).count(), 2);
        assert_eq!(g.children_of_record(6).count(), 1);
        let c = Ident::Synthetic(3);
        assert_eq!(g.parents_of(&c).next().map(|l| l.parent_record), Some(Some(6)));
    }
}
