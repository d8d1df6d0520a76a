//! kmap store: the tables one ingestion batch writes, the ownership graph,
//! and the frozen catalog readers see once the batch is resolved.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;

use arc_swap::ArcSwap;
use kmap_core::{NormalizedRecord, RecordId};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

pub mod graph;
pub mod indexes;
pub mod tables;

pub use graph::{GraphState, OwnerGraph, ResolveSummary};
pub use indexes::{Indexes, LabelCategory, LabelEntry, LabelIndex, Postings};
pub use tables::{
    Detail, DetailTable, IdentifierTable, Inventory, ManagedBy, ManagedEntry, NetTable, PodEntry, PodStatus,
    PodTable, ResourceType, StatusCounters, TypeRegistry,
};

/// Every table of one batch. Created empty at batch start, written once per
/// record, then frozen into a [`Catalog`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct Tables {
    /// Valid records in ingestion order.
    pub records: BTreeMap<RecordId, NormalizedRecord>,
    pub indexes: Indexes,
    pub labels: LabelIndex,
    pub idents: IdentifierTable,
    pub net: NetTable,
    pub status: StatusCounters,
    pub managed: ManagedBy,
    pub registry: TypeRegistry,
    pub pods: PodTable,
    pub inventory: Inventory,
    pub details: DetailTable,
    pub owners: OwnerGraph,
}

impl Tables {
    pub fn new() -> Self { Self::default() }

    /// Resolve the ownership graph and freeze. Resolution always runs here so
    /// a catalog never carries pending edges.
    pub fn freeze(mut self) -> Catalog {
        let summary = if self.owners.state() == GraphState::Resolved {
            ResolveSummary {
                links: self.owners.len(),
                resolved: self.owners.links().iter().filter(|l| l.is_resolved()).count(),
                orphans: self.owners.orphans().count(),
            }
        } else {
            self.owners.resolve(&self.idents)
        };
        metrics::gauge!("catalog_records", self.records.len() as f64);
        metrics::gauge!("catalog_identifiers", self.idents.len() as f64);
        metrics::gauge!("catalog_net_facts", self.net.len() as f64);
        debug!(records = self.records.len(), links = summary.links, orphans = summary.orphans, "catalog frozen");
        Catalog { tables: self, summary }
    }

    pub fn record(&self, id: RecordId) -> Option<&NormalizedRecord> { self.records.get(&id) }
}

/// Read-only view of a completed batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Catalog {
    #[serde(flatten)]
    tables: Tables,
    summary: ResolveSummary,
}

impl Catalog {
    pub fn summary(&self) -> ResolveSummary { self.summary }
}

impl Deref for Catalog {
    type Target = Tables;
    fn deref(&self) -> &Tables { &self.tables }
}

/// Handle for readers to access the latest catalog and subscribe to swaps.
#[derive(Clone)]
pub struct CatalogHandle {
    snap: Arc<ArcSwap<Catalog>>,
    epoch_tx: Arc<watch::Sender<u64>>,
    epoch_rx: watch::Receiver<u64>,
}

impl Default for CatalogHandle {
    fn default() -> Self { Self::new() }
}

impl CatalogHandle {
    pub fn new() -> Self {
        let (epoch_tx, epoch_rx) = watch::channel(0u64);
        Self {
            snap: Arc::new(ArcSwap::from_pointee(Catalog::default())),
            epoch_tx: Arc::new(epoch_tx),
            epoch_rx,
        }
    }

    pub fn current(&self) -> Arc<Catalog> { self.snap.load_full() }
    pub fn epoch(&self) -> u64 { *self.epoch_rx.borrow() }
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_rx.clone() }

    /// Swap in a new catalog; returns the new epoch.
    pub fn publish(&self, catalog: Arc<Catalog>) -> u64 {
        let records = catalog.records.len();
        self.snap.store(catalog);
        let mut epoch = 0u64;
        self.epoch_tx.send_modify(|e| {
            *e = e.saturating_add(1);
            epoch = *e;
        });
        info!(epoch, records, "catalog published");
        epoch
    }
}
