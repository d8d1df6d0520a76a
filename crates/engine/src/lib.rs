//! kmap engine: one ingestion pass over a document store, then owner-graph
//! resolution.
//!
//! Per document: registry upsert, normalization, optional Secret redaction,
//! index and identifier insertion, fact extraction, owner-link collection,
//! and finally collaborator dispatch. Nothing in a single document can fail
//! the batch; every document yields a [`RecordOutcome`] in the report.

#![forbid(unsafe_code)]

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;

use kmap_core::{
    owner_refs, DocumentStore, EngineConfig, ProgressEvent, ProgressSink, RecordId, RecordOutcome, SkipReason,
};
use kmap_store::{Catalog, CatalogHandle, ResolveSummary, Tables};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub mod facts;
pub mod handlers;
pub mod normalize;
pub mod owners;
pub mod project;
pub mod redact;

pub use handlers::{HandlerCtx, HandlerRegistry, KindHandler};

/// Per-batch tallies plus every record's outcome, in record order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub handler_failures: usize,
    pub links: usize,
    pub resolved: usize,
    pub orphans: usize,
    pub duration_ms: u64,
    pub outcomes: Vec<(RecordId, RecordOutcome)>,
}

impl BatchReport {
    pub fn outcome(&self, id: RecordId) -> Option<&RecordOutcome> {
        self.outcomes.iter().find(|(rid, _)| *rid == id).map(|(_, o)| o)
    }

    pub fn skip_reasons(&self) -> impl Iterator<Item = (RecordId, &SkipReason)> + '_ {
        self.outcomes.iter().filter_map(|(id, o)| match o {
            RecordOutcome::Skipped(r) => Some((*id, r)),
            _ => None,
        })
    }

    pub fn failed(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, RecordOutcome::HandlerFailed(_)))
            .map(|(id, _)| *id)
    }

    /// No skips and no collaborator failures.
    pub fn is_clean(&self) -> bool { self.skipped == 0 && self.handler_failures == 0 }

    fn absorb(&mut self, summary: ResolveSummary) {
        self.links = summary.links;
        self.resolved = summary.resolved;
        self.orphans = summary.orphans;
    }
}

/// A frozen catalog with the report of the run that built it.
#[derive(Debug, Clone)]
pub struct Batch {
    pub catalog: Arc<Catalog>,
    pub report: BatchReport,
}

#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
    handlers: HandlerRegistry,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config, handlers: HandlerRegistry::builtin() }
    }

    pub fn with_handlers(config: EngineConfig, handlers: HandlerRegistry) -> Self {
        Self { config, handlers }
    }

    pub fn config(&self) -> &EngineConfig { &self.config }
    pub fn handlers(&self) -> &HandlerRegistry { &self.handlers }

    /// Ingest one document into `tables`. Each record id must be submitted
    /// once per batch; indexes are append-only.
    pub fn ingest(&self, tables: &mut Tables, id: RecordId, raw: &Value) -> RecordOutcome {
        if let Some((api_version, kind, namespaced)) = normalize::resource_type(raw) {
            tables.registry.upsert(api_version, kind, namespaced);
        }
        let rec = match normalize::normalize(id, raw) {
            Ok(rec) => rec,
            Err(reason) => {
                tables.status.skipped += 1;
                warn!(record = id, reason = %reason, "document skipped");
                metrics::counter!("docs_skipped_total", 1u64, "reason" => reason.label());
                return RecordOutcome::Skipped(reason);
            }
        };

        let doc: Cow<'_, Value> = if self.config.redact_secrets && rec.kind == "Secret" {
            let mut owned = raw.clone();
            let n = redact::redact_secret(&mut owned);
            debug!(record = id, replaced = n, "secret redacted");
            Cow::Owned(owned)
        } else {
            Cow::Borrowed(raw)
        };
        let doc: &Value = &doc;

        tables.indexes.insert(&rec);
        if rec.uid.is_none() {
            warn!(record = id, kind = %rec.kind, name = %rec.name, "no metadata.uid; using record id as identifier");
        }
        tables.idents.insert(rec.ident(), rec.summary());

        let node = normalize::node_name(doc);
        facts::capture_inventory(tables, &rec);
        facts::capture_annotations(tables, &rec, doc);
        facts::capture_labels(tables, &rec, doc);
        facts::capture_managed_by(tables, &rec, doc);
        facts::capture_template_labels(tables, &rec, doc);
        facts::capture_network(tables, &rec, doc, node);
        facts::capture_created(tables, &rec, doc);
        let phase = facts::capture_status(tables, &rec, doc, self.config.drop_status);

        let owners = owner_refs(doc);
        owners::collect(tables, &rec, &owners);

        tables.status.processed += 1;
        metrics::counter!("docs_processed_total", 1u64);

        let ctx = HandlerCtx {
            record: &rec,
            doc,
            owners: &owners,
            status: self.config.drop_status.then(|| doc.get("status")).flatten(),
            phase: phase.as_deref(),
            node,
        };
        let failures = self.handlers.dispatch(&ctx, &mut tables.details);
        tables.records.insert(id, rec);
        if failures.is_empty() {
            RecordOutcome::Indexed
        } else {
            RecordOutcome::HandlerFailed(failures)
        }
    }

    /// Ingest every document in record order, resolve, and freeze.
    pub fn run(&self, docs: &DocumentStore, progress: &dyn ProgressSink) -> Batch {
        let started = Instant::now();
        let total = docs.len();
        let step = self.config.progress_increment(total);
        let mut tables = Tables::new();
        let mut report = BatchReport { total, ..Default::default() };
        info!(total, "batch started");

        for (n, (id, raw)) in docs.iter().enumerate() {
            let outcome = self.ingest(&mut tables, id, raw);
            match &outcome {
                RecordOutcome::Indexed => report.processed += 1,
                RecordOutcome::Skipped(_) => report.skipped += 1,
                RecordOutcome::HandlerFailed(f) => {
                    report.processed += 1;
                    report.handler_failures += f.len();
                }
            }
            report.outcomes.push((id, outcome));
            let current = n + 1;
            if current % step == 0 || current == total {
                let msg = format!("Progress - parsed documents: {} of {}", current, total);
                info!("{}", msg);
                progress.notify(ProgressEvent { msg, current, total });
            }
        }

        let summary = tables.owners.resolve(&tables.idents);
        report.absorb(summary);
        let catalog = Arc::new(tables.freeze());
        report.duration_ms = started.elapsed().as_millis() as u64;
        metrics::histogram!("batch_duration_ms", started.elapsed().as_secs_f64() * 1000.0);
        info!(
            processed = report.processed,
            skipped = report.skipped,
            failures = report.handler_failures,
            links = report.links,
            orphans = report.orphans,
            took_ms = report.duration_ms,
            "batch complete"
        );
        Batch { catalog, report }
    }
}

/// Progress sink over a bounded channel. Events are dropped when the
/// receiver lags or is gone; ingestion never waits on it.
#[derive(Debug, Clone)]
pub struct ChannelProgress(pub mpsc::Sender<ProgressEvent>);

impl ProgressSink for ChannelProgress {
    fn notify(&self, ev: ProgressEvent) {
        if let Err(e) = self.0.try_send(ev) {
            debug!(error = %e, "progress event dropped");
        }
    }
}

/// Run a batch on the blocking pool and publish the catalog into `handle`.
/// Progress arrives on the returned receiver; the join handle yields the report.
pub fn spawn_batch(
    engine: Arc<Engine>,
    docs: DocumentStore,
    handle: CatalogHandle,
    capacity: usize,
) -> (mpsc::Receiver<ProgressEvent>, JoinHandle<BatchReport>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let join = tokio::task::spawn_blocking(move || {
        let sink = ChannelProgress(tx);
        let Batch { catalog, report } = engine.run(&docs, &sink);
        handle.publish(catalog);
        report
    });
    (rx, join)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kmap_core::NoProgress;
    use serde_json::json;

    #[test]
    fn ingest_counts_processed_and_skipped() {
        let engine = Engine::default();
        let mut t = Tables::new();
        let ok = json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cm", "namespace": "a", "uid": "u1"}});
        let bad = json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"namespace": "a"}});
        assert_eq!(engine.ingest(&mut t, 0, &ok), RecordOutcome::Indexed);
        assert!(matches!(engine.ingest(&mut t, 1, &bad), RecordOutcome::Skipped(SkipReason::MissingName { .. })));
        assert_eq!(t.status.processed, 1);
        assert_eq!(t.status.skipped, 1);
        // The registry still saw the rejected document's type.
        assert_eq!(t.registry.len(), 1);
        assert_eq!(t.records.len(), 1);
    }

    #[test]
    fn progress_every_step() {
        struct Collect(std::sync::Mutex<Vec<ProgressEvent>>);
        impl ProgressSink for Collect {
            fn notify(&self, ev: ProgressEvent) {
                if let Ok(mut v) = self.0.lock() {
                    v.push(ev);
                }
            }
        }
        let docs: DocumentStore = (0..10)
            .map(|i| json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": format!("cm-{}", i)}}))
            .collect();
        let sink = Collect(Default::default());
        let batch = Engine::default().run(&docs, &sink);
        let events = sink.0.into_inner().unwrap();
        assert_eq!(events.iter().map(|e| e.current).collect::<Vec<_>>(), vec![2, 4, 6, 8, 10]);
        assert_eq!(events[0].msg, "Progress - parsed documents: 2 of 10");
        assert_eq!(batch.report.processed, 10);
        assert!(batch.report.is_clean());
    }

    #[test]
    fn empty_batch() {
        let batch = Engine::default().run(&DocumentStore::new(), &NoProgress);
        assert_eq!(batch.report.total, 0);
        assert!(batch.catalog.records.is_empty());
    }
}
