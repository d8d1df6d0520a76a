use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use kmap_core::{EngineConfig, RecordId};
use kmap_engine::{spawn_batch, BatchReport, Engine};
use kmap_store::{Catalog, CatalogHandle, LabelCategory};
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};

mod load;

#[derive(Parser, Debug)]
#[command(name = "kmapctl", version, about = "Classify Kubernetes manifests and inspect their relationships")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Replace Secret payloads before indexing (also KMAP_REDACT_SECRETS)
    #[arg(long = "redact-secrets", action = ArgAction::SetTrue, global = true)]
    redact_secrets: bool,

    /// Capture Pod status phases (also KMAP_DROP_STATUS)
    #[arg(long = "drop-status", action = ArgAction::SetTrue, global = true)]
    drop_status: bool,

    /// Print progress events to stderr
    #[arg(long = "progress", action = ArgAction::SetTrue, global = true)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Args, Debug)]
struct Input {
    /// Manifest files or directories; `-` reads stdin
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Counts per kind and namespace, skips, orphans and groupings
    Summary {
        #[command(flatten)]
        input: Input,
    },
    /// Owner edges after resolution
    Owners {
        #[command(flatten)]
        input: Input,
        /// Only edges whose parent is not in the input set
        #[arg(long = "orphans", action = ArgAction::SetTrue)]
        orphans: bool,
    },
    /// Query the indexes; filters are intersected
    Lookup {
        #[command(flatten)]
        input: Input,
        #[arg(long = "kind")]
        kind: Option<String>,
        #[arg(long = "ns")]
        namespace: Option<String>,
        #[arg(long = "name")]
        name: Option<String>,
        #[arg(long = "anno-key")]
        anno_key: Option<String>,
        #[arg(long = "anno-value")]
        anno_value: Option<String>,
        /// Label selector `key` or `key=value`
        #[arg(long = "label")]
        label: Option<String>,
    },
}

fn init_tracing() {
    let env = std::env::var("KMAP_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KMAP_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KMAP_METRICS_ADDR; expected host:port");
        }
    }
}

/// Env first, flags on top.
fn engine_config(cli: &Cli) -> EngineConfig {
    let mut cfg = EngineConfig::from_env();
    cfg.redact_secrets |= cli.redact_secrets;
    cfg.drop_status |= cli.drop_status;
    cfg
}

async fn run_batch(cli: &Cli, input: &Input) -> Result<(Arc<Catalog>, BatchReport)> {
    let docs = load::load_paths(&input.paths)?;
    info!(docs = docs.len(), "manifests loaded");
    let engine = Arc::new(Engine::new(engine_config(cli)));
    let handle = CatalogHandle::new();
    let (mut progress, join) = spawn_batch(engine, docs, handle.clone(), 64);

    let drain = async {
        while let Some(ev) = progress.recv().await {
            if cli.progress {
                eprintln!("{} ({}/{})", ev.msg, ev.current, ev.total);
            }
        }
    };
    tokio::select! {
        _ = drain => {}
        _ = signal::ctrl_c() => {
            warn!("Ctrl-C received; abandoning batch");
            anyhow::bail!("interrupted");
        }
    }
    let report = join.await.context("batch task failed")?;
    Ok((handle.current(), report))
}

fn describe(cat: &Catalog, id: RecordId) -> String {
    match cat.record(id) {
        Some(r) => format!("{}/{}/{}", r.kind, r.namespace, r.name),
        None => format!("#{}", id),
    }
}

#[derive(Serialize)]
struct SummaryView<'a> {
    report: &'a BatchReport,
    namespaces: Vec<&'a str>,
    per_kind: &'a BTreeMap<String, BTreeMap<String, u64>>,
    pod_phases: &'a BTreeMap<String, u64>,
    helm_charts: BTreeMap<&'a str, usize>,
    operator_managed: usize,
    daemonset_pods: Vec<String>,
    resource_types: usize,
}

fn summary(cat: &Catalog, report: &BatchReport, output: Output) -> Result<()> {
    let view = SummaryView {
        report,
        namespaces: cat.inventory.namespaces.iter().map(|s| s.as_str()).collect(),
        per_kind: &cat.status.per_kind,
        pod_phases: &cat.status.pod_phases,
        helm_charts: cat.managed.helm.iter().map(|(k, v)| (k.as_str(), v.len())).collect(),
        operator_managed: cat.managed.operator.len(),
        daemonset_pods: cat.pods.daemonset_pods().iter().map(|id| describe(cat, *id)).collect(),
        resource_types: cat.registry.len(),
    };
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(&view)?),
        Output::Human => {
            println!(
                "documents: {}  indexed: {}  skipped: {}  handler failures: {}",
                report.total, report.processed, report.skipped, report.handler_failures
            );
            println!("owner links: {}  resolved: {}  orphans: {}", report.links, report.resolved, report.orphans);
            println!();
            println!("{:<32} {:<24} {}", "KIND", "NAMESPACE", "COUNT");
            for (kind, by_ns) in view.per_kind {
                for (ns, n) in by_ns {
                    println!("{:<32} {:<24} {}", kind, ns, n);
                }
            }
            if !view.pod_phases.is_empty() {
                println!();
                for (phase, n) in view.pod_phases {
                    println!("pods {}: {}", phase, n);
                }
            }
            if !view.helm_charts.is_empty() {
                println!();
                for (chart, n) in &view.helm_charts {
                    println!("helm chart {}: {} resources", chart, n);
                }
            }
            if view.operator_managed > 0 {
                println!("operator managed: {}", view.operator_managed);
            }
            if !view.daemonset_pods.is_empty() {
                println!("daemonset pods: {}", view.daemonset_pods.join(", "));
            }
            for (id, reason) in report.skip_reasons() {
                println!("skipped #{}: {}", id, reason);
            }
        }
    }
    Ok(())
}

fn owners(cat: &Catalog, only_orphans: bool, output: Output) -> Result<()> {
    let links: Vec<_> = cat.owners.links().iter().filter(|l| !only_orphans || !l.is_resolved()).collect();
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(&links)?),
        Output::Human => {
            println!("{:<40} {:<40} {}", "CHILD", "PARENT", "RESOLVED");
            for l in links {
                let child = format!("{}/{}/{}", l.child_kind, l.namespace, l.child_name);
                let parent = format!("{}/{}", l.parent_kind, l.parent_name);
                let state = match l.parent_record {
                    Some(id) => describe(cat, id),
                    None => "orphan".to_string(),
                };
                println!("{:<40} {:<40} {}", child, parent, state);
            }
        }
    }
    Ok(())
}

fn intersect(acc: Option<Vec<RecordId>>, ids: &[RecordId]) -> Option<Vec<RecordId>> {
    let mut next: Vec<RecordId> = ids.to_vec();
    next.sort_unstable();
    next.dedup();
    Some(match acc {
        None => next,
        Some(prev) => prev.into_iter().filter(|id| next.binary_search(id).is_ok()).collect(),
    })
}

#[allow(clippy::too_many_arguments)]
fn lookup(
    cat: &Catalog,
    kind: Option<&str>,
    ns: Option<&str>,
    name: Option<&str>,
    anno_key: Option<&str>,
    anno_value: Option<&str>,
    label: Option<&str>,
    output: Output,
) -> Result<()> {
    let mut ids = Some(cat.indexes.lookup(kind, ns, name));
    if let Some(k) = anno_key {
        ids = intersect(ids, cat.indexes.annotation_key(k));
    }
    if let Some(v) = anno_value {
        ids = intersect(ids, cat.indexes.annotation_value(v));
    }
    if let Some(sel) = label {
        let matched = match sel.split_once('=') {
            Some((k, v)) => cat.labels.with_pair(LabelCategory::Labels, k, v),
            None => cat.labels.with_key(LabelCategory::Labels, sel),
        };
        ids = intersect(ids, matched);
    }
    let ids = ids.unwrap_or_default();
    let recs: Vec<_> = ids.iter().filter_map(|id| cat.record(*id)).collect();
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(&recs)?),
        Output::Human => {
            println!("{:<6} {:<28} {:<24} {}", "ID", "KIND", "NAMESPACE", "NAME");
            for r in recs {
                println!("{:<6} {:<28} {:<24} {}", r.id, r.kind, r.namespace, r.name);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Summary { input } => {
            let (cat, report) = run_batch(&cli, input).await?;
            summary(&cat, &report, cli.output)?;
        }
        Commands::Owners { input, orphans } => {
            let (cat, _) = run_batch(&cli, input).await?;
            owners(&cat, *orphans, cli.output)?;
        }
        Commands::Lookup { input, kind, namespace, name, anno_key, anno_value, label } => {
            let (cat, _) = run_batch(&cli, input).await?;
            lookup(
                &cat,
                kind.as_deref(),
                namespace.as_deref(),
                name.as_deref(),
                anno_key.as_deref(),
                anno_value.as_deref(),
                label.as_deref(),
                cli.output,
            )?;
        }
    }
    Ok(())
}
