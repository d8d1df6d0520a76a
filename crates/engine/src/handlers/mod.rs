//! Kind-keyed collaborator registry.
//!
//! Every record goes through the generic collaborator. On top of that, at
//! most one kind-specific collaborator runs: an exact kind match from the
//! table, or the workload collaborator when the document carries a
//! container-bearing spec. Failures (including panics) are contained per
//! collaborator and reported back to the batch loop.

#![forbid(unsafe_code)]

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use kmap_core::{HandlerError, HandlerFailure, NormalizedRecord, OwnerRef};
use kmap_store::DetailTable;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, warn};

pub mod builtin;

pub use builtin::{
    BindingHandler, GenericHandler, ProjectionHandler, RoleHandler, SecretHandler, ServiceAccountHandler,
    ServiceHandler, WorkloadHandler,
};

/// Everything a collaborator may look at for one record.
#[derive(Debug, Clone, Copy)]
pub struct HandlerCtx<'a> {
    pub record: &'a NormalizedRecord,
    pub doc: &'a Value,
    pub owners: &'a [OwnerRef],
    pub status: Option<&'a Value>,
    pub phase: Option<&'a str>,
    pub node: &'a str,
}

/// Kind-specific (or generic) detail extraction. Implementations write only
/// into the detail table under their own name.
pub trait KindHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn handle(&self, ctx: &HandlerCtx<'_>, out: &mut DetailTable) -> Result<(), HandlerError>;
}

/// Container spec directly under `spec`, under `spec.template.spec`, or
/// under a CronJob's `spec.jobTemplate.spec.template.spec`.
pub fn has_container_spec(doc: &Value) -> bool {
    let has = |p: &str| doc.pointer(p).map(|v| v.is_array()).unwrap_or(false);
    has("/spec/containers")
        || has("/spec/template/spec/containers")
        || has("/spec/jobTemplate/spec/template/spec/containers")
}

#[derive(Clone)]
pub struct HandlerRegistry {
    by_kind: FxHashMap<String, Arc<dyn KindHandler>>,
    generic: Arc<dyn KindHandler>,
    workload: Arc<dyn KindHandler>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.by_kind.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("kinds", &kinds)
            .field("generic", &self.generic.name())
            .field("workload", &self.workload.name())
            .finish()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self { Self::builtin() }
}

impl HandlerRegistry {
    /// Empty table with the given baseline and fallback collaborators.
    pub fn empty(generic: Arc<dyn KindHandler>, workload: Arc<dyn KindHandler>) -> Self {
        Self { by_kind: FxHashMap::default(), generic, workload }
    }

    pub fn builtin() -> Self {
        let workload: Arc<dyn KindHandler> = Arc::new(WorkloadHandler);
        let mut reg = Self::empty(Arc::new(GenericHandler), workload.clone());
        let role: Arc<dyn KindHandler> = Arc::new(RoleHandler);
        let binding: Arc<dyn KindHandler> = Arc::new(BindingHandler);
        let projection: Arc<dyn KindHandler> = Arc::new(ProjectionHandler);
        for k in ["ClusterRole", "Role"] {
            reg.register(k, role.clone());
        }
        for k in ["ClusterRoleBinding", "RoleBinding"] {
            reg.register(k, binding.clone());
        }
        for k in builtin::WORKLOAD_KINDS {
            reg.register(k, workload.clone());
        }
        for k in builtin::PROJECTED_KINDS {
            reg.register(k, projection.clone());
        }
        reg.register("Secret", Arc::new(SecretHandler));
        reg.register("Service", Arc::new(ServiceHandler));
        reg.register("ServiceAccount", Arc::new(ServiceAccountHandler));
        reg
    }

    /// Register (or replace) the collaborator for an exact kind.
    pub fn register(&mut self, kind: &str, handler: Arc<dyn KindHandler>) -> Option<Arc<dyn KindHandler>> {
        self.by_kind.insert(kind.to_string(), handler)
    }

    pub fn len(&self) -> usize { self.by_kind.len() }
    pub fn is_empty(&self) -> bool { self.by_kind.is_empty() }

    /// The kind-specific collaborator for a record, if any.
    pub fn select(&self, kind: &str, doc: &Value) -> Option<&Arc<dyn KindHandler>> {
        if let Some(h) = self.by_kind.get(kind) {
            return Some(h);
        }
        if has_container_spec(doc) {
            debug!(kind = %kind, "no exact handler; container spec found, using workload");
            return Some(&self.workload);
        }
        None
    }

    /// Run the generic collaborator, then the selected kind collaborator.
    /// Returns the failures; an empty vec means every collaborator succeeded.
    pub fn dispatch(&self, ctx: &HandlerCtx<'_>, out: &mut DetailTable) -> Vec<HandlerFailure> {
        let mut failures = Vec::new();
        let chosen = self.select(&ctx.record.kind, ctx.doc);
        for h in std::iter::once(&self.generic).chain(chosen) {
            if let Err(error) = invoke(h.as_ref(), ctx, out) {
                warn!(record = ctx.record.id, kind = %ctx.record.kind, handler = h.name(), error = %error, "handler failed");
                metrics::counter!("handler_failures_total", 1u64, "handler" => h.name());
                failures.push(HandlerFailure { handler: h.name(), error });
            }
        }
        failures
    }
}

fn invoke(h: &dyn KindHandler, ctx: &HandlerCtx<'_>, out: &mut DetailTable) -> Result<(), HandlerError> {
    match catch_unwind(AssertUnwindSafe(|| h.handle(ctx, out))) {
        Ok(res) => res,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "handler panicked".to_string());
            Err(HandlerError::Other(format!("panic: {}", msg)))
        }
    }
}
