//! Per-record error taxonomy. Nothing here is fatal to a batch.

#![forbid(unsafe_code)]

use serde::Serialize;

/// Why a document was not indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum SkipReason {
    #[error("not a recognizable resource (missing apiVersion)")]
    NotAResource,
    #[error("missing kind")]
    MissingKind,
    #[error("missing metadata.name for kind: {kind}")]
    MissingName { kind: String },
}

impl SkipReason {
    /// Stable label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::NotAResource => "not_a_resource",
            SkipReason::MissingKind => "missing_kind",
            SkipReason::MissingName { .. } => "missing_name",
        }
    }
}

/// Failure raised by a kind-specific or generic collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum HandlerError {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("unexpected type at {path}: expected {expected}")]
    UnexpectedType { path: &'static str, expected: &'static str },
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerFailure {
    pub handler: &'static str,
    pub error: HandlerError,
}

/// Result of ingesting one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum RecordOutcome {
    Indexed,
    Skipped(SkipReason),
    /// Indexed, but at least one collaborator failed.
    HandlerFailed(Vec<HandlerFailure>),
}

impl RecordOutcome {
    pub fn is_indexed(&self) -> bool { !matches!(self, RecordOutcome::Skipped(_)) }
}
