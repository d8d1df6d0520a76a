//! Engine configuration.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Toggles consumed by the ingestion engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Replace Secret payloads with a placeholder before anything else reads them.
    pub redact_secrets: bool,
    /// Capture Pod `status.phase` into the status tables and counters.
    pub drop_status: bool,
    /// Number of progress notifications per batch (every `1/steps` of the documents).
    pub progress_steps: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { redact_secrets: false, drop_status: false, progress_steps: 5 }
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

impl EngineConfig {
    /// Defaults overridden by `KMAP_REDACT_SECRETS`, `KMAP_DROP_STATUS` and `KMAP_PROGRESS_STEPS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    /// Unparseable values leave the default in place.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(b) = lookup("KMAP_REDACT_SECRETS").and_then(|v| parse_flag(&v)) { cfg.redact_secrets = b; }
        if let Some(b) = lookup("KMAP_DROP_STATUS").and_then(|v| parse_flag(&v)) { cfg.drop_status = b; }
        if let Some(n) = lookup("KMAP_PROGRESS_STEPS").and_then(|s| s.trim().parse::<usize>().ok()) {
            cfg.progress_steps = n.max(1);
        }
        cfg
    }

    /// Documents between two progress notifications for a batch of `total`.
    pub fn progress_increment(&self, total: usize) -> usize {
        let steps = self.progress_steps.max(1);
        ((total as f64 / steps as f64).round() as usize).max(1)
    }
}
