//! Manifest loading: files, directories (recursive) or `-` for stdin.
//! YAML streams may hold several documents; `*List` kinds are flattened
//! into their `items`.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kmap_core::DocumentStore;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use walkdir::WalkDir;

const EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

fn is_manifest(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Parse one text blob. JSON files are read as a single value; everything
/// else as a YAML stream. Empty documents are dropped. A malformed document
/// is logged and ends the stream; documents before it are kept.
pub fn parse_text(text: &str, json: bool, source: &str) -> Vec<Value> {
    if json {
        return match serde_json::from_str::<Value>(text) {
            Ok(v) => vec![v],
            Err(e) => {
                warn!(source, error = %e, "invalid JSON; skipping");
                Vec::new()
            }
        };
    }
    let mut out = Vec::new();
    for (i, de) in serde_yaml::Deserializer::from_str(text).enumerate() {
        match Value::deserialize(de) {
            Ok(v) if v.is_null() => {}
            Ok(v) => out.push(v),
            Err(e) => {
                warn!(source, document = i, error = %e, "invalid YAML; skipping rest of stream");
                break;
            }
        }
    }
    out
}

/// Replace `*List` documents with their items, recursively.
pub fn flatten_lists(docs: Vec<Value>) -> Vec<Value> {
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        let is_list = doc.get("kind").and_then(|k| k.as_str()).map(|k| k.ends_with("List")).unwrap_or(false);
        match doc {
            Value::Object(mut map) if is_list && map.get("items").map(|i| i.is_array()).unwrap_or(false) => {
                if let Some(Value::Array(items)) = map.remove("items") {
                    debug!(items = items.len(), "expanding list");
                    out.extend(flatten_lists(items));
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn load_file(path: &Path, store: &mut DocumentStore) -> Result<usize> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let json = path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("json")).unwrap_or(false);
    let docs = flatten_lists(parse_text(&text, json, &path.display().to_string()));
    let n = docs.len();
    for d in docs {
        store.push(d);
    }
    debug!(path = %path.display(), docs = n, "loaded");
    Ok(n)
}

/// Load every path into one store, in argument order. Directory entries are
/// visited sorted by file name so record ids are stable across runs.
pub fn load_paths(paths: &[PathBuf]) -> Result<DocumentStore> {
    let mut store = DocumentStore::new();
    for path in paths {
        if path.as_os_str() == "-" {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text).context("reading stdin")?;
            for d in flatten_lists(parse_text(&text, false, "stdin")) {
                store.push(d);
            }
            continue;
        }
        if path.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry.with_context(|| format!("walking {}", path.display()))?;
                if entry.file_type().is_file() && is_manifest(entry.path()) {
                    load_file(entry.path(), &mut store)?;
                }
            }
        } else if path.is_file() {
            load_file(path, &mut store)?;
        } else {
            warn!(path = %path.display(), "path does not exist; skipping");
        }
    }
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn yaml_stream_with_list() {
        let text = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: a
---
---
apiVersion: v1
kind: List
items:
  - apiVersion: v1
    kind: Service
    metadata:
      name: s
  - apiVersion: v1
    kind: PodList
    items:
      - apiVersion: v1
        kind: Pod
        metadata:
          name: p
"#;
        let docs = flatten_lists(parse_text(text, false, "inline"));
        let kinds: Vec<_> = docs.iter().map(|d| d["kind"].as_str().unwrap()).collect();
        assert_eq!(kinds, vec!["ConfigMap", "Service", "Pod"]);
    }

    #[test]
    fn directory_walk_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.yaml"), "apiVersion: v1\nkind: Secret\nmetadata:\n  name: b\n").unwrap();
        fs::write(
            dir.path().join("a.json"),
            r#"{"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a"}}"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "kind: Pod").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("c.yml"), "apiVersion: v1\nkind: Pod\nmetadata:\n  name: c\n").unwrap();

        let store = load_paths(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<_> = store.iter().map(|(_, d)| d["metadata"]["name"].as_str().unwrap().to_string()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(store.get(0).and_then(|d| d["kind"].as_str()), Some("ConfigMap"));
    }

    #[test]
    fn malformed_document_is_skipped() {
        let text = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: ok\n---\nkind: [unclosed\n";
        let docs = parse_text(text, false, "inline");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["metadata"]["name"], "ok");
        assert!(parse_text("{not json", true, "inline").is_empty());
    }

    #[test]
    fn broken_file_does_not_abort_load() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.yaml"), "kind: [unclosed\n").unwrap();
        fs::write(dir.path().join("b.yaml"), "apiVersion: v1\nkind: Secret\nmetadata:\n  name: b\n").unwrap();
        let store = load_paths(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(0).and_then(|d| d["kind"].as_str()), Some("Secret"));
    }
}
