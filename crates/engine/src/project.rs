//! Scalar projection over a minimal path grammar: dot fields and a single
//! `[index]` per segment, e.g. `status.addresses[0].address`.

#![forbid(unsafe_code)]

use serde_json::Value;
use smallvec::SmallVec;

/// `(label, path)` pairs to project from a document.
pub type PathSpec = (&'static str, &'static str);

pub fn extract_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = root;
    for seg in path.split('.') {
        if seg.is_empty() { return None; }
        let (key, idx_opt) = if let Some(brk) = seg.find('[') {
            let end = seg.get(brk + 1..)?.find(']')? + brk + 1;
            let idx: usize = seg[brk + 1..end].parse().ok()?;
            (&seg[..brk], Some(idx))
        } else {
            (seg, None)
        };
        match cur {
            Value::Object(map) => { cur = map.get(key)?; }
            _ => return None,
        }
        if let Some(i) = idx_opt {
            match cur {
                Value::Array(arr) => { cur = arr.get(i)?; }
                _ => return None,
            }
        }
    }
    Some(cur)
}

/// Render strings, numbers and booleans; `None` for anything else.
pub fn render_scalar(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn str_at<'a>(root: &'a Value, path: &str) -> Option<&'a str> {
    extract_path(root, path).and_then(|v| v.as_str())
}

/// Project every path that resolves to a scalar, in `specs` order.
pub fn project(doc: &Value, specs: &[PathSpec]) -> SmallVec<[(String, String); 8]> {
    let mut out = SmallVec::new();
    for (label, path) in specs {
        if let Some(s) = extract_path(doc, path).and_then(render_scalar) {
            out.push((label.to_string(), s));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn projector_extracts_scalars() {
        let doc = json!({
            "spec": { "dnsNames": ["a.example.com", "b.example.com"], "replicas": 3, "paused": false },
            "status": { "addresses": [ {"address": "10.0.0.1"} ] }
        });
        let out = project(&doc, &[
            ("first", "spec.dnsNames[0]"),
            ("replicas", "spec.replicas"),
            ("paused", "spec.paused"),
            ("addr", "status.addresses[0].address"),
            ("missing", "spec.nope"),
            ("object", "spec"),
        ]);
        assert_eq!(out.len(), 4);
        assert!(out.contains(&("first".to_string(), "a.example.com".to_string())));
        assert!(out.contains(&("replicas".to_string(), "3".to_string())));
        assert!(out.contains(&("paused".to_string(), "false".to_string())));
        assert!(out.contains(&("addr".to_string(), "10.0.0.1".to_string())));
    }

    #[test]
    fn malformed_paths_resolve_to_nothing() {
        let doc = json!({"a": [1, 2]});
        assert!(extract_path(&doc, "a[x]").is_none());
        assert!(extract_path(&doc, "a[5]").is_none());
        assert!(extract_path(&doc, "a..b").is_none());
        assert_eq!(extract_path(&doc, "a[1]"), Some(&json!(2)));
    }
}
