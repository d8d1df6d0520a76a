#![forbid(unsafe_code)]

use serde_json::Value;

pub const REDACTED: &str = "<redacted>";

/// Annotation written by `kubectl apply`; on a Secret it embeds the payload.
pub const LAST_APPLIED: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Replace Secret payload values in place. Keys are kept. Returns how many
/// values were replaced.
pub fn redact_secret(doc: &mut Value) -> usize {
    let mut n = 0usize;
    for field in ["data", "stringData"] {
        if let Some(map) = doc.get_mut(field).and_then(|v| v.as_object_mut()) {
            for v in map.values_mut() {
                *v = Value::String(REDACTED.to_string());
                n += 1;
            }
        }
    }
    if let Some(annos) = doc.pointer_mut("/metadata/annotations").and_then(|v| v.as_object_mut()) {
        if let Some(v) = annos.get_mut(LAST_APPLIED) {
            *v = Value::String(REDACTED.to_string());
            n += 1;
        }
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scrubs_payload_and_last_applied() {
        let mut doc = json!({
            "kind": "Secret",
            "metadata": {"annotations": {"kubectl.kubernetes.io/last-applied-configuration": "{\"data\":{\"password\":\"aHVudGVyMg==\"}}", "team": "x"}},
            "data": {"password": "aHVudGVyMg==", "user": "YWRtaW4="},
            "stringData": {"token": "abc"}
        });
        assert_eq!(redact_secret(&mut doc), 4);
        assert_eq!(doc["data"]["password"], json!(REDACTED));
        assert_eq!(doc["stringData"]["token"], json!(REDACTED));
        assert_eq!(doc["metadata"]["annotations"][LAST_APPLIED], json!(REDACTED));
        assert_eq!(doc["metadata"]["annotations"]["team"], json!("x"));
    }
}
