//! Strong ETags over canonical JSON
//!
//! The ETag is hex(SHA-256(canonical_json(body))): object keys are sorted
//! recursively so semantically identical bodies always hash identically,
//! and any change to the body changes the tag.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize a JSON value with all object keys sorted.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            // serde_json string escaping is deterministic.
            out.push_str(&serde_json::to_string(s).expect("string serialization"));
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string serialization"));
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
    }
}

/// Strong ETag for a response body.
pub fn etag_for(body: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(body).as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare an `If-None-Match` header against an ETag, tolerating quoted
/// and `W/`-prefixed forms.
pub fn matches_if_none_match(header: &str, etag: &str) -> bool {
    header.split(',').any(|candidate| {
        let candidate = candidate.trim();
        let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
        let candidate = candidate.trim_matches('"');
        candidate == etag || candidate == "*"
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_the_tag() {
        let a = json!({"b": 1, "a": {"d": 2, "c": 3}});
        let b = json!({"a": {"c": 3, "d": 2}, "b": 1});
        assert_eq!(etag_for(&a), etag_for(&b));
    }

    #[test]
    fn any_value_change_changes_the_tag() {
        let a = json!({"id": "j1", "status": "completed"});
        let b = json!({"id": "j1", "status": "failed"});
        assert_ne!(etag_for(&a), etag_for(&b));
    }

    #[test]
    fn canonical_form_sorts_keys() {
        let value = json!({"z": 1, "a": [true, null, "x"]});
        assert_eq!(canonical_json(&value), r#"{"a":[true,null,"x"],"z":1}"#);
    }

    #[test]
    fn if_none_match_forms() {
        let etag = "abc123";
        assert!(matches_if_none_match("abc123", etag));
        assert!(matches_if_none_match("\"abc123\"", etag));
        assert!(matches_if_none_match("W/\"abc123\"", etag));
        assert!(matches_if_none_match("\"zzz\", \"abc123\"", etag));
        assert!(matches_if_none_match("*", etag));
        assert!(!matches_if_none_match("\"zzz\"", etag));
    }

    #[test]
    fn tag_is_hex_sha256() {
        let tag = etag_for(&json!({"a": 1}));
        assert_eq!(tag.len(), 64);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
