/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde_json::{Map, Value};
use sha2::Digest as _;

pub const AS_PUBLIC: &str = "https://www.w3.org/ns/activitystreams#Public";

/// Keys that change without the actor's identity or profile changing.
const VOLATILE_KEYS: &[&str] = &[
    "@context",
    "updated",
    "followersCount",
    "followingCount",
    "statusesCount",
    "lastStatusAt",
];

/// `id` of an IRI reference: either a bare string or an object with `id`.
pub fn id_of(v: &Value) -> Option<&str> {
    match v {
        Value::String(s) => Some(s.as_str()),
        Value::Object(m) => m.get("id").and_then(|v| v.as_str()),
        _ => None,
    }
}

pub fn has_type(doc: &Value, ty: &str) -> bool {
    match doc.get("type") {
        Some(Value::String(s)) => s == ty,
        Some(Value::Array(arr)) => arr.iter().any(|v| v.as_str() == Some(ty)),
        _ => false,
    }
}

pub fn has_any_type(doc: &Value, types: &[&str]) -> bool {
    types.iter().any(|t| has_type(doc, t))
}

/// Actor of an activity. `actor` may be an array; the first entry wins.
pub fn actor_id(activity: &Value) -> Option<String> {
    let actor = activity.get("actor")?;
    match actor {
        Value::Array(arr) => arr.iter().find_map(id_of).map(str::to_string),
        v => id_of(v).map(str::to_string),
    }
}

/// Author of an object: `attributedTo`, falling back to `actor`.
pub fn author_id(object: &Value) -> Option<String> {
    let attributed = match object.get("attributedTo") {
        Some(Value::Array(arr)) => arr.iter().find_map(id_of).map(str::to_string),
        Some(v) => id_of(v).map(str::to_string),
        None => None,
    };
    attributed.or_else(|| actor_id(object))
}

/// Strip hidden recipients before a payload leaves this node.
pub fn clean_activity(mut activity: Value) -> Value {
    fn strip(m: &mut Map<String, Value>) {
        m.remove("bto");
        m.remove("bcc");
    }
    if let Value::Object(m) = &mut activity {
        strip(m);
        if let Some(Value::Object(obj)) = m.get_mut("object") {
            strip(obj);
        }
    }
    activity
}

/// Deterministic text of a document: keys sorted at every level, volatile
/// keys dropped at the top level.
pub fn canonicalize(doc: &Value) -> String {
    let mut out = String::new();
    match doc {
        Value::Object(m) => {
            let mut stable = m.clone();
            for k in VOLATILE_KEYS {
                stable.remove(*k);
            }
            write_canonical(&Value::Object(stable), &mut out);
        }
        other => write_canonical(other, &mut out),
    }
    out
}

/// Content fingerprint used as the cache coherence token.
pub fn fingerprint(doc: &Value) -> String {
    let mut h = sha2::Sha256::new();
    h.update(canonicalize(doc).as_bytes());
    hex::encode(h.finalize())
}

// Sorted by hand: `serde_json::Map` ordering depends on crate features.
fn write_canonical(v: &Value, out: &mut String) {
    match v {
        Value::Object(m) => {
            let mut keys: Vec<&String> = m.keys().collect();
            keys.sort();
            out.push('{');
            for (i, k) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(&m[k], out);
            }
            out.push('}');
        }
        Value::Array(arr) => {
            out.push('[');
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_ignores_key_order_and_volatile_fields() {
        let a = json!({"id": "https://a.example/u1", "name": "A", "icon": {"url": "i", "type": "Image"}});
        let b = json!({"icon": {"type": "Image", "url": "i"}, "updated": "2026-01-01T00:00:00Z", "name": "A", "id": "https://a.example/u1"});
        assert_eq!(fingerprint(&a), fingerprint(&b));

        let c = json!({"id": "https://a.example/u1", "name": "B", "icon": {"url": "i", "type": "Image"}});
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }

    #[test]
    fn canonical_text_is_sorted() {
        let doc = json!({"b": 1, "a": {"d": [2, {"f": 1, "e": 0}], "c": null}, "updated": "x"});
        assert_eq!(canonicalize(&doc), r#"{"a":{"c":null,"d":[2,{"e":0,"f":1}]},"b":1}"#);
    }

    #[test]
    fn author_prefers_attributed_to() {
        let note = json!({"id": "n", "attributedTo": [{"id": "https://b.example/u2"}], "actor": "x"});
        assert_eq!(author_id(&note).as_deref(), Some("https://b.example/u2"));
        let act = json!({"id": "a", "actor": "https://a.example/u1"});
        assert_eq!(author_id(&act).as_deref(), Some("https://a.example/u1"));
    }

    #[test]
    fn clean_strips_hidden_recipients() {
        let act = json!({"id": "a", "bto": ["x"], "bcc": ["y"], "to": [AS_PUBLIC], "object": {"id": "o", "bcc": ["y"]}});
        let cleaned = clean_activity(act);
        assert!(cleaned.get("bto").is_none());
        assert!(cleaned.get("bcc").is_none());
        assert!(cleaned["object"].get("bcc").is_none());
        assert_eq!(cleaned["to"][0], AS_PUBLIC);
    }

    #[test]
    fn type_checks_accept_arrays() {
        let doc = json!({"type": ["Create", "Extra"]});
        assert!(has_type(&doc, "Create"));
        assert!(has_any_type(&doc, &["Announce", "Extra"]));
        assert!(!has_type(&json!({"type": "Like"}), "Create"));
    }
}
