// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Bounded renderings of message payloads for span attributes.
//!
//! Strings longer than [`MAX_STRING_CHARS`] are cut and marked with `…`.
//! Arrays and objects keep their first [`MAX_ELEMENTS`] entries, and
//! containers nested deeper than [`MAX_DEPTH`] collapse to the marker.

use scanweave_core::wire::SchemaRegistry;
use serde_json::{Map, Value};

pub const MAX_STRING_CHARS: usize = 256;
pub const MAX_DEPTH: usize = 5;
pub const MAX_ELEMENTS: usize = 30;
pub const TRUNCATION_MARKER: &str = "…";

pub fn minify(value: &Value) -> Value {
    minify_at(value, 0)
}

fn minify_at(value: &Value, depth: usize) -> Value {
    match value {
        Value::String(s) => Value::String(truncate(s)),
        Value::Array(_) | Value::Object(_) if depth >= MAX_DEPTH => {
            Value::String(TRUNCATION_MARKER.to_string())
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .take(MAX_ELEMENTS)
                .map(|item| minify_at(item, depth + 1))
                .collect(),
        ),
        Value::Object(fields) => {
            let mut minified = Map::new();
            for (key, field) in fields.iter().take(MAX_ELEMENTS) {
                minified.insert(key.clone(), minify_at(field, depth + 1));
            }
            Value::Object(minified)
        }
        other => other.clone(),
    }
}

pub fn truncate(s: &str) -> String {
    match s.char_indices().nth(MAX_STRING_CHARS) {
        Some((cut, _)) => format!("{}{}", &s[..cut], TRUNCATION_MARKER),
        None => s.to_string(),
    }
}

/// Raw bytes shown as text, invalid UTF-8 replaced.
pub fn bytes_to_text(bytes: &[u8]) -> String {
    truncate(&String::from_utf8_lossy(bytes))
}

/// Compact JSON of the minified payload.
pub fn to_attribute(value: &Value) -> String {
    serde_json::to_string(&minify(value)).unwrap_or_default()
}

/// Like [`to_attribute`], with the `bytes` fields of the schema `selector`
/// resolves to shown as text instead of base64.
pub fn data_attribute(schemas: &SchemaRegistry, selector: &str, data: &Value) -> String {
    let mut rendered = data.clone();
    schemas.render_bytes(selector, &mut rendered, &bytes_to_text);
    to_attribute(&rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_long_strings_truncated() {
        let long = "a".repeat(300);
        let out = minify(&json!({ "banner": long }));
        let banner = out["banner"].as_str().unwrap();
        assert_eq!(banner.chars().count(), MAX_STRING_CHARS + 1);
        assert!(banner.ends_with(TRUNCATION_MARKER));

        assert_eq!(truncate("short"), "short");
        assert_eq!(truncate(&"é".repeat(256)), "é".repeat(256));
    }

    #[test]
    fn test_element_count_capped() {
        let items: Vec<u32> = (0..100).collect();
        let out = minify(&json!({ "ports": items }));
        assert_eq!(out["ports"].as_array().unwrap().len(), MAX_ELEMENTS);
    }

    #[test]
    fn test_depth_capped() {
        let deep = json!({"a": {"b": {"c": {"d": {"e": {"f": 1}}}}}});
        let out = minify(&deep);
        assert_eq!(out["a"]["b"]["c"]["d"]["e"], json!(TRUNCATION_MARKER));
        assert_eq!(minify(&json!({"a": {"b": 1}})), json!({"a": {"b": 1}}));
    }

    #[test]
    fn test_bytes_rendered_lossy() {
        assert_eq!(bytes_to_text(b"hello"), "hello");
        assert_eq!(bytes_to_text(&[0x68, 0xff, 0x69]), "h\u{fffd}i");
    }

    #[test]
    fn test_data_attribute_shows_bytes_as_text() {
        let schemas = SchemaRegistry::v3();
        // base64 of b"h\xffi"
        let invalid = json!({"content": "aP9p"});
        let out: Value =
            serde_json::from_str(&data_attribute(&schemas, "v3.asset.file", &invalid)).unwrap();
        assert_eq!(out, json!({"content": "h\u{fffd}i"}));

        let long = serde_json::to_value(scanweave_core::wire::v3::File {
            content: Some(vec![b'a'; 300]),
            path: None,
            content_url: None,
        })
        .unwrap();
        let out: Value =
            serde_json::from_str(&data_attribute(&schemas, "v3.asset.file.android.apk", &long)).unwrap();
        let content = out["content"].as_str().unwrap();
        assert_eq!(content, format!("{}{}", "a".repeat(MAX_STRING_CHARS), TRUNCATION_MARKER));

        let json_payload = json!({"content": "aP9p"});
        assert_eq!(
            data_attribute(&schemas, "v3.report.vulnerability", &json_payload),
            r#"{"content":"aP9p"}"#
        );
    }
}
