//! `{{dot.path}}` placeholder resolution against the data store.
//!
//! A template that is exactly one placeholder resolves to the raw value, so
//! objects and numbers keep their type. Placeholders embedded in text are
//! substituted as strings; unresolved ones are left in place.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tracing::warn;

use crate::state::DataStore;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("valid placeholder regex"));

static SINGLE_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{\{\s*([^{}]+?)\s*\}\}$").expect("valid placeholder regex"));

/// Walk `path` split on `.` through nested maps and arrays.
///
/// Stops at the first missing segment; array segments must be indices.
pub fn lookup_path<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = root.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Whether `text` contains at least one placeholder.
pub fn contains_placeholder(text: &str) -> bool {
    PLACEHOLDER.is_match(text)
}

/// Resolve `template` against `data`.
pub fn resolve_template(template: &str, data: &DataStore) -> Value {
    if let Some(caps) = SINGLE_PLACEHOLDER.captures(template.trim()) {
        return match data.lookup(&caps[1]) {
            Some(value) => value.clone(),
            None => Value::String(template.to_owned()),
        };
    }

    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| {
        let path = &caps[1];
        match data.lookup(path) {
            Some(value) => render(value),
            None => {
                warn!(path, "template placeholder did not resolve, left as is");
                caps[0].to_owned()
            }
        }
    });
    Value::String(rendered.into_owned())
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(value: Value) -> DataStore {
        match value {
            Value::Object(map) => DataStore::from(map),
            _ => panic!("test store must be an object"),
        }
    }

    #[test]
    fn single_placeholder_keeps_value_type() {
        let data = store(json!({ "a": { "b": 5 } }));
        assert_eq!(resolve_template("{{a.b}}", &data), json!(5));
        assert_eq!(resolve_template("  {{ a }} ", &data), json!({ "b": 5 }));
    }

    #[test]
    fn embedded_placeholder_is_stringified() {
        let data = store(json!({ "a": { "b": 5 } }));
        assert_eq!(resolve_template("Value: {{a.b}}", &data), json!("Value: 5"));
    }

    #[test]
    fn missing_single_placeholder_returns_literal() {
        let data = store(json!({ "a": 1 }));
        assert_eq!(resolve_template("{{missing.key}}", &data), json!("{{missing.key}}"));
    }

    #[test]
    fn missing_embedded_placeholder_is_left_in_place() {
        let data = store(json!({ "name": "Ada" }));
        assert_eq!(
            resolve_template("Hi {{name}}, {{missing}}!", &data),
            json!("Hi Ada, {{missing}}!")
        );
    }

    #[test]
    fn objects_are_pretty_printed_when_embedded() {
        let data = store(json!({ "user": { "id": 7 } }));
        assert_eq!(
            resolve_template("User: {{user}}", &data),
            json!("User: {\n  \"id\": 7\n}")
        );
    }

    #[test]
    fn null_is_a_found_value() {
        let data = store(json!({ "maybe": null }));
        assert_eq!(resolve_template("{{maybe}}", &data), Value::Null);
        assert_eq!(resolve_template("got {{maybe}}", &data), json!("got null"));
    }

    #[test]
    fn lookup_checks_types_at_each_segment() {
        let data = json!({ "list": [ { "name": "first" } ], "text": "plain" });
        let map = data.as_object().unwrap();

        assert_eq!(lookup_path(map, "list.0.name"), Some(&json!("first")));
        assert_eq!(lookup_path(map, "list.x"), None);
        assert_eq!(lookup_path(map, "text.length"), None);
        assert_eq!(lookup_path(map, "nope.deeper"), None);
    }

    #[test]
    fn plain_text_is_returned_as_string() {
        assert!(!contains_placeholder("no braces here"));
        assert_eq!(resolve_template("no braces here", &DataStore::new()), json!("no braces here"));
    }
}
