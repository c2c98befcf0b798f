//! Named transform operators for `text_transform` tasks.
//!
//! Operators read the task's named inputs (each input key exposed by its last
//! path segment) and produce one value.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TaskError;
use crate::state::DataStore;
use crate::template::{lookup_path, resolve_template};

/// A transform selected by configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransformOp {
    Uppercase { input: String },
    Lowercase { input: String },
    Trim { input: String },
    /// Join string inputs in the listed order.
    Concatenate {
        inputs: Vec<String>,
        #[serde(default)]
        separator: String,
    },
    /// Resolve a `{{name}}` template against the named inputs.
    Template { template: String },
    /// Dot-path into one input value.
    Extract { input: String, path: String },
    JsonStringify { input: String },
}

impl TransformOp {
    /// Apply the operator to the named inputs.
    pub fn apply(&self, inputs: &Map<String, Value>) -> Result<Value, TaskError> {
        match self {
            Self::Uppercase { input } => Ok(Value::String(text(inputs, input)?.to_uppercase())),
            Self::Lowercase { input } => Ok(Value::String(text(inputs, input)?.to_lowercase())),
            Self::Trim { input } => Ok(Value::String(text(inputs, input)?.trim().to_owned())),
            Self::Concatenate { inputs: names, separator } => {
                let parts = names
                    .iter()
                    .map(|name| text(inputs, name))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::String(parts.join(separator.as_str())))
            }
            Self::Template { template } => {
                Ok(resolve_template(template, &DataStore::from(inputs.clone())))
            }
            Self::Extract { input, path } => {
                let value = named(inputs, input)?;
                let found = match value {
                    Value::Object(map) => lookup_path(map, path),
                    _ => None,
                };
                found.cloned().ok_or_else(|| {
                    TaskError::Transform(format!("path '{path}' not found in input '{input}'"))
                })
            }
            Self::JsonStringify { input } => {
                let value = named(inputs, input)?;
                serde_json::to_string_pretty(value)
                    .map(Value::String)
                    .map_err(|e| TaskError::Transform(e.to_string()))
            }
        }
    }
}

fn named<'a>(inputs: &'a Map<String, Value>, name: &str) -> Result<&'a Value, TaskError> {
    inputs
        .get(name)
        .ok_or_else(|| TaskError::Transform(format!("input '{name}' was not provided")))
}

fn text<'a>(inputs: &'a Map<String, Value>, name: &str) -> Result<&'a str, TaskError> {
    named(inputs, name)?
        .as_str()
        .ok_or_else(|| TaskError::Transform(format!("input '{name}' is not a string")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn uppercase_named_input() {
        let op = TransformOp::Uppercase { input: "article".into() };
        assert_eq!(op.apply(&inputs(json!({ "article": "hello" }))), Ok(json!("HELLO")));
    }

    #[test]
    fn parses_from_config_json() {
        let op: TransformOp =
            serde_json::from_value(json!({ "op": "concatenate", "inputs": ["a", "b"] })).unwrap();
        assert_eq!(
            op,
            TransformOp::Concatenate { inputs: vec!["a".into(), "b".into()], separator: String::new() }
        );
    }

    #[test]
    fn concatenate_with_separator() {
        let op = TransformOp::Concatenate {
            inputs: vec!["first".into(), "last".into()],
            separator: " ".into(),
        };
        let result = op.apply(&inputs(json!({ "first": "Ada", "last": "Lovelace" })));
        assert_eq!(result, Ok(json!("Ada Lovelace")));
    }

    #[test]
    fn template_resolves_against_inputs() {
        let op = TransformOp::Template { template: "Summary of {{title}}: {{stats.words}} words".into() };
        let result = op.apply(&inputs(json!({ "title": "Rust", "stats": { "words": 120 } })));
        assert_eq!(result, Ok(json!("Summary of Rust: 120 words")));
    }

    #[test]
    fn extract_reads_nested_path() {
        let op = TransformOp::Extract { input: "response".into(), path: "choices.0.text".into() };
        let result = op.apply(&inputs(json!({ "response": { "choices": [ { "text": "hi" } ] } })));
        assert_eq!(result, Ok(json!("hi")));

        let missing = TransformOp::Extract { input: "response".into(), path: "nope".into() };
        assert!(missing.apply(&inputs(json!({ "response": {} }))).is_err());
    }

    #[test]
    fn missing_or_mistyped_input_fails() {
        let op = TransformOp::Lowercase { input: "text".into() };
        assert_eq!(
            op.apply(&Map::new()),
            Err(TaskError::Transform("input 'text' was not provided".into()))
        );
        assert_eq!(
            op.apply(&inputs(json!({ "text": 3 }))),
            Err(TaskError::Transform("input 'text' is not a string".into()))
        );
    }

    #[test]
    fn json_stringify_pretty_prints() {
        let op = TransformOp::JsonStringify { input: "data".into() };
        assert_eq!(op.apply(&inputs(json!({ "data": [1] }))), Ok(json!("[\n  1\n]")));
    }
}
