//! Tool parameter schemas.
//!
//! A closed union of parameter types. Arguments are validated against the
//! binding's schema before a call is dispatched; violations become error
//! observations instead of backend calls.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Parameter schema for a tool argument or a whole argument object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParamSchema {
    String {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        /// Allowed values; empty means any string.
        #[serde(default, rename = "enum", skip_serializing_if = "Vec::is_empty")]
        allowed: Vec<String>,
    },
    Integer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minimum: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        maximum: Option<i64>,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minimum: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        maximum: Option<f64>,
    },
    Boolean {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Array {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        items: Option<Box<ParamSchema>>,
    },
    Object {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default)]
        properties: BTreeMap<String, ParamSchema>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        required: Vec<String>,
    },
}

impl Default for ParamSchema {
    /// An object accepting any properties.
    fn default() -> Self {
        ParamSchema::Object {
            description: None,
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }
}

/// A single argument that does not match its schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{path}: {message}")]
pub struct SchemaViolation {
    /// JSON-pointer-like location, `$` for the root.
    pub path: String,
    pub message: String,
}

impl SchemaViolation {
    fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

impl ParamSchema {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamSchema::String { .. } => "string",
            ParamSchema::Integer { .. } => "integer",
            ParamSchema::Number { .. } => "number",
            ParamSchema::Boolean { .. } => "boolean",
            ParamSchema::Array { .. } => "array",
            ParamSchema::Object { .. } => "object",
        }
    }

    /// Validate `value`, collecting every violation.
    pub fn validate(&self, value: &Value) -> Result<(), Vec<SchemaViolation>> {
        let mut violations = Vec::new();
        self.check("$", value, &mut violations);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    fn check(&self, path: &str, value: &Value, out: &mut Vec<SchemaViolation>) {
        match (self, value) {
            (ParamSchema::String { allowed, .. }, Value::String(s)) => {
                if !allowed.is_empty() && !allowed.iter().any(|a| a == s) {
                    out.push(SchemaViolation::new(
                        path,
                        format!("'{}' is not one of [{}]", s, allowed.join(", ")),
                    ));
                }
            }
            (ParamSchema::Integer { minimum, maximum, .. }, Value::Number(n)) => {
                let Some(v) = n.as_i64() else {
                    out.push(SchemaViolation::new(path, format!("expected integer, got {}", n)));
                    return;
                };
                if let Some(min) = minimum
                    && v < *min
                {
                    out.push(SchemaViolation::new(path, format!("{} is below minimum {}", v, min)));
                }
                if let Some(max) = maximum
                    && v > *max
                {
                    out.push(SchemaViolation::new(path, format!("{} is above maximum {}", v, max)));
                }
            }
            (ParamSchema::Number { minimum, maximum, .. }, Value::Number(n)) => {
                let v = n.as_f64().unwrap_or(f64::NAN);
                if let Some(min) = minimum
                    && v < *min
                {
                    out.push(SchemaViolation::new(path, format!("{} is below minimum {}", v, min)));
                }
                if let Some(max) = maximum
                    && v > *max
                {
                    out.push(SchemaViolation::new(path, format!("{} is above maximum {}", v, max)));
                }
            }
            (ParamSchema::Boolean { .. }, Value::Bool(_)) => {}
            (ParamSchema::Array { items, .. }, Value::Array(values)) => {
                if let Some(items) = items {
                    for (i, item) in values.iter().enumerate() {
                        items.check(&format!("{}[{}]", path, i), item, out);
                    }
                }
            }
            (
                ParamSchema::Object {
                    properties,
                    required,
                    ..
                },
                Value::Object(map),
            ) => {
                for name in required {
                    if !map.contains_key(name) {
                        out.push(SchemaViolation::new(
                            &format!("{}.{}", path, name),
                            "required property is missing",
                        ));
                    }
                }
                // Properties without a schema are passed through untouched.
                for (name, value) in map {
                    if let Some(schema) = properties.get(name) {
                        schema.check(&format!("{}.{}", path, name), value, out);
                    }
                }
            }
            (schema, other) => out.push(SchemaViolation::new(
                path,
                format!("expected {}, got {}", schema.type_name(), json_type(other)),
            )),
        }
    }

    /// Compact one-line rendering used in coordinator prompts.
    pub fn signature(&self) -> String {
        match self {
            ParamSchema::Object {
                properties,
                required,
                ..
            } => {
                let fields: Vec<String> = properties
                    .iter()
                    .map(|(name, schema)| {
                        let marker = if required.contains(name) { "" } else { "?" };
                        format!("{}{}: {}", name, marker, schema.signature())
                    })
                    .collect();
                format!("{{{}}}", fields.join(", "))
            }
            ParamSchema::Array { items: Some(items), .. } => format!("{}[]", items.signature()),
            ParamSchema::String { allowed, .. } if !allowed.is_empty() => allowed
                .iter()
                .map(|a| format!("\"{}\"", a))
                .collect::<Vec<_>>()
                .join(" | "),
            other => other.type_name().to_string(),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn search_schema() -> ParamSchema {
        serde_json::from_value(json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "limit": {"type": "integer", "minimum": 1, "maximum": 50},
                "mode": {"type": "string", "enum": ["fast", "deep"]},
                "tags": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["query"]
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_args_pass() {
        let args = json!({"query": "rust", "limit": 5, "mode": "deep", "tags": ["a", "b"]});
        assert!(search_schema().validate(&args).is_ok());
    }

    #[test]
    fn test_missing_required_property() {
        let errs = search_schema().validate(&json!({"limit": 5})).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].path, "$.query");
    }

    #[test]
    fn test_collects_every_violation() {
        let args = json!({"query": 3, "limit": 100, "mode": "slow", "tags": ["ok", 1]});
        let errs = search_schema().validate(&args).unwrap_err();
        let paths: Vec<&str> = errs.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["$.limit", "$.mode", "$.query", "$.tags[1]"]);
    }

    #[test]
    fn test_integer_rejects_fraction() {
        let schema = ParamSchema::Integer {
            description: None,
            minimum: None,
            maximum: None,
        };
        assert!(schema.validate(&json!(2)).is_ok());
        assert!(schema.validate(&json!(2.5)).is_err());
    }

    #[test]
    fn test_unknown_properties_are_allowed() {
        let args = json!({"query": "x", "extra": {"nested": true}});
        assert!(search_schema().validate(&args).is_ok());
    }

    #[test]
    fn test_default_schema_accepts_any_object() {
        assert!(ParamSchema::default().validate(&json!({"a": 1})).is_ok());
        assert!(ParamSchema::default().validate(&json!("text")).is_err());
    }

    #[test]
    fn test_signature() {
        assert_eq!(
            search_schema().signature(),
            "{limit?: integer, mode?: \"fast\" | \"deep\", query: string, tags?: string[]}"
        );
    }

    #[test]
    fn test_violation_display() {
        let v = SchemaViolation::new("$.limit", "100 is above maximum 50");
        assert_eq!(v.to_string(), "$.limit: 100 is above maximum 50");
    }
}
