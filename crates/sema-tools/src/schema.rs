// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;

/// Structural validation of a tool input against its declared schema.
///
/// Covers the subset of JSON Schema the tool-definition wire format uses:
/// `type: object` at the top, `required` field presence, per-property `type`
/// and string `enum` checks.  Unknown keywords are ignored — the model-side
/// schema is the authority, this is a fast sanity gate.
pub fn validate_against_schema(schema: &Value, input: &Value) -> Result<(), String> {
    if schema.get("type").and_then(Value::as_str) == Some("object") && !input.is_object() {
        return Err(format!(
            "input must be a JSON object, got: {}",
            type_name(input)
        ));
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if input.get(field).is_none() {
                return Err(format!("missing required parameter '{field}'"));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(Value::as_object) {
        for (key, prop_schema) in props {
            let Some(value) = input.get(key) else {
                continue;
            };
            if let Some(expected) = prop_schema.get("type").and_then(Value::as_str) {
                if !type_matches(expected, value) {
                    return Err(format!(
                        "parameter '{key}' must be of type {expected}, got: {}",
                        type_name(value)
                    ));
                }
            }
            if let Some(allowed) = prop_schema.get("enum").and_then(Value::as_array) {
                if !allowed.contains(value) {
                    return Err(format!(
                        "parameter '{key}' must be one of {}",
                        serde_json::to_string(allowed).unwrap_or_default()
                    ));
                }
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "limit": { "type": "integer" },
                "mode": { "type": "string", "enum": ["replace", "insert", "delete"] }
            },
            "required": ["path"]
        })
    }

    #[test]
    fn accepts_valid_input() {
        assert!(validate_against_schema(&schema(), &json!({"path": "a", "limit": 3})).is_ok());
    }

    #[test]
    fn rejects_non_object_input() {
        let err = validate_against_schema(&schema(), &json!("nope")).unwrap_err();
        assert!(err.contains("JSON object"));
    }

    #[test]
    fn rejects_missing_required() {
        let err = validate_against_schema(&schema(), &json!({"limit": 1})).unwrap_err();
        assert!(err.contains("'path'"));
    }

    #[test]
    fn rejects_wrong_type() {
        let err = validate_against_schema(&schema(), &json!({"path": 42})).unwrap_err();
        assert!(err.contains("type string"));
    }

    #[test]
    fn rejects_value_outside_enum() {
        let err =
            validate_against_schema(&schema(), &json!({"path": "a", "mode": "destroy"}))
                .unwrap_err();
        assert!(err.contains("one of"));
    }

    #[test]
    fn optional_fields_may_be_absent() {
        assert!(validate_against_schema(&schema(), &json!({"path": "a"})).is_ok());
    }
}
