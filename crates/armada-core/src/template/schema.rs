// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! JSON-Schema validation for execution payloads.
//!
//! Supports the keyword subset templates actually use: `type`, `required`,
//! `properties`, `items`, `enum`, `minimum`, `maximum`, `minLength`,
//! `maxLength`. Violations are collected (not short-circuited) so a caller
//! sees every problem with a payload at once.

use serde_json::Value;

/// Validate `payload` against `schema`. Returns every violation; an empty
/// vector means the payload conforms.
pub fn validate(schema: &Value, payload: &Value) -> Vec<String> {
    let mut violations = Vec::new();
    validate_at("", schema, payload, &mut violations);
    violations
}

fn validate_at(path: &str, schema: &Value, value: &Value, out: &mut Vec<String>) {
    let Some(schema) = schema.as_object() else {
        return;
    };

    if let Some(expected) = schema.get("type") {
        check_type(path, expected, value, out);
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        let object = value.as_object();
        for name in required.iter().filter_map(Value::as_str) {
            let present = object.is_some_and(|o| o.contains_key(name));
            if !present {
                out.push(format!("{} is required", join_path(path, name)));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object)
        && let Some(object) = value.as_object()
    {
        for (name, property_schema) in properties {
            if let Some(property_value) = object.get(name) {
                validate_at(&join_path(path, name), property_schema, property_value, out);
            }
        }
    }

    if let Some(items) = schema.get("items")
        && let Some(array) = value.as_array()
    {
        for (index, element) in array.iter().enumerate() {
            validate_at(&join_path(path, &index.to_string()), items, element, out);
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array)
        && !allowed.contains(value)
    {
        out.push(format!(
            "{} must be one of {}",
            display_path(path),
            serde_json::to_string(allowed).unwrap_or_default()
        ));
    }

    if let Some(minimum) = schema.get("minimum").and_then(Value::as_f64)
        && let Some(number) = value.as_f64()
        && number < minimum
    {
        out.push(format!(
            "{} must be greater than or equal to {minimum}",
            display_path(path)
        ));
    }

    if let Some(maximum) = schema.get("maximum").and_then(Value::as_f64)
        && let Some(number) = value.as_f64()
        && number > maximum
    {
        out.push(format!(
            "{} must be less than or equal to {maximum}",
            display_path(path)
        ));
    }

    if let Some(min_length) = schema.get("minLength").and_then(Value::as_u64)
        && let Some(text) = value.as_str()
        && (text.chars().count() as u64) < min_length
    {
        out.push(format!(
            "{} must be at least {min_length} characters",
            display_path(path)
        ));
    }

    if let Some(max_length) = schema.get("maxLength").and_then(Value::as_u64)
        && let Some(text) = value.as_str()
        && (text.chars().count() as u64) > max_length
    {
        out.push(format!(
            "{} must be at most {max_length} characters",
            display_path(path)
        ));
    }
}

fn check_type(path: &str, expected: &Value, value: &Value, out: &mut Vec<String>) {
    let matches = match expected {
        Value::String(name) => type_matches(name, value),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| type_matches(name, value)),
        _ => true,
    };
    if !matches {
        out.push(format!(
            "{} must be of type {}",
            display_path(path),
            type_name(expected)
        ));
    }
}

fn type_matches(name: &str, value: &Value) -> bool {
    match name {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(expected: &Value) -> String {
    match expected {
        Value::String(name) => name.clone(),
        other => other.to_string(),
    }
}

fn join_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() { "payload" } else { path }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_schema_accepts_anything() {
        assert!(validate(&json!({}), &json!({"anything": 1})).is_empty());
    }

    #[test]
    fn test_required_at_root() {
        let schema = json!({"type": "object", "required": ["who"]});
        let violations = validate(&schema, &json!({}));
        assert_eq!(violations, vec!["who is required".to_string()]);
    }

    #[test]
    fn test_required_present_passes() {
        let schema = json!({"type": "object", "required": ["who"]});
        assert!(validate(&schema, &json!({"who": "world"})).is_empty());
    }

    #[test]
    fn test_nested_required_path() {
        let schema = json!({
            "type": "object",
            "required": ["address"],
            "properties": {
                "address": {"type": "object", "required": ["city"]}
            }
        });
        let violations = validate(&schema, &json!({"address": {}}));
        assert_eq!(violations, vec!["address.city is required".to_string()]);
    }

    #[test]
    fn test_type_mismatch() {
        let schema = json!({
            "type": "object",
            "properties": {"count": {"type": "integer"}}
        });
        let violations = validate(&schema, &json!({"count": "three"}));
        assert_eq!(violations, vec!["count must be of type integer".to_string()]);
    }

    #[test]
    fn test_enum() {
        let schema = json!({
            "properties": {"mode": {"enum": ["fast", "slow"]}}
        });
        let violations = validate(&schema, &json!({"mode": "medium"}));
        assert_eq!(
            violations,
            vec![r#"mode must be one of ["fast","slow"]"#.to_string()]
        );
    }

    #[test]
    fn test_numeric_bounds() {
        let schema = json!({
            "properties": {"workers": {"type": "integer", "minimum": 1, "maximum": 64}}
        });
        assert!(validate(&schema, &json!({"workers": 8})).is_empty());
        assert_eq!(
            validate(&schema, &json!({"workers": 0})),
            vec!["workers must be greater than or equal to 1".to_string()]
        );
        assert_eq!(
            validate(&schema, &json!({"workers": 100})),
            vec!["workers must be less than or equal to 64".to_string()]
        );
    }

    #[test]
    fn test_string_length() {
        let schema = json!({
            "properties": {"name": {"type": "string", "minLength": 2, "maxLength": 4}}
        });
        assert!(validate(&schema, &json!({"name": "ok"})).is_empty());
        assert!(!validate(&schema, &json!({"name": "x"})).is_empty());
        assert!(!validate(&schema, &json!({"name": "toolong"})).is_empty());
    }

    #[test]
    fn test_items() {
        let schema = json!({
            "properties": {"files": {"type": "array", "items": {"type": "string"}}}
        });
        let violations = validate(&schema, &json!({"files": ["a.csv", 7]}));
        assert_eq!(
            violations,
            vec!["files.1 must be of type string".to_string()]
        );
    }

    #[test]
    fn test_collects_multiple_violations() {
        let schema = json!({
            "type": "object",
            "required": ["who", "what"],
            "properties": {"count": {"type": "integer"}}
        });
        let violations = validate(&schema, &json!({"count": "x"}));
        assert_eq!(violations.len(), 3);
    }
}
