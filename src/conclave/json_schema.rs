//! A lightweight JSON Schema validator covering the subset tool authors are
//! expected to use: `object` with `properties`/`required`/
//! `additionalProperties`, and per-property `type`, `enum`, numeric
//! `minimum`/`maximum`, string `minLength`/`maxLength`/`pattern`, and array
//! `items` (recursive).
//!
//! This is intentionally not a general-purpose JSON Schema implementation —
//! the engine only needs enough validation to reject malformed tool-call
//! arguments before dispatch (see [`crate::conclave::agent`] step (e)).

use serde_json::Value as JsonValue;

/// Validate `instance` against `schema`. On failure, the error string is the
/// human-readable reason a tool call was rejected — it becomes the `error`
/// field of the tool message returned to the model, never a propagated
/// [`EngineError`](crate::conclave::error::EngineError).
pub fn validate(schema: &JsonValue, instance: &JsonValue) -> Result<(), String> {
    validate_node(schema, instance, "$")
}

fn validate_node(schema: &JsonValue, instance: &JsonValue, path: &str) -> Result<(), String> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };

    if let Some(ty) = schema_obj.get("type").and_then(|t| t.as_str()) {
        check_type(ty, instance, path)?;
    }

    if let Some(enum_vals) = schema_obj.get("enum").and_then(|e| e.as_array()) {
        if !enum_vals.contains(instance) {
            return Err(format!("{path}: value is not one of the allowed enum values"));
        }
    }

    match instance {
        JsonValue::Number(n) => {
            if let Some(min) = schema_obj.get("minimum").and_then(|v| v.as_f64()) {
                if n.as_f64().unwrap_or(f64::NAN) < min {
                    return Err(format!("{path}: value is below minimum {min}"));
                }
            }
            if let Some(max) = schema_obj.get("maximum").and_then(|v| v.as_f64()) {
                if n.as_f64().unwrap_or(f64::NAN) > max {
                    return Err(format!("{path}: value is above maximum {max}"));
                }
            }
        }
        JsonValue::String(s) => {
            if let Some(min_len) = schema_obj.get("minLength").and_then(|v| v.as_u64()) {
                if (s.len() as u64) < min_len {
                    return Err(format!("{path}: string shorter than minLength {min_len}"));
                }
            }
            if let Some(max_len) = schema_obj.get("maxLength").and_then(|v| v.as_u64()) {
                if (s.len() as u64) > max_len {
                    return Err(format!("{path}: string longer than maxLength {max_len}"));
                }
            }
            if let Some(pattern) = schema_obj.get("pattern").and_then(|v| v.as_str()) {
                let re = regex::Regex::new(pattern)
                    .map_err(|e| format!("{path}: invalid schema pattern: {e}"))?;
                if !re.is_match(s) {
                    return Err(format!("{path}: string does not match pattern {pattern}"));
                }
            }
        }
        JsonValue::Array(items) => {
            if let Some(item_schema) = schema_obj.get("items") {
                for (i, item) in items.iter().enumerate() {
                    validate_node(item_schema, item, &format!("{path}[{i}]"))?;
                }
            }
        }
        JsonValue::Object(obj) => {
            if let Some(required) = schema_obj.get("required").and_then(|r| r.as_array()) {
                for req in required {
                    if let Some(name) = req.as_str() {
                        if !obj.contains_key(name) {
                            return Err(format!("{path}: missing required property '{name}'"));
                        }
                    }
                }
            }

            let properties = schema_obj.get("properties").and_then(|p| p.as_object());

            if schema_obj.get("additionalProperties") == Some(&JsonValue::Bool(false)) {
                if let Some(properties) = properties {
                    for key in obj.keys() {
                        if !properties.contains_key(key) {
                            return Err(format!("{path}: additional property '{key}' is not allowed"));
                        }
                    }
                }
            }

            if let Some(properties) = properties {
                for (key, sub_schema) in properties {
                    if let Some(value) = obj.get(key) {
                        validate_node(sub_schema, value, &format!("{path}.{key}"))?;
                    }
                }
            }
        }
        _ => {}
    }

    Ok(())
}

fn check_type(ty: &str, instance: &JsonValue, path: &str) -> Result<(), String> {
    let matches = match ty {
        "object" => instance.is_object(),
        "array" => instance.is_array(),
        "string" => instance.is_string(),
        "boolean" => instance.is_boolean(),
        "null" => instance.is_null(),
        "number" => instance.is_number(),
        "integer" => instance.as_i64().is_some() || instance.as_u64().is_some(),
        _ => true,
    };
    if matches {
        Ok(())
    } else {
        Err(format!("{path}: expected type '{ty}', got {}", describe(instance)))
    }
}

fn describe(v: &JsonValue) -> &'static str {
    match v {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "location": {"type": "string", "minLength": 1},
                "unit": {"type": "string", "enum": ["celsius", "fahrenheit"]}
            },
            "required": ["location"],
            "additionalProperties": false
        })
    }

    #[test]
    fn accepts_valid_instance() {
        assert!(validate(&schema(), &json!({"location": "SF", "unit": "celsius"})).is_ok());
    }

    #[test]
    fn rejects_missing_required() {
        assert!(validate(&schema(), &json!({"unit": "celsius"})).is_err());
    }

    #[test]
    fn rejects_unknown_property() {
        assert!(validate(&schema(), &json!({"location": "SF", "extra": 1})).is_err());
    }

    #[test]
    fn rejects_bad_enum_value() {
        assert!(validate(&schema(), &json!({"location": "SF", "unit": "kelvin"})).is_err());
    }

    #[test]
    fn rejects_wrong_type() {
        assert!(validate(&schema(), &json!({"location": 5})).is_err());
    }
}
