//! Schema generation and argument binding
//!
//! The registry-facing half of the schema subsystem: `generate_schema`
//! derives a JSON Schema from a handler's typed argument struct at
//! registration time, and `SchemaValidator` validates and coerces an
//! incoming argument map against that schema before the map is
//! deserialized into the typed value the handler receives.
//!
//! Coercion is permissive in one direction only: strings that parse as the
//! expected number or boolean are converted; everything else must already
//! have the declared type.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::core::error::{McpError, McpResult};

/// Generate a JSON Schema for a typed argument struct.
///
/// The `$schema` and `title` keys are stripped: tool listings carry bare
/// object schemas.
pub fn generate_schema<T: JsonSchema>() -> McpResult<Value> {
    let schema = schemars::schema_for!(T);
    let mut value = serde_json::to_value(schema)?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    Ok(value)
}

/// Reject argument types that amount to a loose key-value map.
///
/// Handlers must take a structured record so a property schema can be
/// derived; a map type generates an object schema with no `properties`,
/// which defeats validation.
pub fn ensure_structured_schema(schema: &Value) -> McpResult<()> {
    let obj = schema
        .as_object()
        .ok_or_else(|| McpError::validation("Generated schema must be an object"))?;

    if obj.get("type").and_then(Value::as_str) != Some("object") {
        return Err(McpError::validation(
            "Tool argument type must be a structured record (object schema)",
        ));
    }

    let has_properties = obj
        .get("properties")
        .and_then(Value::as_object)
        .is_some_and(|p| !p.is_empty());
    let open_map = matches!(
        obj.get("additionalProperties"),
        Some(Value::Bool(true)) | Some(Value::Object(_))
    );

    if !has_properties && open_map {
        return Err(McpError::validation(
            "Tool argument type must be a structured record, not a key-value map",
        ));
    }

    Ok(())
}

/// Validator for tool and resource argument maps
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    schema: Value,
}

impl SchemaValidator {
    /// Create a validator for an object schema
    pub fn new(schema: Value) -> Self {
        Self { schema }
    }

    /// The schema this validator enforces
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Validate and coerce an argument map in place.
    ///
    /// Checks required properties, validates each declared property's type,
    /// and coerces string values into expected numbers and booleans.
    pub fn validate_and_coerce(&self, args: &mut Map<String, Value>) -> McpResult<()> {
        let Some(schema) = self.schema.as_object() else {
            return Ok(());
        };

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !args.contains_key(name) {
                    return Err(McpError::validation(format!(
                        "Missing required parameter: {name}"
                    )));
                }
            }
        }

        let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
            return Ok(());
        };

        for (name, prop_schema) in properties {
            let Some(value) = args.get(name) else {
                continue;
            };
            if let Some(coerced) = Self::check_value(name, value, prop_schema)? {
                args.insert(name.clone(), coerced);
            }
        }

        Ok(())
    }

    /// Check one value against its property schema; returns a replacement
    /// value when coercion applied.
    fn check_value(name: &str, value: &Value, prop_schema: &Value) -> McpResult<Option<Value>> {
        let Some(expected) = prop_schema.get("type").and_then(Value::as_str) else {
            return Ok(None);
        };

        let matches = match expected {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            "null" => value.is_null(),
            _ => true,
        };
        if matches {
            return Ok(None);
        }

        // Nullable properties: schemars emits ["<type>", "null"] unions as
        // plain type plus Option handling on the serde side
        if value.is_null() {
            return Ok(None);
        }

        if let Some(coerced) = Self::coerce(value, expected) {
            return Ok(Some(coerced));
        }

        Err(McpError::validation(format!(
            "Parameter '{name}' expected {expected}, got {}",
            type_name(value)
        )))
    }

    /// String-to-scalar coercion
    fn coerce(value: &Value, expected: &str) -> Option<Value> {
        let s = value.as_str()?;
        match expected {
            "number" => s.parse::<f64>().ok().and_then(|n| {
                serde_json::Number::from_f64(n).map(Value::Number)
            }),
            "integer" => s.parse::<i64>().ok().map(Value::from),
            "boolean" => s.parse::<bool>().ok().map(Value::Bool),
            _ => None,
        }
    }
}

/// Validate, coerce, and deserialize an argument map into the handler's
/// typed parameter.
pub fn bind_arguments<T: DeserializeOwned>(
    validator: &SchemaValidator,
    mut args: Map<String, Value>,
) -> McpResult<T> {
    validator.validate_and_coerce(&mut args)?;
    serde_json::from_value(Value::Object(args))
        .map_err(|e| McpError::validation(format!("Argument binding failed: {e}")))
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct GreetArgs {
        name: String,
        #[serde(default)]
        shout: bool,
    }

    #[test]
    fn test_generate_schema_shape() {
        let schema = generate_schema::<GreetArgs>().unwrap();
        assert_eq!(schema["type"], json!("object"));
        assert!(schema["properties"]["name"].is_object());
        assert!(schema.get("$schema").is_none());
        assert!(schema.get("title").is_none());
    }

    #[test]
    fn test_structured_schema_accepts_records() {
        let schema = generate_schema::<GreetArgs>().unwrap();
        assert!(ensure_structured_schema(&schema).is_ok());
    }

    #[test]
    fn test_structured_schema_rejects_maps() {
        let schema =
            generate_schema::<std::collections::HashMap<String, Value>>().unwrap();
        assert!(ensure_structured_schema(&schema).is_err());
    }

    #[test]
    fn test_bind_valid_arguments() {
        let validator = SchemaValidator::new(generate_schema::<GreetArgs>().unwrap());
        let mut args = Map::new();
        args.insert("name".to_string(), json!("Ada"));
        let bound: GreetArgs = bind_arguments(&validator, args).unwrap();
        assert_eq!(
            bound,
            GreetArgs {
                name: "Ada".to_string(),
                shout: false
            }
        );
    }

    #[test]
    fn test_missing_required_fails() {
        let validator = SchemaValidator::new(generate_schema::<GreetArgs>().unwrap());
        let result: McpResult<GreetArgs> = bind_arguments(&validator, Map::new());
        assert!(matches!(result, Err(McpError::Validation(_))));
    }

    #[test]
    fn test_string_coercion() {
        #[derive(Debug, Deserialize, JsonSchema)]
        struct CountArgs {
            count: i64,
            ratio: f64,
            enabled: bool,
        }

        let validator = SchemaValidator::new(generate_schema::<CountArgs>().unwrap());
        let mut args = Map::new();
        args.insert("count".to_string(), json!("30"));
        args.insert("ratio".to_string(), json!("0.5"));
        args.insert("enabled".to_string(), json!("true"));
        let bound: CountArgs = bind_arguments(&validator, args).unwrap();
        assert_eq!(bound.count, 30);
        assert_eq!(bound.ratio, 0.5);
        assert!(bound.enabled);
    }

    #[test]
    fn test_type_mismatch_fails() {
        let validator = SchemaValidator::new(generate_schema::<GreetArgs>().unwrap());
        let mut args = Map::new();
        args.insert("name".to_string(), json!(["not", "a", "string"]));
        let result: McpResult<GreetArgs> = bind_arguments(&validator, args);
        assert!(matches!(result, Err(McpError::Validation(_))));
    }
}
