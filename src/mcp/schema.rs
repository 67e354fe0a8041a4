//! Structural schemas for tool inputs and outputs.
//!
//! A `Schema` is a flat object of typed fields built in code. It renders
//! itself as JSON Schema for `tools/list`, and `compile` turns that rendering
//! into a `jsonschema` validator which checks incoming arguments (after
//! defaults are filled in) and outgoing structured payloads.

use jsonschema::Validator;
use serde_json::{Map, Value, json};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("expected an object")]
    NotAnObject,

    /// Every violation reported by the validator, joined with `; `.
    #[error("{0}")]
    Invalid(String),

    #[error("schema does not compile: {0}")]
    Compile(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
}

impl FieldKind {
    fn json_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
        }
    }
}

/// One named field of a schema. Fields are required unless marked optional
/// or given a default.
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    kind: FieldKind,
    description: Option<String>,
    required: bool,
    default: Option<Value>,
    allowed: Vec<Value>,
    min: Option<f64>,
    max: Option<f64>,
}

impl Field {
    fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            required: true,
            default: None,
            allowed: Vec::new(),
            min: None,
            max: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Number)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Value used when the field is absent. Implies optional.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self.required = false;
        self
    }

    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.allowed = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    fn to_json_schema(&self) -> Value {
        let mut prop = Map::new();
        prop.insert("type".into(), json!(self.kind.json_type()));
        if let Some(description) = &self.description {
            prop.insert("description".into(), json!(description));
        }
        if !self.allowed.is_empty() {
            prop.insert("enum".into(), Value::Array(self.allowed.clone()));
        }
        if let Some(default) = &self.default {
            prop.insert("default".into(), default.clone());
        }
        if let Some(min) = self.min {
            prop.insert("minimum".into(), json!(min));
        }
        if let Some(max) = self.max {
            prop.insert("maximum".into(), json!(max));
        }
        Value::Object(prop)
    }
}

/// Object schema made of named fields, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn object() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.to_json_schema()))
            .collect();
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required
        })
    }

    /// Compile the rendered JSON Schema once so it can be reused for every
    /// invocation.
    pub fn compile(&self) -> Result<CompiledSchema, SchemaError> {
        let validator = jsonschema::validator_for(&self.to_json_schema())
            .map_err(|e| SchemaError::Compile(e.to_string()))?;
        Ok(CompiledSchema {
            schema: self.clone(),
            validator: Arc::new(validator),
        })
    }

    /// Copy of `input` with defaults inserted for absent fields.
    ///
    /// `null` input is treated as an empty object. An explicit `null` field
    /// is left in place so the validator rejects it.
    fn apply_defaults(&self, input: &Value) -> Result<Value, SchemaError> {
        let mut object = match input {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            _ => return Err(SchemaError::NotAnObject),
        };

        for field in &self.fields {
            if let Some(default) = &field.default {
                if !object.contains_key(&field.name) {
                    object.insert(field.name.clone(), default.clone());
                }
            }
        }

        Ok(Value::Object(object))
    }
}

/// A `Schema` together with its compiled validator.
#[derive(Clone)]
pub struct CompiledSchema {
    schema: Schema,
    validator: Arc<Validator>,
}

impl CompiledSchema {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Validate `input`, returning a copy with defaults applied.
    ///
    /// Fields the schema does not name are passed through untouched.
    pub fn validate(&self, input: &Value) -> Result<Value, SchemaError> {
        let instance = self.schema.apply_defaults(input)?;

        // Collect every violation so the caller sees all of them at once
        let errors: Vec<String> = self
            .validator
            .iter_errors(&instance)
            .map(|e| e.to_string())
            .collect();

        if errors.is_empty() {
            Ok(instance)
        } else {
            Err(SchemaError::Invalid(errors.join("; ")))
        }
    }
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc_schema() -> CompiledSchema {
        Schema::object()
            .field(Field::string("operation").one_of(["add", "divide"]))
            .field(Field::number("a"))
            .field(Field::number("b"))
            .field(Field::integer("precision").default_value(2).min(0.0).max(10.0))
            .compile()
            .unwrap()
    }

    fn is_invalid(result: Result<Value, SchemaError>) -> bool {
        matches!(result, Err(SchemaError::Invalid(_)))
    }

    #[test]
    fn test_defaults_filled_in() {
        let out = calc_schema()
            .validate(&json!({"operation": "add", "a": 1, "b": 2.5}))
            .unwrap();
        assert_eq!(out["precision"], 2);
    }

    #[test]
    fn test_missing_required_field() {
        let err = calc_schema().validate(&json!({"operation": "add", "a": 1})).unwrap_err();
        assert!(err.to_string().contains("\"b\""), "{err}");
    }

    #[test]
    fn test_enum_and_range_enforced() {
        let schema = calc_schema();
        assert!(is_invalid(schema.validate(&json!({"operation": "pow", "a": 1, "b": 2}))));
        assert!(is_invalid(
            schema.validate(&json!({"operation": "add", "a": 1, "b": 2, "precision": 11}))
        ));
        assert!(is_invalid(schema.validate(&json!({"operation": "add", "a": "1", "b": 2}))));
    }

    #[test]
    fn test_integral_float_is_an_integer() {
        let schema = Schema::object().field(Field::integer("n")).compile().unwrap();
        assert_eq!(schema.validate(&json!({"n": 2.0})).unwrap()["n"], 2.0);
        assert!(is_invalid(schema.validate(&json!({"n": 2.5}))));
    }

    #[test]
    fn test_explicit_null_rejected_for_typed_field() {
        let schema = Schema::object()
            .field(Field::number("result").optional())
            .compile()
            .unwrap();
        assert!(schema.validate(&json!({})).is_ok());
        assert!(is_invalid(schema.validate(&json!({"result": null}))));
    }

    #[test]
    fn test_null_input_is_empty_object() {
        let schema = Schema::object().field(Field::string("name").optional()).compile().unwrap();
        assert_eq!(schema.validate(&Value::Null).unwrap(), json!({}));
        assert_eq!(schema.validate(&json!([1])), Err(SchemaError::NotAnObject));
    }

    #[test]
    fn test_unknown_fields_pass_through() {
        let out = calc_schema()
            .validate(&json!({"operation": "add", "a": 1, "b": 2, "note": "x"}))
            .unwrap();
        assert_eq!(out["note"], "x");
    }

    #[test]
    fn test_json_schema_rendering() {
        let rendered = calc_schema().schema().to_json_schema();
        assert_eq!(rendered["type"], "object");
        assert_eq!(rendered["properties"]["operation"]["enum"], json!(["add", "divide"]));
        assert_eq!(rendered["properties"]["precision"]["default"], 2);
        assert_eq!(rendered["required"], json!(["operation", "a", "b"]));
    }

    #[test]
    fn test_unrepresentable_bound_fails_to_compile() {
        // NaN renders as null, which is not a valid "minimum"
        let result = Schema::object().field(Field::number("x").min(f64::NAN)).compile();
        assert!(matches!(result, Err(SchemaError::Compile(_))));
    }
}
