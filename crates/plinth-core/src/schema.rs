//! Input/output schemas.
//!
//! A schema builds a model from raw JSON and hands back the model's canonical
//! dump. Validation failures are reported per field.

use std::any::type_name;
use std::marker::PhantomData;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Field name used for failures that cannot be attributed to a single field.
pub const ROOT_FIELD: &str = "__root__";

pub trait Schema: Send + Sync {
    fn name(&self) -> &str;

    /// Build the model from `data` and return its canonical dump.
    fn construct(&self, data: &Value) -> Result<Value, ValidationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl FieldKind {
    fn check(&self, value: &Value) -> Result<(), &'static str> {
        let ok = match self {
            FieldKind::String => value.is_string(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Number => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
            FieldKind::Any => true,
        };
        if ok { Ok(()) } else { Err(self.mismatch()) }
    }

    fn mismatch(&self) -> &'static str {
        match self {
            FieldKind::String => "str type expected",
            FieldKind::Integer => "value is not a valid integer",
            FieldKind::Number => "value is not a valid float",
            FieldKind::Boolean => "value could not be parsed to a boolean",
            FieldKind::Object => "value is not a valid dict",
            FieldKind::Array => "value is not a valid list",
            FieldKind::Any => "",
        }
    }
}

#[derive(Debug, Clone)]
struct Field {
    name: String,
    kind: FieldKind,
    required: bool,
    default: Value,
}

/// Declarative object schema. Unknown input fields are dropped from the dump.
#[derive(Debug, Clone)]
pub struct ObjectSchema {
    name: String,
    fields: Vec<Field>,
}

impl ObjectSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn required(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.field(name, kind, true, Value::Null)
    }

    /// Optional field, dumped as `null` when absent.
    pub fn optional(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.field(name, kind, false, Value::Null)
    }

    pub fn with_default(
        self,
        name: impl Into<String>,
        kind: FieldKind,
        default: impl Into<Value>,
    ) -> Self {
        self.field(name, kind, false, default.into())
    }

    fn field(mut self, name: impl Into<String>, kind: FieldKind, required: bool, default: Value) -> Self {
        self.fields.push(Field {
            name: name.into(),
            kind,
            required,
            default,
        });
        self
    }
}

impl Schema for ObjectSchema {
    fn name(&self) -> &str {
        &self.name
    }

    fn construct(&self, data: &Value) -> Result<Value, ValidationError> {
        let Value::Object(input) = data else {
            return Err(ValidationError::single(ROOT_FIELD, "value is not a valid dict"));
        };

        let mut errors = ValidationError::new();
        let mut dump = Map::new();
        for field in &self.fields {
            match input.get(&field.name) {
                None if field.required => errors.add(&field.name, "field required"),
                None => {
                    dump.insert(field.name.clone(), field.default.clone());
                }
                Some(Value::Null) if !field.required => {
                    dump.insert(field.name.clone(), Value::Null);
                }
                Some(Value::Null) => errors.add(&field.name, "none is not an allowed value"),
                Some(value) => match field.kind.check(value) {
                    Ok(()) => {
                        dump.insert(field.name.clone(), value.clone());
                    }
                    Err(reason) => errors.add(&field.name, reason),
                },
            }
        }

        if errors.is_empty() {
            Ok(Value::Object(dump))
        } else {
            Err(errors)
        }
    }
}

/// Schema backed by a serde model.
pub struct SerdeSchema<T> {
    name: String,
    _model: PhantomData<fn() -> T>,
}

impl<T> SerdeSchema<T> {
    pub fn new() -> Self {
        let full = type_name::<T>();
        let short = full.rsplit("::").next().unwrap_or(full);
        Self::named(short)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _model: PhantomData,
        }
    }
}

impl<T> Default for SerdeSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Schema for SerdeSchema<T>
where
    T: DeserializeOwned + Serialize,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn construct(&self, data: &Value) -> Result<Value, ValidationError> {
        let model = T::deserialize(data).map_err(|err| field_errors(&err))?;
        serde_json::to_value(&model)
            .map_err(|err| ValidationError::single(ROOT_FIELD, err.to_string()))
    }
}

static MISSING_FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r"missing field `([^`]+)`").unwrap());

static UNKNOWN_FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r"unknown field `([^`]+)`").unwrap());

static POSITION: Lazy<Regex> = Lazy::new(|| Regex::new(r" at line \d+ column \d+$").unwrap());

/// Attribute a serde error to a field when its message names one.
fn field_errors(err: &serde_json::Error) -> ValidationError {
    let message = err.to_string();
    if let Some(caps) = MISSING_FIELD.captures(&message) {
        return ValidationError::single(&caps[1], "field required");
    }
    if let Some(caps) = UNKNOWN_FIELD.captures(&message) {
        return ValidationError::single(&caps[1], "extra fields not permitted");
    }
    ValidationError::single(ROOT_FIELD, POSITION.replace(&message, "").into_owned())
}
