//! Payload shaping: input validation and output reconstruction.

use serde_json::Value;

use crate::Result;
use crate::error::Error;
use crate::response::ResponseData;
use crate::schema::Schema;

/// Validate request data against `schema`. No schema means no validation.
pub fn validate_input(data: &Value, schema: Option<&dyn Schema>) -> Result<Value> {
    match schema {
        None => Ok(data.clone()),
        Some(schema) => schema.construct(data).map_err(Error::Validation),
    }
}

/// Reconstruct response data through the output schema.
///
/// Mappings are rebuilt, sequences are shaped element-wise in order. Anything
/// else cannot be represented by an object schema.
pub fn shape_output(data: ResponseData, schema: Option<&dyn Schema>) -> Result<ResponseData> {
    let Some(schema) = schema else {
        return Ok(data);
    };
    match data {
        ResponseData::Value(value) => shape_value(value, schema).map(ResponseData::Value),
        ResponseData::Bytes(_) => Err(Error::TypeMismatch),
        ResponseData::Null => Err(Error::UnsupportedResponseType("null".to_string())),
    }
}

fn shape_value(value: Value, schema: &dyn Schema) -> Result<Value> {
    match value {
        Value::Object(_) => schema.construct(&value).map_err(|err| {
            Error::InvalidResponseType(format!(
                "response does not satisfy output schema `{}`: {}",
                schema.name(),
                err
            ))
        }),
        Value::Array(items) => items
            .into_iter()
            .map(|item| shape_value(item, schema))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Null => Err(Error::UnsupportedResponseType("null".to_string())),
        Value::Bool(_) | Value::Number(_) | Value::String(_) => Err(Error::TypeMismatch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldKind, ObjectSchema};
    use serde_json::json;

    fn user() -> ObjectSchema {
        ObjectSchema::new("UserOut")
            .required("id", FieldKind::Integer)
            .required("name", FieldKind::String)
    }

    #[test]
    fn test_no_schema_is_noop() {
        let data = json!({"anything": [1, 2]});
        assert_eq!(validate_input(&data, None).unwrap(), data);
        let out = shape_output(ResponseData::Bytes(vec![1]), None).unwrap();
        assert_eq!(out, ResponseData::Bytes(vec![1]));
    }

    #[test]
    fn test_validate_input_reports_fields() {
        let schema = user();
        let err = validate_input(&json!({"id": 1}), Some(&schema)).unwrap_err();
        match err {
            Error::Validation(fields) => assert_eq!(fields.get("name"), Some("field required")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_shape_mapping_drops_unknown_fields() {
        let schema = user();
        let data = ResponseData::Value(json!({"id": 1, "name": "ali", "password": "x"}));
        let shaped = shape_output(data, Some(&schema)).unwrap();
        assert_eq!(shaped, ResponseData::Value(json!({"id": 1, "name": "ali"})));
    }

    #[test]
    fn test_shape_sequence_preserves_order() {
        let schema = user();
        let data = ResponseData::Value(json!([
            {"id": 2, "name": "b", "extra": 1},
            {"id": 1, "name": "a"}
        ]));
        let shaped = shape_output(data, Some(&schema)).unwrap();
        assert_eq!(
            shaped,
            ResponseData::Value(json!([{"id": 2, "name": "b"}, {"id": 1, "name": "a"}]))
        );
    }

    #[test]
    fn test_shape_output_is_stable() {
        let schema = user();
        let once = shape_output(ResponseData::Value(json!({"id": 3, "name": "c"})), Some(&schema))
            .unwrap();
        let twice = shape_output(once.clone(), Some(&schema)).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_scalars_are_type_mismatch() {
        let schema = user();
        for value in [json!(1), json!(true), json!("text"), json!([1])] {
            let err = shape_output(ResponseData::Value(value), Some(&schema)).unwrap_err();
            assert!(matches!(err, Error::TypeMismatch));
        }
        assert!(matches!(
            shape_output(ResponseData::Bytes(b"raw".to_vec()), Some(&schema)),
            Err(Error::TypeMismatch)
        ));
    }

    #[test]
    fn test_null_is_unsupported() {
        let schema = user();
        assert!(matches!(
            shape_output(ResponseData::Null, Some(&schema)),
            Err(Error::UnsupportedResponseType(_))
        ));
    }

    #[test]
    fn test_invalid_output_is_not_a_client_error() {
        let schema = user();
        let err = shape_output(ResponseData::Value(json!({"id": "x"})), Some(&schema)).unwrap_err();
        assert!(!err.is_client());
    }
}
