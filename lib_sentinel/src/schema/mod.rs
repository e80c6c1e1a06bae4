//! # Schema Validator
//!
//! Pure checks over one inbound telemetry record. Nothing here coerces or
//! mutates the input; each check either passes or names the field that broke
//! the expected shape.

use serde_json::{Map, Value};

use crate::errors::ValidationError;

/// Top-level sections every telemetry record must carry.
pub const REQUIRED_SECTIONS: [(&str, Shape); 3] = [
    ("system", Shape::Object),
    ("tracks", Shape::Array),
    ("alerts", Shape::Array),
];

/// The coarse JSON shapes the validator distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Object,
    Array,
    String,
}

impl Shape {
    fn describe(self) -> &'static str {
        match self {
            Shape::Object => "an object",
            Shape::Array => "an array",
            Shape::String => "a string",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Shape::Object => value.is_object(),
            Shape::Array => value.is_array(),
            Shape::String => value.is_string(),
        }
    }
}

/// Human-readable JSON type name, used in violation messages.
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// `true` for entries of `tracks`/`alerts`/`explanation` worth keeping.
pub fn is_record_entry(value: &Value) -> bool {
    value.is_object()
}

/// Requires `field` to be present in `record` with the given shape.
pub fn check_field<'a>(
    record: &'a Map<String, Value>,
    field: &str,
    shape: Shape,
) -> Result<&'a Value, ValidationError> {
    let value = record.get(field).ok_or_else(|| ValidationError::MissingField {
        field: field.to_string(),
    })?;
    if shape.matches(value) {
        Ok(value)
    } else {
        Err(ValidationError::WrongType {
            field: field.to_string(),
            expected: shape.describe(),
            found: json_kind(value),
        })
    }
}

/// Accepts an absent or `null` field, otherwise requires the given shape.
pub fn check_optional_field(
    record: &Map<String, Value>,
    field: &str,
    shape: Shape,
) -> Result<(), ValidationError> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(()),
        Some(value) if shape.matches(value) => Ok(()),
        Some(value) => Err(ValidationError::WrongType {
            field: field.to_string(),
            expected: shape.describe(),
            found: json_kind(value),
        }),
    }
}

/// Checks the top-level shape of a telemetry record.
///
/// Requires an object with `system` (object), `tracks` (array) and `alerts`
/// (array). `video` must be an object and `timestamp` a string when present.
/// Nested entries are not inspected here; malformed items are filtered by the
/// transformer's sanitize pass.
pub fn validate_record(raw: &Value) -> Result<(), ValidationError> {
    let record = raw.as_object().ok_or(ValidationError::NotAnObject {
        found: json_kind(raw),
    })?;

    for (field, shape) in REQUIRED_SECTIONS {
        check_field(record, field, shape)?;
    }
    check_optional_field(record, "video", Shape::Object)?;
    check_optional_field(record, "timestamp", Shape::String)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> Value {
        json!({"system": {}, "tracks": [], "alerts": []})
    }

    #[test]
    fn accepts_minimal_record() {
        assert_eq!(validate_record(&minimal()), Ok(()));
    }

    #[test]
    fn rejects_non_objects() {
        for raw in [json!(null), json!([]), json!("str"), json!(123), json!(true)] {
            let err = validate_record(&raw).unwrap_err();
            assert_eq!(err.field(), "$");
        }
    }

    #[test]
    fn names_the_missing_section() {
        for section in ["system", "tracks", "alerts"] {
            let mut raw = minimal();
            raw.as_object_mut().unwrap().remove(section);
            let err = validate_record(&raw).unwrap_err();
            assert_eq!(
                err,
                ValidationError::MissingField {
                    field: section.to_string()
                }
            );
        }
        assert!(matches!(
            validate_record(&json!({})),
            Err(ValidationError::MissingField { .. })
        ));
    }

    #[test]
    fn names_wrongly_typed_section() {
        let raw = json!({"system": {}, "tracks": {}, "alerts": []});
        let err = validate_record(&raw).unwrap_err();
        assert_eq!(err.field(), "tracks");
        assert_eq!(
            err.to_string(),
            "field `tracks` must be an array, found an object"
        );
    }

    #[test]
    fn optional_sections_checked_only_when_present() {
        let mut raw = minimal();
        raw["video"] = Value::Null;
        assert!(validate_record(&raw).is_ok());
        raw["video"] = json!("hd");
        assert_eq!(validate_record(&raw).unwrap_err().field(), "video");
        raw["video"] = json!({});
        raw["timestamp"] = json!(17);
        assert_eq!(validate_record(&raw).unwrap_err().field(), "timestamp");
    }
}
