//! Typed field schema and value coercion.
//!
//! # Responsibility
//! - Describe mapped columns of an entity without runtime reflection.
//! - Coerce loosely typed patch input (JSON) into storage values.
//! - Convert storage values back into typed Rust fields.
//!
//! # Invariants
//! - Identifiers are always stored as hyphenated lowercase UUID text.
//! - Dates are always stored as `YYYY-MM-DD` text.
//! - Booleans are always stored as integer `0`/`1`.

use chrono::NaiveDate;
use rusqlite::types::Value;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

/// Storage format for date fields.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Name of the identifier column shared by every entity table.
pub const ID_COLUMN: &str = "id";

/// Logical type of one mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Real,
    Boolean,
    Uuid,
    Date,
}

impl FieldKind {
    fn label(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Boolean => "boolean",
            Self::Uuid => "uuid",
            Self::Date => "date",
        }
    }
}

/// Schema entry for one mapped (persisted) field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    /// Column name; also the key accepted by patch documents.
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
}

impl FieldDef {
    pub const fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
        }
    }

    pub const fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: true,
        }
    }

    /// Converts one JSON value into the storage representation of this field.
    ///
    /// # Errors
    /// - `NullNotAllowed` when `value` is null and the field is required.
    /// - `TypeMismatch` when the JSON type cannot represent the field kind.
    /// - `Malformed` when a string cannot be parsed as UUID or date.
    pub fn coerce_json(&self, value: &JsonValue) -> Result<Value, FieldError> {
        if value.is_null() {
            return if self.nullable {
                Ok(Value::Null)
            } else {
                Err(FieldError::NullNotAllowed {
                    field: self.name.to_string(),
                })
            };
        }

        match (self.kind, value) {
            (FieldKind::Text, JsonValue::String(text)) => Ok(Value::Text(text.clone())),
            (FieldKind::Integer, JsonValue::Number(number)) if number.is_i64() => {
                Ok(Value::Integer(number.as_i64().unwrap_or_default()))
            }
            (FieldKind::Real, JsonValue::Number(number)) => number
                .as_f64()
                .map(Value::Real)
                .ok_or_else(|| self.mismatch(value)),
            (FieldKind::Boolean, JsonValue::Bool(flag)) => Ok(bool_value(*flag)),
            (FieldKind::Uuid, JsonValue::String(text)) => Uuid::parse_str(text)
                .map(uuid_value)
                .map_err(|err| FieldError::Malformed {
                    field: self.name.to_string(),
                    value: text.clone(),
                    reason: err.to_string(),
                }),
            (FieldKind::Date, JsonValue::String(text)) => NaiveDate::parse_from_str(text, DATE_FORMAT)
                .map(date_value)
                .map_err(|err| FieldError::Malformed {
                    field: self.name.to_string(),
                    value: text.clone(),
                    reason: err.to_string(),
                }),
            _ => Err(self.mismatch(value)),
        }
    }

    fn mismatch(&self, value: &JsonValue) -> FieldError {
        FieldError::TypeMismatch {
            field: self.name.to_string(),
            expected: self.kind.label(),
            found: json_type_name(value).to_string(),
        }
    }
}

/// Field conversion failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("field `{field}` cannot be null")]
    NullNotAllowed { field: String },
    #[error("field `{field}` expects {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: String,
    },
    #[error("field `{field}` value `{value}` is malformed: {reason}")]
    Malformed {
        field: String,
        value: String,
        reason: String,
    },
}

/// Converts JSON without schema knowledge; used for unmapped fields.
pub fn json_to_value(value: &JsonValue) -> Value {
    match value {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(flag) => bool_value(*flag),
        JsonValue::Number(number) => match number.as_i64() {
            Some(integer) => Value::Integer(integer),
            None => Value::Real(number.as_f64().unwrap_or_default()),
        },
        JsonValue::String(text) => Value::Text(text.clone()),
        other => Value::Text(other.to_string()),
    }
}

pub fn uuid_value(id: Uuid) -> Value {
    Value::Text(id.hyphenated().to_string())
}

pub fn date_value(date: NaiveDate) -> Value {
    Value::Text(date.format(DATE_FORMAT).to_string())
}

pub fn bool_value(flag: bool) -> Value {
    Value::Integer(i64::from(flag))
}

pub fn text_value(text: &str) -> Value {
    Value::Text(text.to_string())
}

pub fn opt_text_value(text: Option<&str>) -> Value {
    text.map_or(Value::Null, text_value)
}

pub fn to_text(field: &str, value: Value) -> Result<String, FieldError> {
    match value {
        Value::Text(text) => Ok(text),
        other => Err(storage_mismatch(field, "text", &other)),
    }
}

pub fn to_opt_text(field: &str, value: Value) -> Result<Option<String>, FieldError> {
    match value {
        Value::Null => Ok(None),
        other => to_text(field, other).map(Some),
    }
}

pub fn to_integer(field: &str, value: Value) -> Result<i64, FieldError> {
    match value {
        Value::Integer(integer) => Ok(integer),
        other => Err(storage_mismatch(field, "integer", &other)),
    }
}

pub fn to_opt_integer(field: &str, value: Value) -> Result<Option<i64>, FieldError> {
    match value {
        Value::Null => Ok(None),
        other => to_integer(field, other).map(Some),
    }
}

pub fn to_bool(field: &str, value: Value) -> Result<bool, FieldError> {
    match to_integer(field, value)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(FieldError::Malformed {
            field: field.to_string(),
            value: other.to_string(),
            reason: "expected 0 or 1".to_string(),
        }),
    }
}

pub fn to_uuid(field: &str, value: Value) -> Result<Uuid, FieldError> {
    let text = to_text(field, value)?;
    Uuid::parse_str(&text).map_err(|err| FieldError::Malformed {
        field: field.to_string(),
        value: text.clone(),
        reason: err.to_string(),
    })
}

pub fn to_opt_uuid(field: &str, value: Value) -> Result<Option<Uuid>, FieldError> {
    match value {
        Value::Null => Ok(None),
        other => to_uuid(field, other).map(Some),
    }
}

pub fn to_opt_date(field: &str, value: Value) -> Result<Option<NaiveDate>, FieldError> {
    match value {
        Value::Null => Ok(None),
        other => {
            let text = to_text(field, other)?;
            NaiveDate::parse_from_str(&text, DATE_FORMAT)
                .map(Some)
                .map_err(|err| FieldError::Malformed {
                    field: field.to_string(),
                    value: text.clone(),
                    reason: err.to_string(),
                })
        }
    }
}

fn storage_mismatch(field: &str, expected: &'static str, found: &Value) -> FieldError {
    FieldError::TypeMismatch {
        field: field.to_string(),
        expected,
        found: value_type_name(found).to_string(),
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Integer(_) => "integer",
        Value::Real(_) => "real",
        Value::Text(_) => "text",
        Value::Blob(_) => "blob",
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
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

    #[test]
    fn required_field_rejects_null() {
        let field = FieldDef::required("first_name", FieldKind::Text);
        let err = field.coerce_json(&JsonValue::Null).unwrap_err();
        assert!(matches!(err, FieldError::NullNotAllowed { .. }));
    }

    #[test]
    fn uuid_input_is_normalized_to_lowercase_text() {
        let field = FieldDef::optional("customer_id", FieldKind::Uuid);
        let value = field
            .coerce_json(&json!("6F9619FF-8B86-D011-B42D-00C04FC964FF"))
            .unwrap();
        assert_eq!(
            value,
            Value::Text("6f9619ff-8b86-d011-b42d-00c04fc964ff".to_string())
        );
    }

    #[test]
    fn date_input_must_match_storage_format() {
        let field = FieldDef::optional("date_of_birth", FieldKind::Date);
        assert_eq!(
            field.coerce_json(&json!("1990-04-01")).unwrap(),
            Value::Text("1990-04-01".to_string())
        );
        let err = field.coerce_json(&json!("04/01/1990")).unwrap_err();
        assert!(matches!(err, FieldError::Malformed { .. }));
    }

    #[test]
    fn integer_field_rejects_fractional_numbers() {
        let field = FieldDef::required("model_year", FieldKind::Integer);
        let err = field.coerce_json(&json!(2019.5)).unwrap_err();
        assert!(matches!(err, FieldError::TypeMismatch { expected: "integer", .. }));
    }

    #[test]
    fn boolean_is_stored_as_integer() {
        let field = FieldDef::required("is_active", FieldKind::Boolean);
        assert_eq!(field.coerce_json(&json!(true)).unwrap(), Value::Integer(1));
        assert!(to_bool("is_active", Value::Integer(2)).is_err());
    }
}
