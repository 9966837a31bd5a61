//! Payload validation against explicit schemas
//!
//! Fields are scanned in declaration order and the first violation wins.
//! Nested objects and arrays recurse; the reported field is the full path,
//! e.g. `meterValue[0].sampledValue[1].measurand`.

use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::schema::{FieldKind, PayloadSchema, UnknownFields};
use crate::types::{ErrorCode, Timestamp};

/// Field name reported when the payload itself is not an object
pub const ROOT_FIELD: &str = "payload";

/// The constraint a payload violated
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationRule {
    Required,
    Type { expected: &'static str },
    MaxLength { max: usize },
    Range { min: Option<f64>, max: Option<f64> },
    Enum { allowed: &'static [&'static str] },
    ItemCount { min: Option<usize>, max: Option<usize> },
    UnknownField,
}

impl ValidationRule {
    /// Fixed mapping from violated rule to the CallError code sent to peers
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ValidationRule::Required => ErrorCode::OccurrenceConstraintViolation,
            ValidationRule::ItemCount { .. } => ErrorCode::OccurrenceConstraintViolation,
            ValidationRule::Type { .. } => ErrorCode::TypeConstraintViolation,
            ValidationRule::MaxLength { .. } => ErrorCode::PropertyConstraintViolation,
            ValidationRule::Range { .. } => ErrorCode::PropertyConstraintViolation,
            ValidationRule::Enum { .. } => ErrorCode::PropertyConstraintViolation,
            ValidationRule::UnknownField => ErrorCode::FormationViolation,
        }
    }

    /// Short machine-readable rule name
    pub fn name(&self) -> &'static str {
        match self {
            ValidationRule::Required => "required",
            ValidationRule::Type { .. } => "type",
            ValidationRule::MaxLength { .. } => "max_length",
            ValidationRule::Range { .. } => "range",
            ValidationRule::Enum { .. } => "enum",
            ValidationRule::ItemCount { .. } => "item_count",
            ValidationRule::UnknownField => "unknown_field",
        }
    }
}

impl fmt::Display for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationRule::Required => write!(f, "required field is missing"),
            ValidationRule::Type { expected } => write!(f, "expected {}", expected),
            ValidationRule::MaxLength { max } => write!(f, "exceeds maximum length {}", max),
            ValidationRule::Range { min, max } => match (min, max) {
                (Some(min), Some(max)) => write!(f, "must be between {} and {}", min, max),
                (Some(min), None) => write!(f, "must be at least {}", min),
                (None, Some(max)) => write!(f, "must be at most {}", max),
                (None, None) => write!(f, "out of range"),
            },
            ValidationRule::Enum { allowed } => write!(f, "must be one of {}", allowed.join(", ")),
            ValidationRule::ItemCount { min, max } => {
                write!(f, "item count must be within [{:?}, {:?}]", min, max)
            }
            ValidationRule::UnknownField => write!(f, "field is not allowed"),
        }
    }
}

/// First constraint violation found in a payload
#[derive(Debug, Clone, PartialEq, Error)]
#[error("field {field}: {rule}")]
pub struct ValidationError {
    pub field: String,
    pub rule: ValidationRule,
    pub value: Value,
}

impl ValidationError {
    fn new(field: &str, rule: ValidationRule, value: &Value) -> Self {
        Self {
            field: field.to_string(),
            rule,
            value: value.clone(),
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        self.rule.error_code()
    }
}

/// Validate a payload against its schema
pub fn validate(value: &Value, schema: &PayloadSchema) -> Result<(), ValidationError> {
    validate_object(value, schema, "")
}

fn validate_object(value: &Value, schema: &PayloadSchema, path: &str) -> Result<(), ValidationError> {
    let object: &Map<String, Value> = value.as_object().ok_or_else(|| {
        let field = if path.is_empty() { ROOT_FIELD } else { path };
        ValidationError::new(field, ValidationRule::Type { expected: "object" }, value)
    })?;

    for field in schema.fields() {
        let field_path = join(path, &field.name);
        match object.get(&field.name) {
            None | Some(Value::Null) => {
                if field.required {
                    return Err(ValidationError::new(
                        &field_path,
                        ValidationRule::Required,
                        &Value::Null,
                    ));
                }
            }
            Some(Value::String(s)) if s.is_empty() && field.required => {
                return Err(ValidationError::new(
                    &field_path,
                    ValidationRule::Required,
                    &Value::String(String::new()),
                ));
            }
            Some(member) => check_kind(member, &field.kind, &field_path)?,
        }
    }

    if schema.unknown_fields() == UnknownFields::Reject {
        if let Some((name, member)) = object.iter().find(|(name, _)| schema.field(name).is_none()) {
            return Err(ValidationError::new(
                &join(path, name),
                ValidationRule::UnknownField,
                member,
            ));
        }
    }

    Ok(())
}

fn check_kind(value: &Value, kind: &FieldKind, path: &str) -> Result<(), ValidationError> {
    let type_error = || {
        ValidationError::new(
            path,
            ValidationRule::Type {
                expected: kind.name(),
            },
            value,
        )
    };

    match kind {
        FieldKind::String { max_len } => {
            let s = value.as_str().ok_or_else(type_error)?;
            if let Some(max) = *max_len {
                if s.chars().count() > max {
                    return Err(ValidationError::new(
                        path,
                        ValidationRule::MaxLength { max },
                        value,
                    ));
                }
            }
        }
        FieldKind::Integer { min, max } => {
            let n = value.as_i64();
            if n.is_none() && value.as_u64().is_none() {
                return Err(type_error());
            }
            // u64 beyond i64::MAX is above any declared bound
            let n = n.map(|n| n as f64).unwrap_or(f64::MAX);
            check_range(n, min.map(|m| m as f64), max.map(|m| m as f64), value, path)?;
        }
        FieldKind::Decimal { min, max } => {
            let n = value.as_f64().ok_or_else(type_error)?;
            check_range(n, *min, *max, value, path)?;
        }
        FieldKind::Boolean => {
            if !value.is_boolean() {
                return Err(type_error());
            }
        }
        FieldKind::Timestamp => {
            let s = value.as_str().ok_or_else(type_error)?;
            Timestamp::parse(s).map_err(|_| type_error())?;
        }
        FieldKind::Enum(allowed) => {
            let s = value.as_str().ok_or_else(type_error)?;
            if !allowed.contains(&s) {
                return Err(ValidationError::new(
                    path,
                    ValidationRule::Enum { allowed: *allowed },
                    value,
                ));
            }
        }
        FieldKind::Object(schema) => validate_object(value, schema, path)?,
        FieldKind::Array {
            items,
            min_items,
            max_items,
        } => {
            let array = value.as_array().ok_or_else(type_error)?;
            let too_few = min_items.map_or(false, |min| array.len() < min);
            let too_many = max_items.map_or(false, |max| array.len() > max);
            if too_few || too_many {
                return Err(ValidationError::new(
                    path,
                    ValidationRule::ItemCount {
                        min: *min_items,
                        max: *max_items,
                    },
                    value,
                ));
            }
            for (i, item) in array.iter().enumerate() {
                check_kind(item, items, &format!("{}[{}]", path, i))?;
            }
        }
    }

    Ok(())
}

fn check_range(
    n: f64,
    min: Option<f64>,
    max: Option<f64>,
    value: &Value,
    path: &str,
) -> Result<(), ValidationError> {
    let below = min.map_or(false, |min| n < min);
    let above = max.map_or(false, |max| n > max);
    if below || above {
        return Err(ValidationError::new(path, ValidationRule::Range { min, max }, value));
    }
    Ok(())
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}
