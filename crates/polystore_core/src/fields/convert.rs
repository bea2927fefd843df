//! Wire-level conversion between canonical values and backend encodings.

use super::{Field, FieldKind};
use crate::encoding::{ContainerFormat, DecimalFormat, TimestampFormat, ValueEncoding};
use crate::error::{Result, StoreError};
use crate::value::Value;
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

/// Fields that already logged the lossy-decimal warning, one entry each.
fn warned_fields() -> &'static Mutex<HashSet<String>> {
    static WARNED: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    WARNED.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Convert a validated canonical value to its stored representation for the
/// given backend encoding.
pub fn to_db(field: &Field, value: &Value, encoding: &ValueEncoding) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    match field.kind.scalar() {
        FieldKind::Timestamp => {
            let dt = value.parse_datetime().ok_or_else(|| {
                StoreError::validation(&field.name, "not a timestamp at serialization time")
            })?;
            Ok(match encoding.timestamps {
                TimestampFormat::Iso8601 => Value::DateTime(dt),
                TimestampFormat::SpacedMillis => {
                    Value::Text(dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
                }
                TimestampFormat::EpochMillis => Value::Int(dt.timestamp_millis()),
            })
        }
        FieldKind::Decimal { .. } => {
            let decimal = value.parse_decimal().ok_or_else(|| {
                StoreError::validation(&field.name, "not a decimal at serialization time")
            })?;
            Ok(match encoding.decimals {
                DecimalFormat::Native => Value::Decimal(decimal),
                DecimalFormat::Text => Value::Text(decimal.normalized().to_string()),
                DecimalFormat::Float => {
                    if field.lossy_decimal {
                        bigdecimal::ToPrimitive::to_f64(&decimal)
                            .map(Value::Float)
                            .ok_or_else(|| {
                                StoreError::validation(
                                    &field.name,
                                    "decimal out of float range",
                                )
                            })?
                    } else {
                        let mut warned = warned_fields()
                            .lock()
                            .unwrap_or_else(|poison| poison.into_inner());
                        if warned.insert(field.name.clone()) {
                            log::warn!(
                                "field '{}': backend stores decimals as floats; \
                                 serializing as text to preserve precision",
                                field.name
                            );
                        }
                        Value::Text(decimal.normalized().to_string())
                    }
                }
            })
        }
        FieldKind::Array(element) => match value {
            Value::Array(items) => {
                let element_field = Field::new(field.name.clone(), (**element).clone());
                let converted: Result<Vec<Value>> = items
                    .iter()
                    .map(|item| to_db(&element_field, item, encoding))
                    .collect();
                let array = Value::Array(converted?);
                Ok(match encoding.arrays {
                    ContainerFormat::Native => array,
                    ContainerFormat::JsonText => Value::Text(array.to_json().to_string()),
                })
            }
            other => Err(StoreError::validation(
                &field.name,
                format!("expected sequence, got {other:?}"),
            )),
        },
        FieldKind::Object => match encoding.objects {
            ContainerFormat::Native => Ok(value.clone()),
            ContainerFormat::JsonText => Ok(Value::Text(value.to_json().to_string())),
        },
        FieldKind::Uuid => Ok(value.clone()),
        _ => Ok(value.clone()),
    }
}

/// Convert a stored value back to the canonical representation.
///
/// Tolerant of both native and fallback encodings so rows written by an
/// older configuration still load.
pub fn from_db(field: &Field, value: Value, _encoding: &ValueEncoding) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    match field.kind.scalar() {
        FieldKind::Timestamp => value
            .parse_datetime()
            .map(Value::DateTime)
            .ok_or_else(|| StoreError::validation(&field.name, "unreadable stored timestamp")),
        FieldKind::Decimal { .. } => value
            .parse_decimal()
            .map(Value::Decimal)
            .ok_or_else(|| StoreError::validation(&field.name, "unreadable stored decimal")),
        FieldKind::Boolean => match value {
            Value::Bool(_) => Ok(value),
            // Columnar backends store booleans as 0/1.
            Value::Int(0) => Ok(Value::Bool(false)),
            Value::Int(_) => Ok(Value::Bool(true)),
            other => Err(StoreError::validation(
                &field.name,
                format!("unreadable stored boolean: {other:?}"),
            )),
        },
        FieldKind::Integer => match value {
            Value::Int(_) => Ok(value),
            Value::Text(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                StoreError::validation(&field.name, format!("unreadable stored integer '{s}'"))
            }),
            Value::Float(f) if f.fract() == 0.0 => Ok(Value::Int(f as i64)),
            other => Err(StoreError::validation(
                &field.name,
                format!("unreadable stored integer: {other:?}"),
            )),
        },
        FieldKind::Float => match value {
            Value::Float(_) => Ok(value),
            Value::Int(i) => Ok(Value::Float(i as f64)),
            Value::Text(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                StoreError::validation(&field.name, format!("unreadable stored float '{s}'"))
            }),
            other => Err(StoreError::validation(
                &field.name,
                format!("unreadable stored float: {other:?}"),
            )),
        },
        FieldKind::Uuid => match value {
            Value::Uuid(_) => Ok(value),
            Value::Text(s) => uuid::Uuid::parse_str(s.trim()).map(Value::Uuid).map_err(|_| {
                StoreError::validation(&field.name, format!("unreadable stored UUID '{s}'"))
            }),
            other => Err(StoreError::validation(
                &field.name,
                format!("unreadable stored UUID: {other:?}"),
            )),
        },
        FieldKind::Array(element) => {
            let array = match value {
                Value::Array(_) => value,
                Value::Text(s) => serde_json::from_str::<serde_json::Value>(&s)
                    .ok()
                    .filter(serde_json::Value::is_array)
                    .map(Value::from_json)
                    .ok_or_else(|| {
                        StoreError::validation(&field.name, "unreadable stored sequence")
                    })?,
                other => {
                    return Err(StoreError::validation(
                        &field.name,
                        format!("unreadable stored sequence: {other:?}"),
                    ));
                }
            };
            match array {
                Value::Array(items) => {
                    let element_field = Field::new(field.name.clone(), (**element).clone());
                    let restored: Result<Vec<Value>> = items
                        .into_iter()
                        .map(|item| from_db(&element_field, item, _encoding))
                        .collect();
                    Ok(Value::Array(restored?))
                }
                _ => unreachable!(),
            }
        }
        FieldKind::Object => match value {
            Value::Object(_) => Ok(value),
            Value::Text(s) => serde_json::from_str::<serde_json::Value>(&s)
                .ok()
                .filter(serde_json::Value::is_object)
                .map(Value::from_json)
                .ok_or_else(|| StoreError::validation(&field.name, "unreadable stored mapping")),
            other => Err(StoreError::validation(
                &field.name,
                format!("unreadable stored mapping: {other:?}"),
            )),
        },
        _ => Ok(value),
    }
}
