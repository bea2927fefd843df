//! Name-plus-suffix lookup syntax (`age__gt`, `name__contains`, ...).
//!
//! Reduces to the same [`Filter`] tree as the expression syntax, so both
//! forms lower identically.

use super::{CondOp, Filter, Operand};
use crate::error::{Result, StoreError};
use crate::value::Value;

/// Escape `%` and `_` in user text destined for a LIKE pattern.
fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Parse one keyword lookup into a filter leaf.
///
/// A bare field name means equality. Recognized suffixes: `gt`, `lt`, `gte`,
/// `lte`, `in`, `contains`, `startswith`, `endswith`, `ne`, `between`,
/// `isnull`.
pub fn parse_lookup(key: &str, value: Value) -> Result<Filter> {
    let (path, suffix) = match key.rsplit_once("__") {
        Some((path, suffix)) if !path.is_empty() => (path, Some(suffix)),
        _ => (key, None),
    };

    let path = path.to_string();
    let leaf = |op, operand| Filter::Cmp {
        path: path.clone(),
        op,
        operand,
    };

    let filter = match suffix {
        None => leaf(CondOp::Eq, Operand::Value(value)),
        Some("ne") => leaf(CondOp::NotEq, Operand::Value(value)),
        Some("gt") => leaf(CondOp::Gt, Operand::Value(value)),
        Some("lt") => leaf(CondOp::Lt, Operand::Value(value)),
        Some("gte") => leaf(CondOp::Gte, Operand::Value(value)),
        Some("lte") => leaf(CondOp::Lte, Operand::Value(value)),
        Some("contains") => leaf(CondOp::Contains, Operand::Value(value)),
        Some("in") => match value {
            Value::Array(items) => leaf(CondOp::In, Operand::List(items)),
            other => {
                return Err(StoreError::schema(format!(
                    "lookup '{key}' expects a sequence, got {other:?}"
                )));
            }
        },
        Some("startswith") => match value {
            Value::Text(text) => leaf(
                CondOp::Like,
                Operand::Value(Value::Text(format!("{}%", escape_like(&text)))),
            ),
            other => {
                return Err(StoreError::schema(format!(
                    "lookup '{key}' expects text, got {other:?}"
                )));
            }
        },
        Some("endswith") => match value {
            Value::Text(text) => leaf(
                CondOp::Like,
                Operand::Value(Value::Text(format!("%{}", escape_like(&text)))),
            ),
            other => {
                return Err(StoreError::schema(format!(
                    "lookup '{key}' expects text, got {other:?}"
                )));
            }
        },
        Some("between") => match value {
            Value::Array(items) if items.len() == 2 => {
                let mut items = items.into_iter();
                let low = items.next().unwrap_or(Value::Null);
                let high = items.next().unwrap_or(Value::Null);
                leaf(CondOp::Between, Operand::Range(low, high))
            }
            other => {
                return Err(StoreError::schema(format!(
                    "lookup '{key}' expects a two-element sequence, got {other:?}"
                )));
            }
        },
        Some("isnull") => match value {
            Value::Bool(true) => leaf(CondOp::IsNull, Operand::None),
            Value::Bool(false) => leaf(CondOp::IsNotNull, Operand::None),
            other => {
                return Err(StoreError::schema(format!(
                    "lookup '{key}' expects a boolean, got {other:?}"
                )));
            }
        },
        Some(unknown) => {
            return Err(StoreError::schema(format!(
                "unknown lookup suffix '{unknown}' in '{key}'"
            )));
        }
    };

    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::f;

    #[test]
    fn bare_name_is_equality() {
        assert_eq!(
            parse_lookup("age", Value::Int(30)).unwrap(),
            f("age").eq(30)
        );
    }

    #[test]
    fn suffixes_match_expression_syntax() {
        assert_eq!(
            parse_lookup("age__gt", Value::Int(30)).unwrap(),
            f("age").gt(30)
        );
        assert_eq!(
            parse_lookup("age__lte", Value::Int(65)).unwrap(),
            f("age").lte(65)
        );
        assert_eq!(
            parse_lookup("name__ne", Value::Text("root".into())).unwrap(),
            f("name").ne("root")
        );
        assert_eq!(
            parse_lookup("age__in", Value::Array(vec![Value::Int(1), Value::Int(2)])).unwrap(),
            f("age").is_in([1i64, 2])
        );
        assert_eq!(
            parse_lookup(
                "age__between",
                Value::Array(vec![Value::Int(18), Value::Int(65)])
            )
            .unwrap(),
            f("age").between(18, 65)
        );
        assert_eq!(
            parse_lookup("email__isnull", Value::Bool(true)).unwrap(),
            f("email").is_null()
        );
        assert_eq!(
            parse_lookup("email__isnull", Value::Bool(false)).unwrap(),
            f("email").is_not_null()
        );
    }

    #[test]
    fn startswith_escapes_pattern_metacharacters() {
        assert_eq!(
            parse_lookup("sku__startswith", Value::Text("AB_1".into())).unwrap(),
            f("sku").like("AB\\_1%")
        );
        assert_eq!(
            parse_lookup("sku__endswith", Value::Text("50%".into())).unwrap(),
            f("sku").like("%50\\%")
        );
    }

    #[test]
    fn unknown_suffix_is_a_schema_error() {
        assert!(parse_lookup("age__near", Value::Int(1)).is_err());
    }

    #[test]
    fn double_underscore_in_path_keeps_last_segment_as_suffix() {
        // Only the final "__suffix" is interpreted.
        let filter = parse_lookup("meta__depth__gt", Value::Int(1)).unwrap();
        assert_eq!(filter, f("meta__depth").gt(1));
    }
}
