//! Parsing and in-memory evaluation of predicate fragments.
//!
//! The store has no query language, so `build_condition` emits a canonical
//! `field op <json>` form and the driver evaluates it against decoded rows
//! (scan + in-memory compare). Combinator groups arrive parenthesized with
//! `AND` / `OR` / `NOT (...)`.

use polystore_core::{CondOp, Result, Row, StoreError, Value};
use std::cmp::Ordering;

/// Parsed predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Const(bool),
    Leaf {
        field: String,
        op: CondOp,
        value: Value,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

/// Parse an implicit conjunction of condition fragments.
pub fn parse_conditions(conditions: &[String]) -> Result<Predicate> {
    let parsed: Result<Vec<Predicate>> =
        conditions.iter().map(|c| parse_expression(c)).collect();
    let mut parsed = parsed?;
    Ok(match parsed.len() {
        0 => Predicate::Const(true),
        1 => parsed.remove(0),
        _ => Predicate::And(parsed),
    })
}

fn parse_expression(input: &str) -> Result<Predicate> {
    let input = input.trim();
    match input {
        "true" => return Ok(Predicate::Const(true)),
        "false" => return Ok(Predicate::Const(false)),
        _ => {}
    }

    if let Some(rest) = input.strip_prefix("NOT ") {
        let rest = rest.trim();
        let inner = rest
            .strip_prefix('(')
            .and_then(|r| r.strip_suffix(')'))
            .unwrap_or(rest);
        return Ok(Predicate::Not(Box::new(parse_expression(inner)?)));
    }

    if input.starts_with('(') && closing_paren(input) == Some(input.len() - 1) {
        let inner = &input[1..input.len() - 1];
        let or_parts = split_top_level(inner, " OR ");
        if or_parts.len() > 1 {
            let children: Result<Vec<Predicate>> =
                or_parts.iter().map(|p| parse_expression(p)).collect();
            return Ok(Predicate::Or(children?));
        }
        let and_parts = split_top_level(inner, " AND ");
        if and_parts.len() > 1 {
            let children: Result<Vec<Predicate>> =
                and_parts.iter().map(|p| parse_expression(p)).collect();
            return Ok(Predicate::And(children?));
        }
        return parse_expression(inner);
    }

    parse_leaf(input)
}

/// Index of the parenthesis closing the one at position 0, skipping string
/// literals.
fn closing_paren(input: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (index, ch) in input.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on a separator at parenthesis depth zero, outside string literals.
fn split_top_level<'a>(input: &'a str, separator: &str) -> Vec<&'a str> {
    let bytes = input.as_bytes();
    let sep = separator.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0usize;
    let mut index = 0usize;

    while index < bytes.len() {
        let byte = bytes[index];
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            index += 1;
            continue;
        }
        match byte {
            b'"' => {
                in_string = true;
                index += 1;
            }
            b'(' => {
                depth += 1;
                index += 1;
            }
            b')' => {
                depth = depth.saturating_sub(1);
                index += 1;
            }
            _ if depth == 0 && bytes[index..].starts_with(sep) => {
                parts.push(&input[start..index]);
                index += sep.len();
                start = index;
            }
            _ => index += 1,
        }
    }
    parts.push(&input[start..]);
    parts
}

const OPERATORS: &[(&str, CondOp)] = &[
    ("is not null", CondOp::IsNotNull),
    ("is null", CondOp::IsNull),
    ("not in", CondOp::NotIn),
    ("between", CondOp::Between),
    ("contains", CondOp::Contains),
    ("ilike", CondOp::ILike),
    ("like", CondOp::Like),
    ("in", CondOp::In),
    (">=", CondOp::Gte),
    ("<=", CondOp::Lte),
    ("!=", CondOp::NotEq),
    ("=", CondOp::Eq),
    (">", CondOp::Gt),
    ("<", CondOp::Lt),
];

fn parse_leaf(input: &str) -> Result<Predicate> {
    let (field, rest) = input.split_once(' ').ok_or_else(|| {
        StoreError::schema(format!("unparseable key-value predicate '{input}'"))
    })?;
    let rest = rest.trim();

    for (token, op) in OPERATORS {
        let Some(after) = rest.strip_prefix(token) else {
            continue;
        };
        if !after.is_empty() && !after.starts_with(' ') {
            continue;
        }
        let value = match op {
            CondOp::IsNull | CondOp::IsNotNull => Value::Null,
            _ => {
                let raw = after.trim();
                let json: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
                    StoreError::schema(format!(
                        "unparseable operand in predicate '{input}': {e}"
                    ))
                })?;
                Value::from_json(json)
            }
        };
        return Ok(Predicate::Leaf {
            field: field.to_string(),
            op: *op,
            value,
        });
    }

    Err(StoreError::schema(format!(
        "unknown operator in key-value predicate '{input}'"
    )))
}

/// Evaluate a predicate against a decoded row.
pub fn evaluate(predicate: &Predicate, row: &Row) -> bool {
    match predicate {
        Predicate::Const(value) => *value,
        Predicate::And(children) => children.iter().all(|child| evaluate(child, row)),
        Predicate::Or(children) => children.iter().any(|child| evaluate(child, row)),
        Predicate::Not(inner) => !evaluate(inner, row),
        Predicate::Leaf { field, op, value } => {
            let stored = row.get(field.as_str());
            match op {
                CondOp::IsNull => stored.is_none_or(Value::is_null),
                CondOp::IsNotNull => stored.is_some_and(|v| !v.is_null()),
                _ => {
                    let Some(stored) = stored.filter(|v| !v.is_null()) else {
                        return false;
                    };
                    evaluate_leaf(stored, *op, value)
                }
            }
        }
    }
}

fn evaluate_leaf(stored: &Value, op: CondOp, expected: &Value) -> bool {
    match op {
        CondOp::Eq => values_equal(stored, expected),
        CondOp::NotEq => !values_equal(stored, expected),
        CondOp::Lt => compare(stored, expected) == Some(Ordering::Less),
        CondOp::Lte => matches!(
            compare(stored, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        CondOp::Gt => compare(stored, expected) == Some(Ordering::Greater),
        CondOp::Gte => matches!(
            compare(stored, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        CondOp::In => match expected {
            Value::Array(items) => items.iter().any(|item| values_equal(stored, item)),
            _ => false,
        },
        CondOp::NotIn => match expected {
            Value::Array(items) => !items.iter().any(|item| values_equal(stored, item)),
            _ => true,
        },
        CondOp::Contains => match (stored, expected) {
            (Value::Text(text), Value::Text(needle)) => text.contains(needle),
            (Value::Array(items), needle) => {
                items.iter().any(|item| values_equal(item, needle))
            }
            _ => false,
        },
        CondOp::Like => match (stored, expected) {
            (Value::Text(text), Value::Text(pattern)) => like_match(text, pattern, false),
            _ => false,
        },
        CondOp::ILike => match (stored, expected) {
            (Value::Text(text), Value::Text(pattern)) => like_match(text, pattern, true),
            _ => false,
        },
        CondOp::Between => match expected {
            Value::Array(bounds) if bounds.len() == 2 => {
                matches!(
                    compare(stored, &bounds[0]),
                    Some(Ordering::Greater | Ordering::Equal)
                ) && matches!(
                    compare(stored, &bounds[1]),
                    Some(Ordering::Less | Ordering::Equal)
                )
            }
            _ => false,
        },
        CondOp::IsNull | CondOp::IsNotNull => false,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    compare(left, right) == Some(Ordering::Equal)
}

/// Ordered comparison with numeric normalization: text decimals and
/// epoch-millis timestamps compare by value, not lexically.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (left.parse_decimal(), right.parse_decimal()) {
        return Some(a.cmp(&b));
    }
    if let (Some(a), Some(b)) = (left.parse_datetime(), right.parse_datetime()) {
        return Some(a.cmp(&b));
    }
    match (left, right) {
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// SQL LIKE semantics: `%` matches any run, `_` one character, backslash
/// escapes both.
fn like_match(text: &str, pattern: &str, case_fold: bool) -> bool {
    let text: Vec<char> = if case_fold {
        text.to_lowercase().chars().collect()
    } else {
        text.chars().collect()
    };
    let pattern: Vec<char> = if case_fold {
        pattern.to_lowercase().chars().collect()
    } else {
        pattern.chars().collect()
    };
    like_match_at(&text, 0, &pattern, 0)
}

fn like_match_at(text: &[char], ti: usize, pattern: &[char], pi: usize) -> bool {
    if pi == pattern.len() {
        return ti == text.len();
    }
    match pattern[pi] {
        '%' => {
            (ti..=text.len()).any(|next| like_match_at(text, next, pattern, pi + 1))
        }
        '_' => ti < text.len() && like_match_at(text, ti + 1, pattern, pi + 1),
        '\\' if pi + 1 < pattern.len() => {
            ti < text.len()
                && text[ti] == pattern[pi + 1]
                && like_match_at(text, ti + 1, pattern, pi + 2)
        }
        ch => ti < text.len() && text[ti] == ch && like_match_at(text, ti + 1, pattern, pi + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn parses_and_evaluates_simple_comparisons() {
        let predicate = parse_conditions(&["age > 30".to_string()]).unwrap();
        assert!(evaluate(&predicate, &row(&[("age", Value::Int(31))])));
        assert!(!evaluate(&predicate, &row(&[("age", Value::Int(30))])));
        assert!(!evaluate(&predicate, &row(&[])));
    }

    #[test]
    fn conjunction_of_fragments() {
        let predicate = parse_conditions(&[
            "age >= 21".to_string(),
            "is_active = true".to_string(),
        ])
        .unwrap();
        assert!(evaluate(
            &predicate,
            &row(&[("age", Value::Int(30)), ("is_active", Value::Bool(true))])
        ));
        assert!(!evaluate(
            &predicate,
            &row(&[("age", Value::Int(30)), ("is_active", Value::Bool(false))])
        ));
    }

    #[test]
    fn parses_parenthesized_or_groups() {
        let predicate =
            parse_conditions(&["(age > 60 OR name = \"root\")".to_string()]).unwrap();
        assert!(evaluate(&predicate, &row(&[("age", Value::Int(70))])));
        assert!(evaluate(
            &predicate,
            &row(&[("age", Value::Int(20)), ("name", Value::Text("root".into()))])
        ));
        assert!(!evaluate(&predicate, &row(&[("age", Value::Int(20))])));
    }

    #[test]
    fn parses_not_groups() {
        let predicate = parse_conditions(&["NOT (age > 30)".to_string()]).unwrap();
        assert!(evaluate(&predicate, &row(&[("age", Value::Int(20))])));
        assert!(!evaluate(&predicate, &row(&[("age", Value::Int(40))])));
    }

    #[test]
    fn string_operands_keep_embedded_keywords() {
        let predicate =
            parse_conditions(&["name = \"a AND b ( OR )\"".to_string()]).unwrap();
        assert!(evaluate(
            &predicate,
            &row(&[("name", Value::Text("a AND b ( OR )".into()))])
        ));
    }

    #[test]
    fn numeric_text_compares_by_value() {
        let predicate = parse_conditions(&["price > \"9.5\"".to_string()]).unwrap();
        assert!(evaluate(
            &predicate,
            &row(&[("price", Value::Text("10".into()))])
        ));
    }

    #[test]
    fn between_and_membership() {
        let between = parse_conditions(&["age between [18,65]".to_string()]).unwrap();
        assert!(evaluate(&between, &row(&[("age", Value::Int(40))])));
        assert!(!evaluate(&between, &row(&[("age", Value::Int(70))])));

        // Inverted bounds match nothing.
        let inverted = parse_conditions(&["age between [65,18]".to_string()]).unwrap();
        assert!(!evaluate(&inverted, &row(&[("age", Value::Int(40))])));

        let membership = parse_conditions(&["tag in [\"a\",\"b\"]".to_string()]).unwrap();
        assert!(evaluate(&membership, &row(&[("tag", Value::Text("a".into()))])));
        assert!(!evaluate(&membership, &row(&[("tag", Value::Text("c".into()))])));
    }

    #[test]
    fn like_patterns() {
        let starts = parse_conditions(&["sku like \"AB%\"".to_string()]).unwrap();
        assert!(evaluate(&starts, &row(&[("sku", Value::Text("AB123".into()))])));
        assert!(!evaluate(&starts, &row(&[("sku", Value::Text("XAB".into()))])));

        let fold = parse_conditions(&["sku ilike \"ab%\"".to_string()]).unwrap();
        assert!(evaluate(&fold, &row(&[("sku", Value::Text("AB123".into()))])));

        // Escaped underscore is literal.
        let escaped = parse_conditions(&["sku like \"AB\\\\_1%\"".to_string()]).unwrap();
        assert!(evaluate(&escaped, &row(&[("sku", Value::Text("AB_123".into()))])));
        assert!(!evaluate(&escaped, &row(&[("sku", Value::Text("ABX123".into()))])));
    }

    #[test]
    fn null_checks_treat_missing_as_null() {
        let is_null = parse_conditions(&["email is null".to_string()]).unwrap();
        assert!(evaluate(&is_null, &row(&[])));
        assert!(evaluate(&is_null, &row(&[("email", Value::Null)])));
        assert!(!evaluate(
            &is_null,
            &row(&[("email", Value::Text("x@y.z".into()))])
        ));
    }

    #[test]
    fn array_contains_membership() {
        let predicate = parse_conditions(&["tags contains \"rust\"".to_string()]).unwrap();
        assert!(evaluate(
            &predicate,
            &row(&[(
                "tags",
                Value::Array(vec![Value::Text("rust".into()), Value::Text("db".into())])
            )])
        ));
    }

    #[test]
    fn empty_in_constants() {
        let never = parse_conditions(&["false".to_string()]).unwrap();
        assert!(!evaluate(&never, &row(&[("age", Value::Int(1))])));

        let always = parse_conditions(&["true".to_string()]).unwrap();
        assert!(evaluate(&always, &row(&[])));
    }
}
