//! Lowering of the filter tree to per-backend predicate strings.
//!
//! Leaves go through [`Backend::build_condition`]; combinators emit
//! parenthesized strings, so the result is a native fragment the driver can
//! splice into its own query text.

use super::{Filter, Operand};
use crate::backend::Backend;
use crate::error::Result;
use crate::value::Value;

/// Compile one filter into a single native predicate string.
pub fn compile_filter(filter: &Filter, backend: &dyn Backend) -> Result<String> {
    match filter {
        Filter::Cmp { path, op, operand } => {
            let value = match operand {
                Operand::None => Value::Null,
                Operand::Value(value) => value.clone(),
                Operand::List(values) => Value::Array(values.clone()),
                Operand::Range(low, high) => Value::Array(vec![low.clone(), high.clone()]),
            };
            backend.build_condition(path, *op, &value)
        }
        Filter::Raw(fragment) => Ok(fragment.clone()),
        Filter::And(children) => {
            let parts = compile_children(children, backend)?;
            Ok(format!("({})", parts.join(" AND ")))
        }
        Filter::Or(children) => {
            let parts = compile_children(children, backend)?;
            Ok(format!("({})", parts.join(" OR ")))
        }
        Filter::Not(inner) => Ok(format!("NOT ({})", compile_filter(inner, backend)?)),
    }
}

/// Compile a top-level filter list into the implicit-conjunction form
/// `select`/`count`/`update`/`delete` take. Top-level `And`s contribute one
/// leaf string per child.
pub fn compile_conjunction(filters: &[Filter], backend: &dyn Backend) -> Result<Vec<String>> {
    let mut conditions = Vec::new();
    for filter in filters {
        match filter {
            Filter::And(children) => {
                for child in children {
                    conditions.push(compile_filter(child, backend)?);
                }
            }
            other => conditions.push(compile_filter(other, backend)?),
        }
    }
    Ok(conditions)
}

fn compile_children(children: &[Filter], backend: &dyn Backend) -> Result<Vec<String>> {
    children
        .iter()
        .map(|child| compile_filter(child, backend))
        .collect()
}
