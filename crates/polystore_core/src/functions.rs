//! Portable aggregation and scalar functions used by materialized views.
//!
//! Each backend rewrites these to its native dialect through
//! [`FunctionDialect`]; a function a backend cannot express fails at view
//! compile time, never at runtime.

use crate::error::Result;
use crate::value::Value;

/// A portable function application over a source field.
#[derive(Debug, Clone, PartialEq)]
pub enum Func {
    /// Row count.
    Count,
    Sum(String),
    Avg(String),
    Min(String),
    Max(String),
    CountDistinct(String),
    /// Truncate a timestamp to its date.
    ToDate(String),
    /// Format a timestamp as a YYYYMM bucket.
    ToYearMonth(String),
    /// Array membership test.
    Has(String, Value),
    Length(String),
    Lower(String),
    Upper(String),
    Round(String, u32),
}

impl Func {
    /// The source field this function reads, if any.
    pub fn operand(&self) -> Option<&str> {
        match self {
            Func::Count => None,
            Func::Sum(field)
            | Func::Avg(field)
            | Func::Min(field)
            | Func::Max(field)
            | Func::CountDistinct(field)
            | Func::ToDate(field)
            | Func::ToYearMonth(field)
            | Func::Has(field, _)
            | Func::Length(field)
            | Func::Lower(field)
            | Func::Upper(field)
            | Func::Round(field, _) => Some(field),
        }
    }

    /// Whether the function aggregates over a group.
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            Func::Count
                | Func::Sum(_)
                | Func::Avg(_)
                | Func::Min(_)
                | Func::Max(_)
                | Func::CountDistinct(_)
        )
    }

    /// Portable name, used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Func::Count => "Count",
            Func::Sum(_) => "Sum",
            Func::Avg(_) => "Avg",
            Func::Min(_) => "Min",
            Func::Max(_) => "Max",
            Func::CountDistinct(_) => "CountDistinct",
            Func::ToDate(_) => "ToDate",
            Func::ToYearMonth(_) => "ToYearMonth",
            Func::Has(_, _) => "Has",
            Func::Length(_) => "Length",
            Func::Lower(_) => "Lower",
            Func::Upper(_) => "Upper",
            Func::Round(_, _) => "Round",
        }
    }
}

/// Per-backend rewrite of the portable function set.
///
/// Rewriting is a syntactic translation; `render` returns the native
/// expression text for one application.
pub trait FunctionDialect: Send + Sync {
    fn render(&self, func: &Func) -> Result<String>;
}
