mod compile;
mod lookup;

pub use compile::{compile_conjunction, compile_filter};
pub use lookup::parse_lookup;

use crate::error::{Result, StoreError};
use crate::schema::Schema;
use crate::value::Value;

/// Comparison operator of a predicate leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CondOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
    Contains,
    Like,
    ILike,
    Between,
    IsNull,
    IsNotNull,
}

impl CondOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CondOp::Eq => "=",
            CondOp::NotEq => "!=",
            CondOp::Lt => "<",
            CondOp::Lte => "<=",
            CondOp::Gt => ">",
            CondOp::Gte => ">=",
            CondOp::In => "in",
            CondOp::NotIn => "not in",
            CondOp::Contains => "contains",
            CondOp::Like => "like",
            CondOp::ILike => "ilike",
            CondOp::Between => "between",
            CondOp::IsNull => "is null",
            CondOp::IsNotNull => "is not null",
        }
    }
}

/// Right-hand side of a predicate leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Value(Value),
    List(Vec<Value>),
    Range(Value, Value),
}

/// Backend-agnostic filter tree.
///
/// Leaves compare a field path against an operand; combinators compose.
/// Adjacent `And`s flatten, so conjunction shape is canonical before
/// lowering.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Cmp {
        path: String,
        op: CondOp,
        operand: Operand,
    },
    /// Caller-supplied native fragment, passed through unvalidated.
    Raw(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn raw(fragment: impl Into<String>) -> Self {
        Filter::Raw(fragment.into())
    }

    /// Conjunction, flattening nested `And`s.
    pub fn and(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::And(mut left), Filter::And(right)) => {
                left.extend(right);
                Filter::And(left)
            }
            (Filter::And(mut left), right) => {
                left.push(right);
                Filter::And(left)
            }
            (left, Filter::And(mut right)) => {
                right.insert(0, left);
                Filter::And(right)
            }
            (left, right) => Filter::And(vec![left, right]),
        }
    }

    pub fn or(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::Or(mut left), Filter::Or(right)) => {
                left.extend(right);
                Filter::Or(left)
            }
            (Filter::Or(mut left), right) => {
                left.push(right);
                Filter::Or(left)
            }
            (left, right) => Filter::Or(vec![left, right]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Filter {
        Filter::Not(Box::new(self))
    }

    /// A predicate is well-formed iff every field path resolves against the
    /// schema. `Raw` fragments are exempt.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        match self {
            Filter::Cmp { path, .. } => {
                let head = path.split('.').next().unwrap_or(path);
                if head == schema.id_field() {
                    return Ok(());
                }
                schema.require_field(head).map(|_| ())
            }
            Filter::Raw(_) => Ok(()),
            Filter::And(children) | Filter::Or(children) => {
                children.iter().try_for_each(|child| child.validate(schema))
            }
            Filter::Not(inner) => inner.validate(schema),
        }
    }
}

/// Field handle for the expression-style query syntax.
///
/// `f("age").gt(30)` and the named lookup `"age__gt"` reduce to the same
/// tree before lowering.
#[derive(Debug, Clone)]
pub struct FieldRef {
    path: String,
}

/// Entry point for expression-style predicates.
pub fn f(path: impl Into<String>) -> FieldRef {
    FieldRef { path: path.into() }
}

impl FieldRef {
    fn cmp(self, op: CondOp, operand: Operand) -> Filter {
        Filter::Cmp {
            path: self.path,
            op,
            operand,
        }
    }

    pub fn eq(self, value: impl Into<Value>) -> Filter {
        self.cmp(CondOp::Eq, Operand::Value(value.into()))
    }

    pub fn ne(self, value: impl Into<Value>) -> Filter {
        self.cmp(CondOp::NotEq, Operand::Value(value.into()))
    }

    pub fn lt(self, value: impl Into<Value>) -> Filter {
        self.cmp(CondOp::Lt, Operand::Value(value.into()))
    }

    pub fn lte(self, value: impl Into<Value>) -> Filter {
        self.cmp(CondOp::Lte, Operand::Value(value.into()))
    }

    pub fn gt(self, value: impl Into<Value>) -> Filter {
        self.cmp(CondOp::Gt, Operand::Value(value.into()))
    }

    pub fn gte(self, value: impl Into<Value>) -> Filter {
        self.cmp(CondOp::Gte, Operand::Value(value.into()))
    }

    pub fn is_in<I, V>(self, values: I) -> Filter
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.cmp(
            CondOp::In,
            Operand::List(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn not_in<I, V>(self, values: I) -> Filter
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.cmp(
            CondOp::NotIn,
            Operand::List(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn contains(self, value: impl Into<Value>) -> Filter {
        self.cmp(CondOp::Contains, Operand::Value(value.into()))
    }

    pub fn like(self, pattern: impl Into<String>) -> Filter {
        self.cmp(CondOp::Like, Operand::Value(Value::Text(pattern.into())))
    }

    pub fn ilike(self, pattern: impl Into<String>) -> Filter {
        self.cmp(CondOp::ILike, Operand::Value(Value::Text(pattern.into())))
    }

    pub fn between(self, low: impl Into<Value>, high: impl Into<Value>) -> Filter {
        self.cmp(CondOp::Between, Operand::Range(low.into(), high.into()))
    }

    pub fn is_null(self) -> Filter {
        self.cmp(CondOp::IsNull, Operand::None)
    }

    pub fn is_not_null(self) -> Filter {
        self.cmp(CondOp::IsNotNull, Operand::None)
    }
}

/// Sort direction for order-by clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        }
    }
}

/// Column with direction for order-by clauses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// The full shape of a read: filter, ordering, pagination, projection, and
/// reference fields to dereference inline.
#[derive(Debug, Clone, Default)]
pub struct QueryExpression {
    pub filter: Option<Filter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub projection: Vec<String>,
    pub fetch: Vec<String>,
}

impl QueryExpression {
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        if let Some(filter) = &self.filter {
            filter.validate(schema)?;
        }
        for order in &self.order_by {
            if order.field != schema.id_field() {
                schema.require_field(&order.field)?;
            }
        }
        for projected in &self.projection {
            if projected != schema.id_field() {
                schema.require_field(projected)?;
            }
        }
        for fetched in &self.fetch {
            let field = schema.require_field(fetched)?;
            if !matches!(field.kind, crate::fields::FieldKind::Reference { .. }) {
                return Err(StoreError::schema(format!(
                    "fetch target '{fetched}' on '{}' is not a reference field",
                    schema.collection()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Field;

    fn schema() -> std::sync::Arc<Schema> {
        Schema::builder("User")
            .field(Field::text("username").required())
            .field(Field::integer("age"))
            .field(Field::boolean("is_active"))
            .field(Field::reference("manager", "user"))
            .build()
            .unwrap()
    }

    #[test]
    fn adjacent_ands_flatten() {
        let filter = f("age")
            .gt(30)
            .and(f("is_active").eq(true))
            .and(f("username").ne("root"));

        match filter {
            Filter::And(children) => assert_eq!(children.len(), 3),
            other => panic!("expected flattened And, got {other:?}"),
        }
    }

    #[test]
    fn unknown_field_fails_validation() {
        let schema = schema();
        assert!(f("age").gt(30).validate(&schema).is_ok());
        assert!(f("missing").eq(1).validate(&schema).is_err());
        // Raw fragments are exempt.
        assert!(Filter::raw("true").validate(&schema).is_ok());
    }

    #[test]
    fn id_path_is_always_well_formed() {
        let schema = schema();
        assert!(f("id").eq("user:1").validate(&schema).is_ok());
    }

    #[test]
    fn fetch_must_name_reference_fields() {
        let schema = schema();
        let ok = QueryExpression {
            fetch: vec!["manager".to_string()],
            ..Default::default()
        };
        assert!(ok.validate(&schema).is_ok());

        let bad = QueryExpression {
            fetch: vec!["age".to_string()],
            ..Default::default()
        };
        assert!(bad.validate(&schema).is_err());
    }
}
