mod convert;

pub use convert::{from_db, to_db};

use crate::error::{Result, StoreError};
use crate::value::Value;
use regex::Regex;
use std::str::FromStr;
use uuid::Uuid;

/// Semantic type of a field.
///
/// The columnar variants (`LowCardinality`, `FixedLength`, `Enum`,
/// `Compressed`) carry their own native type rendering on the columnar
/// backend and degrade to plain text elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Boolean,
    Decimal {
        precision: Option<u32>,
        scale: Option<u32>,
    },
    Timestamp,
    Uuid,
    /// Mapping of string keys to values.
    Object,
    /// Sequence with a typed element.
    Array(Box<FieldKind>),
    /// Link to another document class, resolved by collection name.
    Reference {
        target: String,
    },
    /// Record identifier.
    Id,
    /// Dictionary-encoded text for low-cardinality columns.
    LowCardinality {
        base: Box<FieldKind>,
    },
    /// Text of exactly N bytes.
    FixedLength(usize),
    /// Closed set of labels with integer codes.
    Enum(Vec<(String, i16)>),
    /// Text stored with a compression codec.
    Compressed {
        base: Box<FieldKind>,
        codec: String,
    },
}

impl FieldKind {
    /// The scalar kind constraints apply to, unwrapping columnar wrappers.
    pub fn scalar(&self) -> &FieldKind {
        match self {
            FieldKind::LowCardinality { base } | FieldKind::Compressed { base, .. } => {
                base.scalar()
            }
            other => other,
        }
    }

    pub fn is_timestamp(&self) -> bool {
        matches!(self.scalar(), FieldKind::Timestamp)
    }

    pub fn is_textual(&self) -> bool {
        matches!(
            self.scalar(),
            FieldKind::Text | FieldKind::FixedLength(_) | FieldKind::Enum(_)
        )
    }

    pub fn is_low_cardinality(&self) -> bool {
        matches!(self, FieldKind::LowCardinality { .. })
            || matches!(self, FieldKind::Compressed { base, .. } if base.is_low_cardinality())
    }
}

/// Default value for a field: either a literal or a zero-argument producer.
#[derive(Debug, Clone, Copy)]
pub enum FieldDefault {
    Literal(&'static str),
    Producer(fn() -> Value),
}

/// Declared constraints checked after coercion.
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub choices: Option<Vec<Value>>,
    pub pattern: Option<String>,
}

/// Secondary-index kind.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexKind {
    /// Ordered index (btree-like).
    BTree,
    /// Bloom skip-index with a false-positive rate.
    Bloom { false_positive_rate: f64 },
    /// Set skip-index bounded by a value count.
    Set { max_values: u32 },
    /// Min/max skip-index.
    MinMax,
    /// Backend-specific index type used verbatim.
    Custom(String),
}

/// Declared index on a single field.
#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub name: Option<String>,
    pub kind: IndexKind,
    pub granularity: u32,
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(kind: IndexKind) -> Self {
        Self {
            name: None,
            kind,
            granularity: 3,
            unique: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn granularity(mut self, granularity: u32) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Typed field descriptor.
///
/// Constructed at schema definition and read-only afterwards; instances
/// carry per-document values, never per-field state.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub db_name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub default: Option<FieldDefault>,
    pub constraints: Constraints,
    pub indexes: Vec<IndexSpec>,
    /// Columnar MATERIALIZED column expression; excluded from inserts and
    /// order-by inference.
    pub materialized: Option<String>,
    /// Opt into silent float conversion on floating-only backends instead of
    /// the text fallback.
    pub lossy_decimal: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            db_name: name.clone(),
            name,
            kind,
            required: false,
            default: None,
            constraints: Constraints::default(),
            indexes: Vec::new(),
            materialized: None,
            lossy_decimal: false,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn decimal(name: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Decimal {
                precision: None,
                scale: None,
            },
        )
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Timestamp)
    }

    pub fn uuid(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Uuid)
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Object)
    }

    pub fn array(name: impl Into<String>, element: FieldKind) -> Self {
        Self::new(name, FieldKind::Array(Box::new(element)))
    }

    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Reference {
                target: target.into(),
            },
        )
    }

    pub fn id(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Id)
    }

    pub fn low_cardinality(name: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::LowCardinality {
                base: Box::new(FieldKind::Text),
            },
        )
    }

    pub fn fixed_length(name: impl Into<String>, length: usize) -> Self {
        Self::new(name, FieldKind::FixedLength(length))
    }

    pub fn enumeration<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = (S, i16)>,
        S: Into<String>,
    {
        Self::new(
            name,
            FieldKind::Enum(values.into_iter().map(|(s, c)| (s.into(), c)).collect()),
        )
    }

    pub fn compressed(name: impl Into<String>, codec: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Compressed {
                base: Box::new(FieldKind::Text),
                codec: codec.into(),
            },
        )
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn db_name(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = db_name.into();
        self
    }

    pub fn default_literal(mut self, literal: &'static str) -> Self {
        self.default = Some(FieldDefault::Literal(literal));
        self
    }

    pub fn default_fn(mut self, producer: fn() -> Value) -> Self {
        self.default = Some(FieldDefault::Producer(producer));
        self
    }

    pub fn choices<I, V>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.constraints.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    pub fn min_value(mut self, min: f64) -> Self {
        self.constraints.min_value = Some(min);
        self
    }

    pub fn max_value(mut self, max: f64) -> Self {
        self.constraints.max_value = Some(max);
        self
    }

    pub fn min_length(mut self, min: usize) -> Self {
        self.constraints.min_length = Some(min);
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.constraints.max_length = Some(max);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.constraints.pattern = Some(pattern.into());
        self
    }

    pub fn index(mut self, spec: IndexSpec) -> Self {
        self.indexes.push(spec);
        self
    }

    pub fn materialized(mut self, expression: impl Into<String>) -> Self {
        self.materialized = Some(expression.into());
        self
    }

    pub fn lossy_decimal(mut self) -> Self {
        self.lossy_decimal = true;
        self
    }

    pub fn decimal_precision(mut self, precision: u32, scale: u32) -> Self {
        if let FieldKind::Decimal {
            precision: p,
            scale: s,
        } = &mut self.kind
        {
            *p = Some(precision);
            *s = Some(scale);
        }
        self
    }

    /// Produce the effective default value, if one is declared.
    pub fn default_value(&self) -> Option<Value> {
        match self.default {
            Some(FieldDefault::Literal(text)) => Some(Value::Text(text.to_string())),
            Some(FieldDefault::Producer(producer)) => Some(producer()),
            None => None,
        }
    }

    /// Coerce a raw value to the canonical representation and enforce
    /// declared constraints.
    ///
    /// Required fields fail on null; nullable fields pass null through
    /// untouched.
    pub fn validate(&self, value: Value) -> Result<Value> {
        if value.is_null() {
            if self.required {
                return Err(StoreError::validation(&self.name, "value is required"));
            }
            return Ok(Value::Null);
        }

        let coerced = coerce(&self.kind, value)
            .map_err(|message| StoreError::validation(&self.name, message))?;

        self.check_constraints(&coerced)?;
        Ok(coerced)
    }

    fn check_constraints(&self, value: &Value) -> Result<()> {
        let constraints = &self.constraints;

        if let FieldKind::FixedLength(length) = self.kind.scalar()
            && let Value::Text(text) = value
            && text.chars().count() != *length
        {
            return Err(StoreError::validation(
                &self.name,
                format!(
                    "requires exactly {length} characters, got {}",
                    text.chars().count()
                ),
            ));
        }

        if let Some(choices) = &constraints.choices
            && !choices.contains(value)
        {
            let rendered: Vec<String> = choices.iter().map(|c| format!("'{c}'")).collect();
            return Err(StoreError::validation(
                &self.name,
                format!("value '{value}' must be one of: {}", rendered.join(", ")),
            ));
        }

        if let Some(numeric) = value.as_f64().or_else(|| match value {
            Value::Decimal(d) => bigdecimal::ToPrimitive::to_f64(d),
            _ => None,
        }) {
            if let Some(min) = constraints.min_value
                && numeric < min
            {
                return Err(StoreError::validation(
                    &self.name,
                    format!("value {numeric} is below the minimum {min}"),
                ));
            }
            if let Some(max) = constraints.max_value
                && numeric > max
            {
                return Err(StoreError::validation(
                    &self.name,
                    format!("value {numeric} is above the maximum {max}"),
                ));
            }
        }

        if let Value::Text(text) = value {
            let chars = text.chars().count();
            if let Some(min) = constraints.min_length
                && chars < min
            {
                return Err(StoreError::validation(
                    &self.name,
                    format!("length {chars} is below the minimum {min}"),
                ));
            }
            if let Some(max) = constraints.max_length
                && chars > max
            {
                return Err(StoreError::validation(
                    &self.name,
                    format!("length {chars} is above the maximum {max}"),
                ));
            }
            if let Some(pattern) = &constraints.pattern {
                let regex = Regex::new(pattern).map_err(|e| {
                    StoreError::validation(&self.name, format!("invalid pattern: {e}"))
                })?;
                if !regex.is_match(text) {
                    return Err(StoreError::validation(
                        &self.name,
                        format!("value '{text}' does not match pattern '{pattern}'"),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Coerce a value to a field kind. Returns the failure reason on mismatch.
fn coerce(kind: &FieldKind, value: Value) -> std::result::Result<Value, String> {
    match kind {
        FieldKind::Text | FieldKind::FixedLength(_) => match value {
            Value::Text(_) => Ok(value),
            Value::Uuid(u) => Ok(Value::Text(u.to_string())),
            other => Err(format!("expected text, got {other:?}")),
        },
        FieldKind::Integer => match value {
            Value::Int(_) => Ok(value),
            Value::Float(f) if f.fract() == 0.0 => Ok(Value::Int(f as i64)),
            Value::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| format!("'{s}' is not an integer")),
            other => Err(format!("expected integer, got {other:?}")),
        },
        FieldKind::Float => match value {
            Value::Float(_) => Ok(value),
            Value::Int(i) => Ok(Value::Float(i as f64)),
            Value::Decimal(d) => bigdecimal::ToPrimitive::to_f64(&d)
                .map(Value::Float)
                .ok_or_else(|| "decimal out of float range".to_string()),
            Value::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| format!("'{s}' is not a number")),
            other => Err(format!("expected float, got {other:?}")),
        },
        FieldKind::Boolean => match value {
            Value::Bool(_) => Ok(value),
            Value::Int(0) => Ok(Value::Bool(false)),
            Value::Int(1) => Ok(Value::Bool(true)),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(format!("'{s}' is not a boolean")),
            },
            other => Err(format!("expected boolean, got {other:?}")),
        },
        FieldKind::Decimal { .. } => value
            .parse_decimal()
            .map(Value::Decimal)
            .ok_or_else(|| "not a decimal value".to_string()),
        FieldKind::Timestamp => value
            .parse_datetime()
            .map(Value::DateTime)
            .ok_or_else(|| "not a timestamp".to_string()),
        FieldKind::Uuid => match value {
            Value::Uuid(_) => Ok(value),
            Value::Text(s) => Uuid::from_str(s.trim())
                .map(Value::Uuid)
                .map_err(|_| format!("'{s}' is not a UUID")),
            other => Err(format!("expected UUID, got {other:?}")),
        },
        FieldKind::Object => match value {
            Value::Object(_) => Ok(value),
            Value::Text(s) => serde_json::from_str::<serde_json::Value>(&s)
                .ok()
                .filter(serde_json::Value::is_object)
                .map(Value::from_json)
                .ok_or_else(|| "not a mapping".to_string()),
            other => Err(format!("expected mapping, got {other:?}")),
        },
        FieldKind::Array(element) => match value {
            Value::Array(items) => {
                let coerced: std::result::Result<Vec<Value>, String> = items
                    .into_iter()
                    .map(|item| coerce(element, item))
                    .collect();
                Ok(Value::Array(coerced?))
            }
            other => Err(format!("expected sequence, got {other:?}")),
        },
        FieldKind::Reference { .. } => match value {
            Value::Text(_) | Value::Object(_) => Ok(value),
            other => Err(format!("expected record id or document, got {other:?}")),
        },
        FieldKind::Id => match value {
            Value::Text(_) | Value::Int(_) => Ok(value),
            Value::Uuid(u) => Ok(Value::Text(u.to_string())),
            other => Err(format!("expected identifier, got {other:?}")),
        },
        FieldKind::LowCardinality { base } | FieldKind::Compressed { base, .. } => {
            coerce(base, value)
        }
        FieldKind::Enum(values) => match value {
            Value::Text(label) => {
                if values.iter().any(|(l, _)| l == &label) {
                    Ok(Value::Text(label))
                } else {
                    let valid: Vec<String> =
                        values.iter().map(|(l, _)| format!("'{l}'")).collect();
                    Err(format!(
                        "value '{label}' must be one of: {}",
                        valid.join(", ")
                    ))
                }
            }
            Value::Int(code) => values
                .iter()
                .find(|(_, c)| i64::from(*c) == code)
                .map(|(l, _)| Value::Text(l.clone()))
                .ok_or_else(|| format!("{code} is not a declared enum code")),
            other => Err(format!("expected enum label, got {other:?}")),
        },
    }
}
