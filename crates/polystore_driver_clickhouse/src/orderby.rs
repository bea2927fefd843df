//! ORDER BY inference for tables declared without one.
//!
//! The MergeTree family requires an ORDER BY clause, but analytical schemas
//! rarely need an artificial id for it. The inference is a pure function of
//! the declared fields, so repeated DDL generation is deterministic.

use polystore_core::{Field, Schema};

const TIME_KEYWORDS: &[&str] = &["created", "updated", "collected", "time", "date"];
const CATEGORICAL_KEYWORDS: &[&str] = &[
    "id", "key", "name", "code", "type", "category", "brand", "seller",
];

fn contains_keyword(name: &str, keywords: &[&str]) -> bool {
    let lower = name.to_lowercase();
    keywords.iter().any(|keyword| lower.contains(keyword))
}

fn is_categorical(field: &Field) -> bool {
    field.required && field.kind.is_textual() && contains_keyword(&field.name, CATEGORICAL_KEYWORDS)
}

/// Pick an ORDER BY for a schema that declares none.
///
/// Priority: a required timestamp (keyword-named first) plus one required
/// categorical field; else up to two categoricals (low-cardinality
/// preferred); else any required field; else the first few fields as a
/// documented synthetic ordering.
pub fn infer_order_by(schema: &Schema) -> Vec<String> {
    let candidates: Vec<&Field> = schema
        .fields()
        .filter(|field| field.materialized.is_none())
        .collect();

    let timestamp = candidates
        .iter()
        .find(|field| {
            field.required
                && field.kind.is_timestamp()
                && contains_keyword(&field.name, TIME_KEYWORDS)
        })
        .or_else(|| {
            candidates
                .iter()
                .find(|field| field.required && field.kind.is_timestamp())
        });

    let mut categoricals: Vec<&&Field> = candidates.iter().filter(|f| is_categorical(f)).collect();
    // Dictionary-encoded columns sort cheaper, so they win ties.
    categoricals.sort_by_key(|field| if field.kind.is_low_cardinality() { 0 } else { 1 });

    let mut order_by: Vec<String> = Vec::new();
    if let Some(timestamp) = timestamp {
        order_by.push(timestamp.name.clone());
        if let Some(best) = categoricals.first() {
            order_by.push(best.name.clone());
        }
    } else if !categoricals.is_empty() {
        for field in categoricals.iter().take(2) {
            order_by.push(field.name.clone());
        }
    } else if let Some(required) = candidates.iter().find(|field| field.required) {
        order_by.push(required.name.clone());
    }

    if order_by.is_empty() {
        log::warn!(
            "no suitable ORDER BY fields on '{}'; falling back to a synthetic ordering \
             over the first declared fields (declare order_by explicitly to silence this)",
            schema.collection()
        );
        order_by = candidates
            .iter()
            .take(3)
            .map(|field| field.name.clone())
            .collect();
        if order_by.is_empty() {
            order_by.push("tuple()".to_string());
        }
    }

    order_by
}
