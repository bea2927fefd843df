//! Shared schema and row fixtures.

use polystore_core::chrono::{TimeZone, Utc};
use polystore_core::{Field, Row, Schema, TableIndex, Value, bigdecimal::BigDecimal};
use std::str::FromStr;
use std::sync::Arc;

/// A user class bound to the document/graph backend.
pub fn user_schema(backend: &str) -> Arc<Schema> {
    Schema::builder("User")
        .collection("user")
        .backend(backend)
        .field(Field::text("username").required())
        .field(Field::text("email").required())
        .field(Field::integer("age").min_value(0.0))
        .field(Field::boolean("is_active").default_fn(|| Value::Bool(true)))
        .table_index(TableIndex::on(["username"]).unique())
        .build()
        .expect("fixture schema builds")
}

/// The sales class used by the materialized-view scenarios.
pub fn sales_schema(backend: &str) -> Arc<Schema> {
    Schema::builder("SalesData")
        .collection("sales_data")
        .backend(backend)
        .engine("MergeTree")
        .order_by(["date_collected", "seller_name"])
        .field(Field::text("product_sku").required())
        .field(Field::low_cardinality("seller_name").required())
        .field(Field::low_cardinality("marketplace").required())
        .field(Field::timestamp("date_collected").required())
        .field(Field::decimal("offer_price").required())
        .field(Field::integer("quantity").default_fn(|| Value::Int(1)))
        .field(Field::boolean("is_buybox_winner").default_fn(|| Value::Bool(false)))
        .build()
        .expect("fixture schema builds")
}

fn sale(
    sku: &str,
    seller: &str,
    marketplace: &str,
    day: u32,
    price: &str,
    quantity: i64,
) -> Row {
    let mut row = Row::new();
    row.insert("product_sku".into(), Value::Text(sku.into()));
    row.insert("seller_name".into(), Value::Text(seller.into()));
    row.insert("marketplace".into(), Value::Text(marketplace.into()));
    row.insert(
        "date_collected".into(),
        Value::DateTime(Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()),
    );
    row.insert(
        "offer_price".into(),
        Value::Decimal(BigDecimal::from_str(price).expect("fixture decimal parses")),
    );
    row.insert("quantity".into(), Value::Int(quantity));
    row
}

/// Six sales across two days, three products, four sellers.
pub fn sales_rows() -> Vec<Row> {
    vec![
        sale("SKU-1", "acme", "Amazon", 1, "19.99", 1),
        sale("SKU-1", "globex", "Amazon", 1, "18.50", 2),
        sale("SKU-2", "acme", "Walmart", 1, "99.00", 1),
        sale("SKU-2", "initech", "Amazon", 2, "97.25", 1),
        sale("SKU-3", "umbrella", "eBay", 2, "5.49", 10),
        sale("SKU-3", "acme", "eBay", 2, "5.99", 3),
    ]
}
