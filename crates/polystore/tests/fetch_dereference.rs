//! Reference dereferencing on stores without joinless FETCH: one batched
//! follow-up read per referent class, merged by id.

use polystore::{Connection, Field, Row, Schema, Value, catalog, objects};
use polystore_test_support::{Call, RecordingBackend, user_schema};
use std::sync::Arc;

fn order_schema(backend: &str) -> Arc<Schema> {
    Schema::builder("Order")
        .collection("order")
        .backend(backend)
        .field(Field::text("sku").required())
        .field(Field::reference("buyer", "user"))
        .build()
        .unwrap()
}

fn order_row(id: &str, sku: &str, buyer: &str) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), Value::Text(id.into()));
    row.insert("sku".into(), Value::Text(sku.into()));
    row.insert("buyer".into(), Value::Text(buyer.into()));
    row
}

fn buyer_row(id: &str, username: &str) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), Value::Text(id.into()));
    row.insert("username".into(), Value::Text(username.into()));
    row
}

#[tokio::test]
async fn fetch_batches_one_follow_up_read_per_referent_class() {
    // The key-value fake lacks joinless dereference, forcing the batched
    // path.
    let backend = RecordingBackend::key_value().into_arc();
    let conn = Connection::new("test", backend.clone());

    catalog()
        .register_all([user_schema("fake-key-value"), order_schema("fake-key-value")])
        .unwrap();

    backend.queue_rows(
        "order",
        vec![
            order_row("o1", "SKU-1", "u1"),
            order_row("o2", "SKU-2", "u2"),
            order_row("o3", "SKU-3", "u1"),
        ],
    );
    backend.queue_rows("user", vec![buyer_row("u1", "alice"), buyer_row("u2", "bob")]);

    let orders = objects(order_schema("fake-key-value"), conn)
        .fetch(["buyer"])
        .all()
        .await
        .unwrap();

    assert_eq!(orders.len(), 3);
    match orders[0].get("buyer") {
        Some(Value::Object(buyer)) => {
            assert_eq!(buyer.get("username"), Some(&Value::Text("alice".into())));
        }
        other => panic!("expected dereferenced buyer, got {other:?}"),
    }
    match orders[1].get("buyer") {
        Some(Value::Object(buyer)) => {
            assert_eq!(buyer.get("username"), Some(&Value::Text("bob".into())));
        }
        other => panic!("expected dereferenced buyer, got {other:?}"),
    }

    // Exactly two selects: the base read plus one batched referent read
    // with a deduplicated id list.
    let selects: Vec<Call> = backend
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::Select { .. }))
        .collect();
    assert_eq!(selects.len(), 2);
    match &selects[1] {
        Call::Select {
            table, conditions, ..
        } => {
            assert_eq!(table, "user");
            assert_eq!(conditions, &vec!["id IN ('u1', 'u2')".to_string()]);
        }
        other => panic!("expected referent select, got {other:?}"),
    }
}

#[tokio::test]
async fn native_fetch_goes_through_the_select_request() {
    // The document/graph fake declares references, so the fetch list is
    // pushed down instead of batched.
    let backend = RecordingBackend::document_graph().into_arc();
    let conn = Connection::new("test", backend.clone());

    catalog()
        .register_all([
            user_schema("fake-document-graph"),
            order_schema("fake-document-graph"),
        ])
        .unwrap();

    backend.queue_rows("order", vec![order_row("o1", "SKU-1", "user:jd")]);

    objects(order_schema("fake-document-graph"), conn)
        .fetch(["buyer"])
        .all()
        .await
        .unwrap();

    let calls = backend.calls();
    assert_eq!(calls.len(), 1, "no follow-up read on native fetch");
    match &calls[0] {
        Call::Select { fetch, .. } => assert_eq!(fetch, &vec!["buyer".to_string()]),
        other => panic!("expected select, got {other:?}"),
    }
}
