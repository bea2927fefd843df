//! Transport-failure recovery: a caller-level retry wrapper re-runs
//! idempotent operations while the pool replaces the bad connection.

use polystore::{
    Connection, RetryConfig, RetryPolicy, StoreError, objects,
};
use polystore_test_support::{RecordingBackend, user_schema};
use std::time::Duration;

fn fast_retry(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(RetryConfig {
        attempts,
        base_delay: Duration::from_millis(1),
        backoff_factor: 2.0,
        max_delay: Duration::from_millis(4),
    })
}

#[tokio::test]
async fn count_wrapped_in_retry_survives_one_transport_fault() {
    let backend = RecordingBackend::document_graph().into_arc();
    let conn = Connection::new("test", backend.clone());
    let schema = user_schema("fake-document-graph");

    backend.queue_error(StoreError::transport("connection reset by peer"));
    backend.queue_count("user", 4);

    let queryset = objects(schema, conn);
    let count = fast_retry(2)
        .run(|| {
            let queryset = queryset.clone();
            async move { queryset.count().await }
        })
        .await
        .unwrap();

    assert_eq!(count, 4);
    // Both attempts reached the backend.
    assert_eq!(backend.calls().len(), 2);
}

#[tokio::test]
async fn non_idempotent_style_errors_are_not_retried() {
    let backend = RecordingBackend::document_graph().into_arc();
    let conn = Connection::new("test", backend.clone());
    let schema = user_schema("fake-document-graph");

    backend.queue_error(StoreError::Conflict("duplicate username".into()));

    let queryset = objects(schema, conn);
    let result = fast_retry(3)
        .run(|| {
            let queryset = queryset.clone();
            async move { queryset.count().await }
        })
        .await;

    assert!(matches!(result, Err(StoreError::Conflict(_))));
    assert_eq!(backend.calls().len(), 1);
}

#[tokio::test]
async fn deadline_cancels_slow_operations() {
    let backend = RecordingBackend::document_graph()
        .with_latency(Duration::from_millis(250))
        .into_arc();
    let conn = Connection::new("test", backend);
    let schema = user_schema("fake-document-graph");

    let result = objects(schema, conn)
        .within(Duration::from_millis(10))
        .count()
        .await;

    assert!(matches!(result, Err(StoreError::Cancelled)));
}
