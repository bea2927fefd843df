//! Registry behavior: graceful absence, defaults, and shutdown lifecycle.

use polystore::{
    Backend, BackendFactory, BackendRegistry, Connection, ConnectionConfig, ConnectionRegistry,
    PoolConfig, Result, SchemaCatalog, StoreError,
};
use polystore_test_support::{RecordingBackend, user_schema};
use std::sync::Arc;

struct RecordingFactory;

#[async_trait::async_trait]
impl BackendFactory for RecordingFactory {
    fn name(&self) -> &'static str {
        "fake-document-graph"
    }

    async fn open(
        &self,
        _config: &ConnectionConfig,
        _pool: PoolConfig,
    ) -> Result<Arc<dyn Backend>> {
        Ok(RecordingBackend::document_graph().into_arc())
    }
}

#[tokio::test]
async fn broken_driver_does_not_poison_working_ones() {
    let registry = BackendRegistry::new();
    registry.register_failure("clickhouse", "native client library missing");
    registry.register(Arc::new(RecordingFactory));

    // The working backend opens and operates normally.
    let factory = registry.get("fake-document-graph").unwrap();
    let backend = factory
        .open(&ConnectionConfig::new(), PoolConfig::small())
        .await
        .unwrap();
    backend.ping().await.unwrap();

    // The failed one reports its reason only when actually named.
    let err = registry.get("clickhouse").unwrap_err();
    assert!(err.to_string().contains("native client library missing"));
    assert_eq!(registry.list_failed().len(), 1);
    assert_eq!(registry.list_available(), vec!["fake-document-graph"]);
}

#[tokio::test]
async fn re_registration_clears_a_recorded_failure() {
    let registry = BackendRegistry::new();
    registry.register_failure("fake-document-graph", "flaky install");
    registry.register(Arc::new(RecordingFactory));

    assert!(registry.get("fake-document-graph").is_ok());
    assert!(registry.list_failed().is_empty());
}

#[tokio::test]
async fn first_connection_becomes_the_backend_default() {
    let registry = ConnectionRegistry::new();
    let primary = Connection::new("primary", RecordingBackend::document_graph().into_arc());
    let replica = Connection::new("replica", RecordingBackend::document_graph().into_arc());
    registry.register(primary);
    registry.register(replica);

    let resolved = registry
        .default_for("fake-document-graph")
        .expect("default exists");
    assert_eq!(resolved.name(), "primary");

    registry.set_default("replica").unwrap();
    assert_eq!(
        registry.default_for("fake-document-graph").unwrap().name(),
        "replica"
    );
}

#[tokio::test]
async fn schemas_resolve_their_backend_default() {
    let registry = ConnectionRegistry::new();
    registry.register(Connection::new(
        "docstore",
        RecordingBackend::document_graph().into_arc(),
    ));

    let schema = user_schema("fake-document-graph");
    let resolved = registry.resolve(&schema).unwrap();
    assert_eq!(resolved.name(), "docstore");

    let unbound = user_schema("fake-columnar");
    assert!(matches!(
        registry.resolve(&unbound),
        Err(StoreError::Schema(_))
    ));
}

#[tokio::test]
async fn shutdown_closes_and_clears_connections() {
    let registry = ConnectionRegistry::new();
    registry.register(Connection::new(
        "doomed",
        RecordingBackend::document_graph().into_arc(),
    ));
    assert_eq!(registry.names(), vec!["doomed"]);

    registry.shutdown().await;
    assert!(registry.names().is_empty());
    assert!(registry.get("doomed").is_none());
}

#[tokio::test]
async fn catalog_clear_drops_registered_classes() {
    let catalog = SchemaCatalog::new();
    catalog.register(user_schema("fake-document-graph")).unwrap();
    assert!(catalog.get("user").is_some());

    catalog.clear();
    assert!(catalog.get("user").is_none());
}
