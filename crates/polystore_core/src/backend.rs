use crate::capabilities::{BackendMetadata, Capabilities};
use crate::encoding::ValueEncoding;
use crate::error::{Result, StoreError};
use crate::fields::Field;
use crate::functions::FunctionDialect;
use crate::query::{CondOp, OrderBy};
use crate::schema::Schema;
use crate::value::{Row, Value};
use crate::views::ViewDefinition;
use async_trait::async_trait;
use std::any::Any;

/// Inputs of a `select`/`count` call after lowering.
///
/// `conditions` is an implicit conjunction of opaque predicate leaves
/// produced by [`Backend::build_condition`] or raw fragments.
#[derive(Debug, Clone, Default)]
pub struct SelectRequest {
    pub conditions: Vec<String>,
    pub fields: Option<Vec<String>>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub order_by: Vec<OrderBy>,
    /// Reference fields to dereference inline on stores that support it.
    pub fetch: Vec<String>,
}

impl SelectRequest {
    pub fn with_conditions(conditions: Vec<String>) -> Self {
        Self {
            conditions,
            ..Default::default()
        }
    }
}

/// DDL overrides for `create_table`, on top of the schema's own meta.
#[derive(Debug, Clone)]
pub struct CreateTableOptions {
    pub if_not_exists: bool,
    pub schemafull: Option<bool>,
    pub engine: Option<String>,
    pub order_by: Option<Vec<String>>,
}

impl Default for CreateTableOptions {
    fn default() -> Self {
        Self {
            if_not_exists: true,
            schemafull: None,
            engine: None,
            order_by: None,
        }
    }
}

/// Opaque transaction handle.
///
/// Transactional drivers pin a connection inside; non-transactional drivers
/// hand out an empty handle and commit/rollback are no-ops (the caller
/// learns this from the capability flag, not from an error).
pub struct TransactionHandle {
    backend: &'static str,
    state: Option<Box<dyn Any + Send>>,
}

impl TransactionHandle {
    pub fn noop(backend: &'static str) -> Self {
        Self {
            backend,
            state: None,
        }
    }

    pub fn with_state(backend: &'static str, state: Box<dyn Any + Send>) -> Self {
        Self {
            backend,
            state: Some(state),
        }
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }

    pub fn is_noop(&self) -> bool {
        self.state.is_none()
    }

    pub fn take_state<T: 'static>(&mut self) -> Option<Box<T>> {
        self.state.take().and_then(|s| s.downcast::<T>().ok())
    }
}

impl std::fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("backend", &self.backend)
            .field("pinned", &self.state.is_some())
            .finish()
    }
}

/// Uniform contract every store driver implements.
///
/// The core never talks to a native client directly; this trait is the only
/// seam. Implementations own their connection pool and are shared behind an
/// `Arc`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Driver metadata: id, category, capabilities, wire encodings.
    fn metadata(&self) -> &'static BackendMetadata;

    fn capabilities(&self) -> Capabilities {
        self.metadata().capabilities
    }

    fn supports(&self, capability: Capabilities) -> bool {
        self.capabilities().contains(capability)
    }

    fn encoding(&self) -> &'static ValueEncoding {
        &self.metadata().encoding
    }

    /// Rewrites for the portable function set; consulted by the view engine.
    fn function_dialect(&self) -> &dyn FunctionDialect;

    /// Fail with a capability error unless the flag is declared.
    fn require(&self, capability: Capabilities) -> Result<()> {
        if self.supports(capability) {
            Ok(())
        } else {
            Err(StoreError::capability(self.metadata().id, capability))
        }
    }

    // -- DDL --

    async fn create_table(&self, schema: &Schema, options: &CreateTableOptions) -> Result<()>;

    async fn drop_table(&self, table: &str, if_exists: bool) -> Result<()>;

    // -- CRUD --

    /// Insert one row. Returns the stored row, with an id assigned when the
    /// store does not generate one.
    async fn insert(&self, table: &str, row: Row) -> Result<Row>;

    /// Bulk insert, preferred on columnar stores. Row order is preserved in
    /// the request; result order is best-effort.
    async fn insert_many(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>>;

    async fn select(&self, table: &str, request: &SelectRequest) -> Result<Vec<Row>>;

    async fn count(&self, table: &str, conditions: &[String]) -> Result<u64>;

    /// Update rows matching the conditions. Columnar stores perform an
    /// asynchronous mutation and return the pre-image with the patch applied
    /// in memory; callers must treat visibility timing accordingly.
    async fn update(&self, table: &str, conditions: &[String], patch: Row) -> Result<Vec<Row>>;

    async fn delete(&self, table: &str, conditions: &[String]) -> Result<u64>;

    /// Escape hatch: run a native query. The caller owns the fragment's
    /// safety.
    async fn execute_raw(&self, query: &str, params: Option<Row>) -> Result<serde_json::Value>;

    // -- Lowering primitives --

    /// Produce one predicate leaf in the native dialect.
    fn build_condition(&self, field: &str, op: CondOp, value: &Value) -> Result<String>;

    /// Native column type for DDL.
    fn get_field_type(&self, field: &Field) -> String;

    /// Native literal rendering. Must quote and escape; never interpolates
    /// unescaped user text.
    fn format_value(&self, value: &Value) -> String;

    // -- Transactions --

    async fn begin_transaction(&self) -> Result<TransactionHandle> {
        Ok(TransactionHandle::noop(self.metadata().id))
    }

    async fn commit_transaction(&self, _handle: TransactionHandle) -> Result<()> {
        Ok(())
    }

    async fn rollback_transaction(&self, _handle: TransactionHandle) -> Result<()> {
        Ok(())
    }

    // -- Materialized views --

    async fn create_materialized_view(&self, view: &ViewDefinition) -> Result<()> {
        let _ = view;
        Err(StoreError::capability(
            self.metadata().id,
            Capabilities::MATERIALIZED_VIEWS,
        ))
    }

    async fn drop_materialized_view(&self, name: &str, if_exists: bool) -> Result<()> {
        let _ = (name, if_exists);
        Err(StoreError::capability(
            self.metadata().id,
            Capabilities::MATERIALIZED_VIEWS,
        ))
    }

    /// No-op where the store maintains the view itself.
    async fn refresh_materialized_view(&self, name: &str) -> Result<()> {
        let _ = name;
        Err(StoreError::capability(
            self.metadata().id,
            Capabilities::MATERIALIZED_VIEWS,
        ))
    }

    // -- Graph --

    /// Create a graph edge between two records.
    async fn create_relation(
        &self,
        relation: &str,
        from_id: &Value,
        to_id: &Value,
        attributes: Row,
    ) -> Result<()> {
        let _ = (relation, from_id, to_id, attributes);
        Err(StoreError::capability(
            self.metadata().id,
            Capabilities::GRAPH_RELATIONS,
        ))
    }

    // -- Introspection --

    async fn explain(&self, table: &str, request: &SelectRequest) -> Result<serde_json::Value> {
        let _ = (table, request);
        Err(StoreError::capability(
            self.metadata().id,
            Capabilities::EXPLAIN,
        ))
    }

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<()>;

    /// Close the pool; in-use connections get a grace period.
    async fn close(&self) -> Result<()>;
}
