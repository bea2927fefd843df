//! Multi-backend object-document mapper.
//!
//! Declare a document class once with [`Schema`], then run CRUD, queries,
//! and materialized aggregation views against heterogeneous stores — a
//! document/graph store (SurrealDB), a columnar analytical store
//! (ClickHouse), and a key-value store (Redis) — through one typed API.
//!
//! ```no_run
//! use polystore::{ConnectionConfig, Document, Field, Schema, Value, connect};
//!
//! # async fn demo() -> polystore::Result<()> {
//! let conn = connect(
//!     "surrealdb",
//!     ConnectionConfig::new().with("url", "ws://localhost:8000"),
//! )
//! .await?;
//!
//! let user = Schema::builder("User")
//!     .backend("surrealdb")
//!     .field(Field::text("username").required())
//!     .field(Field::integer("age"))
//!     .build()?;
//!
//! let mut doc = Document::new(
//!     user.clone(),
//!     [("username", Value::from("johndoe")), ("age", Value::from(30))],
//! )?;
//! doc.save(&conn).await?;
//! # Ok(())
//! # }
//! ```

pub use polystore_core::*;

use std::sync::Once;

/// Register every compiled-in driver with the process-wide backend
/// registry. Drivers excluded at build time are recorded as unavailable so
/// naming them yields a useful error while unrelated backends keep working.
pub fn register_builtin_drivers() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let registry = backends();

        #[cfg(feature = "surrealdb")]
        polystore_driver_surrealdb::register(registry);
        #[cfg(not(feature = "surrealdb"))]
        registry.register_failure("surrealdb", "driver not compiled in (enable `surrealdb`)");

        #[cfg(feature = "clickhouse")]
        polystore_driver_clickhouse::register(registry);
        #[cfg(not(feature = "clickhouse"))]
        registry.register_failure("clickhouse", "driver not compiled in (enable `clickhouse`)");

        #[cfg(feature = "redis")]
        polystore_driver_redis::register(registry);
        #[cfg(not(feature = "redis"))]
        registry.register_failure("redis", "driver not compiled in (enable `redis`)");

        log::debug!(
            "registered builtin drivers: {}",
            registry.list_available().join(", ")
        );
    });
}

/// Open a pooled connection to a named backend and register it under the
/// backend's name with default pool sizing.
pub async fn connect(backend: &str, config: ConnectionConfig) -> Result<Connection> {
    create_connection(ConnectOptions::new(backend).config(config)).await
}

/// Everything `create_connection` accepts.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub backend: String,
    /// Registry name for the connection; defaults to the backend name.
    pub name: Option<String>,
    pub config: ConnectionConfig,
    pub pool: PoolConfig,
    /// Make this the default connection for its backend even when one
    /// already exists.
    pub make_default: bool,
}

impl ConnectOptions {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            name: None,
            config: ConnectionConfig::new(),
            pool: PoolConfig::default(),
            make_default: false,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn make_default(mut self) -> Self {
        self.make_default = true;
        self
    }
}

/// Open a pooled connection and register it.
///
/// The backend driver is resolved through the process-wide registry;
/// builtin drivers are registered on first use.
pub async fn create_connection(options: ConnectOptions) -> Result<Connection> {
    register_builtin_drivers();

    let factory = backends().get(&options.backend)?;
    let backend = factory.open(&options.config, options.pool).await?;
    let name = options.name.unwrap_or_else(|| options.backend.clone());
    let connection = Connection::new(name.clone(), backend);

    connections().register(connection.clone());
    if options.make_default {
        connections().set_default(&name)?;
    }
    Ok(connection)
}
