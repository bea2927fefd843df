use crate::backend::Backend;
use crate::config::{ConnectionConfig, PoolConfig};
use crate::error::{Result, StoreError};
use crate::schema::{Schema, SchemaCatalog};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// Opens backends of one kind from a connection config.
///
/// Driver crates register a factory under a stable name; the factory is the
/// only thing the core holds before a connection is actually requested.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    /// Stable registry name (e.g. "surrealdb", "clickhouse", "redis").
    fn name(&self) -> &'static str;

    async fn open(
        &self,
        config: &ConnectionConfig,
        pool: PoolConfig,
    ) -> Result<Arc<dyn Backend>>;
}

impl std::fmt::Debug for dyn BackendFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendFactory").field("name", &self.name()).finish()
    }
}

#[derive(Default)]
struct BackendRegistryInner {
    factories: HashMap<String, Arc<dyn BackendFactory>>,
    failures: HashMap<String, String>,
}

/// Named driver lookup with graceful absence.
///
/// A driver whose native client cannot initialize records a failure entry
/// instead of aborting; a user who never names that backend never sees the
/// error, and unrelated backends stay available.
#[derive(Default)]
pub struct BackendRegistry {
    inner: RwLock<BackendRegistryInner>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. Idempotent; last write wins. Clears any recorded
    /// failure for the same name.
    pub fn register(&self, factory: Arc<dyn BackendFactory>) {
        let mut inner = self.write();
        let name = factory.name().to_string();
        inner.failures.remove(&name);
        inner.factories.insert(name, factory);
    }

    /// Record a driver that failed to load, with the reason.
    pub fn register_failure(&self, name: impl Into<String>, message: impl Into<String>) {
        let name = name.into();
        let message = message.into();
        log::warn!("backend '{name}' unavailable: {message}");
        self.write().failures.insert(name, message);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn BackendFactory>> {
        let inner = self.read();
        if let Some(factory) = inner.factories.get(name) {
            return Ok(factory.clone());
        }
        let mut available: Vec<String> = inner.factories.keys().cloned().collect();
        available.sort();
        if let Some(reason) = inner.failures.get(name) {
            return Err(StoreError::UnknownBackend {
                name: format!("{name} ({reason})"),
                available,
            });
        }
        Err(StoreError::UnknownBackend {
            name: name.to_string(),
            available,
        })
    }

    /// Names whose drivers loaded successfully.
    pub fn list_available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Map of driver name to load-failure message.
    pub fn list_failed(&self) -> HashMap<String, String> {
        self.read().failures.clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BackendRegistryInner> {
        self.inner.read().unwrap_or_else(|poison| poison.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BackendRegistryInner> {
        self.inner.write().unwrap_or_else(|poison| poison.into_inner())
    }
}

/// A registered, pooled backend under a caller-chosen name.
#[derive(Clone)]
pub struct Connection {
    name: Arc<str>,
    backend: Arc<dyn Backend>,
}

impl Connection {
    pub fn new(name: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        Self {
            name: name.into().into(),
            backend,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &dyn Backend {
        &*self.backend
    }

    pub fn backend_arc(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    /// Registry id of the underlying driver.
    pub fn backend_id(&self) -> &'static str {
        self.backend.metadata().id
    }

    pub async fn close(&self) -> Result<()> {
        self.backend.close().await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("backend", &self.backend.metadata().id)
            .finish()
    }
}

#[derive(Default)]
struct ConnectionRegistryInner {
    connections: HashMap<String, Connection>,
    /// Backend id -> connection name serving as that backend's default.
    defaults: HashMap<String, String>,
    /// First registered connection, used when a schema has no backend
    /// binding.
    global_default: Option<String>,
}

/// Process-wide table of named connections with per-backend defaults.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<ConnectionRegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. The first connection for a backend becomes
    /// that backend's default; the first connection overall becomes the
    /// global default.
    pub fn register(&self, connection: Connection) {
        let mut inner = self.write();
        let backend_id = connection.backend_id().to_string();
        let name = connection.name().to_string();
        inner.defaults.entry(backend_id).or_insert_with(|| name.clone());
        if inner.global_default.is_none() {
            inner.global_default = Some(name.clone());
        }
        inner.connections.insert(name, connection);
    }

    /// Make the named connection the default for its backend.
    pub fn set_default(&self, name: &str) -> Result<()> {
        let mut inner = self.write();
        let Some(connection) = inner.connections.get(name) else {
            return Err(StoreError::schema(format!("unknown connection '{name}'")));
        };
        let backend_id = connection.backend_id().to_string();
        inner.defaults.insert(backend_id, name.to_string());
        inner.global_default = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Connection> {
        self.read().connections.get(name).cloned()
    }

    /// Default connection for a backend id.
    pub fn default_for(&self, backend_id: &str) -> Option<Connection> {
        let inner = self.read();
        let name = inner.defaults.get(backend_id)?;
        inner.connections.get(name).cloned()
    }

    /// Resolve the connection a schema should use: its bound backend's
    /// default, or the global default when the schema has no binding.
    pub fn resolve(&self, schema: &Schema) -> Result<Connection> {
        match schema.backend() {
            Some(backend_id) => self.default_for(backend_id).ok_or_else(|| {
                StoreError::schema(format!(
                    "no connection registered for backend '{backend_id}'"
                ))
            }),
            None => {
                let inner = self.read();
                inner
                    .global_default
                    .as_ref()
                    .and_then(|name| inner.connections.get(name).cloned())
                    .ok_or_else(|| StoreError::schema("no default connection registered"))
            }
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().connections.keys().cloned().collect();
        names.sort();
        names
    }

    /// Close every connection and clear the table.
    pub async fn shutdown(&self) {
        let connections: Vec<Connection> = {
            let mut inner = self.write();
            inner.defaults.clear();
            inner.global_default = None;
            inner.connections.drain().map(|(_, conn)| conn).collect()
        };
        for connection in connections {
            if let Err(err) = connection.close().await {
                log::warn!("closing connection '{}' failed: {err}", connection.name());
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ConnectionRegistryInner> {
        self.inner.read().unwrap_or_else(|poison| poison.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ConnectionRegistryInner> {
        self.inner.write().unwrap_or_else(|poison| poison.into_inner())
    }
}

/// Process-wide backend registry, initialized on first use.
pub fn backends() -> &'static BackendRegistry {
    static REGISTRY: OnceLock<BackendRegistry> = OnceLock::new();
    REGISTRY.get_or_init(BackendRegistry::new)
}

/// Process-wide connection registry.
pub fn connections() -> &'static ConnectionRegistry {
    static REGISTRY: OnceLock<ConnectionRegistry> = OnceLock::new();
    REGISTRY.get_or_init(ConnectionRegistry::new)
}

/// Process-wide schema catalog.
pub fn catalog() -> &'static SchemaCatalog {
    static CATALOG: OnceLock<SchemaCatalog> = OnceLock::new();
    CATALOG.get_or_init(SchemaCatalog::new)
}

/// Tear down process-wide state: close all connections and clear the
/// catalog. Backend factories stay registered.
pub async fn shutdown() {
    connections().shutdown().await;
    catalog().clear();
}
