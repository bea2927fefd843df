//! SurrealDB driver: document/graph backend speaking SurrealQL.
//!
//! Connection options: `url` (required, e.g. `ws://localhost:8000`),
//! `namespace`, `database`, `username`, `password`.

mod driver;

pub use driver::{SurrealBackend, SurrealFactory};

use polystore_core::BackendRegistry;
use std::sync::Arc;

/// Stable registry name.
pub const BACKEND_NAME: &str = "surrealdb";

/// Register this driver with a backend registry.
pub fn register(registry: &BackendRegistry) {
    registry.register(Arc::new(SurrealFactory));
}
