//! ClickHouse driver: columnar backend over the HTTP interface.
//!
//! Queries travel as SQL text with `FORMAT JSONEachRow` results, the same
//! wire shape the official HTTP clients use. Connection options: `url`
//! (default `http://localhost:8123`), `database`, `username`, `password`.

mod driver;
mod orderby;

pub use driver::{ClickHouseBackend, ClickHouseFactory};
pub use orderby::infer_order_by;

use polystore_core::BackendRegistry;
use std::sync::Arc;

/// Stable registry name.
pub const BACKEND_NAME: &str = "clickhouse";

/// Register this driver with a backend registry.
pub fn register(registry: &BackendRegistry) {
    registry.register(Arc::new(ClickHouseFactory));
}
