//! Redis driver: key-value backend with secondary indexes.
//!
//! Primary records live at `<collection>:doc:<id>` as JSON; the id set at
//! `<collection>:ids`; secondary indexes at `<collection>:idx:<field>`
//! (sorted sets for numeric fields, one member set per value otherwise).
//! Connection options: `url` (default `redis://localhost:6379`).

mod conditions;
mod driver;

pub use conditions::{Predicate, evaluate, parse_conditions};
pub use driver::{RedisBackend, RedisFactory};

use polystore_core::BackendRegistry;
use std::sync::Arc;

/// Stable registry name.
pub const BACKEND_NAME: &str = "redis";

/// Register this driver with a backend registry.
pub fn register(registry: &BackendRegistry) {
    registry.register(Arc::new(RedisFactory));
}
