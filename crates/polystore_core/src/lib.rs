//! Core of the polystore object-document mapper: schema metamodel, document
//! lifecycle, backend abstraction, query building, connection pooling, and
//! materialized aggregation views. Driver crates implement [`Backend`] and
//! register a [`BackendFactory`]; application code goes through [`Document`],
//! [`QuerySet`], and [`ViewDefinition`].

mod backend;
mod capabilities;
mod config;
mod document;
mod encoding;
mod error;
mod fields;
mod functions;
mod grid;
mod pool;
mod query;
mod queryset;
mod registry;
mod retry;
mod schema;
mod value;
mod views;

pub use backend::{Backend, CreateTableOptions, SelectRequest, TransactionHandle};
pub use capabilities::{BackendMetadata, Capabilities, StoreCategory};
pub use config::{ConnectionConfig, PoolConfig, RetryConfig};
pub use document::Document;
pub use encoding::{ContainerFormat, DecimalFormat, TimestampFormat, ValueEncoding};
pub use error::{LogicalOp, Result, StoreError};
pub use fields::{
    Constraints, Field, FieldDefault, FieldKind, IndexKind, IndexSpec, from_db, to_db,
};
pub use functions::{Func, FunctionDialect};
pub use grid::{GridRequest, GridResponse, TableQuery, fetch_grid, fetch_table};
pub use pool::{Manager, Pool, PoolGuard, PoolStatus};
pub use query::{
    CondOp, FieldRef, Filter, Operand, OrderBy, QueryExpression, SortDirection,
    compile_conjunction, compile_filter, f, parse_lookup,
};
pub use queryset::{QuerySet, objects};
pub use registry::{
    BackendFactory, BackendRegistry, Connection, ConnectionRegistry, backends, catalog,
    connections, shutdown,
};
pub use retry::{RetryPolicy, with_deadline};
pub use schema::{Schema, SchemaBuilder, SchemaCatalog, SchemaMeta, TableIndex};
pub use value::{Row, Value};
pub use views::{Dimension, Metric, ViewBuilder, ViewDefinition};

pub use bigdecimal;
pub use chrono;
pub use indexmap;
