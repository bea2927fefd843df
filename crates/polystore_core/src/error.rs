use crate::capabilities::Capabilities;
use std::time::Duration;
use thiserror::Error;

/// Logical operation names used to tag backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    CreateTable,
    DropTable,
    Insert,
    InsertMany,
    Select,
    Count,
    Update,
    Delete,
    Raw,
    CreateView,
    DropView,
    RefreshView,
    Relate,
    Fetch,
    Transaction,
    Explain,
    Connect,
    Ping,
}

impl LogicalOp {
    pub fn name(&self) -> &'static str {
        match self {
            LogicalOp::CreateTable => "create_table",
            LogicalOp::DropTable => "drop_table",
            LogicalOp::Insert => "insert",
            LogicalOp::InsertMany => "insert_many",
            LogicalOp::Select => "select",
            LogicalOp::Count => "count",
            LogicalOp::Update => "update",
            LogicalOp::Delete => "delete",
            LogicalOp::Raw => "execute_raw",
            LogicalOp::CreateView => "create_view",
            LogicalOp::DropView => "drop_view",
            LogicalOp::RefreshView => "refresh_view",
            LogicalOp::Relate => "relate",
            LogicalOp::Fetch => "fetch",
            LogicalOp::Transaction => "transaction",
            LogicalOp::Explain => "explain",
            LogicalOp::Connect => "connect",
            LogicalOp::Ping => "ping",
        }
    }
}

impl std::fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Store operation errors.
///
/// All operations return this error type so callers get consistent handling
/// across backends. Validation and schema errors are raised before any I/O;
/// driver failures are wrapped in `Backend` with the logical operation that
/// triggered them.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A field value failed type coercion or a declared constraint.
    #[error("validation failed for field '{field}': {message}")]
    Validation { field: String, message: String },

    /// Unknown field name, duplicate definition, or unresolved reference.
    #[error("schema error: {0}")]
    Schema(String),

    /// The named backend is not registered.
    #[error("unknown backend '{name}' (available: {})", available.join(", "))]
    UnknownBackend { name: String, available: Vec<String> },

    /// The operation requires a capability this backend does not declare.
    #[error("backend '{backend}' does not support {capability:?}")]
    Capability {
        backend: String,
        capability: Capabilities,
    },

    /// The pool could not hand out a connection in time.
    #[error("timed out acquiring a connection after {waited:?}")]
    AcquireTimeout { waited: Duration },

    /// Caller-initiated cancellation or an expired deadline.
    #[error("operation cancelled")]
    Cancelled,

    /// Connection-level failure (I/O, protocol). Retriable for idempotent
    /// operations.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Driver error surfaced verbatim, tagged with the logical operation.
    #[error("{op} failed{}: {message}", table.as_deref().map(|t| format!(" on '{t}'")).unwrap_or_default())]
    Backend {
        op: LogicalOp,
        table: Option<String>,
        message: String,
    },

    /// `get` or `refresh` had no matching record.
    #[error("no record found")]
    NotFound,

    /// Unique-index violation on insert or update.
    #[error("unique constraint violated: {0}")]
    Conflict(String),

    /// Filesystem or socket error outside a driver's own protocol.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn capability(backend: impl Into<String>, capability: Capabilities) -> Self {
        Self::Capability {
            backend: backend.into(),
            capability,
        }
    }

    pub fn backend(op: LogicalOp, table: Option<&str>, message: impl Into<String>) -> Self {
        Self::Backend {
            op,
            table: table.map(str::to_string),
            message: message.into(),
        }
    }

    /// Short textual code for the error kind, stable across messages.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Schema(_) => "schema",
            Self::UnknownBackend { .. } => "unknown_backend",
            Self::Capability { .. } => "capability",
            Self::AcquireTimeout { .. } => "acquire_timeout",
            Self::Cancelled => "cancelled",
            Self::Transport(_) => "transport",
            Self::Backend { .. } => "backend",
            Self::NotFound => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Io(_) => "io",
        }
    }

    /// Whether a caller-level retry wrapper may re-run the operation.
    ///
    /// Only transport failures qualify; the caller must additionally know the
    /// operation is idempotent.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
