//! Wire encodings a backend declares for value conversion.
//!
//! Field serializers consult these instead of matching on a backend name, so
//! a new driver only has to describe its formats.

/// How timestamps travel on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampFormat {
    /// Kept as a typed timestamp; rendered as ISO-8601 with timezone.
    Iso8601,
    /// `"YYYY-MM-DD HH:MM:SS.sss"` text, the columnar convention.
    SpacedMillis,
    /// Integer epoch milliseconds.
    EpochMillis,
}

/// How exact decimals travel on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecimalFormat {
    /// The store has a native decimal type; the value stays typed.
    Native,
    /// Precision-preserving text.
    Text,
    /// Lossy double. Only used when a field explicitly opts in.
    Float,
}

/// How sequences and mappings travel on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    /// Native array/object support.
    Native,
    /// JSON text fallback.
    JsonText,
}

/// The full wire-encoding contract of one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueEncoding {
    pub timestamps: TimestampFormat,
    pub decimals: DecimalFormat,
    pub arrays: ContainerFormat,
    pub objects: ContainerFormat,
}

impl ValueEncoding {
    /// Document/graph stores: typed timestamps, native decimals and
    /// containers.
    pub const DOCUMENT_GRAPH: Self = Self {
        timestamps: TimestampFormat::Iso8601,
        decimals: DecimalFormat::Native,
        arrays: ContainerFormat::Native,
        objects: ContainerFormat::Native,
    };

    /// Columnar stores: spaced-millis timestamps, native decimals, native
    /// arrays, objects as JSON text.
    pub const COLUMNAR: Self = Self {
        timestamps: TimestampFormat::SpacedMillis,
        decimals: DecimalFormat::Native,
        arrays: ContainerFormat::Native,
        objects: ContainerFormat::JsonText,
    };

    /// Key-value stores: epoch-millis timestamps, text decimals, JSON
    /// containers.
    pub const KEY_VALUE: Self = Self {
        timestamps: TimestampFormat::EpochMillis,
        decimals: DecimalFormat::Text,
        arrays: ContainerFormat::JsonText,
        objects: ContainerFormat::JsonText,
    };
}
