use crate::encoding::ValueEncoding;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// High-level data model of a store.
///
/// Categories differ in primary access pattern, which drives query lowering
/// and the wire encodings of values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreCategory {
    /// Records, relations, and a query language with direct record access
    /// and joinless dereference.
    DocumentGraph,

    /// Wide scans over columns; analytical engines in the MergeTree family.
    Columnar,

    /// Primary-key access with optional secondary indexes.
    KeyValue,
}

impl StoreCategory {
    pub fn display_name(&self) -> &'static str {
        match self {
            StoreCategory::DocumentGraph => "Document/Graph",
            StoreCategory::Columnar => "Columnar",
            StoreCategory::KeyValue => "Key-Value",
        }
    }

    /// Name of the primary data container in this category.
    pub fn container_name(&self) -> &'static str {
        match self {
            StoreCategory::DocumentGraph => "Tables",
            StoreCategory::Columnar => "Tables",
            StoreCategory::KeyValue => "Keys",
        }
    }
}

bitflags! {
    /// Capabilities a backend may declare.
    ///
    /// The query layer and the view engine consult these flags; an operation
    /// that needs an absent capability fails with a capability error before
    /// any I/O rather than silently degrading.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        /// Server-side transactions. Where absent, begin/commit are no-ops
        /// and callers learn it from this flag, not from an error.
        const TRANSACTIONS = 1 << 0;

        /// Reference fields can be stored as typed links between tables.
        const REFERENCES = 1 << 1;

        /// Graph edges between records (relate/traverse).
        const GRAPH_RELATIONS = 1 << 2;

        /// Records are addressable by id without a scan.
        const DIRECT_RECORD_ACCESS = 1 << 3;

        /// Query plans can be inspected.
        const EXPLAIN = 1 << 4;

        /// Secondary indexes can be declared.
        const INDEXES = 1 << 5;

        /// Full-text search predicates.
        const FULL_TEXT_SEARCH = 1 << 6;

        /// Efficient multi-row writes.
        const BULK_OPERATIONS = 1 << 7;

        /// Native materialized views.
        const MATERIALIZED_VIEWS = 1 << 8;
    }
}

impl Serialize for Capabilities {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Capabilities {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bits = u32::deserialize(deserializer)?;
        Ok(Self::from_bits(bits).unwrap_or_else(Self::empty))
    }
}

impl Capabilities {
    /// Baseline for document/graph stores.
    pub const DOCUMENT_GRAPH_BASE: Self = Self::from_bits_truncate(
        Self::TRANSACTIONS.bits()
            | Self::REFERENCES.bits()
            | Self::GRAPH_RELATIONS.bits()
            | Self::DIRECT_RECORD_ACCESS.bits()
            | Self::EXPLAIN.bits()
            | Self::INDEXES.bits()
            | Self::FULL_TEXT_SEARCH.bits()
            | Self::BULK_OPERATIONS.bits()
            | Self::MATERIALIZED_VIEWS.bits(),
    );

    /// Baseline for columnar analytical stores.
    pub const COLUMNAR_BASE: Self = Self::from_bits_truncate(
        Self::EXPLAIN.bits()
            | Self::INDEXES.bits()
            | Self::BULK_OPERATIONS.bits()
            | Self::MATERIALIZED_VIEWS.bits(),
    );

    /// Baseline for key-value stores.
    pub const KEYVALUE_BASE: Self = Self::from_bits_truncate(
        Self::DIRECT_RECORD_ACCESS.bits() | Self::INDEXES.bits() | Self::BULK_OPERATIONS.bits(),
    );
}

/// Metadata a backend driver provides about itself.
///
/// Returned by `Backend::metadata()` and used by the core to gate and
/// rewrite operations without driver-specific conditionals.
#[derive(Debug, Clone)]
pub struct BackendMetadata {
    /// Stable identifier used in the registry (e.g. "surrealdb").
    pub id: &'static str,

    /// Human-readable name.
    pub display_name: &'static str,

    /// Short description.
    pub description: &'static str,

    /// Data model category.
    pub category: StoreCategory,

    /// Declared capabilities.
    pub capabilities: Capabilities,

    /// Wire encodings for timestamps, decimals, arrays, and objects.
    pub encoding: ValueEncoding,
}

impl BackendMetadata {
    pub fn supports(&self, capability: Capabilities) -> bool {
        self.capabilities.contains(capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_bases_do_not_leak_across_models() {
        let doc = Capabilities::DOCUMENT_GRAPH_BASE;
        assert!(doc.contains(Capabilities::GRAPH_RELATIONS));
        assert!(doc.contains(Capabilities::TRANSACTIONS));

        let columnar = Capabilities::COLUMNAR_BASE;
        assert!(columnar.contains(Capabilities::MATERIALIZED_VIEWS));
        assert!(!columnar.contains(Capabilities::TRANSACTIONS));
        assert!(!columnar.contains(Capabilities::GRAPH_RELATIONS));
        assert!(!columnar.contains(Capabilities::DIRECT_RECORD_ACCESS));

        let kv = Capabilities::KEYVALUE_BASE;
        assert!(kv.contains(Capabilities::DIRECT_RECORD_ACCESS));
        assert!(!kv.contains(Capabilities::MATERIALIZED_VIEWS));
        assert!(!kv.contains(Capabilities::REFERENCES));
    }

    #[test]
    fn serde_round_trips_bits() {
        let caps = Capabilities::COLUMNAR_BASE;
        let json = serde_json::to_string(&caps).unwrap();
        let back: Capabilities = serde_json::from_str(&json).unwrap();
        assert_eq!(back, caps);
    }
}
