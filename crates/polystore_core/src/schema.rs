use crate::error::{Result, StoreError};
use crate::fields::{Field, FieldKind};
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Table-level index over one or more fields.
#[derive(Debug, Clone)]
pub struct TableIndex {
    pub name: Option<String>,
    pub fields: Vec<String>,
    pub unique: bool,
}

impl TableIndex {
    pub fn on<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: None,
            fields: fields.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Index name, generated from the field list when not declared.
    pub fn effective_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("idx_{}", self.fields.join("_")))
    }
}

/// Driver-facing table metadata carried by a document class.
#[derive(Debug, Clone)]
pub struct SchemaMeta {
    /// Columnar engine (e.g. `MergeTree`). Required by the columnar driver
    /// at table creation.
    pub engine: Option<String>,
    pub engine_params: Vec<String>,
    /// Declared order-by. Empty means the columnar driver infers one.
    pub order_by: Vec<String>,
    pub partition_by: Option<String>,
    pub primary_key: Vec<String>,
    pub ttl: Option<String>,
    pub settings: IndexMap<String, String>,
    pub indexes: Vec<TableIndex>,
    /// Name of the identifier field.
    pub id_field: String,
    /// Document/graph stores define the table SCHEMAFULL by default.
    pub schemafull: bool,
}

impl Default for SchemaMeta {
    fn default() -> Self {
        Self {
            engine: None,
            engine_params: Vec::new(),
            order_by: Vec::new(),
            partition_by: None,
            primary_key: Vec::new(),
            ttl: None,
            settings: IndexMap::new(),
            indexes: Vec::new(),
            id_field: "id".to_string(),
            schemafull: true,
        }
    }
}

/// Immutable description of a document class: collection name, backend
/// binding, meta, and ordered fields.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    collection: String,
    backend: Option<String>,
    meta: SchemaMeta,
    fields: IndexMap<String, Field>,
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    /// Logical class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Physical table / collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Bound backend name; `None` defers to the registry default.
    pub fn backend(&self) -> Option<&str> {
        self.backend.as_deref()
    }

    pub fn meta(&self) -> &SchemaMeta {
        &self.meta
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Resolve a field or fail with a schema error naming the collection.
    pub fn require_field(&self, name: &str) -> Result<&Field> {
        self.field(name).ok_or_else(|| {
            StoreError::schema(format!(
                "unknown field '{name}' on '{}'",
                self.collection
            ))
        })
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn id_field(&self) -> &str {
        &self.meta.id_field
    }

    /// Reference fields in declaration order.
    pub fn reference_fields(&self) -> impl Iterator<Item = (&Field, &str)> {
        self.fields.values().filter_map(|field| match &field.kind {
            FieldKind::Reference { target } => Some((field, target.as_str())),
            _ => None,
        })
    }
}

/// Collects fields and meta for a document class, merging inherited fields
/// first (subclass overrides parent on name collision).
pub struct SchemaBuilder {
    name: String,
    collection: Option<String>,
    backend: Option<String>,
    meta: SchemaMeta,
    fields: IndexMap<String, Field>,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: None,
            backend: None,
            meta: SchemaMeta::default(),
            fields: IndexMap::new(),
        }
    }

    /// Inherit fields and meta from a base class. Fields declared afterwards
    /// override inherited ones of the same name in place.
    pub fn extends(mut self, base: &Schema) -> Self {
        for field in base.fields() {
            self.fields.insert(field.name.clone(), field.clone());
        }
        self.meta = base.meta.clone();
        self.backend = base.backend.clone();
        self
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn engine(mut self, engine: impl Into<String>) -> Self {
        self.meta.engine = Some(engine.into());
        self
    }

    pub fn engine_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.meta.engine_params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn order_by<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.meta.order_by = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn partition_by(mut self, expression: impl Into<String>) -> Self {
        self.meta.partition_by = Some(expression.into());
        self
    }

    pub fn primary_key<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.meta.primary_key = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn ttl(mut self, ttl: impl Into<String>) -> Self {
        self.meta.ttl = Some(ttl.into());
        self
    }

    pub fn setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.settings.insert(key.into(), value.into());
        self
    }

    pub fn table_index(mut self, index: TableIndex) -> Self {
        self.meta.indexes.push(index);
        self
    }

    pub fn id_field(mut self, name: impl Into<String>) -> Self {
        self.meta.id_field = name.into();
        self
    }

    pub fn schemaless(mut self) -> Self {
        self.meta.schemafull = false;
        self
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    /// Finalize the class. Checks field-name uniqueness against `db_name`
    /// collisions, pattern validity, and meta consistency.
    pub fn build(self) -> Result<Arc<Schema>> {
        let collection = self
            .collection
            .unwrap_or_else(|| self.name.to_lowercase());

        let mut seen_db_names: HashMap<String, String> = HashMap::new();
        for field in self.fields.values() {
            if let Some(previous) =
                seen_db_names.insert(field.db_name.clone(), field.name.clone())
            {
                return Err(StoreError::schema(format!(
                    "fields '{previous}' and '{}' on '{collection}' both store as '{}'",
                    field.name, field.db_name
                )));
            }
            if let Some(pattern) = &field.constraints.pattern {
                Regex::new(pattern).map_err(|e| {
                    StoreError::schema(format!(
                        "field '{}' on '{collection}' has an invalid pattern: {e}",
                        field.name
                    ))
                })?;
            }
            if let FieldKind::FixedLength(0) = field.kind.scalar() {
                return Err(StoreError::schema(format!(
                    "field '{}' on '{collection}' declares a zero-length fixed string",
                    field.name
                )));
            }
            if let FieldKind::Enum(values) = field.kind.scalar()
                && values.is_empty()
            {
                return Err(StoreError::schema(format!(
                    "field '{}' on '{collection}' declares an empty enum",
                    field.name
                )));
            }
        }

        for index in &self.meta.indexes {
            for indexed in &index.fields {
                if !self.fields.contains_key(indexed) {
                    return Err(StoreError::schema(format!(
                        "index '{}' on '{collection}' names unknown field '{indexed}'",
                        index.effective_name()
                    )));
                }
            }
        }

        Ok(Arc::new(Schema {
            name: self.name,
            collection,
            backend: self.backend,
            meta: self.meta,
            fields: self.fields,
        }))
    }
}

/// Process-wide registry of document classes, keyed by collection name.
///
/// Reference fields resolve against this catalog at registration. Cycles are
/// allowed because resolution is by name: register mutually-referencing
/// classes with [`SchemaCatalog::register_all`].
#[derive(Default)]
pub struct SchemaCatalog {
    schemas: RwLock<HashMap<String, Arc<Schema>>>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one schema. Every reference target must already be known (or
    /// be the schema itself).
    pub fn register(&self, schema: Arc<Schema>) -> Result<()> {
        self.register_all([schema])
    }

    /// Register a batch of schemas, resolving references across the whole
    /// batch so cyclic classes can be declared together.
    pub fn register_all<I>(&self, schemas: I) -> Result<()>
    where
        I: IntoIterator<Item = Arc<Schema>>,
    {
        let batch: Vec<Arc<Schema>> = schemas.into_iter().collect();
        let mut guard = self
            .schemas
            .write()
            .unwrap_or_else(|poison| poison.into_inner());

        for schema in &batch {
            for (field, target) in schema.reference_fields() {
                let known = guard.contains_key(target)
                    || batch.iter().any(|s| s.collection() == target);
                if !known {
                    return Err(StoreError::schema(format!(
                        "field '{}' on '{}' references unknown class '{target}'",
                        field.name,
                        schema.collection()
                    )));
                }
            }
        }

        for schema in batch {
            guard.insert(schema.collection().to_string(), schema);
        }
        Ok(())
    }

    pub fn get(&self, collection: &str) -> Option<Arc<Schema>> {
        self.schemas
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .get(collection)
            .cloned()
    }

    pub fn require(&self, collection: &str) -> Result<Arc<Schema>> {
        self.get(collection)
            .ok_or_else(|| StoreError::schema(format!("unknown document class '{collection}'")))
    }

    pub fn clear(&self) {
        self.schemas
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Field;

    fn user_schema() -> Arc<Schema> {
        Schema::builder("User")
            .backend("surrealdb")
            .field(Field::text("username").required())
            .field(Field::text("email").required())
            .field(Field::integer("age"))
            .build()
            .unwrap()
    }

    #[test]
    fn collection_defaults_to_lowercase_class_name() {
        let schema = user_schema();
        assert_eq!(schema.collection(), "user");
        assert_eq!(schema.name(), "User");
    }

    #[test]
    fn declaration_order_is_preserved() {
        let schema = user_schema();
        let names: Vec<&str> = schema.fields().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["username", "email", "age"]);
    }

    #[test]
    fn subclass_overrides_parent_field_in_place() {
        let base = user_schema();
        let admin = Schema::builder("Admin")
            .extends(&base)
            .collection("admin")
            .field(Field::integer("age").required())
            .field(Field::text("scope"))
            .build()
            .unwrap();

        let names: Vec<&str> = admin.fields().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["username", "email", "age", "scope"]);
        assert!(admin.field("age").unwrap().required);
    }

    #[test]
    fn duplicate_db_names_are_rejected() {
        let result = Schema::builder("Broken")
            .field(Field::text("a").db_name("shared"))
            .field(Field::text("b").db_name("shared"))
            .build();
        assert!(matches!(result, Err(StoreError::Schema(_))));
    }

    #[test]
    fn table_index_must_name_known_fields() {
        let result = Schema::builder("Broken")
            .field(Field::text("a"))
            .table_index(TableIndex::on(["missing"]))
            .build();
        assert!(matches!(result, Err(StoreError::Schema(_))));
    }

    #[test]
    fn catalog_rejects_unresolved_references() {
        let catalog = SchemaCatalog::new();
        let with_ref = Schema::builder("Order")
            .field(Field::reference("buyer", "user"))
            .build()
            .unwrap();

        assert!(catalog.register(with_ref.clone()).is_err());

        catalog.register(user_schema()).unwrap();
        assert!(catalog.register(with_ref).is_ok());
    }

    #[test]
    fn catalog_allows_cycles_in_one_batch() {
        let catalog = SchemaCatalog::new();
        let a = Schema::builder("NodeA")
            .collection("node_a")
            .field(Field::reference("peer", "node_b"))
            .build()
            .unwrap();
        let b = Schema::builder("NodeB")
            .collection("node_b")
            .field(Field::reference("peer", "node_a"))
            .build()
            .unwrap();

        catalog.register_all([a, b]).unwrap();
        assert!(catalog.get("node_a").is_some());
        assert!(catalog.get("node_b").is_some());
    }

    #[test]
    fn self_reference_resolves() {
        let catalog = SchemaCatalog::new();
        let node = Schema::builder("Node")
            .collection("node")
            .field(Field::reference("parent", "node"))
            .build()
            .unwrap();
        catalog.register(node).unwrap();
    }
}
