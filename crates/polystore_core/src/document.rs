use crate::backend::SelectRequest;
use crate::error::{Result, StoreError};
use crate::fields::{from_db, to_db};
use crate::query::CondOp;
use crate::registry::Connection;
use crate::schema::Schema;
use crate::value::{Row, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

/// One document instance: typed values plus change tracking.
///
/// `changed` holds the names of fields written since load or save; updates
/// only ever send those. The id is assigned exactly once, either by the
/// caller before the first save or by the backend during it.
#[derive(Debug, Clone)]
pub struct Document {
    schema: Arc<Schema>,
    id: Option<Value>,
    values: Row,
    changed: BTreeSet<String>,
    loaded_from_db: bool,
}

impl Document {
    /// Construct an instance from explicit values.
    ///
    /// Unknown names fail with a schema error. Defaults are applied only for
    /// names absent from the call and do not count as changes.
    pub fn new<I, K>(schema: Arc<Schema>, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut document = Self {
            schema,
            id: None,
            values: Row::new(),
            changed: BTreeSet::new(),
            loaded_from_db: false,
        };

        for (key, value) in values {
            let key: String = key.into();
            if key == document.schema.id_field() {
                document.id = Some(value);
                continue;
            }
            document.set(&key, value)?;
        }

        let defaults: Vec<(String, Value)> = document
            .schema
            .fields()
            .filter(|field| !document.values.contains_key(&field.name))
            .filter_map(|field| field.default_value().map(|v| (field.name.clone(), v)))
            .collect();
        for (name, value) in defaults {
            let field = document.schema.require_field(&name)?;
            let validated = field.validate(value)?;
            document.values.insert(name, validated);
        }

        Ok(document)
    }

    /// Empty instance with only defaults applied.
    pub fn empty(schema: Arc<Schema>) -> Result<Self> {
        Self::new(schema, std::iter::empty::<(String, Value)>())
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn id(&self) -> Option<&Value> {
        self.id.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded_from_db
    }

    pub fn changed(&self) -> &BTreeSet<String> {
        &self.changed
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Assign a field value. Coerces and validates immediately and records
    /// the name in `changed`.
    pub fn set(&mut self, name: &str, value: Value) -> Result<()> {
        let field = self.schema.require_field(name)?;
        let validated = field.validate(value)?;
        self.values.insert(name.to_string(), validated);
        self.changed.insert(name.to_string());
        Ok(())
    }

    /// Validate every effective value, including required-field presence.
    /// Runs before any I/O on save.
    pub fn validate(&self) -> Result<()> {
        for field in self.schema.fields() {
            if field.materialized.is_some() {
                continue;
            }
            let effective = self.values.get(&field.name).cloned().unwrap_or(Value::Null);
            field.validate(effective)?;
        }
        Ok(())
    }

    /// Serialize to a stored row for the connection's backend encoding.
    /// Materialized columns are computed by the store and excluded.
    pub fn to_db(&self, connection: &Connection) -> Result<Row> {
        let encoding = connection.backend().encoding();
        let mut row = Row::new();
        if let Some(id) = &self.id {
            row.insert(self.schema.id_field().to_string(), id.clone());
        }
        for field in self.schema.fields() {
            if field.materialized.is_some() {
                continue;
            }
            let Some(value) = self.values.get(&field.name) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            row.insert(field.db_name.clone(), to_db(field, value, encoding)?);
        }
        Ok(row)
    }

    /// Rebuild an instance from a stored row. Unknown stored keys are
    /// ignored; the instance comes back clean (`changed` empty, loaded).
    pub fn from_db(schema: Arc<Schema>, row: Row, connection: &Connection) -> Result<Self> {
        let encoding = connection.backend().encoding();
        let mut id = None;
        let mut values = Row::new();

        for field in schema.fields() {
            if let Some(stored) = row.get(&field.db_name) {
                if stored.is_null() {
                    continue;
                }
                values.insert(field.name.clone(), from_db(field, stored.clone(), encoding)?);
            }
        }
        if let Some(raw_id) = row.get(schema.id_field()) {
            if !raw_id.is_null() {
                id = Some(raw_id.clone());
            }
        }

        Ok(Self {
            schema,
            id,
            values,
            changed: BTreeSet::new(),
            loaded_from_db: true,
        })
    }

    fn id_condition(&self, connection: &Connection) -> Result<String> {
        let id = self.id.as_ref().ok_or(StoreError::NotFound)?;
        connection
            .backend()
            .build_condition(self.schema.id_field(), CondOp::Eq, id)
    }

    /// Persist the instance: insert on first save, update of changed fields
    /// afterwards. Validation failures abort before any I/O. After a
    /// successful save `changed` is empty and the instance counts as loaded.
    pub async fn save(&mut self, connection: &Connection) -> Result<()> {
        self.validate()?;
        let collection = self.schema.collection().to_string();

        if self.id.is_none() {
            let row = self.to_db(connection)?;
            let stored = connection.backend().insert(&collection, row).await?;
            if let Some(raw_id) = stored.get(self.schema.id_field()) {
                if !raw_id.is_null() {
                    self.id = Some(raw_id.clone());
                }
            }
        } else if !self.changed.is_empty() {
            let encoding = connection.backend().encoding();
            let mut patch = Row::new();
            for name in &self.changed {
                let field = self.schema.require_field(name)?;
                let value = self.values.get(name).cloned().unwrap_or(Value::Null);
                patch.insert(field.db_name.clone(), to_db(field, &value, encoding)?);
            }
            let condition = self.id_condition(connection)?;
            connection
                .backend()
                .update(&collection, &[condition], patch)
                .await?;
        }

        self.changed.clear();
        self.loaded_from_db = true;
        Ok(())
    }

    /// Delete the stored record. Requires an assigned id.
    pub async fn delete(&self, connection: &Connection) -> Result<u64> {
        let condition = self.id_condition(connection)?;
        connection
            .backend()
            .delete(self.schema.collection(), &[condition])
            .await
    }

    /// Reload all values from the store, discarding unsaved changes.
    pub async fn refresh(&mut self, connection: &Connection) -> Result<()> {
        let condition = self.id_condition(connection)?;
        let request = SelectRequest {
            conditions: vec![condition],
            limit: Some(1),
            ..Default::default()
        };
        let mut rows = connection
            .backend()
            .select(self.schema.collection(), &request)
            .await?;
        let Some(row) = rows.pop() else {
            return Err(StoreError::NotFound);
        };

        let fresh = Self::from_db(self.schema.clone(), row, connection)?;
        self.values = fresh.values;
        if self.id.is_none() {
            self.id = fresh.id;
        }
        self.changed.clear();
        self.loaded_from_db = true;
        Ok(())
    }

    /// Fully-qualified record pointer (`collection:id`) used for graph
    /// operations.
    pub fn record_pointer(&self) -> Result<Value> {
        let id = self.id.as_ref().ok_or(StoreError::NotFound)?;
        Ok(match id {
            Value::Text(text) if text.contains(':') => id.clone(),
            other => Value::Text(format!(
                "{}:{}",
                self.schema.collection(),
                other.as_display_string()
            )),
        })
    }

    /// Create a graph edge from this document to another. Fails with a
    /// capability error on backends without graph relations.
    pub async fn create_relation(
        &self,
        connection: &Connection,
        relation: &str,
        other: &Document,
        attributes: Row,
    ) -> Result<()> {
        let from = self.record_pointer()?;
        let to = other.record_pointer()?;
        connection
            .backend()
            .create_relation(relation, &from, &to, attributes)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Field;

    fn schema() -> Arc<Schema> {
        Schema::builder("User")
            .backend("surrealdb")
            .field(Field::text("username").required())
            .field(Field::text("email").required())
            .field(Field::integer("age"))
            .field(Field::boolean("is_active").default_fn(|| Value::Bool(true)))
            .build()
            .unwrap()
    }

    #[test]
    fn changed_tracks_only_explicit_assignments() {
        let doc = Document::new(
            schema(),
            [
                ("username", Value::Text("johndoe".into())),
                ("email", Value::Text("john.doe@example.com".into())),
            ],
        )
        .unwrap();

        let changed: Vec<&str> = doc.changed().iter().map(String::as_str).collect();
        assert_eq!(changed, vec!["email", "username"]);

        // The default applied to is_active is visible but not a change.
        assert_eq!(doc.get("is_active"), Some(&Value::Bool(true)));
        assert!(!doc.changed().contains("is_active"));
    }

    #[test]
    fn unknown_construction_key_is_a_schema_error() {
        let result = Document::new(schema(), [("nickname", Value::Text("jd".into()))]);
        assert!(matches!(result, Err(StoreError::Schema(_))));
    }

    #[test]
    fn default_is_not_applied_over_explicit_value() {
        let doc = Document::new(schema(), [("is_active", Value::Bool(false))]).unwrap();
        assert_eq!(doc.get("is_active"), Some(&Value::Bool(false)));
        assert!(doc.changed().contains("is_active"));
    }

    #[test]
    fn set_validates_and_records() {
        let mut doc = Document::empty(schema()).unwrap();
        doc.set("age", Value::Text("30".into())).unwrap();
        assert_eq!(doc.get("age"), Some(&Value::Int(30)));
        assert!(doc.changed().contains("age"));

        assert!(doc.set("age", Value::Text("old".into())).is_err());
    }

    #[test]
    fn validate_catches_missing_required_fields() {
        let doc = Document::new(schema(), [("username", Value::Text("jd".into()))]).unwrap();
        let err = doc.validate().unwrap_err();
        match err {
            StoreError::Validation { field, .. } => assert_eq!(field, "email"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn id_passed_at_construction_is_not_a_change() {
        let doc = Document::new(
            schema(),
            [
                ("id", Value::Text("user:jd".into())),
                ("username", Value::Text("jd".into())),
            ],
        )
        .unwrap();
        assert_eq!(doc.id(), Some(&Value::Text("user:jd".into())));
        assert!(!doc.changed().contains("id"));
    }

    #[test]
    fn record_pointer_qualifies_bare_ids() {
        let mut doc = Document::empty(schema()).unwrap();
        doc.id = Some(Value::Text("jd".into()));
        assert_eq!(
            doc.record_pointer().unwrap(),
            Value::Text("user:jd".into())
        );

        doc.id = Some(Value::Text("user:jd".into()));
        assert_eq!(
            doc.record_pointer().unwrap(),
            Value::Text("user:jd".into())
        );
    }
}
