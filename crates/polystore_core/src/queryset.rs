use crate::backend::SelectRequest;
use crate::capabilities::Capabilities;
use crate::document::Document;
use crate::error::{Result, StoreError};
use crate::fields::to_db;
use crate::query::{
    CondOp, Filter, OrderBy, QueryExpression, compile_conjunction, parse_lookup,
};
use crate::registry::{Connection, catalog};
use crate::retry::with_deadline;
use crate::schema::Schema;
use crate::value::{Row, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Lazy, chainable query over one document class.
///
/// Builder calls return a new query set; terminals (`all`, `first`, `get`,
/// `count`, `delete`, `update`, `explain`) lower the tree to the
/// connection's dialect and execute.
#[derive(Clone)]
pub struct QuerySet {
    schema: Arc<Schema>,
    connection: Connection,
    filters: Vec<Filter>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    projection: Vec<String>,
    fetches: Vec<String>,
    deadline: Option<Duration>,
    /// First malformed named lookup, surfaced when the query executes.
    lookup_error: Option<String>,
}

impl QuerySet {
    pub fn new(schema: Arc<Schema>, connection: Connection) -> Self {
        Self {
            schema,
            connection,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            projection: Vec::new(),
            fetches: Vec::new(),
            deadline: None,
            lookup_error: None,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Add an expression-style predicate.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add a named lookup (`"age__gt"`). Invalid lookups surface when the
    /// query executes.
    pub fn filter_by(mut self, key: &str, value: impl Into<Value>) -> Self {
        match parse_lookup(key, value.into()) {
            Ok(filter) => self.filters.push(filter),
            Err(err) => {
                self.lookup_error.get_or_insert_with(|| err.to_string());
            }
        }
        self
    }

    /// Negate a predicate.
    pub fn exclude(mut self, filter: Filter) -> Self {
        self.filters.push(filter.not());
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn order_asc(self, field: impl Into<String>) -> Self {
        self.order_by(OrderBy::asc(field))
    }

    pub fn order_desc(self, field: impl Into<String>) -> Self {
        self.order_by(OrderBy::desc(field))
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Project to the named fields only.
    pub fn only<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Ask for the named reference fields to be dereferenced inline.
    pub fn fetch<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fetches
            .extend(fields.into_iter().map(Into::into));
        self
    }

    /// Deadline for the terminal operation; expiry yields `Cancelled`.
    pub fn within(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The backend-agnostic expression this query set describes.
    pub fn expression(&self) -> QueryExpression {
        let filter = self
            .filters
            .iter()
            .cloned()
            .reduce(|left, right| left.and(right));
        QueryExpression {
            filter,
            order_by: self.order_by.clone(),
            limit: self.limit,
            offset: self.offset,
            projection: self.projection.clone(),
            fetch: self.fetches.clone(),
        }
    }

    /// Lower the filters to the connection's dialect. This is the string
    /// form both query syntaxes reduce to.
    pub fn lowered_conditions(&self) -> Result<Vec<String>> {
        if let Some(message) = &self.lookup_error {
            return Err(StoreError::schema(message.clone()));
        }
        for filter in &self.filters {
            filter.validate(&self.schema)?;
        }
        compile_conjunction(&self.filters, self.connection.backend())
    }

    fn select_request(&self) -> Result<SelectRequest> {
        self.expression().validate(&self.schema)?;
        let conditions = self.lowered_conditions()?;

        let fields = if self.projection.is_empty() {
            None
        } else {
            let mut projected: Vec<String> = Vec::new();
            for name in &self.projection {
                let field = self.schema.require_field(name)?;
                projected.push(field.db_name.clone());
            }
            Some(projected)
        };

        let native_fetch = self
            .connection
            .backend()
            .supports(Capabilities::REFERENCES);

        Ok(SelectRequest {
            conditions,
            fields,
            limit: self.limit,
            offset: self.offset,
            order_by: self.order_by.clone(),
            fetch: if native_fetch {
                self.fetches.clone()
            } else {
                Vec::new()
            },
        })
    }

    async fn run<T, Fut>(&self, future: Fut) -> Result<T>
    where
        Fut: std::future::Future<Output = Result<T>>,
    {
        match self.deadline {
            Some(deadline) => with_deadline(deadline, future).await,
            None => future.await,
        }
    }

    /// Execute and return all matching documents.
    pub async fn all(&self) -> Result<Vec<Document>> {
        self.run(self.fetch_documents()).await
    }

    async fn fetch_documents(&self) -> Result<Vec<Document>> {
        let request = self.select_request()?;
        let mut rows = self
            .connection
            .backend()
            .select(self.schema.collection(), &request)
            .await?;

        // Stores without joinless dereference get one batched follow-up
        // read per referent class, merged by id; caller-visible semantics
        // are identical.
        if !self.fetches.is_empty() && request.fetch.is_empty() {
            self.merge_fetched(&mut rows).await?;
        }

        rows.into_iter()
            .map(|row| Document::from_db(self.schema.clone(), row, &self.connection))
            .collect()
    }

    async fn merge_fetched(&self, rows: &mut [Row]) -> Result<()> {
        for fetch_name in &self.fetches {
            let field = self.schema.require_field(fetch_name)?;
            let target = match &field.kind {
                crate::fields::FieldKind::Reference { target } => target.clone(),
                _ => continue,
            };
            let target_schema = catalog().require(&target)?;

            let mut wanted: Vec<Value> = Vec::new();
            for row in rows.iter() {
                if let Some(Value::Text(id)) = row.get(&field.db_name)
                    && !wanted.iter().any(|v| v.as_str() == Some(id.as_str()))
                {
                    wanted.push(Value::Text(id.clone()));
                }
            }
            if wanted.is_empty() {
                continue;
            }

            let backend = self.connection.backend();
            let condition = backend.build_condition(
                target_schema.id_field(),
                CondOp::In,
                &Value::Array(wanted),
            )?;
            let fetched = backend
                .select(
                    target_schema.collection(),
                    &SelectRequest::with_conditions(vec![condition]),
                )
                .await?;

            let mut by_id: HashMap<String, Row> = HashMap::new();
            for row in fetched {
                if let Some(Value::Text(id)) = row.get(target_schema.id_field()) {
                    by_id.insert(id.clone(), row.clone());
                    if let Some((_, bare)) = id.split_once(':') {
                        by_id.insert(bare.to_string(), row);
                    }
                }
            }

            for row in rows.iter_mut() {
                let Some(Value::Text(id)) = row.get(&field.db_name).cloned() else {
                    continue;
                };
                let resolved = by_id
                    .get(&id)
                    .or_else(|| id.split_once(':').and_then(|(_, bare)| by_id.get(bare)));
                if let Some(referent) = resolved {
                    row.insert(field.db_name.clone(), Value::Object(referent.clone()));
                }
            }
        }
        Ok(())
    }

    /// Bulk-create documents through the backend's preferred write path.
    /// Validation failures abort before any I/O.
    pub async fn insert_many(&self, documents: Vec<Document>) -> Result<Vec<Document>> {
        let mut rows = Vec::with_capacity(documents.len());
        for document in &documents {
            document.validate()?;
            rows.push(document.to_db(&self.connection)?);
        }

        let stored = self
            .run(async {
                self.connection
                    .backend()
                    .insert_many(self.schema.collection(), rows)
                    .await
            })
            .await?;
        stored
            .into_iter()
            .map(|row| Document::from_db(self.schema.clone(), row, &self.connection))
            .collect()
    }

    /// First matching document, or `None` when nothing matches.
    pub async fn first(&self) -> Result<Option<Document>> {
        let mut documents = self.clone().limit(1).all().await?;
        Ok(documents.pop())
    }

    /// Fetch by id. Fails with `NotFound` when the record does not exist.
    pub async fn get(&self, id: impl Into<Value>) -> Result<Document> {
        let id = id.into();
        let condition = self.connection.backend().build_condition(
            self.schema.id_field(),
            CondOp::Eq,
            &id,
        )?;
        let request = SelectRequest {
            conditions: {
                let mut conditions = self.lowered_conditions()?;
                conditions.push(condition);
                conditions
            },
            limit: Some(1),
            ..Default::default()
        };

        let mut rows = self
            .run(async {
                self.connection
                    .backend()
                    .select(self.schema.collection(), &request)
                    .await
            })
            .await?;
        let Some(row) = rows.pop() else {
            return Err(StoreError::NotFound);
        };
        Document::from_db(self.schema.clone(), row, &self.connection)
    }

    pub async fn count(&self) -> Result<u64> {
        let conditions = self.lowered_conditions()?;
        self.run(async {
            self.connection
                .backend()
                .count(self.schema.collection(), &conditions)
                .await
        })
        .await
    }

    /// Delete all matching records, returning the deletion count.
    pub async fn delete(&self) -> Result<u64> {
        let conditions = self.lowered_conditions()?;
        self.run(async {
            self.connection
                .backend()
                .delete(self.schema.collection(), &conditions)
                .await
        })
        .await
    }

    /// Update all matching records with a partial row, returning the
    /// affected count. Patch values are validated and serialized per field
    /// before I/O.
    pub async fn update<I, K>(&self, patch: I) -> Result<u64>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let encoding = self.connection.backend().encoding();
        let mut stored_patch = Row::new();
        for (key, value) in patch {
            let key: String = key.into();
            let field = self.schema.require_field(&key)?;
            let validated = field.validate(value)?;
            stored_patch.insert(field.db_name.clone(), to_db(field, &validated, encoding)?);
        }

        let conditions = self.lowered_conditions()?;
        let updated = self
            .run(async {
                self.connection
                    .backend()
                    .update(self.schema.collection(), &conditions, stored_patch)
                    .await
            })
            .await?;
        Ok(updated.len() as u64)
    }

    /// Backend-native query plan for this query.
    pub async fn explain(&self) -> Result<serde_json::Value> {
        let request = self.select_request()?;
        self.run(async {
            self.connection
                .backend()
                .explain(self.schema.collection(), &request)
                .await
        })
        .await
    }
}

/// `objects` entry point: a fresh query set for a document class.
pub fn objects(schema: Arc<Schema>, connection: Connection) -> QuerySet {
    QuerySet::new(schema, connection)
}
