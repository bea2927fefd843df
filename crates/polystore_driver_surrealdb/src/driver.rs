use async_trait::async_trait;
use polystore_core::{
    Backend, BackendFactory, BackendMetadata, Capabilities, CondOp, ConnectionConfig,
    CreateTableOptions, Field, FieldKind, Func, FunctionDialect, LogicalOp, Manager, Pool,
    PoolConfig, PoolGuard, Result, Row, Schema, SelectRequest, StoreCategory, StoreError,
    TransactionHandle, Value, ValueEncoding, ViewDefinition,
};
use std::sync::Arc;
use std::time::Duration;
use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect};
use surrealdb::opt::auth::Root;

static METADATA: BackendMetadata = BackendMetadata {
    id: "surrealdb",
    display_name: "SurrealDB",
    description: "Document/graph store with direct record access and joinless FETCH",
    category: StoreCategory::DocumentGraph,
    capabilities: Capabilities::DOCUMENT_GRAPH_BASE,
    encoding: ValueEncoding::DOCUMENT_GRAPH,
};

/// Pool manager for SurrealDB sessions.
pub struct SurrealManager {
    url: String,
    namespace: String,
    database: String,
    username: Option<String>,
    password: Option<String>,
}

#[async_trait]
impl Manager for SurrealManager {
    type Conn = Surreal<Any>;

    async fn create(&self) -> Result<Surreal<Any>> {
        let conn = connect(&self.url)
            .await
            .map_err(|e| StoreError::transport(format!("surrealdb connect: {e}")))?;

        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            conn.signin(Root {
                username: username.as_str(),
                password: password.as_str(),
            })
            .await
            .map_err(|e| StoreError::transport(format!("surrealdb signin: {e}")))?;
        }

        conn.use_ns(&self.namespace)
            .use_db(&self.database)
            .await
            .map_err(|e| StoreError::transport(format!("surrealdb use ns/db: {e}")))?;

        Ok(conn)
    }

    async fn check(&self, conn: &mut Surreal<Any>) -> Result<()> {
        conn.health()
            .await
            .map_err(|e| StoreError::transport(format!("surrealdb health: {e}")))
    }
}

/// Opens [`SurrealBackend`]s from a connection config.
pub struct SurrealFactory;

#[async_trait]
impl BackendFactory for SurrealFactory {
    fn name(&self) -> &'static str {
        "surrealdb"
    }

    async fn open(
        &self,
        config: &ConnectionConfig,
        pool: PoolConfig,
    ) -> Result<Arc<dyn Backend>> {
        let manager = SurrealManager {
            url: config.require("url")?.to_string(),
            namespace: config.get_or("namespace", "test").to_string(),
            database: config.get_or("database", "test").to_string(),
            username: config.get("username").map(str::to_string),
            password: config.get("password").map(str::to_string),
        };
        let pool = Pool::new(manager, pool).await;
        Ok(Arc::new(SurrealBackend { pool }))
    }
}

/// SurrealQL rewrites of the portable function set.
struct SurrealFunctions;

impl FunctionDialect for SurrealFunctions {
    fn render(&self, func: &Func) -> Result<String> {
        Ok(match func {
            Func::Count => "count()".to_string(),
            Func::Sum(field) => format!("math::sum({field})"),
            Func::Avg(field) => format!("math::mean({field})"),
            Func::Min(field) => format!("math::min({field})"),
            Func::Max(field) => format!("math::max({field})"),
            Func::CountDistinct(field) => format!("count(array::distinct({field}))"),
            Func::ToDate(field) => format!("time::day({field})"),
            Func::ToYearMonth(field) => format!("time::format({field}, '%Y%m')"),
            Func::Has(field, value) => {
                format!("{} INSIDE {field}", format_surreal_value(value))
            }
            Func::Length(field) => format!("string::length({field})"),
            Func::Lower(field) => format!("string::lowercase({field})"),
            Func::Upper(field) => format!("string::uppercase({field})"),
            Func::Round(field, digits) => format!("math::round({field}, {digits})"),
        })
    }
}

static FUNCTIONS: SurrealFunctions = SurrealFunctions;

/// SurrealDB backend over a pooled connection set.
pub struct SurrealBackend {
    pool: Pool<SurrealManager>,
}

impl SurrealBackend {
    async fn conn(&self) -> Result<PoolGuard<SurrealManager>> {
        self.pool.acquire().await
    }

    /// Run a query and return the rows of its first statement.
    async fn query_rows(&self, op: LogicalOp, table: &str, query: &str) -> Result<Vec<Row>> {
        let conn = self.conn().await?;
        let mut response = conn
            .query(query)
            .await
            .map_err(|e| map_error(op, Some(table), e))?;
        let values: Vec<serde_json::Value> = response
            .take(0)
            .map_err(|e| map_error(op, Some(table), e))?;
        Ok(values.into_iter().map(json_to_row).collect())
    }

    /// Run a statement where the result is not needed.
    async fn execute(&self, op: LogicalOp, table: Option<&str>, query: &str) -> Result<()> {
        let conn = self.conn().await?;
        conn.query(query)
            .await
            .map_err(|e| map_error(op, table, e))?
            .check()
            .map_err(|e| map_error(op, table, e))?;
        Ok(())
    }

    fn render_select(&self, table: &str, request: &SelectRequest) -> String {
        let projection = match &request.fields {
            Some(fields) if !fields.is_empty() => fields.join(", "),
            // Rewrite the record id to its textual form server-side.
            _ => "*, type::string(id) AS id".to_string(),
        };

        let mut query = format!("SELECT {projection} FROM {table}");
        if !request.conditions.is_empty() {
            query.push_str(&format!(" WHERE {}", request.conditions.join(" AND ")));
        }
        if !request.order_by.is_empty() {
            let order: Vec<String> = request
                .order_by
                .iter()
                .map(|o| format!("{} {}", o.field, o.direction.keyword()))
                .collect();
            query.push_str(&format!(" ORDER BY {}", order.join(", ")));
        }
        if let Some(limit) = request.limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = request.offset {
            query.push_str(&format!(" START {offset}"));
        }
        if !request.fetch.is_empty() {
            query.push_str(&format!(" FETCH {}", request.fetch.join(", ")));
        }
        query
    }
}

#[async_trait]
impl Backend for SurrealBackend {
    fn metadata(&self) -> &'static BackendMetadata {
        &METADATA
    }

    fn function_dialect(&self) -> &dyn FunctionDialect {
        &FUNCTIONS
    }

    async fn create_table(&self, schema: &Schema, options: &CreateTableOptions) -> Result<()> {
        let table = schema.collection();
        let exists = if options.if_not_exists {
            "IF NOT EXISTS "
        } else {
            ""
        };
        let schemafull = if options.schemafull.unwrap_or(schema.meta().schemafull) {
            "SCHEMAFULL"
        } else {
            "SCHEMALESS"
        };
        self.execute(
            LogicalOp::CreateTable,
            Some(table),
            &format!("DEFINE TABLE {exists}{table} {schemafull}"),
        )
        .await?;

        if schemafull == "SCHEMAFULL" {
            for field in schema.fields() {
                if field.name == schema.id_field() {
                    continue;
                }
                let mut statement = format!(
                    "DEFINE FIELD {exists}{} ON {table} TYPE {}",
                    field.db_name,
                    self.get_field_type(field)
                );
                if field.required {
                    statement.push_str(" ASSERT $value != NONE");
                }
                self.execute(LogicalOp::CreateTable, Some(table), &statement)
                    .await?;
            }
        }

        for index in &schema.meta().indexes {
            let mut statement = format!(
                "DEFINE INDEX {exists}{} ON {table} COLUMNS {}",
                index.effective_name(),
                index.fields.join(", ")
            );
            if index.unique {
                statement.push_str(" UNIQUE");
            }
            self.execute(LogicalOp::CreateTable, Some(table), &statement)
                .await?;
        }
        for field in schema.fields() {
            for spec in &field.indexes {
                let name = spec
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("idx_{table}_{}", field.db_name));
                let mut statement =
                    format!("DEFINE INDEX {exists}{name} ON {table} COLUMNS {}", field.db_name);
                if spec.unique {
                    statement.push_str(" UNIQUE");
                }
                self.execute(LogicalOp::CreateTable, Some(table), &statement)
                    .await?;
            }
        }
        Ok(())
    }

    async fn drop_table(&self, table: &str, if_exists: bool) -> Result<()> {
        let clause = if if_exists { "IF EXISTS " } else { "" };
        self.execute(
            LogicalOp::DropTable,
            Some(table),
            &format!("REMOVE TABLE {clause}{table}"),
        )
        .await
    }

    async fn insert(&self, table: &str, mut row: Row) -> Result<Row> {
        let id = row.shift_remove("id");
        let content = format_surreal_value(&Value::Object(row.clone()));

        let query = match &id {
            Some(id) => format!(
                "CREATE {} CONTENT {content} RETURN AFTER",
                record_literal(table, id)
            ),
            None => format!("CREATE {table} CONTENT {content} RETURN AFTER"),
        };

        let created = match self.query_rows(LogicalOp::Insert, table, &query).await {
            Ok(rows) => rows,
            // Writing an existing record id degrades to an update of it.
            Err(err) if err.to_string().contains("already exists") => {
                let id = id.clone().unwrap_or(Value::Null);
                let query = format!(
                    "UPDATE {} CONTENT {content} RETURN AFTER",
                    record_literal(table, &id)
                );
                self.query_rows(LogicalOp::Insert, table, &query).await?
            }
            Err(err) => return Err(err),
        };

        created.into_iter().next().ok_or_else(|| {
            StoreError::backend(LogicalOp::Insert, Some(table), "create returned no row")
        })
    }

    async fn insert_many(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut without_id = Vec::new();
        let mut with_id = Vec::new();
        for row in rows {
            if row.get("id").is_some_and(|id| !id.is_null()) {
                with_id.push(row);
            } else {
                without_id.push(row);
            }
        }

        let mut stored = Vec::new();
        if !without_id.is_empty() {
            let body = format_surreal_value(&Value::Array(
                without_id.into_iter().map(Value::Object).collect(),
            ));
            let query = format!("INSERT INTO {table} {body}");
            stored.extend(self.query_rows(LogicalOp::InsertMany, table, &query).await?);
        }
        for row in with_id {
            stored.push(self.insert(table, row).await?);
        }
        Ok(stored)
    }

    async fn select(&self, table: &str, request: &SelectRequest) -> Result<Vec<Row>> {
        let query = self.render_select(table, request);
        self.query_rows(LogicalOp::Select, table, &query).await
    }

    async fn count(&self, table: &str, conditions: &[String]) -> Result<u64> {
        let mut query = format!("SELECT count() FROM {table}");
        if !conditions.is_empty() {
            query.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
        }
        query.push_str(" GROUP ALL");

        let rows = self.query_rows(LogicalOp::Count, table, &query).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_i64)
            .unwrap_or(0) as u64)
    }

    async fn update(&self, table: &str, conditions: &[String], patch: Row) -> Result<Vec<Row>> {
        if patch.is_empty() {
            return Ok(Vec::new());
        }
        let assignments: Vec<String> = patch
            .iter()
            .map(|(key, value)| format!("{key} = {}", format_surreal_value(value)))
            .collect();
        let mut query = format!("UPDATE {table} SET {}", assignments.join(", "));
        if !conditions.is_empty() {
            query.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
        }
        query.push_str(" RETURN AFTER");
        self.query_rows(LogicalOp::Update, table, &query).await
    }

    async fn delete(&self, table: &str, conditions: &[String]) -> Result<u64> {
        let mut query = format!("DELETE {table}");
        if !conditions.is_empty() {
            query.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
        }
        query.push_str(" RETURN BEFORE");
        let deleted = self.query_rows(LogicalOp::Delete, table, &query).await?;
        Ok(deleted.len() as u64)
    }

    async fn execute_raw(&self, query: &str, params: Option<Row>) -> Result<serde_json::Value> {
        let conn = self.conn().await?;
        let mut request = conn.query(query);
        if let Some(params) = params {
            for (key, value) in params {
                request = request.bind((key, value.to_json()));
            }
        }
        let mut response = request
            .await
            .map_err(|e| map_error(LogicalOp::Raw, None, e))?;
        let values: Vec<serde_json::Value> = response
            .take(0)
            .map_err(|e| map_error(LogicalOp::Raw, None, e))?;
        Ok(serde_json::Value::Array(values))
    }

    fn build_condition(&self, field: &str, op: CondOp, value: &Value) -> Result<String> {
        Ok(match op {
            CondOp::Eq if field == "id" => {
                format!("id = {}", id_operand(value))
            }
            CondOp::Eq => format!("{field} = {}", format_surreal_value(value)),
            CondOp::NotEq => format!("{field} != {}", format_surreal_value(value)),
            CondOp::Lt => format!("{field} < {}", format_surreal_value(value)),
            CondOp::Lte => format!("{field} <= {}", format_surreal_value(value)),
            CondOp::Gt => format!("{field} > {}", format_surreal_value(value)),
            CondOp::Gte => format!("{field} >= {}", format_surreal_value(value)),
            CondOp::In | CondOp::NotIn => {
                let keyword = if op == CondOp::In {
                    "INSIDE"
                } else {
                    "NOT INSIDE"
                };
                let rendered = match value {
                    Value::Array(items) if items.is_empty() => {
                        return Ok(if op == CondOp::In {
                            "false".to_string()
                        } else {
                            "true".to_string()
                        });
                    }
                    Value::Array(items) if field == "id" => {
                        let literals: Vec<String> = items.iter().map(id_operand).collect();
                        format!("[{}]", literals.join(", "))
                    }
                    other => format_surreal_value(other),
                };
                format!("{field} {keyword} {rendered}")
            }
            CondOp::Contains => match value {
                Value::Text(_) => format!(
                    "string::contains({field}, {})",
                    format_surreal_value(value)
                ),
                other => format!("{} INSIDE {field}", format_surreal_value(other)),
            },
            CondOp::Like => format!("{field} ~ {}", format_surreal_value(value)),
            CondOp::ILike => {
                let lowered = match value {
                    Value::Text(text) => Value::Text(text.to_lowercase()),
                    other => other.clone(),
                };
                format!(
                    "string::lowercase({field}) ~ {}",
                    format_surreal_value(&lowered)
                )
            }
            CondOp::Between => match value {
                Value::Array(bounds) if bounds.len() == 2 => format!(
                    "({field} >= {} AND {field} <= {})",
                    format_surreal_value(&bounds[0]),
                    format_surreal_value(&bounds[1])
                ),
                other => {
                    return Err(StoreError::schema(format!(
                        "between expects two bounds, got {other:?}"
                    )));
                }
            },
            CondOp::IsNull => format!("{field} = NONE"),
            CondOp::IsNotNull => format!("{field} != NONE"),
        })
    }

    fn get_field_type(&self, field: &Field) -> String {
        surreal_type(&field.kind)
    }

    fn format_value(&self, value: &Value) -> String {
        format_surreal_value(value)
    }

    async fn begin_transaction(&self) -> Result<TransactionHandle> {
        let conn = self.conn().await?;
        conn.query("BEGIN TRANSACTION")
            .await
            .map_err(|e| map_error(LogicalOp::Transaction, None, e))?
            .check()
            .map_err(|e| map_error(LogicalOp::Transaction, None, e))?;
        Ok(TransactionHandle::with_state(
            METADATA.id,
            Box::new(conn),
        ))
    }

    async fn commit_transaction(&self, mut handle: TransactionHandle) -> Result<()> {
        if let Some(conn) = handle.take_state::<PoolGuard<SurrealManager>>() {
            conn.query("COMMIT TRANSACTION")
                .await
                .map_err(|e| map_error(LogicalOp::Transaction, None, e))?
                .check()
                .map_err(|e| map_error(LogicalOp::Transaction, None, e))?;
        }
        Ok(())
    }

    async fn rollback_transaction(&self, mut handle: TransactionHandle) -> Result<()> {
        if let Some(conn) = handle.take_state::<PoolGuard<SurrealManager>>() {
            conn.query("CANCEL TRANSACTION")
                .await
                .map_err(|e| map_error(LogicalOp::Transaction, None, e))?
                .check()
                .map_err(|e| map_error(LogicalOp::Transaction, None, e))?;
        }
        Ok(())
    }

    async fn create_materialized_view(&self, view: &ViewDefinition) -> Result<()> {
        let select = view.compile_select(self)?;
        let statement = format!("DEFINE TABLE {} AS {select}", view.view_name());
        self.execute(LogicalOp::CreateView, Some(view.view_name()), &statement)
            .await
    }

    async fn drop_materialized_view(&self, name: &str, if_exists: bool) -> Result<()> {
        let clause = if if_exists { "IF EXISTS " } else { "" };
        self.execute(
            LogicalOp::DropView,
            Some(name),
            &format!("REMOVE TABLE {clause}{name}"),
        )
        .await
    }

    async fn refresh_materialized_view(&self, _name: &str) -> Result<()> {
        // View tables are maintained by the store.
        Ok(())
    }

    async fn create_relation(
        &self,
        relation: &str,
        from_id: &Value,
        to_id: &Value,
        attributes: Row,
    ) -> Result<()> {
        let mut query = format!(
            "RELATE {}->{relation}->{}",
            id_operand(from_id),
            id_operand(to_id)
        );
        if !attributes.is_empty() {
            query.push_str(&format!(
                " CONTENT {}",
                format_surreal_value(&Value::Object(attributes))
            ));
        }
        self.execute(LogicalOp::Relate, Some(relation), &query).await
    }

    async fn explain(&self, table: &str, request: &SelectRequest) -> Result<serde_json::Value> {
        let query = format!("{} EXPLAIN", self.render_select(table, request));
        let rows = self.query_rows(LogicalOp::Explain, table, &query).await?;
        Ok(serde_json::Value::Array(
            rows.into_iter()
                .map(|row| Value::Object(row).to_json())
                .collect(),
        ))
    }

    async fn ping(&self) -> Result<()> {
        let conn = self.conn().await?;
        conn.health()
            .await
            .map_err(|e| StoreError::transport(format!("surrealdb health: {e}")))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close(Duration::from_secs(5)).await;
        Ok(())
    }
}

fn map_error(op: LogicalOp, table: Option<&str>, err: surrealdb::Error) -> StoreError {
    let message = err.to_string();
    if message.contains("already contains") || message.contains("unique") {
        return StoreError::Conflict(message);
    }
    if message.contains("connection") || message.contains("socket") || message.contains("closed") {
        return StoreError::transport(message);
    }
    StoreError::backend(op, table, message)
}

/// Render a record literal (`table:id`), bracket-escaping ids with
/// characters outside the plain identifier set.
fn record_literal(table: &str, id: &Value) -> String {
    let raw = match id {
        Value::Text(text) => text.clone(),
        other => other.as_display_string(),
    };
    if let Some((tb, rest)) = raw.split_once(':') {
        return format!("{tb}:{}", escape_record_id(rest));
    }
    format!("{table}:{}", escape_record_id(&raw))
}

/// Render an id operand that may already be fully qualified.
fn id_operand(value: &Value) -> String {
    match value {
        Value::Text(text) if text.contains(':') => {
            let (tb, rest) = text.split_once(':').unwrap_or((text, ""));
            format!("{tb}:{}", escape_record_id(rest))
        }
        other => format_surreal_value(other),
    }
}

fn escape_record_id(id: &str) -> String {
    if !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        id.to_string()
    } else {
        format!("⟨{}⟩", id.replace('⟩', "\\⟩"))
    }
}

fn surreal_type(kind: &FieldKind) -> String {
    match kind {
        FieldKind::Text | FieldKind::FixedLength(_) | FieldKind::Enum(_) => "string".to_string(),
        FieldKind::Integer => "int".to_string(),
        FieldKind::Float => "float".to_string(),
        FieldKind::Boolean => "bool".to_string(),
        FieldKind::Decimal { .. } => "decimal".to_string(),
        FieldKind::Timestamp => "datetime".to_string(),
        FieldKind::Uuid => "uuid".to_string(),
        FieldKind::Object => "object".to_string(),
        FieldKind::Array(element) => format!("array<{}>", surreal_type(element)),
        FieldKind::Reference { target } => format!("record<{target}>"),
        FieldKind::Id => "string".to_string(),
        FieldKind::LowCardinality { base } | FieldKind::Compressed { base, .. } => {
            surreal_type(base)
        }
    }
}

/// Render a SurrealQL literal with collision-safe escaping.
fn format_surreal_value(value: &Value) -> String {
    match value {
        Value::Null => "NONE".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => {
            if f.is_finite() {
                f.to_string()
            } else {
                "NONE".to_string()
            }
        }
        Value::Decimal(d) => format!("{}dec", d.normalized()),
        Value::Text(text) => quote_string(text),
        Value::Bytes(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
            quote_string(&hex)
        }
        Value::Uuid(uuid) => quote_string(&uuid.to_string()),
        Value::DateTime(dt) => format!(
            "d\"{}\"",
            dt.to_rfc3339_opts(polystore_core::chrono::SecondsFormat::Millis, true)
        ),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(format_surreal_value).collect();
            format!("[{}]", rendered.join(", "))
        }
        Value::Object(map) => {
            let rendered: Vec<String> = map
                .iter()
                .map(|(key, value)| {
                    format!("{}: {}", quote_string(key), format_surreal_value(value))
                })
                .collect();
            format!("{{ {} }}", rendered.join(", "))
        }
    }
}

fn quote_string(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Normalize a result row: record ids come back as structured things and are
/// folded to their `table:id` text form.
fn json_to_row(value: serde_json::Value) -> Row {
    match Value::from_json(value) {
        Value::Object(map) => map
            .into_iter()
            .map(|(key, value)| (key, normalize_record(value)))
            .collect(),
        other => {
            let mut row = Row::new();
            row.insert("value".to_string(), other);
            row
        }
    }
}

fn normalize_record(value: Value) -> Value {
    if let Value::Object(map) = &value
        && map.len() == 2
        && let (Some(Value::Text(tb)), Some(id)) = (map.get("tb"), map.get("id"))
    {
        let id_text = match id {
            Value::Text(text) => text.clone(),
            Value::Object(inner) => match inner.get("String") {
                Some(Value::Text(text)) => text.clone(),
                _ => id.as_display_string(),
            },
            other => other.as_display_string(),
        };
        return Value::Text(format!("{tb}:{id_text}"));
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use polystore_core::f;

    // The pool is never touched by the pure lowering paths under test.
    async fn backend_for_lowering() -> SurrealBackend {
        let manager = SurrealManager {
            url: "mem://".to_string(),
            namespace: "test".to_string(),
            database: "test".to_string(),
            username: None,
            password: None,
        };
        let pool = Pool::new(
            manager,
            PoolConfig {
                min: 0,
                ..PoolConfig::small()
            },
        )
        .await;
        SurrealBackend { pool }
    }

    #[tokio::test]
    async fn conditions_lower_to_surrealql() {
        let backend = backend_for_lowering().await;

        assert_eq!(
            backend
                .build_condition("age", CondOp::Gt, &Value::Int(30))
                .unwrap(),
            "age > 30"
        );
        assert_eq!(
            backend
                .build_condition("name", CondOp::Eq, &Value::Text("it\"s".into()))
                .unwrap(),
            "name = \"it\\\"s\""
        );
        assert_eq!(
            backend
                .build_condition(
                    "marketplace",
                    CondOp::In,
                    &Value::Array(vec![Value::Text("Amazon".into())])
                )
                .unwrap(),
            "marketplace INSIDE [\"Amazon\"]"
        );
        assert_eq!(
            backend
                .build_condition("tags", CondOp::Contains, &Value::Int(3))
                .unwrap(),
            "3 INSIDE tags"
        );
        assert_eq!(
            backend
                .build_condition("name", CondOp::Contains, &Value::Text("doe".into()))
                .unwrap(),
            "string::contains(name, \"doe\")"
        );
        assert_eq!(
            backend
                .build_condition("email", CondOp::IsNull, &Value::Null)
                .unwrap(),
            "email = NONE"
        );
        assert_eq!(
            backend
                .build_condition(
                    "age",
                    CondOp::Between,
                    &Value::Array(vec![Value::Int(18), Value::Int(65)])
                )
                .unwrap(),
            "(age >= 18 AND age <= 65)"
        );
    }

    #[tokio::test]
    async fn id_equality_uses_record_literals() {
        let backend = backend_for_lowering().await;
        assert_eq!(
            backend
                .build_condition("id", CondOp::Eq, &Value::Text("user:jd".into()))
                .unwrap(),
            "id = user:jd"
        );
        assert_eq!(
            backend
                .build_condition(
                    "id",
                    CondOp::In,
                    &Value::Array(vec![
                        Value::Text("user:a".into()),
                        Value::Text("user:b-2".into())
                    ])
                )
                .unwrap(),
            "id INSIDE [user:a, user:⟨b-2⟩]"
        );
    }

    #[tokio::test]
    async fn empty_in_is_never_true() {
        let backend = backend_for_lowering().await;
        assert_eq!(
            backend
                .build_condition("age", CondOp::In, &Value::Array(vec![]))
                .unwrap(),
            "false"
        );
        assert_eq!(
            backend
                .build_condition("age", CondOp::NotIn, &Value::Array(vec![]))
                .unwrap(),
            "true"
        );
    }

    #[tokio::test]
    async fn select_rendering_includes_fetch_and_start() {
        let backend = backend_for_lowering().await;
        let request = SelectRequest {
            conditions: vec!["age > 30".to_string()],
            fields: None,
            limit: Some(10),
            offset: Some(20),
            order_by: vec![polystore_core::OrderBy::desc("age")],
            fetch: vec!["manager".to_string()],
        };
        assert_eq!(
            backend.render_select("user", &request),
            "SELECT *, type::string(id) AS id FROM user WHERE age > 30 \
             ORDER BY age DESC LIMIT 10 START 20 FETCH manager"
        );
    }

    #[tokio::test]
    async fn filter_tree_lowering_matches_lookup_form() {
        let backend = backend_for_lowering().await;
        let from_expr = polystore_core::compile_filter(
            &f("age").gt(30).and(f("is_active").eq(true)),
            &backend,
        )
        .unwrap();
        let gt = polystore_core::parse_lookup("age__gt", Value::Int(30)).unwrap();
        let active = polystore_core::parse_lookup("is_active", Value::Bool(true)).unwrap();
        let from_lookup =
            polystore_core::compile_filter(&gt.and(active), &backend).unwrap();
        assert_eq!(from_expr, from_lookup);
        assert_eq!(from_expr, "(age > 30 AND is_active = true)");
    }

    #[test]
    fn field_types_cover_columnar_fallbacks() {
        assert_eq!(surreal_type(&FieldKind::Text), "string");
        assert_eq!(
            surreal_type(&FieldKind::LowCardinality {
                base: Box::new(FieldKind::Text)
            }),
            "string"
        );
        assert_eq!(surreal_type(&FieldKind::FixedLength(3)), "string");
        assert_eq!(
            surreal_type(&FieldKind::Array(Box::new(FieldKind::Integer))),
            "array<int>"
        );
        assert_eq!(
            surreal_type(&FieldKind::Reference {
                target: "user".into()
            }),
            "record<user>"
        );
    }

    #[test]
    fn record_results_normalize_to_text_ids() {
        let raw = serde_json::json!({
            "id": { "tb": "user", "id": { "String": "jd" } },
            "age": 30,
        });
        let row = json_to_row(raw);
        assert_eq!(row.get("id"), Some(&Value::Text("user:jd".into())));
        assert_eq!(row.get("age"), Some(&Value::Int(30)));
    }

    #[tokio::test]
    async fn function_dialect_matches_surreal_rewrites() {
        let dialect = SurrealFunctions;
        assert_eq!(
            dialect.render(&Func::Sum("offer_price".into())).unwrap(),
            "math::sum(offer_price)"
        );
        assert_eq!(
            dialect.render(&Func::Avg("offer_price".into())).unwrap(),
            "math::mean(offer_price)"
        );
        assert_eq!(
            dialect.render(&Func::ToDate("date_collected".into())).unwrap(),
            "time::day(date_collected)"
        );
        assert_eq!(
            dialect
                .render(&Func::ToYearMonth("date_collected".into()))
                .unwrap(),
            "time::format(date_collected, '%Y%m')"
        );
        assert_eq!(
            dialect
                .render(&Func::CountDistinct("seller_name".into()))
                .unwrap(),
            "count(array::distinct(seller_name))"
        );
    }
}
