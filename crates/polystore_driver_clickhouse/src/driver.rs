use crate::orderby::infer_order_by;
use async_trait::async_trait;
use polystore_core::{
    Backend, BackendFactory, BackendMetadata, Capabilities, CondOp, ConnectionConfig,
    CreateTableOptions, Field, FieldKind, Func, FunctionDialect, IndexKind, LogicalOp, Manager,
    Pool, PoolConfig, PoolGuard, Result, Row, Schema, SelectRequest, StoreCategory, StoreError,
    Value, ValueEncoding, ViewDefinition,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

static METADATA: BackendMetadata = BackendMetadata {
    id: "clickhouse",
    display_name: "ClickHouse",
    description: "Columnar analytical store in the MergeTree family",
    category: StoreCategory::Columnar,
    capabilities: Capabilities::COLUMNAR_BASE,
    encoding: ValueEncoding::COLUMNAR,
};

/// One HTTP session against a ClickHouse server.
pub struct HttpSession {
    client: reqwest::Client,
    url: String,
    database: String,
    username: String,
    password: Option<String>,
}

impl HttpSession {
    fn request(&self, sql: String) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(&self.url)
            .query(&[("database", self.database.as_str())])
            .header("X-ClickHouse-User", &self.username)
            .body(sql);
        if let Some(password) = &self.password {
            request = request.header("X-ClickHouse-Key", password);
        }
        request
    }

    /// Run a statement, discarding any result body.
    async fn execute(&self, op: LogicalOp, table: Option<&str>, sql: &str) -> Result<()> {
        self.send(op, table, sql.to_string()).await.map(|_| ())
    }

    /// Run a query with `FORMAT JSONEachRow` and parse one object per line.
    async fn query_rows(
        &self,
        op: LogicalOp,
        table: Option<&str>,
        sql: &str,
    ) -> Result<Vec<serde_json::Value>> {
        let body = self
            .send(op, table, format!("{sql} FORMAT JSONEachRow"))
            .await?;
        let mut rows = Vec::new();
        for line in body.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let parsed: serde_json::Value = serde_json::from_str(line).map_err(|e| {
                StoreError::backend(op, table, format!("unparseable result row: {e}"))
            })?;
            rows.push(parsed);
        }
        Ok(rows)
    }

    async fn send(&self, op: LogicalOp, table: Option<&str>, sql: String) -> Result<String> {
        let response = self
            .request(sql)
            .send()
            .await
            .map_err(|e| StoreError::transport(format!("clickhouse http: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::transport(format!("clickhouse body: {e}")))?;

        if status.is_success() {
            return Ok(body);
        }
        let message = body.trim().to_string();
        if message.contains("Code: 57") {
            // TABLE_ALREADY_EXISTS
            return Err(StoreError::Conflict(message));
        }
        Err(StoreError::backend(op, table, message))
    }
}

/// Pool manager building HTTP sessions.
pub struct ClickHouseManager {
    url: String,
    database: String,
    username: String,
    password: Option<String>,
}

#[async_trait]
impl Manager for ClickHouseManager {
    type Conn = HttpSession;

    async fn create(&self) -> Result<HttpSession> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| StoreError::transport(format!("clickhouse client: {e}")))?;
        Ok(HttpSession {
            client,
            url: self.url.clone(),
            database: self.database.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        })
    }

    async fn check(&self, conn: &mut HttpSession) -> Result<()> {
        conn.execute(LogicalOp::Ping, None, "SELECT 1").await
    }
}

/// Opens [`ClickHouseBackend`]s from a connection config.
pub struct ClickHouseFactory;

#[async_trait]
impl BackendFactory for ClickHouseFactory {
    fn name(&self) -> &'static str {
        "clickhouse"
    }

    async fn open(
        &self,
        config: &ConnectionConfig,
        pool: PoolConfig,
    ) -> Result<Arc<dyn Backend>> {
        let manager = ClickHouseManager {
            url: config.get_or("url", "http://localhost:8123").to_string(),
            database: config.get_or("database", "default").to_string(),
            username: config.get_or("username", "default").to_string(),
            password: config.get("password").map(str::to_string),
        };
        let pool = Pool::new(manager, pool).await;
        Ok(Arc::new(ClickHouseBackend {
            pool,
            columns: Mutex::new(HashMap::new()),
        }))
    }
}

/// ClickHouse rewrites of the portable function set.
struct ClickHouseFunctions;

impl FunctionDialect for ClickHouseFunctions {
    fn render(&self, func: &Func) -> Result<String> {
        Ok(match func {
            Func::Count => "count()".to_string(),
            Func::Sum(field) => format!("sum({field})"),
            Func::Avg(field) => format!("avg({field})"),
            Func::Min(field) => format!("min({field})"),
            Func::Max(field) => format!("max({field})"),
            Func::CountDistinct(field) => format!("uniq({field})"),
            Func::ToDate(field) => format!("toDate({field})"),
            Func::ToYearMonth(field) => format!("toYYYYMM({field})"),
            Func::Has(field, value) => {
                format!("has({field}, {})", format_clickhouse_value(value))
            }
            Func::Length(field) => format!("length({field})"),
            Func::Lower(field) => format!("lower({field})"),
            Func::Upper(field) => format!("upper({field})"),
            Func::Round(field, digits) => format!("round({field}, {digits})"),
        })
    }
}

static FUNCTIONS: ClickHouseFunctions = ClickHouseFunctions;

/// ClickHouse backend over pooled HTTP sessions.
pub struct ClickHouseBackend {
    pool: Pool<ClickHouseManager>,
    /// Per-table column lists from DESCRIBE, for id assignment on insert.
    columns: Mutex<HashMap<String, Vec<String>>>,
}

impl ClickHouseBackend {
    async fn conn(&self) -> Result<PoolGuard<ClickHouseManager>> {
        self.pool.acquire().await
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        if let Some(cached) = self
            .columns
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .get(table)
        {
            return Ok(cached.clone());
        }

        let conn = self.conn().await?;
        let rows = conn
            .query_rows(
                LogicalOp::Select,
                Some(table),
                &format!("DESCRIBE TABLE {table}"),
            )
            .await?;
        let names: Vec<String> = rows
            .iter()
            .filter_map(|row| row.get("name").and_then(|n| n.as_str()).map(str::to_string))
            .collect();

        self.columns
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .insert(table.to_string(), names.clone());
        Ok(names)
    }

    fn render_select(&self, table: &str, request: &SelectRequest) -> String {
        let projection = match &request.fields {
            Some(fields) if !fields.is_empty() => fields
                .iter()
                .map(|f| format!("`{f}`"))
                .collect::<Vec<_>>()
                .join(", "),
            _ => "*".to_string(),
        };

        let mut sql = format!("SELECT {projection} FROM {table}");
        if !request.conditions.is_empty() {
            sql.push_str(&format!(" WHERE {}", request.conditions.join(" AND ")));
        }
        if !request.order_by.is_empty() {
            let order: Vec<String> = request
                .order_by
                .iter()
                .map(|o| format!("`{}` {}", o.field, o.direction.keyword()))
                .collect();
            sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
        }
        if let Some(limit) = request.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = request.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        sql
    }

    /// The DDL for a document class, used by `create_table` and asserted by
    /// the idempotence tests.
    pub fn render_create_table(
        &self,
        schema: &Schema,
        options: &CreateTableOptions,
    ) -> Result<String> {
        let table = schema.collection();
        let meta = schema.meta();

        let engine = options
            .engine
            .clone()
            .or_else(|| meta.engine.clone())
            .ok_or_else(|| {
                StoreError::schema(format!(
                    "columnar table '{table}' requires an engine in its meta"
                ))
            })?;

        let mut order_by = options
            .order_by
            .clone()
            .unwrap_or_else(|| meta.order_by.clone());
        if order_by.is_empty() {
            order_by = infer_order_by(schema);
        }

        let mut columns = Vec::new();
        for field in schema.fields() {
            let field_type = self.get_field_type(field);
            if let Some(expression) = &field.materialized {
                columns.push(format!(
                    "`{}` {field_type} MATERIALIZED ({expression})",
                    field.db_name
                ));
            } else if field.required || field.name == schema.id_field() {
                columns.push(format!("`{}` {field_type}", field.db_name));
            } else {
                columns.push(format!("`{}` Nullable({field_type})", field.db_name));
            }
        }
        if schema.field(schema.id_field()).is_none() {
            columns.insert(0, format!("`{}` String", schema.id_field()));
        }

        let exists = if options.if_not_exists {
            "IF NOT EXISTS "
        } else {
            ""
        };
        let mut sql = format!(
            "CREATE TABLE {exists}{table} (\n{}\n)",
            columns
                .iter()
                .map(|c| format!("    {c}"))
                .collect::<Vec<_>>()
                .join(",\n")
        );

        if meta.engine_params.is_empty() {
            sql.push_str(&format!(" ENGINE = {engine}()"));
        } else {
            let params: Vec<String> = meta
                .engine_params
                .iter()
                .map(|p| format!("`{p}`"))
                .collect();
            sql.push_str(&format!(" ENGINE = {engine}({})", params.join(", ")));
        }

        if let Some(partition_by) = &meta.partition_by {
            sql.push_str(&format!("\nPARTITION BY {partition_by}"));
        }
        if !meta.primary_key.is_empty() {
            let keys: Vec<String> = meta.primary_key.iter().map(|k| format!("`{k}`")).collect();
            sql.push_str(&format!("\nPRIMARY KEY ({})", keys.join(", ")));
        }
        let order_cols: Vec<String> = order_by.iter().map(|c| format!("`{c}`")).collect();
        sql.push_str(&format!("\nORDER BY ({})", order_cols.join(", ")));
        if let Some(ttl) = &meta.ttl {
            sql.push_str(&format!("\nTTL {ttl}"));
        }
        if !meta.settings.is_empty() {
            let settings: Vec<String> = meta
                .settings
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            sql.push_str(&format!("\nSETTINGS {}", settings.join(", ")));
        }

        Ok(sql)
    }

    fn render_index(table: &str, field: &Field, spec: &polystore_core::IndexSpec) -> String {
        let kind = match &spec.kind {
            IndexKind::Bloom {
                false_positive_rate,
            } => format!("bloom_filter({false_positive_rate})"),
            IndexKind::Set { max_values } => format!("set({max_values})"),
            // Ordered pruning maps to the min/max skip-index.
            IndexKind::MinMax | IndexKind::BTree => "minmax".to_string(),
            IndexKind::Custom(custom) => custom.clone(),
        };
        let name = spec.name.clone().unwrap_or_else(|| {
            format!(
                "idx_{table}_{}_{}",
                field.db_name,
                match &spec.kind {
                    IndexKind::Bloom { .. } => "bloom_filter",
                    IndexKind::Set { .. } => "set",
                    IndexKind::MinMax | IndexKind::BTree => "minmax",
                    IndexKind::Custom(custom) => custom.as_str(),
                }
            )
        });
        format!(
            "ALTER TABLE {table} ADD INDEX IF NOT EXISTS {name} `{}` TYPE {kind} GRANULARITY {}",
            field.db_name, spec.granularity
        )
    }

    fn row_to_json_line(row: &Row) -> String {
        Value::Object(row.clone()).to_json().to_string()
    }
}

#[async_trait]
impl Backend for ClickHouseBackend {
    fn metadata(&self) -> &'static BackendMetadata {
        &METADATA
    }

    fn function_dialect(&self) -> &dyn FunctionDialect {
        &FUNCTIONS
    }

    async fn create_table(&self, schema: &Schema, options: &CreateTableOptions) -> Result<()> {
        let table = schema.collection();
        let sql = self.render_create_table(schema, options)?;
        let conn = self.conn().await?;
        conn.execute(LogicalOp::CreateTable, Some(table), &sql)
            .await?;

        // Skip-index failures do not fail table creation.
        for field in schema.fields() {
            for spec in &field.indexes {
                let statement = Self::render_index(table, field, spec);
                if let Err(err) = conn
                    .execute(LogicalOp::CreateTable, Some(table), &statement)
                    .await
                {
                    log::warn!("index creation on '{table}' failed: {err}");
                }
            }
        }
        Ok(())
    }

    async fn drop_table(&self, table: &str, if_exists: bool) -> Result<()> {
        let clause = if if_exists { "IF EXISTS " } else { "" };
        let conn = self.conn().await?;
        self.columns
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .remove(table);
        conn.execute(
            LogicalOp::DropTable,
            Some(table),
            &format!("DROP TABLE {clause}{table}"),
        )
        .await
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row> {
        let mut stored = self.insert_many(table, vec![row]).await?;
        stored.pop().ok_or_else(|| {
            StoreError::backend(LogicalOp::Insert, Some(table), "insert returned no row")
        })
    }

    async fn insert_many(&self, table: &str, mut rows: Vec<Row>) -> Result<Vec<Row>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        // The store does not generate ids; assign one where the table has an
        // id column and the row does not.
        let has_id = match self.table_columns(table).await {
            Ok(columns) => columns.iter().any(|name| name == "id"),
            Err(_) => true,
        };
        if has_id {
            for row in rows.iter_mut() {
                let missing = row.get("id").is_none_or(Value::is_null);
                if missing {
                    row.insert("id".to_string(), Value::Text(uuid::Uuid::new_v4().to_string()));
                }
            }
        }

        let columns: Vec<String> = rows[0].keys().cloned().collect();
        let column_list = columns
            .iter()
            .map(|c| format!("`{c}`"))
            .collect::<Vec<_>>()
            .join(", ");
        let lines: Vec<String> = rows.iter().map(Self::row_to_json_line).collect();
        let sql = format!(
            "INSERT INTO {table} ({column_list}) FORMAT JSONEachRow\n{}",
            lines.join("\n")
        );

        let conn = self.conn().await?;
        conn.execute(LogicalOp::InsertMany, Some(table), &sql).await?;
        Ok(rows)
    }

    async fn select(&self, table: &str, request: &SelectRequest) -> Result<Vec<Row>> {
        let sql = self.render_select(table, request);
        let conn = self.conn().await?;
        let rows = conn.query_rows(LogicalOp::Select, Some(table), &sql).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match Value::from_json(row) {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect())
    }

    async fn count(&self, table: &str, conditions: &[String]) -> Result<u64> {
        let mut sql = format!("SELECT count(*) AS count FROM {table}");
        if !conditions.is_empty() {
            sql.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
        }
        let conn = self.conn().await?;
        let rows = conn.query_rows(LogicalOp::Count, Some(table), &sql).await?;
        let count = rows.first().and_then(|row| row.get("count")).map_or(0, |c| {
            // 64-bit integers arrive quoted in JSON formats.
            c.as_u64()
                .or_else(|| c.as_str().and_then(|s| s.parse().ok()))
                .unwrap_or(0)
        });
        Ok(count)
    }

    async fn update(&self, table: &str, conditions: &[String], patch: Row) -> Result<Vec<Row>> {
        if patch.is_empty() {
            return Ok(Vec::new());
        }

        // Capture the pre-image first; the mutation is asynchronous.
        let pre_image = self
            .select(table, &SelectRequest::with_conditions(conditions.to_vec()))
            .await?;
        if pre_image.is_empty() {
            return Ok(Vec::new());
        }

        let assignments: Vec<String> = patch
            .iter()
            .map(|(key, value)| format!("`{key}` = {}", format_clickhouse_value(value)))
            .collect();
        let mut sql = format!("ALTER TABLE {table} UPDATE {}", assignments.join(", "));
        sql.push_str(&format!(
            " WHERE {}",
            if conditions.is_empty() {
                "1 = 1".to_string()
            } else {
                conditions.join(" AND ")
            }
        ));

        let conn = self.conn().await?;
        conn.execute(LogicalOp::Update, Some(table), &sql).await?;

        // Return the pre-image with the patch applied in memory; real
        // visibility follows the mutation's own schedule.
        Ok(pre_image
            .into_iter()
            .map(|mut row| {
                for (key, value) in &patch {
                    row.insert(key.clone(), value.clone());
                }
                row
            })
            .collect())
    }

    async fn delete(&self, table: &str, conditions: &[String]) -> Result<u64> {
        let count = self.count(table, conditions).await?;
        if count == 0 {
            return Ok(0);
        }

        let mut sql = format!("ALTER TABLE {table} DELETE");
        sql.push_str(&format!(
            " WHERE {}",
            if conditions.is_empty() {
                "1 = 1".to_string()
            } else {
                conditions.join(" AND ")
            }
        ));
        let conn = self.conn().await?;
        conn.execute(LogicalOp::Delete, Some(table), &sql).await?;
        Ok(count)
    }

    async fn execute_raw(&self, query: &str, params: Option<Row>) -> Result<serde_json::Value> {
        let mut sql = query.to_string();
        if let Some(params) = params {
            for (key, value) in params {
                sql = sql.replace(&format!(":{key}"), &format_clickhouse_value(&value));
            }
        }

        let conn = self.conn().await?;
        let head = sql.trim_start().to_uppercase();
        let produces_rows = ["SELECT", "WITH", "SHOW", "DESCRIBE", "EXISTS", "EXPLAIN"]
            .iter()
            .any(|prefix| head.starts_with(prefix));
        if produces_rows {
            let rows = conn.query_rows(LogicalOp::Raw, None, &sql).await?;
            Ok(serde_json::Value::Array(rows))
        } else {
            conn.execute(LogicalOp::Raw, None, &sql).await?;
            Ok(serde_json::Value::Null)
        }
    }

    fn build_condition(&self, field: &str, op: CondOp, value: &Value) -> Result<String> {
        let column = format!("`{field}`");
        Ok(match op {
            CondOp::Eq => format!("{column} = {}", format_clickhouse_value(value)),
            CondOp::NotEq => format!("{column} != {}", format_clickhouse_value(value)),
            CondOp::Lt => format!("{column} < {}", format_clickhouse_value(value)),
            CondOp::Lte => format!("{column} <= {}", format_clickhouse_value(value)),
            CondOp::Gt => format!("{column} > {}", format_clickhouse_value(value)),
            CondOp::Gte => format!("{column} >= {}", format_clickhouse_value(value)),
            CondOp::In | CondOp::NotIn => {
                let keyword = if op == CondOp::In { "IN" } else { "NOT IN" };
                match value {
                    Value::Array(items) if items.is_empty() => {
                        if op == CondOp::In {
                            "1 = 0".to_string()
                        } else {
                            "1 = 1".to_string()
                        }
                    }
                    Value::Array(items) => {
                        let rendered: Vec<String> =
                            items.iter().map(format_clickhouse_value).collect();
                        format!("{column} {keyword} ({})", rendered.join(", "))
                    }
                    other => format!("{column} {keyword} {}", format_clickhouse_value(other)),
                }
            }
            CondOp::Contains => match value {
                Value::Text(text) => {
                    let escaped = text.replace('%', "\\%").replace('_', "\\_");
                    format!(
                        "{column} LIKE {}",
                        format_clickhouse_value(&Value::Text(format!("%{escaped}%")))
                    )
                }
                other => format!("has({column}, {})", format_clickhouse_value(other)),
            },
            CondOp::Like => format!("{column} LIKE {}", format_clickhouse_value(value)),
            CondOp::ILike => format!("{column} ILIKE {}", format_clickhouse_value(value)),
            CondOp::Between => match value {
                Value::Array(bounds) if bounds.len() == 2 => format!(
                    "{column} BETWEEN {} AND {}",
                    format_clickhouse_value(&bounds[0]),
                    format_clickhouse_value(&bounds[1])
                ),
                other => {
                    return Err(StoreError::schema(format!(
                        "between expects two bounds, got {other:?}"
                    )));
                }
            },
            CondOp::IsNull => format!("{column} IS NULL"),
            CondOp::IsNotNull => format!("{column} IS NOT NULL"),
        })
    }

    fn get_field_type(&self, field: &Field) -> String {
        clickhouse_type(&field.kind)
    }

    fn format_value(&self, value: &Value) -> String {
        format_clickhouse_value(value)
    }

    async fn create_materialized_view(&self, view: &ViewDefinition) -> Result<()> {
        let select = view.compile_select(self)?;
        let engine = view.engine().unwrap_or("AggregatingMergeTree");

        let engine_clause = if view.engine_params().is_empty() {
            format!("ENGINE = {engine}()")
        } else {
            let params: Vec<String> = view
                .engine_params()
                .iter()
                .map(|p| format!("`{p}`"))
                .collect();
            format!("ENGINE = {engine}({})", params.join(", "))
        };

        let order_cols: Vec<String> = view.order_by().iter().map(|c| format!("`{c}`")).collect();
        let partition_clause = view
            .partition_by()
            .map(|p| format!("\nPARTITION BY {p}"))
            .unwrap_or_default();

        let sql = format!(
            "CREATE MATERIALIZED VIEW IF NOT EXISTS {}\n{engine_clause}{partition_clause}\nORDER BY ({})\nAS {select}",
            view.view_name(),
            order_cols.join(", ")
        );

        let conn = self.conn().await?;
        conn.execute(LogicalOp::CreateView, Some(view.view_name()), &sql)
            .await
    }

    async fn drop_materialized_view(&self, name: &str, if_exists: bool) -> Result<()> {
        let clause = if if_exists { "IF EXISTS " } else { "" };
        let conn = self.conn().await?;
        conn.execute(
            LogicalOp::DropView,
            Some(name),
            &format!("DROP VIEW {clause}{name}"),
        )
        .await
    }

    async fn refresh_materialized_view(&self, _name: &str) -> Result<()> {
        // MergeTree materialized views update as data arrives.
        Ok(())
    }

    async fn explain(&self, table: &str, request: &SelectRequest) -> Result<serde_json::Value> {
        let sql = format!("EXPLAIN {}", self.render_select(table, request));
        let conn = self.conn().await?;
        let rows = conn.query_rows(LogicalOp::Explain, Some(table), &sql).await?;
        Ok(serde_json::Value::Array(rows))
    }

    async fn ping(&self) -> Result<()> {
        let conn = self.conn().await?;
        conn.execute(LogicalOp::Ping, None, "SELECT 1").await
    }

    async fn close(&self) -> Result<()> {
        self.pool.close(Duration::from_secs(5)).await;
        Ok(())
    }
}

fn clickhouse_type(kind: &FieldKind) -> String {
    match kind {
        FieldKind::Text => "String".to_string(),
        FieldKind::Integer => "Int64".to_string(),
        FieldKind::Float => "Float64".to_string(),
        // Booleans are stored as UInt8.
        FieldKind::Boolean => "UInt8".to_string(),
        FieldKind::Decimal { precision, scale } => format!(
            "Decimal({}, {})",
            precision.unwrap_or(38),
            scale.unwrap_or(18)
        ),
        FieldKind::Timestamp => "DateTime64(3)".to_string(),
        FieldKind::Uuid => "UUID".to_string(),
        FieldKind::Object => "String".to_string(),
        FieldKind::Array(element) => format!("Array({})", clickhouse_type(element)),
        FieldKind::Reference { .. } => "String".to_string(),
        FieldKind::Id => "String".to_string(),
        FieldKind::LowCardinality { base } => {
            format!("LowCardinality({})", clickhouse_type(base))
        }
        FieldKind::FixedLength(length) => format!("FixedString({length})"),
        FieldKind::Enum(values) => {
            let rendered: Vec<String> = values
                .iter()
                .map(|(label, code)| format!("'{}' = {code}", label.replace('\'', "\\'")))
                .collect();
            format!("Enum8({})", rendered.join(", "))
        }
        FieldKind::Compressed { base, codec } => {
            format!("{} CODEC({codec})", clickhouse_type(base))
        }
    }
}

/// Render a ClickHouse SQL literal with collision-safe escaping.
fn format_clickhouse_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => {
            if f.is_finite() {
                f.to_string()
            } else {
                "NULL".to_string()
            }
        }
        Value::Decimal(d) => d.normalized().to_string(),
        Value::Text(text) => quote_string(text),
        Value::Bytes(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
            format!("unhex('{hex}')")
        }
        Value::Uuid(uuid) => format!("'{uuid}'"),
        Value::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.3f")),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(format_clickhouse_value).collect();
            format!("[{}]", rendered.join(", "))
        }
        Value::Object(_) => quote_string(&value.to_json().to_string()),
    }
}

fn quote_string(text: &str) -> String {
    format!("'{}'", text.replace('\\', "\\\\").replace('\'', "\\'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use polystore_core::IndexSpec;

    async fn backend() -> ClickHouseBackend {
        let manager = ClickHouseManager {
            url: "http://localhost:8123".to_string(),
            database: "default".to_string(),
            username: "default".to_string(),
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
        ClickHouseBackend {
            pool,
            columns: Mutex::new(HashMap::new()),
        }
    }

    fn sales_schema() -> std::sync::Arc<Schema> {
        Schema::builder("SalesData")
            .collection("sales_data")
            .backend("clickhouse")
            .engine("MergeTree")
            .field(Field::text("product_sku").required())
            .field(
                Field::low_cardinality("seller_name")
                    .required()
                    .index(IndexSpec::new(IndexKind::Set { max_values: 100 })),
            )
            .field(Field::timestamp("date_collected").required())
            .field(Field::decimal("offer_price").required())
            .field(Field::integer("quantity"))
            .field(Field::boolean("is_buybox_winner"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn create_table_renders_engine_order_and_nullable() {
        let backend = backend().await;
        let sql = backend
            .render_create_table(&sales_schema(), &CreateTableOptions::default())
            .unwrap();

        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS sales_data ("));
        assert!(sql.contains("`product_sku` String"));
        assert!(sql.contains("`seller_name` LowCardinality(String)"));
        assert!(sql.contains("`date_collected` DateTime64(3)"));
        assert!(sql.contains("`offer_price` Decimal(38, 18)"));
        assert!(sql.contains("`quantity` Nullable(Int64)"));
        assert!(sql.contains("`is_buybox_winner` Nullable(UInt8)"));
        assert!(sql.contains("`id` String"));
        assert!(sql.contains("ENGINE = MergeTree()"));
        // No declared order_by: inference picks timestamp + categorical.
        assert!(sql.contains("ORDER BY (`date_collected`, `seller_name`)"));
    }

    #[tokio::test]
    async fn create_table_is_deterministic() {
        let backend = backend().await;
        let first = backend
            .render_create_table(&sales_schema(), &CreateTableOptions::default())
            .unwrap();
        let second = backend
            .render_create_table(&sales_schema(), &CreateTableOptions::default())
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn missing_engine_is_a_schema_error() {
        let backend = backend().await;
        let schema = Schema::builder("NoEngine")
            .field(Field::text("name").required())
            .build()
            .unwrap();
        let result = backend.render_create_table(&schema, &CreateTableOptions::default());
        assert!(matches!(result, Err(StoreError::Schema(_))));
    }

    #[test]
    fn index_rendering_matches_skip_index_syntax() {
        let field = Field::text("trace_id");
        let bloom = IndexSpec::new(IndexKind::Bloom {
            false_positive_rate: 0.01,
        })
        .granularity(1);
        assert_eq!(
            ClickHouseBackend::render_index("events", &field, &bloom),
            "ALTER TABLE events ADD INDEX IF NOT EXISTS idx_events_trace_id_bloom_filter \
             `trace_id` TYPE bloom_filter(0.01) GRANULARITY 1"
        );

        let set = IndexSpec::new(IndexKind::Set { max_values: 50 });
        assert_eq!(
            ClickHouseBackend::render_index("events", &field, &set),
            "ALTER TABLE events ADD INDEX IF NOT EXISTS idx_events_trace_id_set \
             `trace_id` TYPE set(50) GRANULARITY 3"
        );
    }

    #[tokio::test]
    async fn conditions_lower_to_clickhouse_sql() {
        let backend = backend().await;

        assert_eq!(
            backend
                .build_condition("age", CondOp::Gte, &Value::Int(21))
                .unwrap(),
            "`age` >= 21"
        );
        assert_eq!(
            backend
                .build_condition("name", CondOp::Eq, &Value::Text("O'Brien".into()))
                .unwrap(),
            "`name` = 'O\\'Brien'"
        );
        assert_eq!(
            backend
                .build_condition(
                    "seller",
                    CondOp::In,
                    &Value::Array(vec![Value::Text("a".into()), Value::Text("b".into())])
                )
                .unwrap(),
            "`seller` IN ('a', 'b')"
        );
        assert_eq!(
            backend
                .build_condition("title", CondOp::Contains, &Value::Text("50%_off".into()))
                .unwrap(),
            "`title` LIKE '%50\\\\%\\\\_off%'"
        );
        assert_eq!(
            backend
                .build_condition("tags", CondOp::Contains, &Value::Int(3))
                .unwrap(),
            "has(`tags`, 3)"
        );
        assert_eq!(
            backend
                .build_condition("deleted_at", CondOp::IsNull, &Value::Null)
                .unwrap(),
            "`deleted_at` IS NULL"
        );
        assert_eq!(
            backend
                .build_condition(
                    "price",
                    CondOp::Between,
                    &Value::Array(vec![Value::Int(10), Value::Int(20)])
                )
                .unwrap(),
            "`price` BETWEEN 10 AND 20"
        );
    }

    #[tokio::test]
    async fn empty_in_lowered_to_constant_predicates() {
        let backend = backend().await;
        assert_eq!(
            backend
                .build_condition("age", CondOp::In, &Value::Array(vec![]))
                .unwrap(),
            "1 = 0"
        );
        assert_eq!(
            backend
                .build_condition("age", CondOp::NotIn, &Value::Array(vec![]))
                .unwrap(),
            "1 = 1"
        );
    }

    #[tokio::test]
    async fn materialized_view_ddl_matches_summing_merge_tree_shape() {
        use polystore_core::{Func, ViewDefinition};

        let backend = backend().await;
        let view = ViewDefinition::builder(sales_schema(), "daily_sales_summary")
            .engine("SummingMergeTree")
            .order_by(["date", "seller_name"])
            .dimension_with("date", "date_collected", Func::ToDate("date_collected".into()))
            .dimension("seller_name", "seller_name")
            .metric("total_sales", Func::Sum("offer_price".into()))
            .metric("transaction_count", Func::Count)
            .build()
            .unwrap();

        let select = view.compile_select(&backend).unwrap();
        assert_eq!(
            select,
            "SELECT toDate(date_collected) AS date, seller_name, \
             sum(offer_price) AS total_sales, count() AS transaction_count \
             FROM sales_data GROUP BY date, seller_name"
        );
    }

    #[tokio::test]
    async fn enum_and_codec_types_render_natively() {
        let backend = backend().await;

        let status = Field::enumeration("status", [("active", 1), ("inactive", 2)]);
        assert_eq!(
            backend.get_field_type(&status),
            "Enum8('active' = 1, 'inactive' = 2)"
        );

        let url = Field::compressed("ad_page_url", "ZSTD(3)");
        assert_eq!(backend.get_field_type(&url), "String CODEC(ZSTD(3))");

        let fixed = Field::fixed_length("currency_code", 3);
        assert_eq!(backend.get_field_type(&fixed), "FixedString(3)");

        let sizes = Field::array("sizes", FieldKind::Integer);
        assert_eq!(backend.get_field_type(&sizes), "Array(Int64)");
    }

    #[tokio::test]
    async fn select_rendering_uses_backticks_and_offset() {
        let backend = backend().await;
        let request = SelectRequest {
            conditions: vec!["`age` > 30".into()],
            fields: Some(vec!["username".into(), "age".into()]),
            limit: Some(10),
            offset: Some(5),
            order_by: vec![polystore_core::OrderBy::asc("age")],
            fetch: vec![],
        };
        assert_eq!(
            backend.render_select("users", &request),
            "SELECT `username`, `age` FROM users WHERE `age` > 30 ORDER BY `age` ASC LIMIT 10 OFFSET 5"
        );
    }
}
