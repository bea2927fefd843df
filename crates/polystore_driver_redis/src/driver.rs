use crate::conditions::{Predicate, evaluate, parse_conditions};
use async_trait::async_trait;
use polystore_core::{
    Backend, BackendFactory, BackendMetadata, Capabilities, CondOp, ConnectionConfig,
    CreateTableOptions, Field, FieldKind, Func, FunctionDialect, LogicalOp, Manager, Pool,
    PoolConfig, PoolGuard, Result, Row, Schema, SelectRequest, SortDirection, StoreCategory,
    StoreError, Value, ValueEncoding, ViewDefinition,
};
use redis::aio::MultiplexedConnection;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

static METADATA: BackendMetadata = BackendMetadata {
    id: "redis",
    display_name: "Redis",
    description: "Key-value store with sorted-set secondary indexes",
    category: StoreCategory::KeyValue,
    capabilities: Capabilities::KEYVALUE_BASE,
    encoding: ValueEncoding::KEY_VALUE,
};

fn doc_key(table: &str, id: &str) -> String {
    format!("{table}:doc:{id}")
}

fn ids_key(table: &str) -> String {
    format!("{table}:ids")
}

fn zindex_key(table: &str, field: &str) -> String {
    format!("{table}:idx:{field}")
}

fn sindex_key(table: &str, field: &str, value: &str) -> String {
    format!("{table}:idx:{field}:{value}")
}

/// Pool manager for multiplexed Redis connections.
pub struct RedisManager {
    client: redis::Client,
}

#[async_trait]
impl Manager for RedisManager {
    type Conn = MultiplexedConnection;

    async fn create(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| StoreError::transport(format!("redis connect: {e}")))
    }

    async fn check(&self, conn: &mut MultiplexedConnection) -> Result<()> {
        redis::cmd("PING")
            .query_async::<String>(conn)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::transport(format!("redis ping: {e}")))
    }
}

/// Opens [`RedisBackend`]s from a connection config.
pub struct RedisFactory;

#[async_trait]
impl BackendFactory for RedisFactory {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn open(
        &self,
        config: &ConnectionConfig,
        pool: PoolConfig,
    ) -> Result<Arc<dyn Backend>> {
        let url = config.get_or("url", "redis://localhost:6379");
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::transport(format!("redis url: {e}")))?;
        let pool = Pool::new(RedisManager { client }, pool).await;
        Ok(Arc::new(RedisBackend {
            pool,
            indexed: Mutex::new(HashMap::new()),
        }))
    }
}

/// The portable functions have no server-side form here; the on-demand
/// aggregation path never reaches this store because it lacks the
/// materialized-view capability.
struct RedisFunctions;

impl FunctionDialect for RedisFunctions {
    fn render(&self, func: &Func) -> Result<String> {
        log::debug!("portable function {} requested on redis", func.name());
        Err(StoreError::capability(
            METADATA.id,
            Capabilities::MATERIALIZED_VIEWS,
        ))
    }
}

static FUNCTIONS: RedisFunctions = RedisFunctions;

/// Whether a field's index uses a sorted set (numeric score) or per-value
/// member sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexShape {
    Sorted,
    ByValue,
}

/// Redis backend over pooled multiplexed connections.
pub struct RedisBackend {
    pool: Pool<RedisManager>,
    /// Indexed fields per collection, learned from `create_table`.
    indexed: Mutex<HashMap<String, HashMap<String, IndexShape>>>,
}

impl RedisBackend {
    async fn conn(&self) -> Result<PoolGuard<RedisManager>> {
        self.pool.acquire().await
    }

    fn indexed_fields(&self, table: &str) -> HashMap<String, IndexShape> {
        self.indexed
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    fn map_err(op: LogicalOp, table: Option<&str>, err: redis::RedisError) -> StoreError {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            return StoreError::transport(format!("redis: {err}"));
        }
        StoreError::backend(op, table, err.to_string())
    }

    fn decode_row(raw: &str) -> Option<Row> {
        match serde_json::from_str::<serde_json::Value>(raw).map(Value::from_json) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    }

    fn encode_row(row: &Row) -> String {
        Value::Object(row.clone()).to_json().to_string()
    }

    fn numeric_score(value: &Value) -> Option<f64> {
        match value {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Decimal(_) | Value::Text(_) => value
                .parse_decimal()
                .and_then(|d| bigdecimal_to_f64(&d)),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::DateTime(dt) => Some(dt.timestamp_millis() as f64),
            _ => None,
        }
    }

    fn index_member_repr(value: &Value) -> String {
        value.to_json().to_string()
    }

    /// Queue index updates for one stored row into a pipeline.
    fn index_writes(
        pipe: &mut redis::Pipeline,
        table: &str,
        indexed: &HashMap<String, IndexShape>,
        id: &str,
        row: &Row,
        remove: bool,
    ) {
        for (field, shape) in indexed {
            let Some(value) = row.get(field).filter(|v| !v.is_null()) else {
                continue;
            };
            match shape {
                IndexShape::Sorted => {
                    let Some(score) = Self::numeric_score(value) else {
                        continue;
                    };
                    if remove {
                        pipe.zrem(zindex_key(table, field), id);
                    } else {
                        pipe.zadd(zindex_key(table, field), id, score);
                    }
                }
                IndexShape::ByValue => {
                    let member = Self::index_member_repr(value);
                    let key = sindex_key(table, field, &member);
                    if remove {
                        pipe.srem(key, id);
                    } else {
                        pipe.sadd(key, id);
                    }
                }
            }
        }
    }

    /// Candidate ids for a select: direct key lookups for id equality and
    /// membership, sorted-set ranges for single indexed comparisons, the
    /// full id set otherwise.
    async fn candidate_ids(
        &self,
        table: &str,
        predicate: &Predicate,
        conn: &mut MultiplexedConnection,
    ) -> Result<Vec<String>> {
        if let Predicate::Leaf { field, op, value } = predicate {
            if field == "id" {
                match (op, value) {
                    (CondOp::Eq, Value::Text(id)) => return Ok(vec![id.clone()]),
                    (CondOp::In, Value::Array(items)) => {
                        return Ok(items
                            .iter()
                            .filter_map(|item| item.as_str().map(str::to_string))
                            .collect());
                    }
                    _ => {}
                }
            }

            let indexed = self.indexed_fields(table);
            if let Some(IndexShape::Sorted) = indexed.get(field.as_str()) {
                let range = match (op, value) {
                    (CondOp::Eq, value) => {
                        Self::numeric_score(value).map(|s| (s.to_string(), s.to_string()))
                    }
                    (CondOp::Gt, value) => {
                        Self::numeric_score(value).map(|s| (format!("({s}"), "+inf".into()))
                    }
                    (CondOp::Gte, value) => {
                        Self::numeric_score(value).map(|s| (s.to_string(), "+inf".into()))
                    }
                    (CondOp::Lt, value) => {
                        Self::numeric_score(value).map(|s| ("-inf".into(), format!("({s}")))
                    }
                    (CondOp::Lte, value) => {
                        Self::numeric_score(value).map(|s| ("-inf".into(), s.to_string()))
                    }
                    (CondOp::Between, Value::Array(bounds)) if bounds.len() == 2 => {
                        match (
                            Self::numeric_score(&bounds[0]),
                            Self::numeric_score(&bounds[1]),
                        ) {
                            (Some(low), Some(high)) => {
                                Some((low.to_string(), high.to_string()))
                            }
                            _ => None,
                        }
                    }
                    _ => None,
                };
                if let Some((low, high)) = range {
                    return redis::cmd("ZRANGEBYSCORE")
                        .arg(zindex_key(table, field))
                        .arg(low)
                        .arg(high)
                        .query_async(conn)
                        .await
                        .map_err(|e| Self::map_err(LogicalOp::Select, Some(table), e));
                }
            }
            if let (Some(IndexShape::ByValue), CondOp::Eq) = (indexed.get(field.as_str()), op)
            {
                let member = Self::index_member_repr(value);
                return redis::cmd("SMEMBERS")
                    .arg(sindex_key(table, field, &member))
                    .query_async(conn)
                    .await
                    .map_err(|e| Self::map_err(LogicalOp::Select, Some(table), e));
            }
        }

        redis::cmd("SMEMBERS")
            .arg(ids_key(table))
            .query_async(conn)
            .await
            .map_err(|e| Self::map_err(LogicalOp::Select, Some(table), e))
    }

    /// Fetch and decode documents by id, preserving request order.
    async fn load_rows(
        &self,
        table: &str,
        ids: &[String],
        conn: &mut MultiplexedConnection,
    ) -> Result<Vec<Row>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids.iter().map(|id| doc_key(table, id)).collect();
        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(conn)
            .await
            .map_err(|e| Self::map_err(LogicalOp::Select, Some(table), e))?;
        Ok(raw
            .into_iter()
            .flatten()
            .filter_map(|doc| Self::decode_row(&doc))
            .collect())
    }

    /// The scan path: candidates, decode, filter, order, paginate.
    async fn select_rows(&self, table: &str, request: &SelectRequest) -> Result<Vec<Row>> {
        let predicate = parse_conditions(&request.conditions)?;
        let mut conn = self.conn().await?;

        let ids = self.candidate_ids(table, &predicate, &mut conn).await?;
        let mut rows: Vec<Row> = self
            .load_rows(table, &ids, &mut conn)
            .await?
            .into_iter()
            .filter(|row| evaluate(&predicate, row))
            .collect();

        if !request.order_by.is_empty() {
            rows.sort_by(|left, right| {
                for order in &request.order_by {
                    let a = left.get(&order.field).cloned().unwrap_or(Value::Null);
                    let b = right.get(&order.field).cloned().unwrap_or(Value::Null);
                    let ordering = a.cmp(&b);
                    if ordering != std::cmp::Ordering::Equal {
                        return match order.direction {
                            SortDirection::Ascending => ordering,
                            SortDirection::Descending => ordering.reverse(),
                        };
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        let offset = request.offset.unwrap_or(0) as usize;
        let rows: Vec<Row> = rows.into_iter().skip(offset).collect();
        let mut rows: Vec<Row> = match request.limit {
            Some(limit) => rows.into_iter().take(limit as usize).collect(),
            None => rows,
        };

        if let Some(projection) = &request.fields {
            let keep: HashSet<&str> = projection
                .iter()
                .map(String::as_str)
                .chain(std::iter::once("id"))
                .collect();
            for row in rows.iter_mut() {
                row.retain(|key, _| keep.contains(key.as_str()));
            }
        }

        Ok(rows)
    }

    fn row_id(row: &Row) -> Option<String> {
        match row.get("id") {
            Some(Value::Text(id)) => Some(id.clone()),
            Some(Value::Int(id)) => Some(id.to_string()),
            _ => None,
        }
    }
}

fn bigdecimal_to_f64(value: &polystore_core::bigdecimal::BigDecimal) -> Option<f64> {
    polystore_core::bigdecimal::ToPrimitive::to_f64(value)
}

/// Wire-normalize a condition operand so comparisons against stored JSON
/// agree: timestamps to epoch millis, decimals and uuids to text.
fn wire_value(value: &Value) -> Value {
    match value {
        Value::DateTime(dt) => Value::Int(dt.timestamp_millis()),
        Value::Decimal(d) => Value::Text(d.normalized().to_string()),
        Value::Uuid(u) => Value::Text(u.to_string()),
        Value::Array(items) => Value::Array(items.iter().map(wire_value).collect()),
        other => other.clone(),
    }
}

#[async_trait]
impl Backend for RedisBackend {
    fn metadata(&self) -> &'static BackendMetadata {
        &METADATA
    }

    fn function_dialect(&self) -> &dyn FunctionDialect {
        &FUNCTIONS
    }

    /// No DDL to run; registers the schema's indexed fields so writes
    /// maintain their secondary indexes.
    async fn create_table(&self, schema: &Schema, _options: &CreateTableOptions) -> Result<()> {
        let mut shapes = HashMap::new();
        let mut declared: Vec<&str> = schema
            .meta()
            .indexes
            .iter()
            .flat_map(|index| index.fields.iter().map(String::as_str))
            .collect();
        for field in schema.fields() {
            if !field.indexes.is_empty() {
                declared.push(&field.name);
            }
        }

        for name in declared {
            if let Some(field) = schema.field(name) {
                let shape = match field.kind.scalar() {
                    FieldKind::Integer
                    | FieldKind::Float
                    | FieldKind::Decimal { .. }
                    | FieldKind::Timestamp
                    | FieldKind::Boolean => IndexShape::Sorted,
                    _ => IndexShape::ByValue,
                };
                shapes.insert(field.db_name.clone(), shape);
            }
        }

        self.indexed
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .insert(schema.collection().to_string(), shapes);
        Ok(())
    }

    async fn drop_table(&self, table: &str, _if_exists: bool) -> Result<()> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(ids_key(table))
            .query_async(&mut *conn)
            .await
            .map_err(|e| Self::map_err(LogicalOp::DropTable, Some(table), e))?;

        let rows = self.load_rows(table, &ids, &mut conn).await?;
        let indexed = self.indexed_fields(table);

        let mut pipe = redis::pipe();
        pipe.atomic();
        for row in &rows {
            if let Some(id) = Self::row_id(row) {
                pipe.del(doc_key(table, &id));
                Self::index_writes(&mut pipe, table, &indexed, &id, row, true);
            }
        }
        pipe.del(ids_key(table));
        pipe.query_async::<()>(&mut *conn)
            .await
            .map_err(|e| Self::map_err(LogicalOp::DropTable, Some(table), e))?;

        self.indexed
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .remove(table);
        Ok(())
    }

    async fn insert(&self, table: &str, mut row: Row) -> Result<Row> {
        let id = match Self::row_id(&row) {
            Some(id) => id,
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                row.insert("id".to_string(), Value::Text(id.clone()));
                id
            }
        };

        let indexed = self.indexed_fields(table);
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.set(doc_key(table, &id), Self::encode_row(&row));
        pipe.sadd(ids_key(table), &id);
        Self::index_writes(&mut pipe, table, &indexed, &id, &row, false);
        pipe.query_async::<()>(&mut *conn)
            .await
            .map_err(|e| Self::map_err(LogicalOp::Insert, Some(table), e))?;

        Ok(row)
    }

    async fn insert_many(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let indexed = self.indexed_fields(table);
        let mut stored = Vec::with_capacity(rows.len());
        let mut pipe = redis::pipe();
        pipe.atomic();
        for mut row in rows {
            let id = match Self::row_id(&row) {
                Some(id) => id,
                None => {
                    let id = uuid::Uuid::new_v4().to_string();
                    row.insert("id".to_string(), Value::Text(id.clone()));
                    id
                }
            };
            pipe.set(doc_key(table, &id), Self::encode_row(&row));
            pipe.sadd(ids_key(table), &id);
            Self::index_writes(&mut pipe, table, &indexed, &id, &row, false);
            stored.push(row);
        }

        let mut conn = self.conn().await?;
        pipe.query_async::<()>(&mut *conn)
            .await
            .map_err(|e| Self::map_err(LogicalOp::InsertMany, Some(table), e))?;
        Ok(stored)
    }

    async fn select(&self, table: &str, request: &SelectRequest) -> Result<Vec<Row>> {
        self.select_rows(table, request).await
    }

    async fn count(&self, table: &str, conditions: &[String]) -> Result<u64> {
        if conditions.is_empty() {
            let mut conn = self.conn().await?;
            let count: u64 = redis::cmd("SCARD")
                .arg(ids_key(table))
                .query_async(&mut *conn)
                .await
                .map_err(|e| Self::map_err(LogicalOp::Count, Some(table), e))?;
            return Ok(count);
        }
        let request = SelectRequest::with_conditions(conditions.to_vec());
        let rows = self.select_rows(table, &request).await?;
        Ok(rows.len() as u64)
    }

    async fn update(&self, table: &str, conditions: &[String], patch: Row) -> Result<Vec<Row>> {
        if patch.is_empty() {
            return Ok(Vec::new());
        }
        let matching = self
            .select_rows(table, &SelectRequest::with_conditions(conditions.to_vec()))
            .await?;
        if matching.is_empty() {
            return Ok(Vec::new());
        }

        let indexed = self.indexed_fields(table);
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        let mut updated = Vec::with_capacity(matching.len());
        for row in matching {
            let Some(id) = Self::row_id(&row) else {
                continue;
            };
            Self::index_writes(&mut pipe, table, &indexed, &id, &row, true);
            let mut next = row;
            for (key, value) in &patch {
                next.insert(key.clone(), value.clone());
            }
            pipe.set(doc_key(table, &id), Self::encode_row(&next));
            Self::index_writes(&mut pipe, table, &indexed, &id, &next, false);
            updated.push(next);
        }
        pipe.query_async::<()>(&mut *conn)
            .await
            .map_err(|e| Self::map_err(LogicalOp::Update, Some(table), e))?;
        Ok(updated)
    }

    async fn delete(&self, table: &str, conditions: &[String]) -> Result<u64> {
        let matching = self
            .select_rows(table, &SelectRequest::with_conditions(conditions.to_vec()))
            .await?;
        if matching.is_empty() {
            return Ok(0);
        }

        let indexed = self.indexed_fields(table);
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        let mut removed = 0u64;
        for row in matching {
            let Some(id) = Self::row_id(&row) else {
                continue;
            };
            pipe.del(doc_key(table, &id));
            pipe.srem(ids_key(table), &id);
            Self::index_writes(&mut pipe, table, &indexed, &id, &row, true);
            removed += 1;
        }
        pipe.query_async::<()>(&mut *conn)
            .await
            .map_err(|e| Self::map_err(LogicalOp::Delete, Some(table), e))?;
        Ok(removed)
    }

    /// Escape hatch: a raw command line, split on whitespace.
    async fn execute_raw(&self, query: &str, _params: Option<Row>) -> Result<serde_json::Value> {
        let mut parts = query.split_whitespace();
        let Some(name) = parts.next() else {
            return Err(StoreError::schema("empty redis command"));
        };
        let mut command = redis::cmd(name);
        for arg in parts {
            command.arg(arg);
        }

        let mut conn = self.conn().await?;
        let value: redis::Value = command
            .query_async(&mut *conn)
            .await
            .map_err(|e| Self::map_err(LogicalOp::Raw, None, e))?;
        Ok(redis_value_to_json(value))
    }

    fn build_condition(&self, field: &str, op: CondOp, value: &Value) -> Result<String> {
        let operand = wire_value(value);
        Ok(match op {
            CondOp::IsNull => format!("{field} is null"),
            CondOp::IsNotNull => format!("{field} is not null"),
            CondOp::In | CondOp::NotIn => match &operand {
                Value::Array(items) if items.is_empty() => {
                    if op == CondOp::In {
                        "false".to_string()
                    } else {
                        "true".to_string()
                    }
                }
                other => format!(
                    "{field} {} {}",
                    if op == CondOp::In { "in" } else { "not in" },
                    other.to_json()
                ),
            },
            CondOp::Eq => format!("{field} = {}", operand.to_json()),
            CondOp::NotEq => format!("{field} != {}", operand.to_json()),
            CondOp::Lt => format!("{field} < {}", operand.to_json()),
            CondOp::Lte => format!("{field} <= {}", operand.to_json()),
            CondOp::Gt => format!("{field} > {}", operand.to_json()),
            CondOp::Gte => format!("{field} >= {}", operand.to_json()),
            CondOp::Contains => format!("{field} contains {}", operand.to_json()),
            CondOp::Like => format!("{field} like {}", operand.to_json()),
            CondOp::ILike => format!("{field} ilike {}", operand.to_json()),
            CondOp::Between => format!("{field} between {}", operand.to_json()),
        })
    }

    /// Logical value representation; the store itself is typeless.
    fn get_field_type(&self, field: &Field) -> String {
        match field.kind.scalar() {
            FieldKind::Integer
            | FieldKind::Float
            | FieldKind::Decimal { .. }
            | FieldKind::Timestamp => "number".to_string(),
            FieldKind::Boolean => "boolean".to_string(),
            FieldKind::Object | FieldKind::Array(_) => "json".to_string(),
            _ => "string".to_string(),
        }
    }

    fn format_value(&self, value: &Value) -> String {
        wire_value(value).to_json().to_string()
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map(|_| ())
            .map_err(|e| Self::map_err(LogicalOp::Ping, None, e))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close(Duration::from_secs(5)).await;
        Ok(())
    }

    async fn create_materialized_view(&self, view: &ViewDefinition) -> Result<()> {
        let _ = view;
        Err(StoreError::capability(
            METADATA.id,
            Capabilities::MATERIALIZED_VIEWS,
        ))
    }
}

fn redis_value_to_json(value: redis::Value) -> serde_json::Value {
    match value {
        redis::Value::Nil => serde_json::Value::Null,
        redis::Value::Int(i) => serde_json::Value::from(i),
        redis::Value::Double(d) => serde_json::Number::from_f64(d)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        redis::Value::Boolean(b) => serde_json::Value::Bool(b),
        redis::Value::SimpleString(s) => serde_json::Value::String(s),
        redis::Value::BulkString(bytes) => match String::from_utf8(bytes) {
            Ok(text) => serde_json::Value::String(text),
            Err(raw) => serde_json::Value::String(format!("{:02x?}", raw.into_bytes())),
        },
        redis::Value::Array(items) | redis::Value::Set(items) => {
            serde_json::Value::Array(items.into_iter().map(redis_value_to_json).collect())
        }
        redis::Value::Map(entries) => serde_json::Value::Array(
            entries
                .into_iter()
                .map(|(k, v)| {
                    serde_json::Value::Array(vec![
                        redis_value_to_json(k),
                        redis_value_to_json(v),
                    ])
                })
                .collect(),
        ),
        redis::Value::Okay => serde_json::Value::String("OK".to_string()),
        other => serde_json::Value::String(format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend() -> RedisBackend {
        let client = redis::Client::open("redis://localhost:6379")
            .expect("static url parses");
        let pool = Pool::new(
            RedisManager { client },
            PoolConfig {
                min: 0,
                ..PoolConfig::small()
            },
        )
        .await;
        RedisBackend {
            pool,
            indexed: Mutex::new(HashMap::new()),
        }
    }

    #[test]
    fn key_layout() {
        assert_eq!(doc_key("users", "42"), "users:doc:42");
        assert_eq!(ids_key("users"), "users:ids");
        assert_eq!(zindex_key("users", "age"), "users:idx:age");
        assert_eq!(sindex_key("users", "role", "\"admin\""), "users:idx:role:\"admin\"");
    }

    #[tokio::test]
    async fn conditions_normalize_operands_to_wire_form() {
        use polystore_core::chrono::{TimeZone, Utc};

        let backend = backend().await;
        let dt = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(
            backend
                .build_condition("created_at", CondOp::Gte, &Value::DateTime(dt))
                .unwrap(),
            format!("created_at >= {}", dt.timestamp_millis())
        );
        assert_eq!(
            backend
                .build_condition("name", CondOp::Eq, &Value::Text("jo\"hn".into()))
                .unwrap(),
            "name = \"jo\\\"hn\""
        );
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
    async fn built_conditions_parse_back() {
        let backend = backend().await;
        let built = backend
            .build_condition("age", CondOp::Between, &Value::Array(vec![
                Value::Int(18),
                Value::Int(65),
            ]))
            .unwrap();
        let predicate = parse_conditions(&[built]).unwrap();

        let mut row = Row::new();
        row.insert("age".to_string(), Value::Int(30));
        assert!(evaluate(&predicate, &row));
    }

    #[tokio::test]
    async fn create_table_registers_index_shapes() {
        use polystore_core::TableIndex;

        let backend = backend().await;
        let schema = Schema::builder("User")
            .collection("users")
            .backend("redis")
            .field(Field::text("username").required())
            .field(Field::integer("age"))
            .field(Field::timestamp("created_at"))
            .table_index(TableIndex::on(["username"]))
            .table_index(TableIndex::on(["age"]))
            .table_index(TableIndex::on(["created_at"]))
            .build()
            .unwrap();

        backend
            .create_table(&schema, &CreateTableOptions::default())
            .await
            .unwrap();

        let shapes = backend.indexed_fields("users");
        assert_eq!(shapes.get("username"), Some(&IndexShape::ByValue));
        assert_eq!(shapes.get("age"), Some(&IndexShape::Sorted));
        assert_eq!(shapes.get("created_at"), Some(&IndexShape::Sorted));
    }

    #[tokio::test]
    async fn view_creation_is_a_capability_error() {
        use polystore_core::Func;

        let backend = backend().await;
        let schema = Schema::builder("Sales")
            .collection("sales")
            .backend("redis")
            .field(Field::low_cardinality("seller_name").required())
            .field(Field::decimal("offer_price").required())
            .build()
            .unwrap();
        let view = ViewDefinition::builder(schema, "summary")
            .dimension("seller_name", "seller_name")
            .metric("total", Func::Sum("offer_price".into()))
            .build()
            .unwrap();

        let err = backend.create_materialized_view(&view).await.unwrap_err();
        assert!(matches!(err, StoreError::Capability { .. }));
    }
}
