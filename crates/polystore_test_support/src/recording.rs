use async_trait::async_trait;
use polystore_core::{
    Backend, BackendMetadata, Capabilities, CondOp, CreateTableOptions, Field, Func,
    FunctionDialect, Result, Row, Schema, SelectRequest, StoreCategory, StoreError,
    TransactionHandle, Value, ValueEncoding, ViewDefinition,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

static DOCUMENT_GRAPH_METADATA: BackendMetadata = BackendMetadata {
    id: "fake-document-graph",
    display_name: "Fake Document/Graph",
    description: "Deterministic fake backend for tests",
    category: StoreCategory::DocumentGraph,
    capabilities: Capabilities::DOCUMENT_GRAPH_BASE,
    encoding: ValueEncoding::DOCUMENT_GRAPH,
};

static COLUMNAR_METADATA: BackendMetadata = BackendMetadata {
    id: "fake-columnar",
    display_name: "Fake Columnar",
    description: "Deterministic fake backend for tests",
    category: StoreCategory::Columnar,
    capabilities: Capabilities::COLUMNAR_BASE,
    encoding: ValueEncoding::COLUMNAR,
};

static KEY_VALUE_METADATA: BackendMetadata = BackendMetadata {
    id: "fake-key-value",
    display_name: "Fake Key-Value",
    description: "Deterministic fake backend for tests",
    category: StoreCategory::KeyValue,
    capabilities: Capabilities::KEYVALUE_BASE,
    encoding: ValueEncoding::KEY_VALUE,
};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateTable {
        table: String,
    },
    DropTable {
        table: String,
        if_exists: bool,
    },
    Insert {
        table: String,
        row: Row,
    },
    InsertMany {
        table: String,
        count: usize,
    },
    Select {
        table: String,
        conditions: Vec<String>,
        limit: Option<u64>,
        offset: Option<u64>,
        fetch: Vec<String>,
    },
    Count {
        table: String,
        conditions: Vec<String>,
    },
    Update {
        table: String,
        conditions: Vec<String>,
        patch: Row,
    },
    Delete {
        table: String,
        conditions: Vec<String>,
    },
    Raw {
        query: String,
    },
    CreateView {
        name: String,
        query: String,
    },
    DropView {
        name: String,
    },
    RefreshView {
        name: String,
    },
    Relate {
        relation: String,
    },
    Begin,
    Commit,
    Rollback,
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    select_results: HashMap<String, VecDeque<Vec<Row>>>,
    count_results: HashMap<String, VecDeque<u64>>,
    errors: VecDeque<StoreError>,
}

/// Scriptable backend that records every call.
///
/// Results are configured per table as FIFO queues; an empty queue yields an
/// empty result, not an error. `queue_error` makes the next operation fail,
/// which is how transport faults are simulated.
pub struct RecordingBackend {
    metadata: &'static BackendMetadata,
    state: Mutex<State>,
    next_id: AtomicUsize,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingBackend {
    pub fn document_graph() -> Self {
        Self::with_metadata(&DOCUMENT_GRAPH_METADATA)
    }

    pub fn columnar() -> Self {
        Self::with_metadata(&COLUMNAR_METADATA)
    }

    pub fn key_value() -> Self {
        Self::with_metadata(&KEY_VALUE_METADATA)
    }

    fn with_metadata(metadata: &'static BackendMetadata) -> Self {
        Self {
            metadata,
            state: Mutex::new(State::default()),
            next_id: AtomicUsize::new(1),
            latency: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Simulated per-operation latency, for concurrency assertions.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Queue rows for the next `select` on a table.
    pub fn queue_rows(&self, table: &str, rows: Vec<Row>) {
        self.lock()
            .select_results
            .entry(table.to_string())
            .or_default()
            .push_back(rows);
    }

    /// Queue a result for the next `count` on a table.
    pub fn queue_count(&self, table: &str, count: u64) {
        self.lock()
            .count_results
            .entry(table.to_string())
            .or_default()
            .push_back(count);
    }

    /// Fail the next operation with the given error.
    pub fn queue_error(&self, error: StoreError) {
        self.lock().errors.push_back(error);
    }

    /// Everything recorded so far.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Highest number of operations observed in flight at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    async fn enter(&self, call: Call) -> Result<()> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let pending_error = {
            let mut state = self.lock();
            state.calls.push(call);
            state.errors.pop_front()
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match pending_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn next_generated_id(&self) -> String {
        format!("doc-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn pop_rows(&self, table: &str) -> Vec<Row> {
        self.lock()
            .select_results
            .get_mut(table)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default()
    }
}

/// Generic rendering of the portable functions, close to the columnar form.
struct RecordingFunctions;

impl FunctionDialect for RecordingFunctions {
    fn render(&self, func: &Func) -> Result<String> {
        Ok(match func {
            Func::Count => "count()".to_string(),
            Func::Sum(f) => format!("sum({f})"),
            Func::Avg(f) => format!("avg({f})"),
            Func::Min(f) => format!("min({f})"),
            Func::Max(f) => format!("max({f})"),
            Func::CountDistinct(f) => format!("count_distinct({f})"),
            Func::ToDate(f) => format!("to_date({f})"),
            Func::ToYearMonth(f) => format!("to_year_month({f})"),
            Func::Has(f, value) => format!("has({f}, {})", format_literal(value)),
            Func::Length(f) => format!("length({f})"),
            Func::Lower(f) => format!("lower({f})"),
            Func::Upper(f) => format!("upper({f})"),
            Func::Round(f, digits) => format!("round({f}, {digits})"),
        })
    }
}

static FUNCTIONS: RecordingFunctions = RecordingFunctions;

#[async_trait]
impl Backend for RecordingBackend {
    fn metadata(&self) -> &'static BackendMetadata {
        self.metadata
    }

    fn function_dialect(&self) -> &dyn FunctionDialect {
        &FUNCTIONS
    }

    async fn create_table(&self, schema: &Schema, _options: &CreateTableOptions) -> Result<()> {
        self.enter(Call::CreateTable {
            table: schema.collection().to_string(),
        })
        .await
    }

    async fn drop_table(&self, table: &str, if_exists: bool) -> Result<()> {
        self.enter(Call::DropTable {
            table: table.to_string(),
            if_exists,
        })
        .await
    }

    async fn insert(&self, table: &str, mut row: Row) -> Result<Row> {
        if row.get("id").is_none_or(Value::is_null) {
            row.insert("id".to_string(), Value::Text(self.next_generated_id()));
        }
        self.enter(Call::Insert {
            table: table.to_string(),
            row: row.clone(),
        })
        .await?;
        Ok(row)
    }

    async fn insert_many(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>> {
        let rows: Vec<Row> = rows
            .into_iter()
            .map(|mut row| {
                if row.get("id").is_none_or(Value::is_null) {
                    row.insert("id".to_string(), Value::Text(self.next_generated_id()));
                }
                row
            })
            .collect();
        self.enter(Call::InsertMany {
            table: table.to_string(),
            count: rows.len(),
        })
        .await?;
        Ok(rows)
    }

    async fn select(&self, table: &str, request: &SelectRequest) -> Result<Vec<Row>> {
        self.enter(Call::Select {
            table: table.to_string(),
            conditions: request.conditions.clone(),
            limit: request.limit,
            offset: request.offset,
            fetch: request.fetch.clone(),
        })
        .await?;
        Ok(self.pop_rows(table))
    }

    async fn count(&self, table: &str, conditions: &[String]) -> Result<u64> {
        self.enter(Call::Count {
            table: table.to_string(),
            conditions: conditions.to_vec(),
        })
        .await?;
        let scripted = self
            .lock()
            .count_results
            .get_mut(table)
            .and_then(VecDeque::pop_front);
        Ok(scripted.unwrap_or(0))
    }

    async fn update(&self, table: &str, conditions: &[String], patch: Row) -> Result<Vec<Row>> {
        self.enter(Call::Update {
            table: table.to_string(),
            conditions: conditions.to_vec(),
            patch: patch.clone(),
        })
        .await?;
        // Pre-image with the patch applied, mirroring the columnar contract.
        Ok(self
            .pop_rows(table)
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
        self.enter(Call::Delete {
            table: table.to_string(),
            conditions: conditions.to_vec(),
        })
        .await?;
        let scripted = self
            .lock()
            .count_results
            .get_mut(table)
            .and_then(VecDeque::pop_front);
        Ok(scripted.unwrap_or(0))
    }

    async fn execute_raw(&self, query: &str, _params: Option<Row>) -> Result<serde_json::Value> {
        self.enter(Call::Raw {
            query: query.to_string(),
        })
        .await?;
        Ok(serde_json::Value::Null)
    }

    fn build_condition(&self, field: &str, op: CondOp, value: &Value) -> Result<String> {
        Ok(match op {
            CondOp::IsNull => format!("{field} IS NULL"),
            CondOp::IsNotNull => format!("{field} IS NOT NULL"),
            CondOp::In | CondOp::NotIn => {
                let keyword = if op == CondOp::In { "IN" } else { "NOT IN" };
                match value {
                    Value::Array(items) if items.is_empty() => {
                        if op == CondOp::In { "1 = 0" } else { "1 = 1" }.to_string()
                    }
                    Value::Array(items) => {
                        let rendered: Vec<String> = items.iter().map(format_literal).collect();
                        format!("{field} {keyword} ({})", rendered.join(", "))
                    }
                    other => format!("{field} {keyword} {}", format_literal(other)),
                }
            }
            CondOp::Between => match value {
                Value::Array(bounds) if bounds.len() == 2 => format!(
                    "{field} BETWEEN {} AND {}",
                    format_literal(&bounds[0]),
                    format_literal(&bounds[1])
                ),
                other => format!("{field} BETWEEN {}", format_literal(other)),
            },
            CondOp::Contains => format!("{field} CONTAINS {}", format_literal(value)),
            CondOp::Like => format!("{field} LIKE {}", format_literal(value)),
            CondOp::ILike => format!("{field} ILIKE {}", format_literal(value)),
            CondOp::Eq => format!("{field} = {}", format_literal(value)),
            CondOp::NotEq => format!("{field} != {}", format_literal(value)),
            CondOp::Lt => format!("{field} < {}", format_literal(value)),
            CondOp::Lte => format!("{field} <= {}", format_literal(value)),
            CondOp::Gt => format!("{field} > {}", format_literal(value)),
            CondOp::Gte => format!("{field} >= {}", format_literal(value)),
        })
    }

    fn get_field_type(&self, field: &Field) -> String {
        format!("{:?}", field.kind)
    }

    fn format_value(&self, value: &Value) -> String {
        format_literal(value)
    }

    async fn begin_transaction(&self) -> Result<TransactionHandle> {
        self.enter(Call::Begin).await?;
        Ok(TransactionHandle::noop(self.metadata.id))
    }

    async fn commit_transaction(&self, _handle: TransactionHandle) -> Result<()> {
        self.enter(Call::Commit).await
    }

    async fn rollback_transaction(&self, _handle: TransactionHandle) -> Result<()> {
        self.enter(Call::Rollback).await
    }

    async fn create_materialized_view(&self, view: &ViewDefinition) -> Result<()> {
        if !self.supports(Capabilities::MATERIALIZED_VIEWS) {
            return Err(StoreError::capability(
                self.metadata.id,
                Capabilities::MATERIALIZED_VIEWS,
            ));
        }
        let query = view.compile_select(self)?;
        self.enter(Call::CreateView {
            name: view.view_name().to_string(),
            query,
        })
        .await
    }

    async fn drop_materialized_view(&self, name: &str, _if_exists: bool) -> Result<()> {
        if !self.supports(Capabilities::MATERIALIZED_VIEWS) {
            return Err(StoreError::capability(
                self.metadata.id,
                Capabilities::MATERIALIZED_VIEWS,
            ));
        }
        self.enter(Call::DropView {
            name: name.to_string(),
        })
        .await
    }

    async fn refresh_materialized_view(&self, name: &str) -> Result<()> {
        if !self.supports(Capabilities::MATERIALIZED_VIEWS) {
            return Err(StoreError::capability(
                self.metadata.id,
                Capabilities::MATERIALIZED_VIEWS,
            ));
        }
        self.enter(Call::RefreshView {
            name: name.to_string(),
        })
        .await
    }

    async fn create_relation(
        &self,
        relation: &str,
        _from_id: &Value,
        _to_id: &Value,
        _attributes: Row,
    ) -> Result<()> {
        if !self.supports(Capabilities::GRAPH_RELATIONS) {
            return Err(StoreError::capability(
                self.metadata.id,
                Capabilities::GRAPH_RELATIONS,
            ));
        }
        self.enter(Call::Relate {
            relation: relation.to_string(),
        })
        .await
    }

    async fn explain(&self, table: &str, request: &SelectRequest) -> Result<serde_json::Value> {
        if !self.supports(Capabilities::EXPLAIN) {
            return Err(StoreError::capability(
                self.metadata.id,
                Capabilities::EXPLAIN,
            ));
        }
        self.enter(Call::Raw {
            query: format!("EXPLAIN {table}"),
        })
        .await?;
        Ok(serde_json::json!({
            "table": table,
            "conditions": request.conditions,
        }))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// ANSI-flavored literal rendering for the fake dialect.
fn format_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Decimal(d) => d.normalized().to_string(),
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Bytes(b) => {
            let hex: String = b.iter().map(|byte| format!("{byte:02x}")).collect();
            format!("X'{hex}'")
        }
        Value::Uuid(u) => format!("'{u}'"),
        Value::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.3f")),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(format_literal).collect();
            format!("[{}]", rendered.join(", "))
        }
        Value::Object(_) => format!("'{}'", value.to_json().to_string().replace('\'', "''")),
    }
}
