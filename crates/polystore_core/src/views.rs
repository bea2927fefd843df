use crate::backend::{Backend, SelectRequest};
use crate::capabilities::Capabilities;
use crate::error::{Result, StoreError};
use crate::functions::Func;
use crate::query::{Filter, compile_conjunction};
use crate::registry::Connection;
use crate::schema::Schema;
use crate::value::{Row, Value};
use std::sync::Arc;

/// Grouping key of a materialized view: a source field with an optional
/// scalar transform.
#[derive(Debug, Clone)]
pub struct Dimension {
    pub name: String,
    pub source: String,
    pub transform: Option<Func>,
}

/// Aggregation output of a materialized view.
#[derive(Debug, Clone)]
pub struct Metric {
    pub name: String,
    pub aggregate: Func,
}

/// Declarative aggregation view over one document class.
///
/// Compiles to a native materialized view on stores that support one and to
/// an equivalent on-demand aggregating query otherwise.
#[derive(Debug, Clone)]
pub struct ViewDefinition {
    source: Arc<Schema>,
    view_name: String,
    engine: Option<String>,
    engine_params: Vec<String>,
    order_by: Vec<String>,
    partition_by: Option<String>,
    dimensions: Vec<Dimension>,
    metrics: Vec<Metric>,
    filters: Vec<Filter>,
    having: Vec<Filter>,
}

impl ViewDefinition {
    pub fn builder(source: Arc<Schema>, view_name: impl Into<String>) -> ViewBuilder {
        ViewBuilder::new(source, view_name)
    }

    pub fn source(&self) -> &Arc<Schema> {
        &self.source
    }

    pub fn view_name(&self) -> &str {
        &self.view_name
    }

    pub fn engine(&self) -> Option<&str> {
        self.engine.as_deref()
    }

    pub fn engine_params(&self) -> &[String] {
        &self.engine_params
    }

    /// Declared order-by, defaulting to the dimension names.
    pub fn order_by(&self) -> Vec<String> {
        if self.order_by.is_empty() {
            self.dimensions.iter().map(|d| d.name.clone()).collect()
        } else {
            self.order_by.clone()
        }
    }

    pub fn partition_by(&self) -> Option<&str> {
        self.partition_by.as_deref()
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// Render the canonical source query in the backend's dialect:
    /// `SELECT <dims>, <aggregates> FROM <collection> [WHERE ...]
    /// GROUP BY <dims> [HAVING ...]`.
    pub fn compile_select(&self, backend: &dyn Backend) -> Result<String> {
        let dialect = backend.function_dialect();
        let mut select_parts = Vec::new();

        for dimension in &self.dimensions {
            let expr = match &dimension.transform {
                Some(func) => dialect.render(func)?,
                None => dimension.source.clone(),
            };
            if dimension.transform.is_some() || dimension.name != dimension.source {
                select_parts.push(format!("{expr} AS {}", dimension.name));
            } else {
                select_parts.push(expr);
            }
        }
        for metric in &self.metrics {
            let expr = dialect.render(&metric.aggregate)?;
            select_parts.push(format!("{expr} AS {}", metric.name));
        }

        let mut query = format!(
            "SELECT {} FROM {}",
            select_parts.join(", "),
            self.source.collection()
        );

        if !self.filters.is_empty() {
            let conditions = compile_conjunction(&self.filters, backend)?;
            query.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
        }

        if !self.dimensions.is_empty() {
            let group_names: Vec<&str> =
                self.dimensions.iter().map(|d| d.name.as_str()).collect();
            query.push_str(&format!(" GROUP BY {}", group_names.join(", ")));
        }

        if !self.having.is_empty() {
            let conditions = compile_conjunction(&self.having, backend)?;
            query.push_str(&format!(" HAVING {}", conditions.join(" AND ")));
        }

        Ok(query)
    }

    fn check_backend(&self, connection: &Connection) -> Result<()> {
        if let Some(bound) = self.source.backend()
            && bound != connection.backend_id()
        {
            return Err(StoreError::schema(format!(
                "view '{}' is bound to backend '{bound}' but the connection uses '{}'",
                self.view_name,
                connection.backend_id()
            )));
        }
        Ok(())
    }

    /// Create the native artifact. On a store without materialized views
    /// this fails with a capability error; run [`ViewDefinition::query`]
    /// on demand instead.
    pub async fn create(&self, connection: &Connection) -> Result<()> {
        self.check_backend(connection)?;
        connection.backend().create_materialized_view(self).await
    }

    pub async fn drop(&self, connection: &Connection) -> Result<()> {
        self.check_backend(connection)?;
        connection
            .backend()
            .drop_materialized_view(&self.view_name, true)
            .await
    }

    /// No-op where the store auto-maintains the view.
    pub async fn refresh(&self, connection: &Connection) -> Result<()> {
        self.check_backend(connection)?;
        connection
            .backend()
            .refresh_materialized_view(&self.view_name)
            .await
    }

    /// Read the aggregation. Queries the materialized artifact where one
    /// exists, otherwise runs the equivalent aggregating query on demand.
    pub async fn query(&self, connection: &Connection) -> Result<Vec<Row>> {
        self.check_backend(connection)?;
        let backend = connection.backend();

        if backend.supports(Capabilities::MATERIALIZED_VIEWS) {
            return backend
                .select(&self.view_name, &SelectRequest::default())
                .await;
        }

        let query = self.compile_select(backend)?;
        let raw = backend.execute_raw(&query, None).await?;
        match raw {
            serde_json::Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|item| match Value::from_json(item) {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect()),
            _ => Ok(Vec::new()),
        }
    }
}

/// Partitions declared fields into dimensions and metrics and validates
/// every referenced source field at build time.
pub struct ViewBuilder {
    source: Arc<Schema>,
    view_name: String,
    engine: Option<String>,
    engine_params: Vec<String>,
    order_by: Vec<String>,
    partition_by: Option<String>,
    dimensions: Vec<Dimension>,
    metrics: Vec<Metric>,
    filters: Vec<Filter>,
    having: Vec<Filter>,
}

impl ViewBuilder {
    pub fn new(source: Arc<Schema>, view_name: impl Into<String>) -> Self {
        Self {
            source,
            view_name: view_name.into(),
            engine: None,
            engine_params: Vec::new(),
            order_by: Vec::new(),
            partition_by: None,
            dimensions: Vec::new(),
            metrics: Vec::new(),
            filters: Vec::new(),
            having: Vec::new(),
        }
    }

    pub fn engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = Some(engine.into());
        self
    }

    pub fn engine_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.engine_params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn order_by<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order_by = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn partition_by(mut self, expression: impl Into<String>) -> Self {
        self.partition_by = Some(expression.into());
        self
    }

    /// Plain dimension: group by a source field as-is.
    pub fn dimension(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            source: source.into(),
            transform: None,
        });
        self
    }

    /// Dimension with a scalar transform over its source field.
    pub fn dimension_with(
        mut self,
        name: impl Into<String>,
        source: impl Into<String>,
        transform: Func,
    ) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            source: source.into(),
            transform: Some(transform),
        });
        self
    }

    pub fn metric(mut self, name: impl Into<String>, aggregate: Func) -> Self {
        self.metrics.push(Metric {
            name: name.into(),
            aggregate,
        });
        self
    }

    /// Filter applied before aggregation.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Filter applied after aggregation, over dimension or metric names.
    pub fn having(mut self, filter: Filter) -> Self {
        self.having.push(filter);
        self
    }

    pub fn build(self) -> Result<ViewDefinition> {
        if self.dimensions.is_empty() && self.metrics.is_empty() {
            return Err(StoreError::schema(format!(
                "view '{}' declares no dimensions or metrics",
                self.view_name
            )));
        }

        for dimension in &self.dimensions {
            self.source.require_field(&dimension.source)?;
            if let Some(transform) = &dimension.transform {
                if transform.is_aggregate() {
                    return Err(StoreError::schema(format!(
                        "dimension '{}' on view '{}' uses aggregate {}",
                        dimension.name,
                        self.view_name,
                        transform.name()
                    )));
                }
                if let Some(operand) = transform.operand() {
                    self.source.require_field(operand)?;
                }
            }
        }

        for metric in &self.metrics {
            if !metric.aggregate.is_aggregate() {
                return Err(StoreError::schema(format!(
                    "metric '{}' on view '{}' needs an aggregate, got {}",
                    metric.name,
                    self.view_name,
                    metric.aggregate.name()
                )));
            }
            if let Some(operand) = metric.aggregate.operand() {
                self.source.require_field(operand)?;
            }
        }

        for filter in &self.filters {
            filter.validate(&self.source)?;
        }

        // HAVING references view outputs, not source fields.
        let output_names: Vec<&str> = self
            .dimensions
            .iter()
            .map(|d| d.name.as_str())
            .chain(self.metrics.iter().map(|m| m.name.as_str()))
            .collect();
        for filter in &self.having {
            validate_against_outputs(filter, &output_names, &self.view_name)?;
        }

        Ok(ViewDefinition {
            source: self.source,
            view_name: self.view_name,
            engine: self.engine,
            engine_params: self.engine_params,
            order_by: self.order_by,
            partition_by: self.partition_by,
            dimensions: self.dimensions,
            metrics: self.metrics,
            filters: self.filters,
            having: self.having,
        })
    }
}

fn validate_against_outputs(filter: &Filter, outputs: &[&str], view_name: &str) -> Result<()> {
    match filter {
        Filter::Cmp { path, .. } => {
            if outputs.contains(&path.as_str()) {
                Ok(())
            } else {
                Err(StoreError::schema(format!(
                    "HAVING on view '{view_name}' references unknown output '{path}'"
                )))
            }
        }
        Filter::Raw(_) => Ok(()),
        Filter::And(children) | Filter::Or(children) => children
            .iter()
            .try_for_each(|child| validate_against_outputs(child, outputs, view_name)),
        Filter::Not(inner) => validate_against_outputs(inner, outputs, view_name),
    }
}
