//! Paginated-list helpers for data grids.
//!
//! Translates generic grid requests (limit/offset/search/sort/filter map)
//! and the draw/start/length table-widget variant into a query expression,
//! returning total count plus the requested page.

use crate::document::Document;
use crate::error::Result;
use crate::query::{OrderBy, SortDirection, f, parse_lookup};
use crate::queryset::QuerySet;
use crate::value::Value;

/// Generic paginated-list request.
#[derive(Debug, Clone)]
pub struct GridRequest {
    pub limit: u64,
    pub offset: u64,
    /// Free-text search applied as a contains-match over `search_fields`.
    pub search: Option<String>,
    pub search_fields: Vec<String>,
    pub sort: Vec<OrderBy>,
    /// Named-lookup filters (`"age__gt"` style keys).
    pub filters: Vec<(String, Value)>,
}

impl Default for GridRequest {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
            search: None,
            search_fields: Vec::new(),
            sort: Vec::new(),
            filters: Vec::new(),
        }
    }
}

impl GridRequest {
    /// Apply this request to a base query set.
    pub fn apply(&self, mut queryset: QuerySet) -> Result<QuerySet> {
        for (key, value) in &self.filters {
            queryset = queryset.filter(parse_lookup(key, value.clone())?);
        }

        if let Some(term) = self.search.as_deref().map(str::trim)
            && !term.is_empty()
            && let Some(combined) = self
                .search_fields
                .iter()
                .map(|field| f(field.clone()).contains(term))
                .reduce(|left, right| left.or(right))
        {
            queryset = queryset.filter(combined);
        }

        for order in &self.sort {
            queryset = queryset.order_by(order.clone());
        }

        Ok(queryset.limit(self.limit).offset(self.offset))
    }
}

/// Table-widget request format (draw / start / length / search).
#[derive(Debug, Clone, Default)]
pub struct TableQuery {
    pub draw: u64,
    pub start: u64,
    pub length: u64,
    pub search: Option<String>,
    pub order_field: Option<String>,
    pub order_descending: bool,
}

impl TableQuery {
    /// Translate to the generic request, with the searchable fields the
    /// caller allows.
    pub fn into_grid_request(self, search_fields: Vec<String>) -> GridRequest {
        let sort = self
            .order_field
            .map(|field| {
                vec![OrderBy {
                    field,
                    direction: if self.order_descending {
                        SortDirection::Descending
                    } else {
                        SortDirection::Ascending
                    },
                }]
            })
            .unwrap_or_default();

        GridRequest {
            limit: if self.length == 0 { 50 } else { self.length },
            offset: self.start,
            search: self.search,
            search_fields,
            sort,
            filters: Vec::new(),
        }
    }
}

/// One page of grid data plus the unpaginated total.
#[derive(Debug)]
pub struct GridResponse {
    pub total: u64,
    pub rows: Vec<Document>,
    /// Echoed draw counter for the table-widget variant.
    pub draw: Option<u64>,
}

/// Run a grid request: one count over the filters, one page select.
pub async fn fetch_grid(base: QuerySet, request: &GridRequest) -> Result<GridResponse> {
    let filtered = request.apply(base)?;
    // Count keeps filters and search; pagination only affects the page.
    let total = filtered.count().await?;
    let rows = filtered.all().await?;
    Ok(GridResponse {
        total,
        rows,
        draw: None,
    })
}

/// Run a table-widget request and echo its draw counter.
pub async fn fetch_table(
    base: QuerySet,
    query: TableQuery,
    search_fields: Vec<String>,
) -> Result<GridResponse> {
    let draw = query.draw;
    let request = query.into_grid_request(search_fields);
    let mut response = fetch_grid(base, &request).await?;
    response.draw = Some(draw);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_query_translates_to_grid_request() {
        let query = TableQuery {
            draw: 7,
            start: 100,
            length: 25,
            search: Some("acme".into()),
            order_field: Some("date_collected".into()),
            order_descending: true,
        };

        let request = query.into_grid_request(vec!["seller_name".into()]);
        assert_eq!(request.limit, 25);
        assert_eq!(request.offset, 100);
        assert_eq!(request.search.as_deref(), Some("acme"));
        assert_eq!(request.sort.len(), 1);
        assert_eq!(request.sort[0].direction, SortDirection::Descending);
    }

    #[test]
    fn zero_length_falls_back_to_default_page_size() {
        let request = TableQuery::default().into_grid_request(vec![]);
        assert_eq!(request.limit, 50);
    }
}
