//! Filtered table queries rendered as REST query parameters.

use std::fmt;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    fn as_str(self) -> &'static str {
        match self {
            Order::Asc => "asc",
            Order::Desc => "desc",
        }
    }
}

/// A single column filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq(String, String),
    Neq(String, String),
    Gt(String, String),
    Gte(String, String),
    Lt(String, String),
    Lte(String, String),
    In(String, Vec<String>),
    IsNull(String),
}

impl Filter {
    fn column(&self) -> &str {
        match self {
            Filter::Eq(c, _)
            | Filter::Neq(c, _)
            | Filter::Gt(c, _)
            | Filter::Gte(c, _)
            | Filter::Lt(c, _)
            | Filter::Lte(c, _)
            | Filter::In(c, _)
            | Filter::IsNull(c) => c,
        }
    }

    fn expression(&self) -> String {
        match self {
            Filter::Eq(_, v) => format!("eq.{}", v),
            Filter::Neq(_, v) => format!("neq.{}", v),
            Filter::Gt(_, v) => format!("gt.{}", v),
            Filter::Gte(_, v) => format!("gte.{}", v),
            Filter::Lt(_, v) => format!("lt.{}", v),
            Filter::Lte(_, v) => format!("lte.{}", v),
            Filter::In(_, values) => {
                let quoted: Vec<String> = values.iter().map(|v| quote_list_item(v)).collect();
                format!("in.({})", quoted.join(","))
            }
            Filter::IsNull(_) => "is.null".to_string(),
        }
    }
}

/// Values containing list separators or parentheses must be double-quoted
/// inside an `in.(...)` list.
fn quote_list_item(value: &str) -> String {
    if value.contains([',', '(', ')', '"', ' ']) {
        format!("\"{}\"", value.replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

/// A query against one table.
///
/// ```rust
/// use momentum_store::{Order, Query};
///
/// let query = Query::table("tasks")
///     .eq("user_id", "u1")
///     .order("created_at", Order::Desc)
///     .limit(20);
/// assert_eq!(
///     query.params(),
///     vec![
///         ("select".to_string(), "*".to_string()),
///         ("user_id".to_string(), "eq.u1".to_string()),
///         ("order".to_string(), "created_at.desc".to_string()),
///         ("limit".to_string(), "20".to_string()),
///     ]
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    table: String,
    columns: String,
    filters: Vec<Filter>,
    order: Vec<(String, Order)>,
    limit: Option<usize>,
}

impl Query {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: "*".to_string(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Restrict the returned columns (REST `select` syntax).
    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.columns = columns.into();
        self
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl fmt::Display) -> Self {
        self.filters.push(Filter::Eq(column.into(), value.to_string()));
        self
    }

    pub fn neq(mut self, column: impl Into<String>, value: impl fmt::Display) -> Self {
        self.filters.push(Filter::Neq(column.into(), value.to_string()));
        self
    }

    pub fn gt(mut self, column: impl Into<String>, value: impl fmt::Display) -> Self {
        self.filters.push(Filter::Gt(column.into(), value.to_string()));
        self
    }

    pub fn gte(mut self, column: impl Into<String>, value: impl fmt::Display) -> Self {
        self.filters.push(Filter::Gte(column.into(), value.to_string()));
        self
    }

    pub fn lt(mut self, column: impl Into<String>, value: impl fmt::Display) -> Self {
        self.filters.push(Filter::Lt(column.into(), value.to_string()));
        self
    }

    pub fn lte(mut self, column: impl Into<String>, value: impl fmt::Display) -> Self {
        self.filters.push(Filter::Lte(column.into(), value.to_string()));
        self
    }

    pub fn in_list<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: fmt::Display,
    {
        let values = values.into_iter().map(|v| v.to_string()).collect();
        self.filters.push(Filter::In(column.into(), values));
        self
    }

    pub fn is_null(mut self, column: impl Into<String>) -> Self {
        self.filters.push(Filter::IsNull(column.into()));
        self
    }

    /// Add an ordering clause. Multiple calls order by several columns.
    pub fn order(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order.push((column.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn has_filters(&self) -> bool {
        !self.filters.is_empty()
    }

    /// Whether an `in` filter has an empty value list; such a query can
    /// never match and is answered locally.
    pub fn matches_nothing(&self) -> bool {
        self.filters
            .iter()
            .any(|f| matches!(f, Filter::In(_, values) if values.is_empty()))
    }

    /// Query parameters for a read.
    pub fn params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.columns.clone())];
        params.extend(self.filter_params());
        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|(column, dir)| format!("{}.{}", column, dir.as_str()))
                .collect::<Vec<_>>()
                .join(",");
            params.push(("order".to_string(), order));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }

    /// Query parameters carrying only the filters (updates and deletes).
    pub fn filter_params(&self) -> Vec<(String, String)> {
        self.filters
            .iter()
            .map(|f| (f.column().to_string(), f.expression()))
            .collect()
    }
}
