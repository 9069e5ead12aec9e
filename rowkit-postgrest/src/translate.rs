//! Translation of neutral query descriptors into PostgREST builder calls.
//!
//! Everything here is pure: a [`Request`] is data, rendered to URL query
//! pairs by [`Request::query_pairs`] and executed by a
//! [`Transport`](crate::transport::Transport).

use rowkit_data::query::{check_identifier, Predicate, QueryDescriptor, Window};
use rowkit_data::{DataError, SortDirection};
use serde_json::{json, Value};

/// What the request does.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// `GET` (or `HEAD` when `head` is set) with an optional exact count.
    Select {
        columns: String,
        head: bool,
        count: bool,
    },
    Insert {
        body: Value,
        returning: Option<String>,
    },
    Update {
        body: Value,
        returning: Option<String>,
    },
    Delete {
        returning: Option<String>,
    },
    /// Remote procedure call; `table` is unused.
    Rpc {
        function: String,
        args: Value,
    },
}

/// One native filter call (`.eq()`, `.in()`, `.is()`, `.not.is()`).
#[derive(Debug, Clone, PartialEq)]
pub enum FilterCall {
    Eq { column: String, value: Value },
    In { column: String, values: Vec<Value> },
    IsNull { column: String },
    NotNull { column: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderCall {
    pub column: String,
    pub ascending: bool,
}

/// A fully translated backend request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub table: String,
    pub operation: Operation,
    pub filters: Vec<FilterCall>,
    pub order: Vec<OrderCall>,
    pub limit: Option<u64>,
    /// Inclusive row range.
    pub range: Option<(u64, u64)>,
}

impl Request {
    fn new(table: &str, operation: Operation) -> Self {
        Self {
            table: table.to_string(),
            operation,
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            range: None,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self.operation,
            Operation::Insert { .. } | Operation::Update { .. } | Operation::Delete { .. }
        )
    }

    /// Render the request as PostgREST URL query pairs.
    ///
    /// The inclusive range `[from, to]` is sent as `offset=from` and
    /// `limit=to-from+1`.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        match &self.operation {
            Operation::Select { columns, .. } => pairs.push(("select".into(), columns.clone())),
            Operation::Insert { returning, .. }
            | Operation::Update { returning, .. }
            | Operation::Delete { returning } => {
                if let Some(cols) = returning {
                    pairs.push(("select".into(), cols.clone()));
                }
            }
            Operation::Rpc { .. } => {}
        }
        for filter in &self.filters {
            pairs.push(filter.to_pair());
        }
        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|o| format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }))
                .collect::<Vec<_>>()
                .join(",");
            pairs.push(("order".into(), order));
        }
        match (self.range, self.limit) {
            (Some((from, to)), _) => {
                pairs.push(("offset".into(), from.to_string()));
                pairs.push(("limit".into(), (to - from + 1).to_string()));
            }
            (None, Some(limit)) => pairs.push(("limit".into(), limit.to_string())),
            (None, None) => {}
        }
        pairs
    }
}

impl FilterCall {
    pub fn column(&self) -> &str {
        match self {
            FilterCall::Eq { column, .. }
            | FilterCall::In { column, .. }
            | FilterCall::IsNull { column }
            | FilterCall::NotNull { column } => column,
        }
    }

    fn to_pair(&self) -> (String, String) {
        let value = match self {
            FilterCall::Eq { value, .. } => format!("eq.{}", scalar(value)),
            FilterCall::In { values, .. } => {
                let list = values.iter().map(in_item).collect::<Vec<_>>().join(",");
                format!("in.({list})")
            }
            FilterCall::IsNull { .. } => "is.null".to_string(),
            FilterCall::NotNull { .. } => "not.is.null".to_string(),
        };
        (self.column().to_string(), value)
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Values containing PostgREST list separators must be double-quoted.
fn in_item(value: &Value) -> String {
    let s = scalar(value);
    if s.contains([',', '(', ')']) {
        format!("\"{s}\"")
    } else {
        s
    }
}

fn filter_calls(predicates: &[Predicate]) -> Vec<FilterCall> {
    predicates
        .iter()
        .map(|p| match p {
            Predicate::Eq(column, value) => FilterCall::Eq {
                column: column.clone(),
                value: value.clone(),
            },
            Predicate::In(column, values) => FilterCall::In {
                column: column.clone(),
                values: values.clone(),
            },
            Predicate::IsNull(column) => FilterCall::IsNull {
                column: column.clone(),
            },
        })
        .collect()
}

fn returning(columns: &Option<Vec<String>>) -> Option<String> {
    match columns {
        Some(cols) if !cols.is_empty() => Some(cols.join(",")),
        _ => Some("*".to_string()),
    }
}

/// Row-returning read.
pub fn select(desc: &QueryDescriptor) -> Request {
    let mut request = Request::new(
        &desc.table,
        Operation::Select {
            columns: desc.columns.clone(),
            head: false,
            count: false,
        },
    );
    request.filters = filter_calls(&desc.predicates);
    request.order = desc
        .order
        .iter()
        .map(|(column, direction)| OrderCall {
            column: column.clone(),
            ascending: *direction != SortDirection::Desc,
        })
        .collect();
    match desc.window {
        Window::All => {}
        Window::Limit(limit) => request.limit = Some(limit),
        Window::Range { from, to } => request.range = Some((from, to)),
    }
    request
}

/// Head-only exact count: no row bodies, no ordering, no window.
pub fn count(desc: &QueryDescriptor) -> Request {
    let mut request = Request::new(
        &desc.table,
        Operation::Select {
            columns: "*".to_string(),
            head: true,
            count: true,
        },
    );
    request.filters = filter_calls(&desc.predicates);
    request
}

pub fn insert(table: &str, body: Value, columns: &Option<Vec<String>>) -> Result<Request, DataError> {
    check_identifier(table, "table")?;
    Ok(Request::new(
        table,
        Operation::Insert {
            body,
            returning: returning(columns),
        },
    ))
}

pub fn update(
    table: &str,
    body: Value,
    predicates: &[Predicate],
    columns: &Option<Vec<String>>,
) -> Result<Request, DataError> {
    check_identifier(table, "table")?;
    let mut request = Request::new(
        table,
        Operation::Update {
            body,
            returning: returning(columns),
        },
    );
    request.filters = filter_calls(predicates);
    Ok(request)
}

pub fn delete(table: &str, predicates: &[Predicate], columns: &Option<Vec<String>>) -> Result<Request, DataError> {
    check_identifier(table, "table")?;
    let mut request = Request::new(
        table,
        Operation::Delete {
            returning: returning(columns),
        },
    );
    request.filters = filter_calls(predicates);
    Ok(request)
}

/// PostgREST refuses unfiltered deletes; a `NOT NULL` predicate on the
/// primary key matches every row.
pub fn truncate(table: &str, id_column: &str) -> Result<Request, DataError> {
    check_identifier(table, "table")?;
    let mut request = Request::new(table, Operation::Delete { returning: None });
    request.filters.push(FilterCall::NotNull {
        column: id_column.to_string(),
    });
    Ok(request)
}

/// Raw statement forwarded verbatim to the SQL-executing RPC function.
pub fn raw(function: &str, query: &str, params: &[Value]) -> Request {
    Request::new(
        "",
        Operation::Rpc {
            function: function.to_string(),
            args: json!({ "query": query, "params": params }),
        },
    )
}
