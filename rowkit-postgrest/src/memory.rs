//! In-process backend.
//!
//! [`MemoryTransport`] interprets translated [`Request`]s against JSON rows
//! held in memory, the way a PostgREST server would: it assigns ids and
//! timestamps, applies filters, ordering and windows, fans out change
//! payloads to open channels and dispatches RPC calls to registered
//! handlers. Failure switches make it possible to exercise error paths.

use chrono::{SecondsFormat, Utc};
use dashmap::DashMap;
use rowkit_data::DataError;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, RwLock};

use crate::error::BackendFailure;
use crate::transport::{BoxFuture, ChannelSpec, RawChannel, Response, Transport};
use crate::translate::{FilterCall, Operation, OrderCall, Request};

/// Table name to rows, each row a JSON object.
pub type Tables = HashMap<String, Vec<Value>>;

/// Handler for one RPC function: receives the current tables (read-only)
/// and the call arguments, returns the result rows.
pub type RpcHandler = Arc<dyn Fn(&Tables, &Value) -> Result<Vec<Value>, DataError> + Send + Sync>;

struct Listener {
    spec: ChannelSpec,
    tx: mpsc::UnboundedSender<Value>,
}

#[derive(Default)]
struct Inner {
    tables: RwLock<Tables>,
    rpc: DashMap<String, RpcHandler>,
    listeners: Mutex<Vec<Listener>>,
    requests: Mutex<Vec<Request>>,
    recording: AtomicBool,
    failing_writes: Mutex<HashSet<String>>,
    fail_connect: AtomicBool,
    fail_channels: AtomicBool,
}

/// In-memory [`Transport`]. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for RPC `function`, replacing any previous one.
    pub fn register_rpc<F>(&self, function: &str, handler: F)
    where
        F: Fn(&Tables, &Value) -> Result<Vec<Value>, DataError> + Send + Sync + 'static,
    {
        self.inner.rpc.insert(function.to_string(), Arc::new(handler));
    }

    /// Insert rows without emitting change events. Missing ids and
    /// timestamps are assigned as for a regular insert.
    pub async fn seed(&self, table: &str, rows: impl IntoIterator<Item = Value>) {
        let mut tables = self.inner.tables.write().await;
        let stored = tables.entry(table.to_string()).or_default();
        for row in rows {
            stored.push(stamp_new(row));
        }
    }

    /// Snapshot of a table's rows in storage order.
    pub async fn rows(&self, table: &str) -> Vec<Value> {
        self.inner
            .tables
            .read()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn fail_connect(&self, fail: bool) {
        self.inner.fail_connect.store(fail, AtomicOrdering::SeqCst);
    }

    pub fn fail_channels(&self, fail: bool) {
        self.inner.fail_channels.store(fail, AtomicOrdering::SeqCst);
    }

    /// Make every write to `table` fail with a backend error.
    pub fn fail_writes_to(&self, table: &str) {
        lock(&self.inner.failing_writes).insert(table.to_string());
    }

    /// Start or stop keeping a log of executed requests. Off by default;
    /// turning it off drops the log.
    pub fn record_requests(&self, record: bool) {
        self.inner.recording.store(record, AtomicOrdering::SeqCst);
        if !record {
            self.clear_requests();
        }
    }

    /// Requests executed while recording, in order.
    pub fn requests(&self) -> Vec<Request> {
        lock(&self.inner.requests).clone()
    }

    pub fn clear_requests(&self) {
        lock(&self.inner.requests).clear();
    }

    /// Close every channel listening on `table` from the server side, as a
    /// `phx_close` would. Returns how many were closed.
    pub fn close_channels(&self, table: &str) -> usize {
        let mut listeners = lock(&self.inner.listeners);
        let before = listeners.len();
        listeners.retain(|l| l.spec.table != table);
        before - listeners.len()
    }

    /// Channels whose receiving side is still alive.
    pub fn open_channels(&self) -> usize {
        let mut listeners = lock(&self.inner.listeners);
        listeners.retain(|l| !l.tx.is_closed());
        listeners.len()
    }

    async fn run(&self, request: &Request) -> Result<Response, DataError> {
        if self.inner.recording.load(AtomicOrdering::SeqCst) {
            lock(&self.inner.requests).push(request.clone());
        }

        if request.is_write() && lock(&self.inner.failing_writes).contains(&request.table) {
            return Err(BackendFailure {
                status: Some(500),
                code: Some("XX000".into()),
                message: format!("write to {} rejected", request.table),
                ..BackendFailure::default()
            }
            .into());
        }

        match &request.operation {
            Operation::Select { columns, head, count } => {
                let tables = self.inner.tables.read().await;
                let mut rows: Vec<Value> = tables
                    .get(&request.table)
                    .map(|rows| {
                        rows.iter()
                            .filter(|row| matches_all(row, &request.filters))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                let total = rows.len() as u64;
                if *head {
                    return Ok(Response {
                        rows: Vec::new(),
                        count: count.then_some(total),
                    });
                }
                sort_rows(&mut rows, &request.order);
                let rows = window(rows, request.range, request.limit)
                    .into_iter()
                    .map(|row| project(row, columns))
                    .collect();
                Ok(Response {
                    rows,
                    count: count.then_some(total),
                })
            }
            Operation::Insert { body, returning } => {
                let incoming = match body {
                    Value::Array(items) => items.clone(),
                    other => vec![other.clone()],
                };
                let mut tables = self.inner.tables.write().await;
                let stored = tables.entry(request.table.clone()).or_default();
                let mut created = Vec::with_capacity(incoming.len());
                for row in incoming {
                    let row = stamp_new(row);
                    stored.push(row.clone());
                    self.emit(&request.table, "INSERT", &row, None);
                    created.push(row);
                }
                Ok(returned(created, returning))
            }
            Operation::Update { body, returning } => {
                let patch = body.as_object().cloned().unwrap_or_default();
                let now = now();
                let mut tables = self.inner.tables.write().await;
                let mut updated = Vec::new();
                if let Some(rows) = tables.get_mut(&request.table) {
                    for row in rows.iter_mut().filter(|r| matches_all(r, &request.filters)) {
                        let old = row.clone();
                        if let Some(fields) = row.as_object_mut() {
                            for (k, v) in &patch {
                                fields.insert(k.clone(), v.clone());
                            }
                            fields.insert("updated_at".into(), Value::String(now.clone()));
                        }
                        self.emit(&request.table, "UPDATE", row, Some(&old));
                        updated.push(row.clone());
                    }
                }
                Ok(returned(updated, returning))
            }
            Operation::Delete { returning } => {
                let mut tables = self.inner.tables.write().await;
                let mut deleted = Vec::new();
                if let Some(rows) = tables.get_mut(&request.table) {
                    let mut kept = Vec::with_capacity(rows.len());
                    for row in rows.drain(..) {
                        if matches_all(&row, &request.filters) {
                            deleted.push(row);
                        } else {
                            kept.push(row);
                        }
                    }
                    *rows = kept;
                }
                for row in &deleted {
                    self.emit(&request.table, "DELETE", &Value::Object(Map::new()), Some(row));
                }
                Ok(returned(deleted, returning))
            }
            Operation::Rpc { function, args } => {
                let handler = self
                    .inner
                    .rpc
                    .get(function)
                    .map(|h| h.value().clone())
                    .ok_or_else(|| BackendFailure {
                        status: Some(404),
                        code: Some("PGRST202".into()),
                        message: format!("Could not find the function public.{function}"),
                        ..BackendFailure::default()
                    })?;
                let tables = self.inner.tables.read().await;
                let rows = handler(&*tables, args)?;
                Ok(Response {
                    count: Some(rows.len() as u64),
                    rows,
                })
            }
        }
    }

    /// Called with the table lock held so listeners see writes in commit order.
    fn emit(&self, table: &str, kind: &str, record: &Value, old: Option<&Value>) {
        let mut listeners = lock(&self.inner.listeners);
        listeners.retain(|l| !l.tx.is_closed());
        for listener in listeners.iter() {
            let spec = &listener.spec;
            if spec.table != table {
                continue;
            }
            if spec.event.as_str() != "*" && spec.event.as_str() != kind {
                continue;
            }
            let subject = if kind == "DELETE" { old.unwrap_or(record) } else { record };
            if let Some(filter) = &spec.filter {
                if !matches_channel_filter(subject, filter) {
                    continue;
                }
            }
            let payload = json!({
                "type": kind,
                "table": table,
                "schema": spec.schema,
                "record": record,
                "old_record": old,
                "commit_timestamp": now(),
            });
            let _ = listener.tx.send(payload);
        }
    }
}

impl Transport for MemoryTransport {
    fn connect(&self) -> BoxFuture<'_, Result<(), DataError>> {
        Box::pin(async move {
            if self.inner.fail_connect.load(AtomicOrdering::SeqCst) {
                return Err(BackendFailure::new("connection refused").into());
            }
            Ok(())
        })
    }

    fn execute<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, DataError>> {
        Box::pin(self.run(request))
    }

    fn open_channel<'a>(&'a self, spec: &'a ChannelSpec) -> BoxFuture<'a, Result<RawChannel, DataError>> {
        Box::pin(async move {
            if self.inner.fail_channels.load(AtomicOrdering::SeqCst) {
                return Err(BackendFailure::new(format!("channel join rejected: {}", spec.name)).into());
            }
            let (tx, events) = mpsc::unbounded_channel();
            lock(&self.inner.listeners).push(Listener {
                spec: spec.clone(),
                tx,
            });
            Ok(RawChannel {
                events,
                shutdown: None,
            })
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Fixed-width UTC timestamps, so text order is time order.
fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Assign `id` when absent and set both timestamps.
fn stamp_new(row: Value) -> Value {
    let mut fields = match row {
        Value::Object(fields) => fields,
        other => {
            let mut fields = Map::new();
            fields.insert("value".into(), other);
            fields
        }
    };
    if fields.get("id").map_or(true, Value::is_null) {
        fields.insert("id".into(), Value::String(uuid::Uuid::new_v4().to_string()));
    }
    let now = now();
    fields
        .entry("created_at")
        .or_insert_with(|| Value::String(now.clone()));
    fields.insert("updated_at".into(), Value::String(now));
    Value::Object(fields)
}

fn returned(rows: Vec<Value>, returning: &Option<String>) -> Response {
    let count = Some(rows.len() as u64);
    let rows = match returning {
        Some(columns) => rows.into_iter().map(|row| project(row, columns)).collect(),
        None => Vec::new(),
    };
    Response { rows, count }
}

fn field<'a>(row: &'a Value, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&Value::Null)
}

/// Equality as PostgREST sees it: values travel as text in the URL, so
/// `1` and `"1"` are equal.
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => false,
        _ => as_text(a) == as_text(b),
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn matches_all(row: &Value, filters: &[FilterCall]) -> bool {
    filters.iter().all(|f| match f {
        FilterCall::Eq { column, value } => loose_eq(field(row, column), value),
        FilterCall::In { column, values } => {
            let v = field(row, column);
            values.iter().any(|candidate| loose_eq(v, candidate))
        }
        FilterCall::IsNull { column } => field(row, column).is_null(),
        FilterCall::NotNull { column } => !field(row, column).is_null(),
    })
}

/// `column=eq.value` channel filters; other operators are not interpreted
/// and let every row through.
fn matches_channel_filter(row: &Value, filter: &str) -> bool {
    match filter.split_once('=') {
        Some((column, rest)) => match rest.strip_prefix("eq.") {
            Some(expected) => as_text(field(row, column)) == expected,
            None => true,
        },
        None => true,
    }
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => as_text(a).cmp(&as_text(b)),
    }
}

/// Stable multi-key sort; nulls sort last ascending and first descending.
fn sort_rows(rows: &mut [Value], order: &[OrderCall]) {
    if order.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for o in order {
            let ord = compare(field(a, &o.column), field(b, &o.column));
            let ord = if o.ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn window(rows: Vec<Value>, range: Option<(u64, u64)>, limit: Option<u64>) -> Vec<Value> {
    match (range, limit) {
        (Some((from, to)), _) => rows
            .into_iter()
            .skip(from as usize)
            .take((to - from + 1) as usize)
            .collect(),
        (None, Some(limit)) => rows.into_iter().take(limit as usize).collect(),
        (None, None) => rows,
    }
}

fn project(row: Value, columns: &str) -> Value {
    if columns == "*" {
        return row;
    }
    let wanted: Vec<&str> = columns.split(',').map(str::trim).collect();
    match row {
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .filter(|(k, _)| wanted.contains(&k.as_str()))
                .collect(),
        ),
        other => other,
    }
}
