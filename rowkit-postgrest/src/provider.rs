use chrono::Utc;
use rowkit_data::query::{predicates, require_filter, QueryDescriptor};
use rowkit_data::realtime::ChannelCloser;
use rowkit_data::{
    ChangeHandler, CreateOptions, DataError, DataProvider, DeleteOptions, FindOptions,
    MutationResult, QueryResult, RealtimeProvider, SingleResult, SubscribeOptions, Subscription,
    UpdateOptions,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::PostgrestConfig;
use crate::memory::MemoryTransport;
use crate::realtime::ChannelRegistry;
use crate::rest::HttpTransport;
use crate::transport::{ChannelSpec, Response, Transport};
use crate::translate::{self, Request};

/// [`DataProvider`] and [`RealtimeProvider`] backed by a PostgREST server.
///
/// Reads and writes are translated into PostgREST requests and executed by
/// the transport `Tr`. Realtime subscriptions each get their own channel,
/// tracked in a registry owned by this provider.
///
/// # Example
///
/// ```ignore
/// let provider = Arc::new(PostgrestProvider::http(config)?);
/// provider.connect().await?;
/// let rows: QueryResult<Value> = provider.find("items", &FindOptions::new().limit(5)).await?;
/// ```
pub struct PostgrestProvider<Tr: Transport = HttpTransport> {
    transport: Tr,
    config: PostgrestConfig,
    connected: AtomicBool,
    channels: Arc<ChannelRegistry>,
}

impl PostgrestProvider<HttpTransport> {
    /// Provider talking to a live server.
    pub fn http(config: PostgrestConfig) -> Result<Self, DataError> {
        let transport = HttpTransport::new(config.clone())?;
        Ok(Self::new(transport, config))
    }
}

impl PostgrestProvider<MemoryTransport> {
    /// Provider over a fresh in-memory backend with default settings.
    pub fn in_memory() -> Self {
        Self::new(
            MemoryTransport::new(),
            PostgrestConfig::new("http://localhost:54321", "in-memory"),
        )
    }
}

impl<Tr: Transport> PostgrestProvider<Tr> {
    pub fn new(transport: Tr, config: PostgrestConfig) -> Self {
        Self {
            transport,
            config,
            connected: AtomicBool::new(false),
            channels: Arc::new(ChannelRegistry::new()),
        }
    }

    pub fn transport(&self) -> &Tr {
        &self.transport
    }

    pub fn config(&self) -> &PostgrestConfig {
        &self.config
    }

    fn ensure_connected(&self) -> Result<(), DataError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DataError::NotConnected)
        }
    }

    async fn execute(&self, request: &Request) -> Result<Response, DataError> {
        self.ensure_connected()?;
        debug!(table = %request.table, operation = operation_name(request), "Executing request");
        self.transport.execute(request).await
    }

    fn describe(&self, table: &str, options: &FindOptions) -> Result<QueryDescriptor, DataError> {
        QueryDescriptor::build(table, options, self.config.default_page_size)
    }
}

fn operation_name(request: &Request) -> &'static str {
    match request.operation {
        translate::Operation::Select { head: true, .. } => "count",
        translate::Operation::Select { .. } => "select",
        translate::Operation::Insert { .. } => "insert",
        translate::Operation::Update { .. } => "update",
        translate::Operation::Delete { .. } => "delete",
        translate::Operation::Rpc { .. } => "rpc",
    }
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, DataError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(DataError::from))
        .collect()
}

/// Rows a write reported as affected; falls back to the returned rows.
fn affected(response: &Response) -> u64 {
    response.count.unwrap_or(response.rows.len() as u64)
}

impl<Tr: Transport> DataProvider for PostgrestProvider<Tr> {
    async fn connect(&self) -> Result<(), DataError> {
        self.transport.connect().await?;
        self.connected.store(true, Ordering::SeqCst);
        info!(url = %self.config.url, schema = %self.config.schema, "Connected to PostgREST backend");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DataError> {
        self.connected.store(false, Ordering::SeqCst);
        self.unsubscribe_all().await;
        info!("Disconnected from PostgREST backend");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn find<T>(&self, table: &str, options: &FindOptions) -> Result<QueryResult<T>, DataError>
    where
        T: DeserializeOwned + Send,
    {
        let desc = self.describe(table, options)?;
        let response = self.execute(&translate::select(&desc)).await?;
        Ok(QueryResult {
            data: decode_rows(response.rows)?,
            count: response.count,
        })
    }

    async fn find_one<T>(&self, table: &str, options: &FindOptions) -> Result<SingleResult<T>, DataError>
    where
        T: DeserializeOwned + Send,
    {
        let mut options = options.clone();
        options.limit = Some(1);
        let desc = self.describe(table, &options)?;
        let response = self.execute(&translate::select(&desc)).await?;
        let data = match response.rows.into_iter().next() {
            Some(row) => Some(serde_json::from_value(row)?),
            None => None,
        };
        Ok(SingleResult { data })
    }

    async fn count(&self, table: &str, options: &FindOptions) -> Result<u64, DataError> {
        let desc = self.describe(table, options)?;
        let response = self.execute(&translate::count(&desc)).await?;
        response
            .count
            .ok_or_else(|| DataError::Decode("backend returned no row count".into()))
    }

    async fn create<T, D>(&self, table: &str, data: &D, options: &CreateOptions) -> Result<MutationResult<T>, DataError>
    where
        T: DeserializeOwned + Send,
        D: Serialize + Sync + ?Sized,
    {
        let body = serde_json::to_value(data)?;
        let request = translate::insert(table, body, &options.returning)?;
        let response = self.execute(&request).await?;
        let affected = affected(&response);
        let row = response.rows.into_iter().next().ok_or_else(|| {
            DataError::Decode(format!("insert into {table} returned no representation"))
        })?;
        debug!(table = %table, "Row created");
        Ok(MutationResult {
            data: serde_json::from_value(row)?,
            affected,
        })
    }

    async fn update<T, D>(&self, table: &str, data: &D, options: &UpdateOptions) -> Result<MutationResult<Vec<T>>, DataError>
    where
        T: DeserializeOwned + Send,
        D: Serialize + Sync + ?Sized,
    {
        require_filter(&options.filter, "update")?;
        let body = serde_json::to_value(data)?;
        let request = translate::update(table, body, &predicates(&options.filter)?, &options.returning)?;
        let response = self.execute(&request).await?;
        let affected = affected(&response);
        Ok(MutationResult {
            data: decode_rows(response.rows)?,
            affected,
        })
    }

    async fn delete<T>(&self, table: &str, options: &DeleteOptions) -> Result<MutationResult<Vec<T>>, DataError>
    where
        T: DeserializeOwned + Send,
    {
        require_filter(&options.filter, "delete")?;
        let predicates = predicates(&options.filter)?;
        let request = if options.soft {
            let body = json!({ "deleted_at": Utc::now() });
            translate::update(table, body, &predicates, &options.returning)?
        } else {
            translate::delete(table, &predicates, &options.returning)?
        };
        let response = self.execute(&request).await?;
        let affected = affected(&response);
        debug!(table = %table, soft = options.soft, affected, "Rows deleted");
        Ok(MutationResult {
            data: decode_rows(response.rows)?,
            affected,
        })
    }

    async fn raw<T>(&self, query: &str, params: &[Value]) -> Result<QueryResult<T>, DataError>
    where
        T: DeserializeOwned + Send,
    {
        let request = translate::raw(&self.config.rpc_function, query, params);
        let response = self.execute(&request).await?;
        Ok(QueryResult::new(decode_rows(response.rows)?))
    }

    async fn truncate(&self, table: &str) -> Result<(), DataError> {
        let request = translate::truncate(table, rowkit_data::entity::ID)?;
        self.execute(&request).await?;
        info!(table = %table, "Table truncated");
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<(), DataError> {
        Err(DataError::unsupported(
            "PostgREST executes each request in its own transaction; \
             wrap multi-statement work in a database function and call it through raw()",
        ))
    }
}

impl<Tr: Transport> RealtimeProvider for PostgrestProvider<Tr> {
    async fn subscribe(
        &self,
        table: &str,
        options: SubscribeOptions,
        handler: ChangeHandler,
    ) -> Result<Subscription, DataError> {
        self.ensure_connected()?;
        rowkit_data::query::check_identifier(table, "table")?;

        let spec = ChannelSpec {
            name: self.channels.next_name(table),
            table: table.to_string(),
            schema: options.schema,
            event: options.event,
            filter: options.filter,
        };
        let channel = self.transport.open_channel(&spec).await?;
        // disconnect() may have run while the channel was opening
        let live = || self.connected.load(Ordering::SeqCst);
        if !self.channels.insert_if(&spec.name, table, channel, handler, live) {
            return Err(DataError::NotConnected);
        }
        info!(channel = %spec.name, table = %table, event = spec.event.as_str(), "Subscribed to changes");

        let closer: Arc<dyn ChannelCloser> = self.channels.clone();
        Ok(Subscription::new(spec.name, table.to_string(), closer))
    }

    async fn unsubscribe_all(&self) {
        let released = self.channels.release_all();
        if released > 0 {
            info!(released, "Released realtime channels");
        }
    }

    fn active_channels(&self) -> usize {
        self.channels.len()
    }
}
