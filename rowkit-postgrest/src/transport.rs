use rowkit_data::realtime::EventFilter;
use rowkit_data::DataError;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::{mpsc, oneshot};

use crate::translate::Request;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Normalized backend response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub rows: Vec<Value>,
    /// Exact row count, when the request asked for one.
    pub count: Option<u64>,
}

/// Everything a transport needs to open one realtime channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Unique channel name, also used as the subscription id.
    pub name: String,
    pub table: String,
    pub schema: String,
    pub event: EventFilter,
    pub filter: Option<String>,
}

/// An opened channel: raw change payloads in delivery order, plus an
/// optional signal asking the transport to leave the channel.
pub struct RawChannel {
    pub events: mpsc::UnboundedReceiver<Value>,
    pub shutdown: Option<oneshot::Sender<()>>,
}

/// Pluggable backend transport.
///
/// Implement this to point the provider at something other than a live
/// PostgREST server. Methods return boxed futures so the trait stays
/// dyn-compatible.
pub trait Transport: Send + Sync + 'static {
    /// Verify the backend is reachable with the configured credentials.
    fn connect(&self) -> BoxFuture<'_, Result<(), DataError>>;

    fn execute<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, DataError>>;

    /// Open a change channel. Must not return until the backend has
    /// acknowledged the channel (or refused it).
    fn open_channel<'a>(&'a self, spec: &'a ChannelSpec) -> BoxFuture<'a, Result<RawChannel, DataError>>;
}
