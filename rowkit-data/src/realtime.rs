//! Row-level change subscriptions.
//!
//! A [`RealtimeProvider`] opens one backend channel per `subscribe` call and
//! invokes the registered handler once per change, in delivery order. The
//! returned [`Subscription`] releases the channel; releasing twice is a no-op.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::entity::Timestamp;
use crate::error::DataError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Insert => "INSERT",
            ChangeType::Update => "UPDATE",
            ChangeType::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Some(ChangeType::Insert),
            "UPDATE" => Some(ChangeType::Update),
            "DELETE" => Some(ChangeType::Delete),
            _ => None,
        }
    }
}

/// Which change types a subscription receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventFilter {
    #[default]
    All,
    Only(ChangeType),
}

impl EventFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventFilter::All => "*",
            EventFilter::Only(kind) => kind.as_str(),
        }
    }

    pub fn matches(&self, kind: ChangeType) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Only(k) => *k == kind,
        }
    }
}

/// A normalized row change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub kind: ChangeType,
    pub table: String,
    pub schema: String,
    pub record: Value,
    pub old_record: Option<Value>,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub event: EventFilter,
    /// Backend row filter, e.g. `organization_id=eq.42`.
    pub filter: Option<String>,
    pub schema: String,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            event: EventFilter::All,
            filter: None,
            schema: "public".to_string(),
        }
    }
}

impl SubscribeOptions {
    pub fn event(mut self, kind: ChangeType) -> Self {
        self.event = EventFilter::Only(kind);
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }
}

/// Type-erased async change handler.
pub type ChangeHandler =
    Arc<dyn Fn(ChangeEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Erase a closure into a [`ChangeHandler`].
pub fn handler<F, Fut>(f: F) -> ChangeHandler
where
    F: Fn(ChangeEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

/// Releases a channel by id. Implemented by a provider's channel registry.
pub trait ChannelCloser: Send + Sync + 'static {
    fn close<'a>(&'a self, channel: &'a str) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Handle for one registered change subscription.
#[derive(Clone)]
pub struct Subscription {
    id: String,
    table: String,
    closer: Arc<dyn ChannelCloser>,
}

impl Subscription {
    pub fn new(id: String, table: String, closer: Arc<dyn ChannelCloser>) -> Self {
        Self { id, table, closer }
    }

    /// The channel name backing this subscription.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Stop future deliveries. Idempotent.
    pub async fn unsubscribe(&self) {
        self.closer.close(&self.id).await;
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("table", &self.table)
            .finish()
    }
}

/// Optional extension of [`DataProvider`](crate::DataProvider) for row-change
/// notifications.
pub trait RealtimeProvider: Send + Sync + 'static {
    /// Open a channel for `table` and deliver its changes to `handler`.
    ///
    /// Either fully succeeds or returns an error with nothing registered.
    fn subscribe(
        &self,
        table: &str,
        options: SubscribeOptions,
        handler: ChangeHandler,
    ) -> impl Future<Output = Result<Subscription, DataError>> + Send;

    /// Release one subscription. Unknown or already released ids are a no-op.
    fn unsubscribe(&self, subscription: &Subscription) -> impl Future<Output = ()> + Send {
        subscription.unsubscribe()
    }

    /// Release every tracked channel.
    fn unsubscribe_all(&self) -> impl Future<Output = ()> + Send;

    /// Number of currently tracked channels.
    fn active_channels(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_filter_matches() {
        assert!(EventFilter::All.matches(ChangeType::Delete));
        assert!(EventFilter::Only(ChangeType::Insert).matches(ChangeType::Insert));
        assert!(!EventFilter::Only(ChangeType::Insert).matches(ChangeType::Update));
        assert_eq!(EventFilter::All.as_str(), "*");
    }

    #[test]
    fn test_change_type_parse_is_case_insensitive() {
        assert_eq!(ChangeType::parse("insert"), Some(ChangeType::Insert));
        assert_eq!(ChangeType::parse("DELETE"), Some(ChangeType::Delete));
        assert_eq!(ChangeType::parse("TRUNCATE"), None);
    }
}
