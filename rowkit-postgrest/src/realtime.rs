//! Channel bookkeeping and payload normalization for realtime subscriptions.

use chrono::{DateTime, Utc};
use rowkit_data::realtime::ChannelCloser;
use rowkit_data::{ChangeEvent, ChangeHandler, ChangeType, DataError};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::transport::RawChannel;

/// Normalize a raw change payload into a [`ChangeEvent`].
///
/// Accepts the realtime server shape (`type`, `record`, `old_record`,
/// `commit_timestamp`) as well as the client-library shape (`eventType`,
/// `new`, `old`). For deletes without a new record the old record is used.
pub fn normalize(raw: &Value) -> Result<ChangeEvent, DataError> {
    let kind_str = raw
        .get("type")
        .or_else(|| raw.get("eventType"))
        .and_then(Value::as_str)
        .ok_or_else(|| DataError::Decode("change payload has no event type".into()))?;
    let kind = ChangeType::parse(kind_str)
        .ok_or_else(|| DataError::Decode(format!("unknown change type: {kind_str}")))?;

    let text = |key: &str, default: &str| {
        raw.get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    };

    let new = present(raw.get("record").or_else(|| raw.get("new")));
    let old = present(raw.get("old_record").or_else(|| raw.get("old")));
    let record = match (new, kind) {
        (Some(record), _) => record.clone(),
        (None, ChangeType::Delete) => old.cloned().unwrap_or_else(|| Value::Object(Map::new())),
        (None, _) => Value::Object(Map::new()),
    };

    let timestamp = raw
        .get("commit_timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Ok(ChangeEvent {
        kind,
        table: text("table", ""),
        schema: text("schema", "public"),
        record,
        old_record: old.cloned(),
        timestamp,
    })
}

/// A record counts as present when it is a non-empty object.
fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| v.as_object().is_some_and(|m| !m.is_empty()))
}

struct ChannelEntry {
    table: String,
    token: u64,
    dispatcher: JoinHandle<()>,
    shutdown: Option<oneshot::Sender<()>>,
}

/// Tracks the open channels of one provider.
///
/// Each channel owns a dispatcher task that normalizes raw payloads and
/// runs the handler once per event, in order. Each handler invocation runs
/// in its own task so a panic is contained to that event. A channel whose
/// stream ends on the server side drops out of the registry by itself.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: Mutex<HashMap<String, ChannelEntry>>,
    seq: AtomicU64,
    tokens: AtomicU64,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unique channel name: `{table}-{unix_millis}-{seq}`.
    pub fn next_name(&self, table: &str) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{table}-{}-{seq}", Utc::now().timestamp_millis())
    }

    /// Start dispatching `channel` to `handler` and track it under `name`.
    pub fn insert(self: &Arc<Self>, name: &str, table: &str, channel: RawChannel, handler: ChangeHandler) {
        self.insert_if(name, table, channel, handler, || true);
    }

    /// [`insert`](Self::insert) guarded by `live`, which is evaluated under
    /// the registry lock. When it returns `false` the channel is shut down
    /// instead and `false` is returned.
    pub fn insert_if(
        self: &Arc<Self>,
        name: &str,
        table: &str,
        mut channel: RawChannel,
        handler: ChangeHandler,
        live: impl FnOnce() -> bool,
    ) -> bool {
        let mut channels = self.lock();
        if !live() {
            drop(channels);
            if let Some(shutdown) = channel.shutdown.take() {
                let _ = shutdown.send(());
            }
            debug!(channel = %name, "Channel opened after shutdown; closed again");
            return false;
        }

        let token = self.tokens.fetch_add(1, Ordering::Relaxed);
        let dispatcher = tokio::spawn(dispatch(
            name.to_string(),
            channel.events,
            handler,
            Arc::downgrade(self),
            token,
        ));
        let entry = ChannelEntry {
            table: table.to_string(),
            token,
            dispatcher,
            shutdown: channel.shutdown,
        };
        let previous = channels.insert(name.to_string(), entry);
        drop(channels);
        if let Some(previous) = previous {
            release(name, previous);
        }
        true
    }

    /// Release one channel; returns `false` when it was not tracked.
    pub fn remove(&self, name: &str) -> bool {
        let entry = self.lock().remove(name);
        match entry {
            Some(entry) => {
                release(name, entry);
                true
            }
            None => false,
        }
    }

    /// Release every tracked channel.
    pub fn release_all(&self) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        let released = drained.len();
        for (name, entry) in drained {
            release(&name, entry);
        }
        released
    }

    /// Forget a channel whose stream ended, unless `name` was re-registered
    /// since.
    fn retire(&self, name: &str, token: u64) -> bool {
        let mut channels = self.lock();
        if channels.get(name).is_some_and(|entry| entry.token == token) {
            channels.remove(name);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ChannelEntry>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ChannelCloser for ChannelRegistry {
    fn close<'a>(&'a self, channel: &'a str) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if !self.remove(channel) {
                debug!(channel = %channel, "Channel already released");
            }
        })
    }
}

fn release(name: &str, mut entry: ChannelEntry) {
    if let Some(shutdown) = entry.shutdown.take() {
        let _ = shutdown.send(());
    }
    entry.dispatcher.abort();
    debug!(channel = %name, table = %entry.table, "Channel released");
}

async fn dispatch(
    channel: String,
    mut events: mpsc::UnboundedReceiver<Value>,
    handler: ChangeHandler,
    registry: Weak<ChannelRegistry>,
    token: u64,
) {
    while let Some(raw) = events.recv().await {
        let event = match normalize(&raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(channel = %channel, error = %e, "Dropping malformed change payload");
                continue;
            }
        };
        let h = handler.clone();
        if let Err(e) = tokio::spawn(async move { h(event).await }).await {
            if e.is_panic() {
                warn!(channel = %channel, "Change handler panicked; delivery continues");
            }
        }
    }
    let retired = registry
        .upgrade()
        .is_some_and(|registry| registry.retire(&channel, token));
    if retired {
        warn!(channel = %channel, "Change stream closed by the server; subscription ended");
    } else {
        debug!(channel = %channel, "Change stream ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_server_shape() {
        let event = normalize(&json!({
            "type": "UPDATE",
            "table": "items",
            "schema": "public",
            "record": {"id": "1", "name": "b"},
            "old_record": {"id": "1", "name": "a"},
            "commit_timestamp": "2024-03-01T10:00:00Z",
        }))
        .unwrap();
        assert_eq!(event.kind, ChangeType::Update);
        assert_eq!(event.record["name"], "b");
        assert_eq!(event.old_record.unwrap()["name"], "a");
        assert_eq!(event.timestamp.to_rfc3339(), "2024-03-01T10:00:00+00:00");
    }

    #[test]
    fn test_normalize_client_shape_delete_falls_back_to_old() {
        let event = normalize(&json!({
            "eventType": "DELETE",
            "table": "items",
            "new": {},
            "old": {"id": "9"},
        }))
        .unwrap();
        assert_eq!(event.kind, ChangeType::Delete);
        assert_eq!(event.record, json!({"id": "9"}));
        assert_eq!(event.schema, "public");
    }

    #[test]
    fn test_normalize_rejects_unknown_type() {
        assert!(normalize(&json!({"type": "TRUNCATE"})).is_err());
        assert!(normalize(&json!({"table": "items"})).is_err());
    }

    #[test]
    fn test_channel_names_are_unique() {
        let registry = ChannelRegistry::new();
        let a = registry.next_name("items");
        let b = registry.next_name("items");
        assert_ne!(a, b);
        assert!(a.starts_with("items-"));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = Arc::new(ChannelRegistry::new());
        let (_tx, events) = mpsc::unbounded_channel();
        let channel = RawChannel {
            events,
            shutdown: None,
        };
        registry.insert("items-1-0", "items", channel, rowkit_data::realtime::handler(|_| async {}));
        assert!(registry.contains("items-1-0"));
        assert!(registry.remove("items-1-0"));
        assert!(!registry.remove("items-1-0"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_ended_stream_leaves_the_registry() {
        let registry = Arc::new(ChannelRegistry::new());
        let (tx, events) = mpsc::unbounded_channel();
        let channel = RawChannel {
            events,
            shutdown: None,
        };
        registry.insert("items-1-0", "items", channel, rowkit_data::realtime::handler(|_| async {}));
        assert_eq!(registry.len(), 1);

        drop(tx);
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while !registry.is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_insert_if_rejects_and_shuts_down() {
        let registry = Arc::new(ChannelRegistry::new());
        let (_tx, events) = mpsc::unbounded_channel();
        let (shutdown, mut closed) = oneshot::channel();
        let channel = RawChannel {
            events,
            shutdown: Some(shutdown),
        };
        let inserted = registry.insert_if(
            "items-1-0",
            "items",
            channel,
            rowkit_data::realtime::handler(|_| async {}),
            || false,
        );
        assert!(!inserted);
        assert!(registry.is_empty());
        assert!(closed.try_recv().is_ok());
    }
}
