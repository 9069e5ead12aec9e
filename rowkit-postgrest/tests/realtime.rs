use rowkit_data::realtime::handler;
use rowkit_data::{
    ChangeEvent, ChangeType, CreateOptions, DataError, DataProvider, RealtimeProvider,
    SubscribeOptions, UpdateOptions,
};
use rowkit_postgrest::translate::Request;
use rowkit_postgrest::transport::BoxFuture;
use rowkit_postgrest::{
    ChannelSpec, MemoryTransport, PostgrestConfig, PostgrestProvider, RawChannel, Response,
    Transport,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

type Provider = PostgrestProvider<MemoryTransport>;

async fn connected() -> Arc<Provider> {
    let provider = Arc::new(PostgrestProvider::in_memory());
    provider.connect().await.unwrap();
    provider
}

fn collector() -> (rowkit_data::ChangeHandler, mpsc::UnboundedReceiver<ChangeEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let h = handler(move |event| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(event);
        }
    });
    (h, rx)
}

async fn create(provider: &Provider, table: &str, body: Value) -> Value {
    provider
        .create::<Value, _>(table, &body, &CreateOptions::default())
        .await
        .unwrap()
        .data
}

async fn next(rx: &mut mpsc::UnboundedReceiver<ChangeEvent>) -> Option<ChangeEvent> {
    tokio::time::timeout(Duration::from_millis(500), rx.recv())
        .await
        .ok()
        .flatten()
}

async fn nothing_more(rx: &mut mpsc::UnboundedReceiver<ChangeEvent>) -> bool {
    tokio::time::timeout(Duration::from_millis(100), rx.recv())
        .await
        .is_err()
}

#[tokio::test]
async fn test_insert_events_arrive_in_order() {
    let provider = connected().await;
    let (h, mut rx) = collector();
    let sub = provider
        .subscribe("items", SubscribeOptions::default().event(ChangeType::Insert), h)
        .await
        .unwrap();
    assert_eq!(sub.table(), "items");
    assert!(sub.id().starts_with("items-"));

    create(&provider, "items", json!({"name": "first"})).await;
    let other = create(&provider, "others", json!({"name": "elsewhere"})).await;
    create(&provider, "items", json!({"name": "second"})).await;
    provider
        .update::<Value, _>(
            "others",
            &json!({"name": "changed"}),
            &UpdateOptions::new(rowkit_data::Filter::new().where_eq("id", other["id"].clone())),
        )
        .await
        .unwrap();

    let first = next(&mut rx).await.unwrap();
    let second = next(&mut rx).await.unwrap();
    assert_eq!(first.kind, ChangeType::Insert);
    assert_eq!(first.table, "items");
    assert_eq!(first.record["name"], "first");
    assert_eq!(second.record["name"], "second");
    assert!(nothing_more(&mut rx).await);
}

#[tokio::test]
async fn test_all_events_include_update_and_delete() {
    let provider = connected().await;
    let (h, mut rx) = collector();
    provider
        .subscribe("items", SubscribeOptions::default(), h)
        .await
        .unwrap();

    let row = create(&provider, "items", json!({"name": "a"})).await;
    let filter = rowkit_data::Filter::new().where_eq("id", row["id"].clone());
    provider
        .update::<Value, _>("items", &json!({"name": "b"}), &UpdateOptions::new(filter.clone()))
        .await
        .unwrap();
    provider
        .delete::<Value>("items", &rowkit_data::DeleteOptions::new(filter).hard())
        .await
        .unwrap();

    let kinds: Vec<_> = [
        next(&mut rx).await.unwrap(),
        next(&mut rx).await.unwrap(),
        next(&mut rx).await.unwrap(),
    ]
    .into_iter()
    .map(|e| e.kind)
    .collect();
    assert_eq!(
        kinds,
        vec![ChangeType::Insert, ChangeType::Update, ChangeType::Delete]
    );
}

#[tokio::test]
async fn test_update_event_carries_old_record() {
    let provider = connected().await;
    let (h, mut rx) = collector();
    provider
        .subscribe("items", SubscribeOptions::default().event(ChangeType::Update), h)
        .await
        .unwrap();

    let row = create(&provider, "items", json!({"name": "before"})).await;
    provider
        .update::<Value, _>(
            "items",
            &json!({"name": "after"}),
            &UpdateOptions::new(rowkit_data::Filter::new().where_eq("id", row["id"].clone())),
        )
        .await
        .unwrap();

    let event = next(&mut rx).await.unwrap();
    assert_eq!(event.record["name"], "after");
    assert_eq!(event.old_record.unwrap()["name"], "before");
}

#[tokio::test]
async fn test_row_filter_limits_deliveries() {
    let provider = connected().await;
    let (h, mut rx) = collector();
    provider
        .subscribe("items", SubscribeOptions::default().filter("org_id=eq.o1"), h)
        .await
        .unwrap();

    create(&provider, "items", json!({"name": "skip", "org_id": "o2"})).await;
    create(&provider, "items", json!({"name": "keep", "org_id": "o1"})).await;

    assert_eq!(next(&mut rx).await.unwrap().record["name"], "keep");
    assert!(nothing_more(&mut rx).await);
}

#[tokio::test]
async fn test_unsubscribe_twice_is_harmless() {
    let provider = connected().await;
    let (h, mut rx) = collector();
    let sub = provider
        .subscribe("items", SubscribeOptions::default(), h)
        .await
        .unwrap();
    assert_eq!(provider.active_channels(), 1);

    provider.unsubscribe(&sub).await;
    sub.unsubscribe().await;
    assert_eq!(provider.active_channels(), 0);

    create(&provider, "items", json!({"name": "late"})).await;
    assert!(nothing_more(&mut rx).await);
}

#[tokio::test]
async fn test_failed_channel_registers_nothing() {
    let provider = connected().await;
    provider.transport().fail_channels(true);
    let (h, _rx) = collector();
    let err = provider
        .subscribe("items", SubscribeOptions::default(), h)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), rowkit_data::ErrorKind::Backend);
    assert_eq!(provider.active_channels(), 0);
}

#[tokio::test]
async fn test_subscribe_requires_connect() {
    let provider = PostgrestProvider::in_memory();
    let (h, _rx) = collector();
    let err = provider
        .subscribe("items", SubscribeOptions::default(), h)
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::NotConnected));
}

#[tokio::test]
async fn test_panicking_handler_does_not_stop_delivery() {
    let provider = connected().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let h = handler(move |event: ChangeEvent| {
        let tx = tx.clone();
        async move {
            if event.record["name"] == "boom" {
                panic!("handler failure");
            }
            let _ = tx.send(event);
        }
    });
    provider
        .subscribe("items", SubscribeOptions::default(), h)
        .await
        .unwrap();

    create(&provider, "items", json!({"name": "boom"})).await;
    create(&provider, "items", json!({"name": "fine"})).await;

    assert_eq!(next(&mut rx).await.unwrap().record["name"], "fine");
    assert_eq!(provider.active_channels(), 1);
}

#[tokio::test]
async fn test_disconnect_releases_every_channel() {
    let provider = connected().await;
    let (h1, mut rx1) = collector();
    let (h2, _rx2) = collector();
    provider
        .subscribe("items", SubscribeOptions::default(), h1)
        .await
        .unwrap();
    provider
        .subscribe("others", SubscribeOptions::default(), h2)
        .await
        .unwrap();
    assert_eq!(provider.active_channels(), 2);

    provider.disconnect().await.unwrap();
    assert_eq!(provider.active_channels(), 0);

    provider.connect().await.unwrap();
    create(&provider, "items", json!({"name": "after"})).await;
    assert!(nothing_more(&mut rx1).await);
}

#[tokio::test]
async fn test_channel_names_are_unique_per_provider() {
    let provider = connected().await;
    let mut ids = Vec::new();
    for _ in 0..5 {
        let (h, _rx) = collector();
        let sub = provider
            .subscribe("items", SubscribeOptions::default(), h)
            .await
            .unwrap();
        ids.push(sub.id().to_string());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5);
}

#[tokio::test]
async fn test_server_closed_channel_is_no_longer_active() {
    let provider = connected().await;
    let (h, _rx) = collector();
    provider
        .subscribe("items", SubscribeOptions::default(), h)
        .await
        .unwrap();
    let (h, _rx2) = collector();
    provider
        .subscribe("orders", SubscribeOptions::default(), h)
        .await
        .unwrap();
    assert_eq!(provider.active_channels(), 2);

    assert_eq!(provider.transport().close_channels("items"), 1);
    tokio::time::timeout(Duration::from_secs(1), async {
        while provider.active_channels() != 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

/// Memory transport whose channel setup waits until the test lets it finish.
struct SlowChannels {
    inner: MemoryTransport,
    opening: Arc<Notify>,
    proceed: Arc<Notify>,
}

impl Transport for SlowChannels {
    fn connect(&self) -> BoxFuture<'_, Result<(), DataError>> {
        self.inner.connect()
    }

    fn execute<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, DataError>> {
        self.inner.execute(request)
    }

    fn open_channel<'a>(&'a self, spec: &'a ChannelSpec) -> BoxFuture<'a, Result<RawChannel, DataError>> {
        Box::pin(async move {
            self.opening.notify_one();
            self.proceed.notified().await;
            self.inner.open_channel(spec).await
        })
    }
}

#[tokio::test]
async fn test_disconnect_during_subscribe_drops_the_new_channel() {
    let opening = Arc::new(Notify::new());
    let proceed = Arc::new(Notify::new());
    let transport = SlowChannels {
        inner: MemoryTransport::new(),
        opening: opening.clone(),
        proceed: proceed.clone(),
    };
    let provider = Arc::new(PostgrestProvider::new(
        transport,
        PostgrestConfig::new("http://localhost:54321", "key"),
    ));
    provider.connect().await.unwrap();

    let subscriber = provider.clone();
    let pending = tokio::spawn(async move {
        let (h, _rx) = collector();
        subscriber
            .subscribe("items", SubscribeOptions::default(), h)
            .await
    });
    opening.notified().await;
    provider.disconnect().await.unwrap();
    proceed.notify_one();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, DataError::NotConnected));
    assert_eq!(provider.active_channels(), 0);
}
