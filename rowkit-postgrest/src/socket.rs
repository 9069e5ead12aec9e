//! Phoenix-protocol websocket channel for realtime `postgres_changes`.
//!
//! One websocket per channel. The opening handshake joins the topic and
//! waits for the server's `phx_reply`; afterwards a background reader task
//! owns the stream, forwards change payloads and keeps the socket alive.

use futures_util::{SinkExt, StreamExt};
use rowkit_data::DataError;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::config::PostgrestConfig;
use crate::error::{BackendFailure, TransportErrorExt};
use crate::transport::{ChannelSpec, RawChannel};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const JOIN_REF: &str = "1";

pub(crate) async fn open_channel(
    config: &PostgrestConfig,
    spec: &ChannelSpec,
) -> Result<RawChannel, DataError> {
    let url = config.realtime_url().map_err(DataError::backend)?;
    let (mut ws, _) = connect_async(url.as_str())
        .await
        .map_err(|e| e.into_data_error())?;

    let topic = format!("realtime:{}", spec.name);
    let join = json!({
        "topic": topic,
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [change_config(spec)],
            },
            "access_token": config.api_key,
        },
        "ref": JOIN_REF,
        "join_ref": JOIN_REF,
    });
    ws.send(Message::Text(join.to_string().into()))
        .await
        .map_err(|e| e.into_data_error())?;

    let joined = tokio::time::timeout(
        config.realtime_join_timeout(),
        await_join_reply(&mut ws, &topic),
    )
    .await;
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            let _ = ws.close(None).await;
            return Err(e);
        }
        Err(_) => {
            let _ = ws.close(None).await;
            return Err(BackendFailure::new(format!(
                "timed out after {:?} joining channel {}",
                config.realtime_join_timeout(),
                spec.name
            ))
            .into());
        }
    }

    debug!(channel = %spec.name, table = %spec.table, "Realtime channel joined");

    let (event_tx, events) = mpsc::unbounded_channel();
    let (close_tx, close_rx) = oneshot::channel();
    tokio::spawn(reader_loop(ws, event_tx, close_rx, topic));

    Ok(RawChannel {
        events,
        shutdown: Some(close_tx),
    })
}

fn change_config(spec: &ChannelSpec) -> Value {
    let mut config = json!({
        "event": spec.event.as_str(),
        "schema": spec.schema,
        "table": spec.table,
    });
    if let Some(filter) = &spec.filter {
        config["filter"] = Value::String(filter.clone());
    }
    config
}

async fn await_join_reply(ws: &mut WsStream, topic: &str) -> Result<(), DataError> {
    while let Some(frame) = ws.next().await {
        match frame.map_err(|e| e.into_data_error())? {
            Message::Text(text) => {
                let Ok(msg) = serde_json::from_str::<Value>(text.as_str()) else {
                    continue;
                };
                if msg["topic"] != topic || msg["event"] != "phx_reply" || msg["ref"] != JOIN_REF {
                    continue;
                }
                let payload = &msg["payload"];
                return if payload["status"] == "ok" {
                    Ok(())
                } else {
                    Err(BackendFailure::new(format!(
                        "channel join rejected: {}",
                        payload["response"]
                    ))
                    .into())
                };
            }
            Message::Ping(payload) => {
                let _ = ws.send(Message::Pong(payload)).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(BackendFailure::new("realtime socket closed before the channel was joined").into())
}

/// Best-effort `phx_leave` + close.
async fn leave_and_close(ws: &mut WsStream, topic: &str) {
    let leave = json!({
        "topic": topic,
        "event": "phx_leave",
        "payload": {},
        "ref": "leave",
        "join_ref": JOIN_REF,
    });
    let _ = ws.send(Message::Text(leave.to_string().into())).await;
    let _ = ws.close(None).await;
}

async fn reader_loop(
    mut ws: WsStream,
    event_tx: mpsc::UnboundedSender<Value>,
    close_rx: oneshot::Receiver<()>,
    topic: String,
) {
    tokio::pin!(close_rx);
    let mut heartbeat =
        tokio::time::interval_at(tokio::time::Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
    let mut heartbeat_ref: u64 = 0;

    loop {
        let frame = tokio::select! {
            biased;

            _ = &mut close_rx => {
                leave_and_close(&mut ws, &topic).await;
                return;
            }

            _ = heartbeat.tick() => {
                heartbeat_ref += 1;
                let beat = json!({
                    "topic": "phoenix",
                    "event": "heartbeat",
                    "payload": {},
                    "ref": format!("hb-{heartbeat_ref}"),
                });
                if let Err(e) = ws.send(Message::Text(beat.to_string().into())).await {
                    warn!(topic = %topic, error = %e, "Realtime heartbeat failed");
                    return;
                }
                continue;
            }

            msg = ws.next() => msg,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                let Ok(msg) = serde_json::from_str::<Value>(text.as_str()) else {
                    continue;
                };
                if msg["topic"] != topic.as_str() {
                    continue;
                }
                match msg["event"].as_str() {
                    Some("postgres_changes") => {
                        let data = msg["payload"]["data"].clone();
                        if event_tx.send(data).is_err() {
                            leave_and_close(&mut ws, &topic).await;
                            return;
                        }
                    }
                    Some("phx_error") | Some("phx_close") => {
                        warn!(topic = %topic, payload = %msg["payload"], "Realtime channel closed by server");
                        return;
                    }
                    _ => {}
                }
            }
            Some(Ok(Message::Ping(payload))) => {
                let _ = ws.send(Message::Pong(payload)).await;
            }
            Some(Ok(Message::Close(_))) | None => {
                debug!(topic = %topic, "Realtime socket ended");
                return;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(topic = %topic, error = %e, "Realtime socket error");
                return;
            }
        }
    }
}
