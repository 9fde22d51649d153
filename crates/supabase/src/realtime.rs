//! Realtime transport over the Phoenix channel protocol.
//!
//! Every channel gets its own socket: the join frame subscribes to all
//! postgres changes of one table, a heartbeat keeps the socket alive, and a
//! leave frame is sent when the channel is closed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use bikemap_core::{
    BackendFailure, ChangeEvent, ChangeType, ChannelMessage, ChannelSpec, ChannelStatus,
    RealtimeChannel, RealtimeTransport,
};

use crate::config::SupabaseConfig;
use crate::error::SupabaseError;
use crate::types::PhoenixFrame;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

const HEARTBEAT_TOPIC: &str = "phoenix";

type CloseSenders = Arc<Mutex<HashMap<String, oneshot::Sender<()>>>>;

fn lock(senders: &CloseSenders) -> MutexGuard<'_, HashMap<String, oneshot::Sender<()>>> {
    senders.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Realtime client for one Supabase project.
pub struct SupabaseRealtime {
    config: SupabaseConfig,
    channels: CloseSenders,
    next_ref: Arc<AtomicU64>,
}

impl SupabaseRealtime {
    pub fn new(config: SupabaseConfig) -> Self {
        Self {
            config,
            channels: Arc::new(Mutex::new(HashMap::new())),
            next_ref: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Topics of the channels currently running.
    pub fn open_topics(&self) -> Vec<String> {
        lock(&self.channels).keys().cloned().collect()
    }

    fn make_ref(&self) -> String {
        (self.next_ref.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Connect and send the join frame, giving up after the configured timeout.
    async fn connect(&self, spec: &ChannelSpec) -> Result<(String, String, WsSink, WsSource), SupabaseError> {
        match tokio::time::timeout(self.config.timeout, self.handshake(spec)).await {
            Ok(result) => result,
            Err(_) => Err(SupabaseError::websocket(format!(
                "Realtime connect timed out after {:?}",
                self.config.timeout
            ))),
        }
    }

    async fn handshake(&self, spec: &ChannelSpec) -> Result<(String, String, WsSink, WsSource), SupabaseError> {
        let url = self.config.realtime_url();
        debug!("Connecting realtime socket for {}", spec.collection);
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| SupabaseError::websocket(e.to_string()))?;
        let (mut sink, source) = ws.split();

        let topic = format!("realtime:{}:{}", spec.collection, Uuid::new_v4().simple());
        let join_ref = self.make_ref();
        let join = join_frame(&topic, spec, self.config.bearer(), &join_ref);
        sink.send(WsMessage::Text(serde_json::to_string(&join)?))
            .await
            .map_err(|e| SupabaseError::websocket(e.to_string()))?;
        Ok((topic, join_ref, sink, source))
    }
}

#[async_trait]
impl RealtimeTransport for SupabaseRealtime {
    async fn open_channel(&self, spec: ChannelSpec) -> Result<RealtimeChannel, BackendFailure> {
        let (topic, join_ref, sink, source) = self.connect(&spec).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        lock(&self.channels).insert(topic.clone(), close_tx);

        let socket = ChannelSocket {
            topic: topic.clone(),
            join_ref,
            heartbeat: self.config.heartbeat_interval,
            messages: tx,
            channels: Arc::clone(&self.channels),
            next_ref: Arc::clone(&self.next_ref),
        };
        tokio::spawn(socket.run(sink, source, close_rx));
        info!("Joined realtime channel {}", topic);

        Ok(RealtimeChannel {
            topic,
            messages: rx,
        })
    }

    fn close_channel(&self, topic: &str) {
        if let Some(close) = lock(&self.channels).remove(topic) {
            let _ = close.send(());
        }
    }
}

struct ChannelSocket {
    topic: String,
    join_ref: String,
    heartbeat: Duration,
    messages: mpsc::UnboundedSender<ChannelMessage>,
    channels: CloseSenders,
    next_ref: Arc<AtomicU64>,
}

impl ChannelSocket {
    fn make_ref(&self) -> String {
        (self.next_ref.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    async fn run(self, mut sink: WsSink, mut source: WsSource, mut close_rx: oneshot::Receiver<()>) {
        let mut heartbeat = tokio::time::interval(self.heartbeat);
        // The first tick fires immediately; the join frame already went out.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = &mut close_rx => {
                    let leave = control_frame(&self.topic, "phx_leave", &self.make_ref());
                    if let Ok(text) = serde_json::to_string(&leave) {
                        let _ = sink.send(WsMessage::Text(text)).await;
                    }
                    let _ = sink.close().await;
                    debug!("Left realtime channel {}", self.topic);
                    break;
                }
                _ = heartbeat.tick() => {
                    let beat = control_frame(HEARTBEAT_TOPIC, "heartbeat", &self.make_ref());
                    let sent = match serde_json::to_string(&beat) {
                        Ok(text) => sink.send(WsMessage::Text(text)).await,
                        Err(_) => Ok(()),
                    };
                    if let Err(e) = sent {
                        warn!("Realtime heartbeat failed on {}: {}", self.topic, e);
                        self.emit(ChannelMessage::Status(ChannelStatus::Errored(e.to_string())));
                        break;
                    }
                }
                incoming = source.next() => match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Some(message) = parse_frame(&text, &self.topic, &self.join_ref) {
                            let terminal = matches!(message, ChannelMessage::Status(ChannelStatus::Closed));
                            if !self.emit(message) || terminal {
                                break;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = sink.send(WsMessage::Pong(data)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!("Realtime socket for {} closed by server", self.topic);
                        self.emit(ChannelMessage::Status(ChannelStatus::Closed));
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("Realtime socket error on {}: {}", self.topic, e);
                        self.emit(ChannelMessage::Status(ChannelStatus::Errored(e.to_string())));
                        break;
                    }
                },
            }
        }

        lock(&self.channels).remove(&self.topic);
    }

    /// Forward to the subscriber; false once nobody is listening.
    fn emit(&self, message: ChannelMessage) -> bool {
        self.messages.send(message).is_ok()
    }
}

fn join_frame(topic: &str, spec: &ChannelSpec, access_token: &str, join_ref: &str) -> PhoenixFrame {
    PhoenixFrame {
        topic: topic.to_string(),
        event: "phx_join".to_string(),
        payload: json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [
                    { "event": "*", "schema": spec.schema, "table": spec.collection }
                ]
            },
            "access_token": access_token
        }),
        reference: Some(join_ref.to_string()),
        join_ref: Some(join_ref.to_string()),
    }
}

fn control_frame(topic: &str, event: &str, reference: &str) -> PhoenixFrame {
    PhoenixFrame {
        topic: topic.to_string(),
        event: event.to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
        join_ref: None,
    }
}

fn error_reason(payload: &Value) -> String {
    payload
        .pointer("/response/reason")
        .or_else(|| payload.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string()
}

/// Decode one text frame for `topic`.
///
/// Frames for other topics, heartbeat replies and anything unrecognized
/// yield `None`.
pub fn parse_frame(text: &str, topic: &str, join_ref: &str) -> Option<ChannelMessage> {
    let frame: PhoenixFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("Ignoring undecodable realtime frame: {}", e);
            return None;
        }
    };
    if frame.topic != topic {
        return None;
    }

    match frame.event.as_str() {
        "phx_reply" if frame.reference.as_deref() == Some(join_ref) => {
            match frame.payload.get("status").and_then(Value::as_str) {
                Some("ok") => Some(ChannelMessage::Status(ChannelStatus::Subscribed)),
                _ => Some(ChannelMessage::Status(ChannelStatus::Errored(error_reason(
                    &frame.payload,
                )))),
            }
        }
        "system" if frame.payload.get("status").and_then(Value::as_str) == Some("error") => Some(
            ChannelMessage::Status(ChannelStatus::Errored(error_reason(&frame.payload))),
        ),
        "postgres_changes" => {
            let data = frame.payload.get("data")?;
            let event_type: ChangeType =
                serde_json::from_value(data.get("type")?.clone()).ok()?;
            let collection = data.get("table")?.as_str()?.to_string();
            let timestamp = data
                .get("commit_timestamp")
                .and_then(Value::as_str)
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                .map(|ts| ts.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);
            Some(ChannelMessage::Change(ChangeEvent {
                event_type,
                collection,
                timestamp,
            }))
        }
        "phx_close" => Some(ChannelMessage::Status(ChannelStatus::Closed)),
        "phx_error" => Some(ChannelMessage::Status(ChannelStatus::Errored(
            "channel crashed".to_string(),
        ))),
        _ => None,
    }
}
