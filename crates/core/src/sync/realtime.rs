//! Push-notification subscription for the active resource kind.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::debounce::{Debouncer, RefreshHook};
use crate::backend::{ChannelMessage, ChannelSpec, ChannelStatus, RealtimeChannel, RealtimeTransport};
use crate::errors::{ConsoleError, Result};
use crate::resources::{resolve, ResourceKind};

struct ActiveChannel {
    kind: ResourceKind,
    topic: String,
    connected: Arc<AtomicBool>,
    /// Set once the channel was closed or errored; it will not deliver again.
    ended: Arc<AtomicBool>,
    debouncer: Arc<Debouncer>,
    pump: JoinHandle<()>,
}

impl ActiveChannel {
    fn shut_down(self, transport: &dyn RealtimeTransport) {
        self.debouncer.cancel();
        self.pump.abort();
        transport.close_channel(&self.topic);
        info!("[Realtime] Closed channel {} ({})", self.topic, self.kind);
    }
}

#[derive(Default)]
struct BridgeState {
    active: Option<ActiveChannel>,
    /// Subscription whose channel is still being opened.
    opening: Option<(ResourceKind, u64)>,
    generation: u64,
}

/// Owns at most one live channel and funnels its change events into a single
/// debounced refresh.
///
/// Subscribing is split in two: [`RealtimeBridge::begin`] claims the slot
/// synchronously and [`RealtimeBridge::open`] connects. Anything that claims
/// the slot in between makes the late channel get closed on arrival.
pub struct RealtimeBridge {
    transport: Arc<dyn RealtimeTransport>,
    schema: String,
    window: Duration,
    state: Mutex<BridgeState>,
}

impl RealtimeBridge {
    pub fn new(transport: Arc<dyn RealtimeTransport>, schema: String, window: Duration) -> Self {
        Self {
            transport,
            schema,
            window,
            state: Mutex::new(BridgeState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the current subscription with one for `kind`.
    ///
    /// Returns `Ok(false)` when another subscribe or unsubscribe happened
    /// while the channel was opening; the fresh channel is closed again.
    pub async fn subscribe(&self, kind: ResourceKind, on_change: RefreshHook) -> Result<bool> {
        let generation = self.begin(kind);
        self.open(kind, generation, on_change).await
    }

    /// Tear down the current channel and reserve the slot for `kind`.
    pub fn begin(&self, kind: ResourceKind) -> u64 {
        let (previous, generation) = {
            let mut state = self.state();
            state.generation += 1;
            state.opening = Some((kind, state.generation));
            (state.active.take(), state.generation)
        };
        if let Some(channel) = previous {
            channel.shut_down(self.transport.as_ref());
        }
        generation
    }

    /// Open the channel reserved by [`RealtimeBridge::begin`].
    pub async fn open(
        &self,
        kind: ResourceKind,
        generation: u64,
        on_change: RefreshHook,
    ) -> Result<bool> {
        let opened = match resolve(kind) {
            Ok(entry) => {
                let spec = ChannelSpec {
                    collection: entry.collection,
                    schema: self.schema.clone(),
                };
                self.transport
                    .open_channel(spec)
                    .await
                    .map_err(ConsoleError::from_backend)
            }
            Err(err) => Err(err),
        };

        let mut state = self.state();
        if state.opening == Some((kind, generation)) {
            state.opening = None;
        }
        let channel = match opened {
            Ok(channel) => channel,
            Err(err) => {
                warn!("[Realtime] Subscription for {} failed: {}", kind, err);
                return Err(err);
            }
        };
        if state.generation != generation {
            debug!(
                "[Realtime] Discarding channel {} opened for a superseded {} subscription",
                channel.topic, kind
            );
            self.transport.close_channel(&channel.topic);
            return Ok(false);
        }

        let topic = channel.topic.clone();
        let connected = Arc::new(AtomicBool::new(false));
        let ended = Arc::new(AtomicBool::new(false));
        let debouncer = Arc::new(Debouncer::spawn(self.window, on_change));
        let pump = tokio::spawn(pump_messages(
            channel,
            Arc::clone(&connected),
            Arc::clone(&ended),
            Arc::clone(&debouncer),
        ));
        info!("[Realtime] Opened channel {} for {}", topic, kind);
        state.active = Some(ActiveChannel {
            kind,
            topic,
            connected,
            ended,
            debouncer,
            pump,
        });
        Ok(true)
    }

    /// Tear down the current subscription, if any. Safe to call repeatedly.
    pub fn unsubscribe(&self) {
        let previous = {
            let mut state = self.state();
            state.generation += 1;
            state.opening = None;
            state.active.take()
        };
        if let Some(channel) = previous {
            channel.shut_down(self.transport.as_ref());
        }
    }

    /// True unless a channel for `kind` is opening or installed and still alive.
    pub fn needs_subscription(&self, kind: ResourceKind) -> bool {
        let state = self.state();
        if matches!(state.opening, Some((opening, _)) if opening == kind) {
            return false;
        }
        match &state.active {
            Some(channel) if channel.kind == kind => channel.ended.load(Ordering::SeqCst),
            _ => true,
        }
    }

    /// Kind of the installed subscription, whether or not it has connected yet.
    pub fn active_kind(&self) -> Option<ResourceKind> {
        self.state().active.as_ref().map(|channel| channel.kind)
    }

    pub fn is_connected(&self) -> bool {
        self.state()
            .active
            .as_ref()
            .map(|channel| channel.connected.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

impl Drop for RealtimeBridge {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

async fn pump_messages(
    mut channel: RealtimeChannel,
    connected: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
    debouncer: Arc<Debouncer>,
) {
    while let Some(message) = channel.messages.recv().await {
        match message {
            ChannelMessage::Status(ChannelStatus::Subscribed) => {
                connected.store(true, Ordering::SeqCst);
                debug!("[Realtime] {} subscribed", channel.topic);
            }
            ChannelMessage::Status(ChannelStatus::Closed) => {
                connected.store(false, Ordering::SeqCst);
                ended.store(true, Ordering::SeqCst);
                info!("[Realtime] {} closed by server", channel.topic);
            }
            ChannelMessage::Status(ChannelStatus::Errored(reason)) => {
                connected.store(false, Ordering::SeqCst);
                ended.store(true, Ordering::SeqCst);
                warn!("[Realtime] {} errored: {}", channel.topic, reason);
            }
            ChannelMessage::Change(event) => {
                debug!(
                    "[Realtime] {:?} on {} at {}",
                    event.event_type, event.collection, event.timestamp
                );
                debouncer.trigger();
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
    ended.store(true, Ordering::SeqCst);
}
