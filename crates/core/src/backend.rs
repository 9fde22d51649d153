//! Contracts for the remote collaborators the console talks to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::BackendFailure;
use crate::query::{CountRequest, ReadRequest};
use crate::resources::{Payload, Record, RowId};

/// Write operations supported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOperation {
    Insert,
    Update,
    Delete,
}

/// A single-row write.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    pub collection: &'static str,
    pub operation: MutationOperation,
    pub id: Option<RowId>,
    pub fields: Option<Payload>,
}

/// What the backend reports back for a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MutationReceipt {
    pub id: Option<RowId>,
}

/// Row reads and writes against the relational backend.
#[async_trait]
pub trait ResourceBackend: Send + Sync {
    async fn read(&self, request: &ReadRequest) -> Result<Vec<Record>, BackendFailure>;

    async fn count(&self, request: &CountRequest) -> Result<u64, BackendFailure>;

    async fn mutate(&self, request: MutationRequest) -> Result<MutationReceipt, BackendFailure>;
}

/// File storage holding uploaded images.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), BackendFailure>;
}

/// Kind of row change carried by a push notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

/// Push notification for one changed row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub event_type: ChangeType,
    pub collection: String,
    pub timestamp: DateTime<Utc>,
}

/// Lifecycle of a realtime channel as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    Closed,
    Errored(String),
}

/// Anything a realtime channel can deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    Status(ChannelStatus),
    Change(ChangeEvent),
}

/// Parameters for opening a channel on one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub collection: &'static str,
    pub schema: String,
}

/// An open channel: its topic and the stream of messages it produces.
#[derive(Debug)]
pub struct RealtimeChannel {
    pub topic: String,
    pub messages: mpsc::UnboundedReceiver<ChannelMessage>,
}

/// Push-notification transport.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Open a channel listening to every insert/update/delete on the collection.
    async fn open_channel(&self, spec: ChannelSpec) -> Result<RealtimeChannel, BackendFailure>;

    /// Tear a channel down. Fire-and-forget; unknown topics are ignored.
    fn close_channel(&self, topic: &str);
}
