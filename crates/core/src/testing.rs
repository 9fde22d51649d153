//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::backend::{
    ChangeEvent, ChangeType, ChannelMessage, ChannelSpec, ChannelStatus, MutationOperation,
    MutationReceipt, MutationRequest, ObjectStorage, RealtimeChannel, RealtimeTransport,
    ResourceBackend,
};
use crate::errors::BackendFailure;
use crate::query::{CountRequest, FilterExpr, ReadRequest};
use crate::resources::Record;
use crate::sync::row_id;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn matches_filter(row: &Record, filter: &Option<FilterExpr>) -> bool {
    match filter {
        None => true,
        Some(FilterExpr::AnyILike { fields, term }) => {
            let needle = term.replace('\\', "").to_lowercase();
            fields.iter().any(|field| {
                row.get(*field)
                    .and_then(Value::as_str)
                    .map(|value| value.to_lowercase().contains(&needle))
                    .unwrap_or(false)
            })
        }
        Some(FilterExpr::Eq { field, value }) => match row.get(*field) {
            Some(Value::String(s)) => s == value,
            Some(other) => other.to_string() == *value,
            None => false,
        },
    }
}

#[derive(Default)]
struct BackendState {
    tables: HashMap<String, Vec<Record>>,
    reads: Vec<ReadRequest>,
    counts: Vec<CountRequest>,
    mutations: Vec<MutationRequest>,
    read_gates: VecDeque<oneshot::Receiver<()>>,
    read_failures: VecDeque<BackendFailure>,
    mutation_failures: VecDeque<BackendFailure>,
    next_id: u64,
}

/// Scripted relational backend backed by in-memory tables.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<BackendState>,
}

impl FakeBackend {
    pub fn insert_row(&self, collection: &str, row: Value) {
        let Value::Object(record) = row else {
            panic!("rows must be JSON objects");
        };
        lock(&self.state)
            .tables
            .entry(collection.to_string())
            .or_default()
            .push(record);
    }

    pub fn row_count(&self, collection: &str) -> usize {
        lock(&self.state)
            .tables
            .get(collection)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Hold the next read until the returned sender fires (or is dropped).
    pub fn gate_next_read(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        lock(&self.state).read_gates.push_back(rx);
        tx
    }

    pub fn fail_next_read(&self, failure: BackendFailure) {
        lock(&self.state).read_failures.push_back(failure);
    }

    pub fn fail_next_mutation(&self, failure: BackendFailure) {
        lock(&self.state).mutation_failures.push_back(failure);
    }

    pub fn reads(&self) -> Vec<ReadRequest> {
        lock(&self.state).reads.clone()
    }

    pub fn mutations(&self) -> Vec<MutationRequest> {
        lock(&self.state).mutations.clone()
    }

    pub fn call_count(&self) -> usize {
        let state = lock(&self.state);
        state.reads.len() + state.counts.len() + state.mutations.len()
    }

    /// Yield until at least `n` reads have been issued.
    pub async fn wait_for_reads(&self, n: usize) {
        while lock(&self.state).reads.len() < n {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl ResourceBackend for FakeBackend {
    async fn read(&self, request: &ReadRequest) -> Result<Vec<Record>, BackendFailure> {
        let gate = {
            let mut state = lock(&self.state);
            state.reads.push(request.clone());
            state.read_gates.pop_front()
        };
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        let mut state = lock(&self.state);
        if let Some(failure) = state.read_failures.pop_front() {
            return Err(failure);
        }
        let mut rows: Vec<Record> = state
            .tables
            .get(request.collection)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches_filter(row, &request.filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(order) = &request.order {
            rows.sort_by_key(|row| {
                row.get(&order.key)
                    .map(|value| value.to_string())
                    .unwrap_or_default()
            });
            if !order.ascending {
                rows.reverse();
            }
        }
        if let Some(range) = request.range {
            let from = range.from as usize;
            let len = (range.to - range.from + 1) as usize;
            rows = rows.into_iter().skip(from).take(len).collect();
        }
        Ok(rows)
    }

    async fn count(&self, request: &CountRequest) -> Result<u64, BackendFailure> {
        let mut state = lock(&self.state);
        state.counts.push(request.clone());
        let total = state
            .tables
            .get(request.collection)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches_filter(row, &request.filter))
                    .count()
            })
            .unwrap_or(0);
        Ok(total as u64)
    }

    async fn mutate(&self, request: MutationRequest) -> Result<MutationReceipt, BackendFailure> {
        let mut state = lock(&self.state);
        state.mutations.push(request.clone());
        if let Some(failure) = state.mutation_failures.pop_front() {
            return Err(failure);
        }
        match request.operation {
            MutationOperation::Insert => {
                state.next_id += 1;
                let id = format!("new-{}", state.next_id);
                let mut row = request.fields.unwrap_or_default();
                row.insert("id".to_string(), Value::String(id.clone()));
                state
                    .tables
                    .entry(request.collection.to_string())
                    .or_default()
                    .push(row);
                Ok(MutationReceipt { id: Some(id) })
            }
            MutationOperation::Update => {
                let id = request.id.clone();
                if let Some(row) = state
                    .tables
                    .get_mut(request.collection)
                    .and_then(|rows| rows.iter_mut().find(|row| row_id(row) == id))
                {
                    row.extend(request.fields.unwrap_or_default());
                }
                Ok(MutationReceipt { id })
            }
            MutationOperation::Delete => {
                let id = request.id.clone();
                if let Some(rows) = state.tables.get_mut(request.collection) {
                    rows.retain(|row| row_id(row) != id);
                }
                Ok(MutationReceipt { id })
            }
        }
    }
}

#[derive(Default)]
struct StorageState {
    removed: Vec<(String, String)>,
    failure: Option<BackendFailure>,
}

#[derive(Default)]
pub struct FakeStorage {
    state: Mutex<StorageState>,
}

impl FakeStorage {
    /// Every later removal fails with `failure`.
    pub fn fail_with(&self, failure: BackendFailure) {
        lock(&self.state).failure = Some(failure);
    }

    pub fn removed(&self) -> Vec<(String, String)> {
        lock(&self.state).removed.clone()
    }
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), BackendFailure> {
        let mut state = lock(&self.state);
        if let Some(failure) = &state.failure {
            return Err(failure.clone());
        }
        for path in paths {
            state.removed.push((bucket.to_string(), path.clone()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct TransportState {
    channels: HashMap<String, (String, mpsc::UnboundedSender<ChannelMessage>)>,
    opened: Vec<String>,
    closed: Vec<String>,
    next_failure: Option<String>,
    open_delay: Option<Duration>,
    attempts: usize,
    counter: u64,
}

/// Realtime transport that acknowledges every join immediately.
#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<TransportState>,
}

impl FakeTransport {
    pub fn fail_next_open(&self, message: &str) {
        lock(&self.state).next_failure = Some(message.to_string());
    }

    /// Every later open waits `delay` before answering.
    pub fn delay_opens(&self, delay: Duration) {
        lock(&self.state).open_delay = Some(delay);
    }

    /// Number of open_channel calls, finished or not.
    pub fn open_attempts(&self) -> usize {
        lock(&self.state).attempts
    }

    /// Channels currently open.
    pub fn open_count(&self) -> usize {
        lock(&self.state).channels.len()
    }

    /// Collections of every successfully opened channel, in order.
    pub fn opened_collections(&self) -> Vec<String> {
        lock(&self.state).opened.clone()
    }

    pub fn closed_topics(&self) -> Vec<String> {
        lock(&self.state).closed.clone()
    }

    pub fn emit(&self, collection: &str, event_type: ChangeType) {
        let state = lock(&self.state);
        for (channel_collection, tx) in state.channels.values() {
            if channel_collection == collection {
                let _ = tx.send(ChannelMessage::Change(ChangeEvent {
                    event_type,
                    collection: collection.to_string(),
                    timestamp: Utc::now(),
                }));
            }
        }
    }

    /// Simulate the server dropping every socket.
    pub fn drop_all(&self) {
        lock(&self.state).channels.clear();
    }
}

#[async_trait]
impl RealtimeTransport for FakeTransport {
    async fn open_channel(&self, spec: ChannelSpec) -> Result<RealtimeChannel, BackendFailure> {
        let delay = {
            let mut state = lock(&self.state);
            state.attempts += 1;
            state.open_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        if let Some(message) = state.next_failure.take() {
            return Err(BackendFailure::transport(message));
        }
        state.counter += 1;
        let topic = format!("realtime:{}:{}", spec.collection, state.counter);
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(ChannelMessage::Status(ChannelStatus::Subscribed));
        state
            .channels
            .insert(topic.clone(), (spec.collection.to_string(), tx));
        state.opened.push(spec.collection.to_string());
        Ok(RealtimeChannel {
            topic,
            messages: rx,
        })
    }

    fn close_channel(&self, topic: &str) {
        let mut state = lock(&self.state);
        if state.channels.remove(topic).is_some() {
            state.closed.push(topic.to_string());
        }
    }
}
