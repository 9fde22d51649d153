//! Fetch lifecycle for the active view.

use log::{debug, info, warn};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::debounce::RefreshHook;
use super::mutation::MutationGateway;
use super::realtime::RealtimeBridge;
use super::state::{total_pages, RowSet, RunMode, RunOutcome, SyncPhase, ViewSnapshot};
use crate::backend::{MutationReceipt, ObjectStorage, RealtimeTransport, ResourceBackend};
use crate::config::ConsoleConfig;
use crate::errors::{ConsoleError, Result};
use crate::query::{plan, PageSize, Query, ReadPlan, SortDirection, SortSpec};
use crate::resources::{resolve, ActiveView, ResourceForm, ResourceKind, RowId};

struct ControllerState {
    query: Query,
    phase: SyncPhase,
    loading_visible: bool,
    rows: RowSet,
    selection: BTreeSet<RowId>,
    select_all: bool,
    last_error: Option<ConsoleError>,
    disposed: bool,
}

struct ControllerInner {
    backend: Arc<dyn ResourceBackend>,
    gateway: MutationGateway,
    bridge: RealtimeBridge,
    default_page_size: PageSize,
    /// Bumped for every issued request and on every invalidation.
    sequence: AtomicU64,
    state: Mutex<ControllerState>,
}

impl ControllerInner {
    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_latest(&self, sequence: u64) -> bool {
        self.sequence.load(Ordering::SeqCst) == sequence
    }
}

/// Drives reads, realtime refreshes and mutations for one console view.
///
/// Responses are applied only when they belong to the most recently issued
/// request; anything older is dropped on arrival. The handle is cheap to
/// clone and every clone drives the same view.
#[derive(Clone)]
pub struct SyncController {
    inner: Arc<ControllerInner>,
}

impl SyncController {
    pub fn new(
        backend: Arc<dyn ResourceBackend>,
        transport: Arc<dyn RealtimeTransport>,
        storage: Arc<dyn ObjectStorage>,
        config: ConsoleConfig,
    ) -> Result<Self> {
        let default_page_size = config.page_size()?;
        let mut query = Query::new(ActiveView::Dashboard);
        query.page_size = default_page_size;

        let gateway = MutationGateway::new(
            Arc::clone(&backend),
            storage,
            config.storage_marker.clone(),
            config.reviewer_id.clone(),
        );
        let bridge = RealtimeBridge::new(transport, config.schema.clone(), config.debounce());

        Ok(Self {
            inner: Arc::new(ControllerInner {
                backend,
                gateway,
                bridge,
                default_page_size,
                sequence: AtomicU64::new(0),
                state: Mutex::new(ControllerState {
                    query,
                    phase: SyncPhase::Idle,
                    loading_visible: false,
                    rows: RowSet::default(),
                    selection: BTreeSet::new(),
                    select_all: false,
                    last_error: None,
                    disposed: false,
                }),
            }),
        })
    }

    /// Switch to another view.
    ///
    /// Paging, search, sort and selection start over, in-flight requests for
    /// the previous view are invalidated and its realtime channel is closed
    /// before the new one is opened.
    pub async fn set_active_kind(&self, view: impl Into<ActiveView>) -> Result<RunOutcome> {
        let view = view.into();
        let query = {
            let mut state = self.inner.state();
            if state.disposed {
                return Ok(RunOutcome::Superseded);
            }
            let mut query = Query::new(view);
            query.page_size = self.inner.default_page_size;
            state.query = query.clone();
            state.phase = SyncPhase::Idle;
            state.loading_visible = false;
            state.rows = RowSet::default();
            state.selection.clear();
            state.select_all = false;
            state.last_error = None;
            self.inner.next_sequence();
            query
        };
        info!("[Sync] Active view is now {:?}", view);

        match view.resource() {
            Some(kind) => self.start_subscription(kind),
            None => self.inner.bridge.unsubscribe(),
        }
        self.execute(query, RunMode::Visible).await
    }

    /// Run `query`, making it the current one.
    ///
    /// `Silent` runs update data without raising the loading indicator.
    /// Visible runs also retry a realtime subscription that failed or
    /// dropped. The query must target the active view; other views are
    /// reached through [`SyncController::set_active_kind`].
    pub async fn run(&self, query: Query, mode: RunMode) -> Result<RunOutcome> {
        let active = self.inner.state().query.view;
        if query.view != active {
            return Err(ConsoleError::config(format!(
                "query targets {:?} but {:?} is active",
                query.view, active
            )));
        }
        if mode == RunMode::Visible {
            if let Some(kind) = query.view.resource() {
                self.ensure_subscription(kind);
            }
        }
        self.execute(query, mode).await
    }

    /// Re-run the current query.
    pub async fn refresh(&self, mode: RunMode) -> Result<RunOutcome> {
        let query = self.query();
        self.run(query, mode).await
    }

    pub async fn set_search(&self, term: &str) -> Result<RunOutcome> {
        let mut query = self.query();
        query.search_term = term.to_string();
        query.page = 1;
        self.clear_selection();
        self.run(query, RunMode::Visible).await
    }

    pub async fn set_sort(&self, key: &str, direction: SortDirection) -> Result<RunOutcome> {
        let mut query = self.query();
        query.sort = SortSpec::new(key, direction)?;
        self.run(query, RunMode::Visible).await
    }

    /// Column-header click.
    pub async fn toggle_sort(&self, key: &str) -> Result<RunOutcome> {
        let mut query = self.query();
        query.sort = query.sort.toggled(key)?;
        self.run(query, RunMode::Visible).await
    }

    pub async fn set_page(&self, page: u32) -> Result<RunOutcome> {
        if page == 0 {
            return Err(ConsoleError::validation("page must be at least 1"));
        }
        let mut query = self.query();
        query.page = page;
        self.clear_selection();
        self.run(query, RunMode::Visible).await
    }

    pub async fn set_page_size(&self, page_size: u32) -> Result<RunOutcome> {
        let mut query = self.query();
        query.page_size = PageSize::try_from(page_size)?;
        self.run(query, RunMode::Visible).await
    }

    pub fn select(&self, id: &str, checked: bool) {
        let mut state = self.inner.state();
        if checked {
            state.selection.insert(id.to_string());
        } else {
            state.selection.remove(id);
            state.select_all = false;
        }
    }

    /// Select every displayed row, or clear the selection.
    pub fn select_all(&self, checked: bool) {
        let mut state = self.inner.state();
        state.select_all = checked;
        state.selection = if checked {
            state.rows.ids().collect()
        } else {
            BTreeSet::new()
        };
    }

    pub fn query(&self) -> Query {
        self.inner.state().query.clone()
    }

    pub fn last_error(&self) -> Option<ConsoleError> {
        self.inner.state().last_error.clone()
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        let state = self.inner.state();
        let page_size = state.query.page_size.get();
        ViewSnapshot {
            view: state.query.view,
            rows: state.rows.rows.clone(),
            total_count: state.rows.total_count,
            total_pages: total_pages(state.rows.total_count, page_size),
            page: state.query.page,
            page_size,
            search_term: state.query.search_term.clone(),
            sort_key: state.query.sort.key.clone(),
            sort_direction: state.query.sort.direction,
            phase: state.phase,
            is_loading: state.phase == SyncPhase::Loading && state.loading_visible,
            is_realtime_connected: self.inner.bridge.is_connected(),
            selection: state.selection.iter().cloned().collect(),
            select_all: state.select_all,
            error: state.last_error.as_ref().map(ToString::to_string),
        }
    }

    pub async fn create(&self, kind: ResourceKind, form: &ResourceForm) -> Result<MutationReceipt> {
        let receipt = self.inner.gateway.create(kind, form).await?;
        self.refresh_after_mutation().await;
        Ok(receipt)
    }

    pub async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        form: &ResourceForm,
    ) -> Result<MutationReceipt> {
        let receipt = self.inner.gateway.update(kind, id, form).await?;
        self.refresh_after_mutation().await;
        Ok(receipt)
    }

    pub async fn delete(&self, kind: ResourceKind, id: &str) -> Result<MutationReceipt> {
        let receipt = self.inner.gateway.delete(kind, id).await?;
        self.inner.state().selection.remove(id);
        self.refresh_after_mutation().await;
        Ok(receipt)
    }

    pub async fn set_status(
        &self,
        kind: ResourceKind,
        id: &str,
        status: &str,
    ) -> Result<MutationReceipt> {
        let receipt = self.inner.gateway.set_status(kind, id, status).await?;
        self.refresh_after_mutation().await;
        Ok(receipt)
    }

    /// Flip a boolean column of a displayed row.
    pub async fn toggle_flag(
        &self,
        kind: ResourceKind,
        id: &str,
        flag: &str,
    ) -> Result<MutationReceipt> {
        resolve(kind)?.check_flag(flag)?;
        let current = {
            let state = self.inner.state();
            if state.query.view.resource() != Some(kind) {
                return Err(ConsoleError::validation(format!(
                    "{} records are not displayed",
                    kind
                )));
            }
            state
                .rows
                .find(id)
                .map(|row| row.get(flag).and_then(Value::as_bool).unwrap_or(false))
                .ok_or_else(|| {
                    ConsoleError::validation(format!("{} {} is not displayed", kind, id))
                })?
        };
        let receipt = self
            .inner
            .gateway
            .toggle_flag(kind, id, flag, current)
            .await?;
        self.refresh_after_mutation().await;
        Ok(receipt)
    }

    /// Stop all activity: pending responses are dropped and the realtime
    /// channel is closed. Later calls become no-ops.
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state();
            state.disposed = true;
            state.loading_visible = false;
        }
        self.inner.next_sequence();
        self.inner.bridge.unsubscribe();
        info!("[Sync] Controller shut down");
    }

    fn clear_selection(&self) {
        let mut state = self.inner.state();
        state.selection.clear();
        state.select_all = false;
    }

    /// Open the realtime channel in the background so reads never wait on it.
    fn start_subscription(&self, kind: ResourceKind) {
        let generation = self.inner.bridge.begin(kind);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let hook = refresh_hook(Arc::downgrade(&inner));
            if let Err(err) = inner.bridge.open(kind, generation, hook).await {
                debug!("[Sync] Continuing without realtime for {}: {}", kind, err);
            }
        });
    }

    fn ensure_subscription(&self, kind: ResourceKind) {
        if !self.inner.bridge.needs_subscription(kind) {
            return;
        }
        {
            let state = self.inner.state();
            if state.disposed || state.query.view.resource() != Some(kind) {
                return;
            }
        }
        info!("[Sync] Retrying realtime subscription for {}", kind);
        self.start_subscription(kind);
    }

    async fn refresh_after_mutation(&self) {
        if let Err(err) = self.refresh(RunMode::Visible).await {
            warn!("[Sync] Refresh after mutation failed: {}", err);
        }
    }

    async fn execute(&self, query: Query, mode: RunMode) -> Result<RunOutcome> {
        let ReadPlan::Fetch { read, count } = plan(&query)? else {
            let mut state = self.inner.state();
            if !state.disposed && state.query.view == query.view {
                state.query = query;
                state.phase = SyncPhase::Idle;
                state.loading_visible = false;
                self.inner.next_sequence();
            }
            return Ok(RunOutcome::Skipped);
        };

        let sequence = {
            let mut state = self.inner.state();
            if state.disposed || state.query.view != query.view {
                return Ok(RunOutcome::Superseded);
            }
            state.query = query;
            state.phase = SyncPhase::Loading;
            // A silent run never hides the spinner of a visible one in flight.
            if mode == RunMode::Visible {
                state.loading_visible = true;
            }
            self.inner.next_sequence()
        };
        debug!(
            "[Sync] Request #{} for {} ({:?})",
            sequence, read.collection, mode
        );

        let result = tokio::try_join!(
            self.inner.backend.read(&read),
            self.inner.backend.count(&count)
        );

        let mut state = self.inner.state();
        if state.disposed || !self.inner.is_latest(sequence) {
            debug!(
                "[Sync] Discarding stale response #{} for {}",
                sequence, read.collection
            );
            return Ok(RunOutcome::Superseded);
        }
        state.loading_visible = false;
        match result {
            Ok((rows, total_count)) => {
                let rows = RowSet { rows, total_count };
                let present: BTreeSet<RowId> = rows.ids().collect();
                if state.select_all {
                    state.selection = present;
                } else {
                    state.selection.retain(|id| present.contains(id));
                }
                state.rows = rows;
                state.phase = SyncPhase::Ready;
                state.last_error = None;
                Ok(RunOutcome::Applied { total_count })
            }
            Err(failure) => {
                let err = ConsoleError::from_backend(failure);
                warn!("[Sync] Request #{} failed: {}", sequence, err);
                state.phase = SyncPhase::Error;
                state.last_error = Some(err.clone());
                Err(err)
            }
        }
    }
}

fn refresh_hook(inner: Weak<ControllerInner>) -> RefreshHook {
    Arc::new(move || {
        let inner = inner.clone();
        Box::pin(async move {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let controller = SyncController { inner };
            if let Err(err) = controller.execute(controller.query(), RunMode::Silent).await {
                debug!("[Sync] Realtime refresh failed: {}", err);
            }
        })
    })
}
