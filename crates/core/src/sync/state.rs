//! View state published to table consumers.

use serde::{Deserialize, Serialize};

use crate::query::SortDirection;
use crate::resources::{ActiveView, Record, RowId};

/// Fetch lifecycle of the active view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Loading,
    Ready,
    Error,
}

/// One page of rows plus the total number of matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowSet {
    pub rows: Vec<Record>,
    pub total_count: u64,
}

impl RowSet {
    pub fn ids(&self) -> impl Iterator<Item = RowId> + '_ {
        self.rows.iter().filter_map(row_id)
    }

    pub fn find(&self, id: &str) -> Option<&Record> {
        self.rows
            .iter()
            .find(|row| row_id(row).as_deref() == Some(id))
    }
}

/// Primary key of a row; numeric ids are rendered as strings.
pub fn row_id(record: &Record) -> Option<RowId> {
    match record.get("id")? {
        serde_json::Value::String(id) => Some(id.clone()),
        serde_json::Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// How a run shows up in the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// User-initiated: the loading indicator is shown.
    Visible,
    /// Push-triggered: data updates without a spinner.
    Silent,
}

/// What happened to a run's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The response became the displayed RowSet.
    Applied { total_count: u64 },
    /// A newer request was issued first; the response was dropped.
    Superseded,
    /// The view has no backing collection.
    Skipped,
}

/// Everything a table needs to render the active view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSnapshot {
    pub view: ActiveView,
    pub rows: Vec<Record>,
    pub total_count: u64,
    pub total_pages: u64,
    pub page: u32,
    pub page_size: u32,
    pub search_term: String,
    pub sort_key: String,
    pub sort_direction: SortDirection,
    pub phase: SyncPhase,
    pub is_loading: bool,
    pub is_realtime_connected: bool,
    pub selection: Vec<RowId>,
    pub select_all: bool,
    pub error: Option<String>,
}

pub(crate) fn total_pages(total_count: u64, page_size: u32) -> u64 {
    total_count.div_ceil(u64::from(page_size.max(1)))
}
