//! Backend-agnostic core of the bike-map admin console.
//!
//! The console manages seven kinds of records in a remote database. This
//! crate owns everything between the table UI and the backend: search and
//! paging query composition, the wire coordinate codec, per-kind form
//! normalization, the fetch lifecycle with realtime-driven refresh, and
//! validated mutations. The backend itself is reached through the traits in
//! [`backend`].

pub mod backend;
pub mod config;
pub mod errors;
pub mod geo;
pub mod query;
pub mod resources;
pub mod search;
pub mod storage;
pub mod sync;

#[cfg(test)]
mod testing;

pub use backend::{
    ChangeEvent, ChangeType, ChannelMessage, ChannelSpec, ChannelStatus, MutationOperation,
    MutationReceipt, MutationRequest, ObjectStorage, RealtimeChannel, RealtimeTransport,
    ResourceBackend,
};
pub use config::ConsoleConfig;
pub use errors::{BackendFailure, ConsoleError, Result};
pub use geo::GeoPoint;
pub use query::{
    CountRequest, FilterExpr, OrderExpr, PageSize, Query, RangeExpr, ReadPlan, ReadRequest,
    SortDirection, SortSpec,
};
pub use resources::{ActiveView, Record, RegistryEntry, ResourceForm, ResourceKind, RowId};
pub use sync::{RunMode, RunOutcome, SyncController, SyncPhase, ViewSnapshot};
