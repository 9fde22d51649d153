//! Supabase collaborator for the bike-map console core.
//!
//! [`SupabaseClient`] implements row access and file removal over the REST
//! APIs, [`SupabaseRealtime`] implements push notifications over the
//! realtime websocket.

pub mod client;
pub mod config;
pub mod error;
pub mod realtime;
pub mod types;

pub use client::SupabaseClient;
pub use config::SupabaseConfig;
pub use error::{Result, SupabaseError};
pub use realtime::SupabaseRealtime;

use bikemap_core::{ConsoleConfig, SyncController};
use std::sync::Arc;

/// Wire a console controller to a Supabase project.
pub fn connect(supabase: SupabaseConfig, console: ConsoleConfig) -> Result<SyncController> {
    let client = Arc::new(SupabaseClient::new(supabase.clone())?);
    let realtime = Arc::new(SupabaseRealtime::new(supabase));
    SyncController::new(client.clone(), realtime, client, console)
        .map_err(|e| SupabaseError::invalid_request(e.to_string()))
}
