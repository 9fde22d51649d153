//! Console runtime configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::Result;
use crate::query::PageSize;

/// Quiet window for coalescing push notifications.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Marker preceding `<bucket>/<path>` in public storage URLs.
pub const DEFAULT_STORAGE_MARKER: &str = "/storage/v1/object/public/";

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_page_size() -> u32 {
    PageSize::default().get()
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_storage_marker() -> String {
    DEFAULT_STORAGE_MARKER.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    /// Database schema realtime channels listen on.
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_storage_marker")]
    pub storage_marker: String,
    /// Stamped as `reviewed_by` on moderation decisions.
    #[serde(default)]
    pub reviewer_id: Option<String>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            default_page_size: default_page_size(),
            schema: default_schema(),
            storage_marker: default_storage_marker(),
            reviewer_id: None,
        }
    }
}

impl ConsoleConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn page_size(&self) -> Result<PageSize> {
        PageSize::try_from(self.default_page_size)
    }

    pub fn with_reviewer(mut self, reviewer_id: impl Into<String>) -> Self {
        self.reviewer_id = Some(reviewer_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: ConsoleConfig = serde_json::from_str(r#"{"reviewerId":"u-1"}"#).unwrap();
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert_eq!(config.page_size().unwrap().get(), 10);
        assert_eq!(config.schema, "public");
        assert_eq!(config.storage_marker, "/storage/v1/object/public/");
        assert_eq!(config.reviewer_id.as_deref(), Some("u-1"));
    }

    #[test]
    fn invalid_page_size_is_reported() {
        let config = ConsoleConfig {
            default_page_size: 15,
            ..ConsoleConfig::default()
        };
        assert!(config.page_size().is_err());
    }
}
