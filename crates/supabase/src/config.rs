//! Connection settings for a Supabase project.

use std::time::Duration;

use crate::error::{Result, SupabaseError};

pub const ENV_URL: &str = "SUPABASE_URL";
pub const ENV_ANON_KEY: &str = "SUPABASE_ANON_KEY";
pub const ENV_ACCESS_TOKEN: &str = "SUPABASE_ACCESS_TOKEN";

/// Default timeout for API requests.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Realtime servers drop sockets that stay silent for longer than this.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseConfig {
    /// Project URL without a trailing slash, e.g. `https://abc.supabase.co`.
    pub url: String,
    pub anon_key: String,
    /// Signed-in admin's JWT. Requests fall back to the anon key without it.
    pub access_token: Option<String>,
    pub timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl SupabaseConfig {
    pub fn new(url: &str, anon_key: &str) -> Result<Self> {
        let url = non_empty(Some(url.to_string()))
            .ok_or_else(|| SupabaseError::invalid_request("Supabase URL is required"))?;
        let anon_key = non_empty(Some(anon_key.to_string()))
            .ok_or_else(|| SupabaseError::invalid_request("Supabase anon key is required"))?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            anon_key,
            access_token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
        })
    }

    /// Read `SUPABASE_URL`, `SUPABASE_ANON_KEY` and the optional
    /// `SUPABASE_ACCESS_TOKEN`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = non_empty(lookup(ENV_URL))
            .ok_or_else(|| SupabaseError::invalid_request(format!("{} is not set", ENV_URL)))?;
        let anon_key = non_empty(lookup(ENV_ANON_KEY)).ok_or_else(|| {
            SupabaseError::invalid_request(format!("{} is not set", ENV_ANON_KEY))
        })?;
        let mut config = Self::new(&url, &anon_key)?;
        config.access_token = non_empty(lookup(ENV_ACCESS_TOKEN));
        Ok(config)
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = non_empty(Some(token.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Token sent as the bearer credential.
    pub fn bearer(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.anon_key)
    }

    /// Websocket endpoint of the realtime service.
    pub fn realtime_url(&self) -> String {
        let ws_base = if let Some(rest) = self.url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.url.clone()
        };
        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            ws_base,
            urlencoding::encode(&self.anon_key)
        )
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
