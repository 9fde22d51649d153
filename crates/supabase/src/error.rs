//! Error types for the Supabase collaborator.

use bikemap_core::BackendFailure;
use thiserror::Error;

/// Result type alias for Supabase operations.
pub type Result<T> = std::result::Result<T, SupabaseError>;

/// Errors that can occur while talking to Supabase.
#[derive(Debug, Error)]
pub enum SupabaseError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error response from PostgREST or the storage API
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Invalid request (missing required data, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication error (missing or invalid key)
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Realtime socket failure
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

impl SupabaseError {
    /// Create an API error from status, optional SQLSTATE-style code and message
    pub fn api(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            code,
            message: message.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create an auth error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn websocket(message: impl Into<String>) -> Self {
        Self::WebSocket(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Convert into the failure shape the console core classifies.
    ///
    /// Anything the server answered is a rejection; everything else means no
    /// usable answer arrived.
    pub fn into_failure(self) -> BackendFailure {
        match self {
            Self::Api {
                status,
                code,
                message,
            } => BackendFailure::Rejected {
                status: Some(status),
                code,
                message,
            },
            Self::Auth(message) => BackendFailure::rejected(Some(401), None, message),
            Self::InvalidRequest(message) => BackendFailure::rejected(None, None, message),
            Self::Http(err) => BackendFailure::transport(err.to_string()),
            Self::Json(err) => BackendFailure::transport(format!("Malformed response: {}", err)),
            Self::WebSocket(message) => BackendFailure::transport(message),
        }
    }
}

impl From<SupabaseError> for BackendFailure {
    fn from(err: SupabaseError) -> Self {
        err.into_failure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bikemap_core::ConsoleError;

    #[test]
    fn rls_rejection_becomes_permission_error() {
        let err = SupabaseError::api(
            403,
            Some("42501".to_string()),
            "new row violates row-level security policy for table \"feedback\"",
        );
        assert_eq!(err.status_code(), Some(403));
        let console = ConsoleError::from(err.into_failure());
        assert!(matches!(console, ConsoleError::Permission(_)));
    }

    #[test]
    fn constraint_violation_keeps_message() {
        let err = SupabaseError::api(
            409,
            Some("23505".to_string()),
            "duplicate key value violates unique constraint \"profiles_username_key\"",
        );
        let console = ConsoleError::from(BackendFailure::from(err));
        assert_eq!(
            console,
            ConsoleError::Operation(
                "duplicate key value violates unique constraint \"profiles_username_key\""
                    .to_string()
            )
        );
    }

    #[test]
    fn socket_failure_is_transport() {
        let failure = SupabaseError::websocket("connection refused").into_failure();
        assert_eq!(failure, BackendFailure::transport("connection refused"));
    }
}
