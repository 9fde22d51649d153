//! Error taxonomy shared by every console operation.

use thiserror::Error;

/// Result type alias for console operations.
pub type Result<T> = std::result::Result<T, ConsoleError>;

/// PostgreSQL SQLSTATE for `insufficient_privilege`, raised by row-level security.
pub const INSUFFICIENT_PRIVILEGE: &str = "42501";

/// User-facing message for authorization rejections.
pub const ADMIN_ROLE_REQUIRED: &str = "admin role required";

/// Errors surfaced by the console core.
///
/// `Validation` and `Config` are raised locally before any request is sent.
/// The remaining variants originate from the backend and are shown as
/// transient notifications while the last good rows stay on screen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsoleError {
    /// Bad coordinates or field values
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown resource kind or malformed registry wiring
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authorization rejection from the backend
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Any other backend failure, message kept verbatim
    #[error("Operation failed: {0}")]
    Operation(String),

    /// Transport failure or timeout
    #[error("Network error: {0}")]
    Network(String),
}

impl ConsoleError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Classify a backend failure into the console taxonomy.
    pub fn from_backend(failure: BackendFailure) -> Self {
        match failure {
            BackendFailure::Rejected {
                status,
                code,
                message,
            } => {
                let code_denied = code.as_deref() == Some(INSUFFICIENT_PRIVILEGE);
                let status_denied = matches!(status, Some(401) | Some(403));
                if code_denied || status_denied || message.contains("policy") {
                    Self::Permission(ADMIN_ROLE_REQUIRED.to_string())
                } else {
                    Self::Operation(message)
                }
            }
            BackendFailure::Transport(message) => Self::Network(message),
        }
    }

    /// True for errors resolved locally, before anything reaches the network.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Config(_))
    }
}

/// Failure reported by a backend collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendFailure {
    /// The backend answered and refused the request.
    Rejected {
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },
    /// The request never got a usable answer.
    Transport(String),
}

impl BackendFailure {
    pub fn rejected(status: Option<u16>, code: Option<&str>, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

impl From<BackendFailure> for ConsoleError {
    fn from(failure: BackendFailure) -> Self {
        Self::from_backend(failure)
    }
}
