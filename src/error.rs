//! # Error Handling
//!
//! Defines the crate-wide error type and its conversions. The taxonomy follows
//! how failures are actually handled, not where they occur:
//!
//! - **Transport-recoverable** closes are retried inside the transport with
//!   bounded backoff and never appear here; only exhaustion surfaces, once,
//!   as [`AppError::ConnectionExhausted`].
//! - **Segment-recoverable** problems (empty/corrupt audio) are resolved by
//!   the playback queue with a resynthesis request and never become errors.
//! - **Permission-fatal** ([`AppError::PermissionDenied`]) and
//!   **server-fatal** ([`AppError::Server`]) conditions escalate straight to
//!   the session controller, which turns them into a user-visible state.
//! - **Best-effort** failures (session-end notification) are logged by the
//!   caller and never propagate.

use std::fmt;

/// Error type shared across the client.
///
/// ## Error Categories:
/// - **Config**: configuration file or environment variable problems
/// - **Http**: REST collaborator failures (session create)
/// - **Transport**: duplex-channel failures the transport could not absorb
/// - **ConnectionExhausted**: reconnect attempts used up, connection is gone
/// - **Server**: explicit error control message or server-error close code
/// - **PermissionDenied**: microphone access refused by the host
/// - **Capture** / **Playback**: audio device and decode failures
/// - **Session**: lifecycle misuse (e.g. recording before connecting)
#[derive(Debug)]
pub enum AppError {
    /// Configuration file or environment variable problems
    Config(String),

    /// REST call to the backend failed
    Http(String),

    /// Duplex channel failure that could not be handled internally
    Transport(String),

    /// Reconnect attempts exhausted; the channel will not retry further
    ConnectionExhausted { attempts: u32 },

    /// The backend declared the session dead (error message or close 1011)
    Server(String),

    /// Microphone access was denied by the host environment
    PermissionDenied(String),

    /// Capture device failure
    Capture(String),

    /// Audio decode or output failure
    Playback(String),

    /// Session lifecycle misuse
    Session(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Http(msg) => write!(f, "HTTP error: {}", msg),
            AppError::Transport(msg) => write!(f, "Transport error: {}", msg),
            AppError::ConnectionExhausted { attempts } => {
                write!(f, "Connection lost after {} reconnect attempts", attempts)
            }
            AppError::Server(msg) => write!(f, "Server error: {}", msg),
            AppError::PermissionDenied(msg) => write!(f, "Microphone permission denied: {}", msg),
            AppError::Capture(msg) => write!(f, "Capture error: {}", msg),
            AppError::Playback(msg) => write!(f, "Playback error: {}", msg),
            AppError::Session(msg) => write!(f, "Session error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Whether this error ends the session for good.
    ///
    /// Fatal errors are reported to the user once and the session must be
    /// restarted; everything else is either retried or logged upstream.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::ConnectionExhausted { .. }
                | AppError::Server(_)
                | AppError::PermissionDenied(_)
        )
    }

    /// Machine-readable error code for logging and UI mapping.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::Http(_) => "http_error",
            AppError::Transport(_) => "transport_error",
            AppError::ConnectionExhausted { .. } => "connection_exhausted",
            AppError::Server(_) => "server_error",
            AppError::PermissionDenied(_) => "permission_denied",
            AppError::Capture(_) => "capture_error",
            AppError::Playback(_) => "playback_error",
            AppError::Session(_) => "session_error",
        }
    }
}

/// Errors produced by generic fallible code become session-level errors.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Session(err.to_string())
    }
}

/// Malformed JSON in a control message is a transport-level problem:
/// the bytes arrived but could not be framed.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Transport(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Http(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        AppError::Transport(err.to_string())
    }
}

/// Shorthand for Results using the crate error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(AppError::ConnectionExhausted { attempts: 5 }.is_fatal());
        assert!(AppError::Server("boom".to_string()).is_fatal());
        assert!(AppError::PermissionDenied("denied".to_string()).is_fatal());
        assert!(!AppError::Transport("blip".to_string()).is_fatal());
        assert!(!AppError::Http("timeout".to_string()).is_fatal());
    }

    #[test]
    fn test_display_includes_context() {
        let err = AppError::ConnectionExhausted { attempts: 5 };
        assert!(err.to_string().contains("5 reconnect attempts"));
        assert_eq!(err.code(), "connection_exhausted");
    }
}
