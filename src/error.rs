//! Error types for mudproxy
//!
//! This module defines all error types used throughout the proxy core,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for mudproxy session-core operations.
///
/// One variant per recoverable error kind from the error-handling design:
/// malformed client frames, auth failures, MUD connect/stream errors, and
/// the handful of validation failures the HTTP control plane surfaces.
/// None of these ever imply the owning session should be destroyed; callers
/// decide that separately per the "never destroy a session on a recoverable
/// error" rule.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// The first WebSocket frame was not `auth`, or the token was not
    /// exactly 64 hex characters.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A client frame could not be decoded as JSON or was missing a
    /// required field. Dropped, not fatal, unless it was the auth frame.
    #[error("malformed client frame: {0}")]
    MalformedFrame(String),

    /// `set_server` named a host/port outside the whitelist.
    #[error("server not whitelisted: {host}:{port}")]
    NotWhitelisted {
        /// Requested host
        host: String,
        /// Requested port
        port: u16,
    },

    /// Connecting to the upstream MUD failed.
    #[error("MUD connect failed: {0}")]
    MudConnect(String),

    /// The upstream MUD socket errored mid-stream.
    #[error("MUD socket error: {0}")]
    MudSocket(String),

    /// A trigger or alias pattern failed to compile.
    #[error("pattern compile error: {0}")]
    PatternCompile(#[from] regex::Error),

    /// The admin-key header was absent or did not match configuration.
    #[error("unauthorized admin request")]
    Unauthorized,

    /// No admin key is configured; admin endpoints cannot be served.
    #[error("admin key not configured")]
    AdminKeyMissing,

    /// A Discord webhook URL failed origin validation.
    #[error("invalid discord webhook url: {0}")]
    InvalidDiscordWebhook(String),

    /// Sending a Discord webhook failed (logged, never surfaced to a session).
    #[error("discord send failed: {0}")]
    DiscordSend(#[from] reqwest::Error),

    /// Configuration could not be parsed or failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO errors (socket reads/writes, file access).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML config parsing errors.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Internal invariant violation; should never surface to a client.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for mudproxy library operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_display() {
        let error = ProxyError::Auth("token length mismatch".to_string());
        assert_eq!(error.to_string(), "authentication failed: token length mismatch");
    }

    #[test]
    fn test_not_whitelisted_display() {
        let error = ProxyError::NotWhitelisted {
            host: "evil.example".to_string(),
            port: 23,
        };
        assert_eq!(
            error.to_string(),
            "server not whitelisted: evil.example:23"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: ProxyError = io_error.into();
        assert!(matches!(error, ProxyError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_str = "{invalid json}";
        let json_error = serde_json::from_str::<serde_json::Value>(json_str).unwrap_err();
        let error: ProxyError = json_error.into();
        assert!(matches!(error, ProxyError::Serialization(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProxyError>();
    }

    #[test]
    fn test_admin_key_missing_display() {
        let error = ProxyError::AdminKeyMissing;
        assert_eq!(error.to_string(), "admin key not configured");
    }
}
