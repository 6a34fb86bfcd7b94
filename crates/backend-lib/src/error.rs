// crates/backend-lib/src/error.rs

//! Central error type for the gateway.
use thiserror::Error;

/// Gateway error types with error codes and context
///
/// Authentication refusals are not represented here; see
/// [`talisman_common::AuthFailure`].
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credential store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Session IO error: {0}")]
    SessionIo(#[from] std::io::Error),

    #[error("Log stream error: {0}")]
    Stream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "CFG_001",
            GatewayError::StoreUnavailable(_) => "STORE_001",
            GatewayError::SessionIo(_) => "IO_001",
            GatewayError::Stream(_) => "STREAM_001",
            GatewayError::Internal(_) => "INT_001",
        }
    }

    /// Get a sanitized message suitable for sending to a peer
    pub fn sanitized_message(&self) -> String {
        match self {
            GatewayError::Config(_) => "Service misconfigured".to_string(),
            GatewayError::StoreUnavailable(_) => "Service unavailable".to_string(),
            GatewayError::SessionIo(_) => "Connection error".to_string(),
            GatewayError::Stream(_) => "Could not stream log file".to_string(),
            GatewayError::Internal(_) => "An internal server error occurred".to_string(),
        }
    }

    /// Whether this error must abort startup rather than end a single session.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(self, GatewayError::Config(_) | GatewayError::StoreUnavailable(_))
    }
}

impl From<figment::Error> for GatewayError {
    fn from(err: figment::Error) -> Self {
        GatewayError::Config(err.to_string())
    }
}

impl From<config::ConfigError> for GatewayError {
    fn from(err: config::ConfigError) -> Self {
        GatewayError::Config(err.to_string())
    }
}

impl From<rusqlite::Error> for GatewayError {
    fn from(err: rusqlite::Error) -> Self {
        GatewayError::StoreUnavailable(err.to_string())
    }
}

impl From<String> for GatewayError {
    fn from(msg: String) -> Self {
        GatewayError::Internal(msg)
    }
}

impl From<&str> for GatewayError {
    fn from(msg: &str) -> Self {
        GatewayError::Internal(msg.to_string())
    }
}
