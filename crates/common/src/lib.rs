// ================
// common/src/lib.rs
// ================
//! Common types and structures
//! used for communication between a gateway client and the `Talisman` log gateway.
//! This module defines the line-oriented wire protocol and supporting types.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Security level type attached to accounts
pub type Seclevel = i64;

/// Session identifier used for bookkeeping
pub type SessionId = Uuid;

/// Prompt sent when a connection is accepted
pub const USERNAME_PROMPT: &str = "Username: \n";

/// Prompt sent after the username line has been read
pub const PASSWORD_PROMPT: &str = "Password: \n";

/// Line sent once the gate admits the peer
pub const AUTH_SUCCESS: &str = "Authentication successful!\n";

/// Prefix of the single failure line
pub const AUTH_FAILED_PREFIX: &str = "Authentication failed: ";

/// Reason text used when failure categories are not disclosed
pub const GENERIC_DENIAL: &str = "invalid credentials or insufficient seclevel";

/// Line sent when the log file cannot be streamed
pub const STREAM_UNAVAILABLE: &str = "Error: Could not stream log file\n";

/// Lines sent from server to client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerLine {
    /// Ask for the username
    UsernamePrompt,
    /// Ask for the password
    PasswordPrompt,
    /// Authentication accepted
    AuthSucceeded,
    /// Authentication refused, with the client-facing reason text
    AuthFailed { reason: String },
    /// The log file could not be opened for streaming
    StreamUnavailable,
    /// One forwarded log line, without its terminator
    LogLine(String),
}

impl ServerLine {
    /// Render the line exactly as it goes over the wire, terminator included.
    pub fn to_wire(&self) -> String {
        match self {
            ServerLine::UsernamePrompt => USERNAME_PROMPT.to_string(),
            ServerLine::PasswordPrompt => PASSWORD_PROMPT.to_string(),
            ServerLine::AuthSucceeded => AUTH_SUCCESS.to_string(),
            ServerLine::AuthFailed { reason } => format!("{AUTH_FAILED_PREFIX}{reason}\n"),
            ServerLine::StreamUnavailable => STREAM_UNAVAILABLE.to_string(),
            ServerLine::LogLine(text) => format!("{text}\n"),
        }
    }
}

/// Why an authentication attempt was refused
///
/// These are ordinary outcomes of the gate, not errors. Reason text never
/// carries digest or salt material.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AuthFailure {
    /// No account matches the username
    UserNotFound,
    /// Neither digest ordering matched the stored value
    InvalidPassword,
    /// The account has no usable `seclevel` attribute
    SeclevelUnavailable,
    /// The account's level is below the configured minimum
    InsufficientPrivilege { seclevel: Seclevel, required: Seclevel },
    /// The credential store could not answer
    StoreUnavailable,
}

impl AuthFailure {
    /// Short category text, safe to show to a peer.
    pub fn category(&self) -> &'static str {
        match self {
            AuthFailure::UserNotFound => "user not found",
            AuthFailure::InvalidPassword => "invalid password",
            AuthFailure::SeclevelUnavailable => "seclevel unavailable",
            AuthFailure::InsufficientPrivilege { .. } => "insufficient seclevel",
            AuthFailure::StoreUnavailable => "service unavailable",
        }
    }

    /// Stable label for metrics and structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            AuthFailure::UserNotFound => "user_not_found",
            AuthFailure::InvalidPassword => "invalid_password",
            AuthFailure::SeclevelUnavailable => "seclevel_unavailable",
            AuthFailure::InsufficientPrivilege { .. } => "insufficient_privilege",
            AuthFailure::StoreUnavailable => "store_unavailable",
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFailure::InsufficientPrivilege { seclevel, required } => {
                write!(f, "insufficient seclevel: {seclevel}, required: {required}")
            }
            other => f.write_str(other.category()),
        }
    }
}

/// An authenticated account
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable account identifier, rendered as text
    pub account_id: String,
    /// Username as stored in the credential store
    pub username: String,
}

/// Who is connected from where
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    /// Authenticated username
    pub user: String,
    /// Peer address of the connection
    pub location: String,
}
