// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for metric keys
pub const CONNECTION_ACCEPTED: &str = "gateway.connection.accepted";
pub const CONNECTION_ACTIVE: &str = "gateway.connection.active";
pub const AUTH_SUCCESS: &str = "gateway.auth.success";
pub const AUTH_FAILURE: &str = "gateway.auth.failure";
pub const AUTH_LEGACY_DIGEST: &str = "gateway.auth.legacy_digest";
pub const STREAM_ACTIVE: &str = "gateway.stream.active";
pub const STREAM_LINES: &str = "gateway.stream.lines";
