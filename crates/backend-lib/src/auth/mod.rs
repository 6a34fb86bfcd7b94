// ============================
// backend-lib/src/auth/mod.rs
// ============================
//! Authentication module.

pub mod digest;
mod service;
mod service_impl;

pub use digest::{verify as verify_password, DigestOrder};
pub use service::AuthService;
pub use service_impl::{authenticate, DefaultAuth, SECLEVEL_ATTRIBUTE};
