// ============================
// backend-lib/src/auth/digest.rs
// ============================
//! Password digest computation and verification.
use sha2::{Digest, Sha256};

/// Order in which password and salt are concatenated before hashing
///
/// Credential stores have been provisioned with both orders over the years,
/// so verification accepts either. Keep both variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestOrder {
    /// `password || salt`, the current layout
    PasswordSalt,
    /// `salt || password`, found in older stores
    SaltPassword,
}

impl DigestOrder {
    pub const ALL: [DigestOrder; 2] = [DigestOrder::PasswordSalt, DigestOrder::SaltPassword];

    pub fn is_legacy(self) -> bool {
        self == DigestOrder::SaltPassword
    }
}

/// SHA-256 of `password || salt` as uppercase hex
pub fn digest(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode_upper(hasher.finalize())
}

/// Digest of the password and salt in the given order
pub fn digest_with_order(password: &str, salt: &str, order: DigestOrder) -> String {
    match order {
        DigestOrder::PasswordSalt => digest(password, salt),
        DigestOrder::SaltPassword => digest(salt, password),
    }
}

/// Which ordering, if any, reproduces `stored`.
///
/// Both orderings are always computed and compared over the full digest.
pub fn matched_order(password: &str, salt: &str, stored: &str) -> Option<DigestOrder> {
    let mut matched = None;
    for order in DigestOrder::ALL {
        let candidate = digest_with_order(password, salt, order);
        if constant_time_eq(candidate.as_bytes(), stored.as_bytes()) && matched.is_none() {
            matched = Some(order);
        }
    }
    matched
}

/// Verify a password against a stored digest
pub fn verify(password: &str, salt: &str, stored: &str) -> bool {
    matched_order(password, salt, stored).is_some()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
