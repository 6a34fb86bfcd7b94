use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use talisman_common::{AuthFailure, Identity, Seclevel};
use tracing::{debug, warn};

use super::digest;
use crate::auth::AuthService;
use crate::metrics::{AUTH_FAILURE, AUTH_LEGACY_DIGEST, AUTH_SUCCESS};
use crate::storage::{CredentialStore, StoreError};

/// Attribute holding the account's security level
pub const SECLEVEL_ATTRIBUTE: &str = "seclevel";

/// Authenticate `username`/`password` and require `min_seclevel`.
///
/// Existence is checked before the password, and the password before the
/// security level. Usernames are enumerable through the distinct
/// `UserNotFound` outcome; callers decide how much of it reaches the peer.
pub async fn authenticate(
    store: &dyn CredentialStore,
    username: &str,
    password: &str,
    min_seclevel: Seclevel,
) -> Result<Identity, AuthFailure> {
    let username = username.trim().to_lowercase();

    let account = match store.find_account_by_username(&username).await {
        Ok(account) => account,
        Err(StoreError::NotFound) => return Err(AuthFailure::UserNotFound),
        Err(StoreError::Unavailable(detail)) => {
            warn!(%username, %detail, "account lookup failed");
            return Err(AuthFailure::StoreUnavailable);
        }
    };

    match digest::matched_order(password, &account.salt, &account.password_digest) {
        Some(order) if order.is_legacy() => {
            debug!(account_id = %account.id, "password matched legacy salt-first digest");
            counter!(AUTH_LEGACY_DIGEST).increment(1);
        }
        Some(_) => {}
        None => return Err(AuthFailure::InvalidPassword),
    }

    let seclevel = match store.get_attribute(&account.id, SECLEVEL_ATTRIBUTE).await {
        Ok(value) => value.trim().parse::<Seclevel>().map_err(|_| {
            warn!(account_id = %account.id, %value, "seclevel is not an integer");
            AuthFailure::SeclevelUnavailable
        })?,
        Err(StoreError::NotFound) => return Err(AuthFailure::SeclevelUnavailable),
        Err(StoreError::Unavailable(detail)) => {
            warn!(account_id = %account.id, %detail, "seclevel lookup failed");
            return Err(AuthFailure::SeclevelUnavailable);
        }
    };

    if seclevel < min_seclevel {
        return Err(AuthFailure::InsufficientPrivilege {
            seclevel,
            required: min_seclevel,
        });
    }

    Ok(Identity {
        account_id: account.id.to_string(),
        username: account.username,
    })
}

/// Default `AuthService` bound to one credential store
pub struct DefaultAuth {
    store: Arc<dyn CredentialStore>,
    min_seclevel: Seclevel,
}

impl DefaultAuth {
    pub fn new(store: Arc<dyn CredentialStore>, min_seclevel: Seclevel) -> Self {
        Self { store, min_seclevel }
    }
}

#[async_trait]
impl AuthService for DefaultAuth {
    fn min_seclevel(&self) -> Seclevel {
        self.min_seclevel
    }

    async fn authenticate(&self, username: &str, password: &str) -> Result<Identity, AuthFailure> {
        let outcome = authenticate(self.store.as_ref(), username, password, self.min_seclevel).await;
        match &outcome {
            Ok(_) => counter!(AUTH_SUCCESS).increment(1),
            Err(failure) => counter!(AUTH_FAILURE, "reason" => failure.code()).increment(1),
        }
        outcome
    }
}
