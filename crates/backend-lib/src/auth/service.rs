use async_trait::async_trait;
use talisman_common::{AuthFailure, Identity, Seclevel};

/// Checks credentials against the configured minimum security level
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Minimum security level this service admits
    fn min_seclevel(&self) -> Seclevel;

    /// Run one independent authentication check
    async fn authenticate(&self, username: &str, password: &str) -> Result<Identity, AuthFailure>;
}
