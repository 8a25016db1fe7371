use async_trait::async_trait;

use super::event::Subscription;
use super::model::{Profile, Session};
use crate::error::AuthResult;

/// External identity provider: one-shot session lookup, push stream of changes, sign-out.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_session(&self) -> AuthResult<Option<Session>>;

    /// Open the change stream. Events queue until the subscription is drained or released.
    fn subscribe(&self) -> Subscription;

    async fn sign_out(&self) -> AuthResult<()>;
}

/// Source of truth for profile rows. `Err(AuthError::NotFound)` means the identity has no row yet.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn fetch_profile(&self, identity_id: &str) -> AuthResult<Profile>;
}
