//! Read-only handle given to presentation code: identity, session, profile, derived
//! loading flag, and the `sign_out` action. It never writes reconciliation state.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

use crate::identity::{Identity, IdentityProvider, Profile, Session};
use crate::reconciler::ReconciliationState;

/// What consumers render from. Loading flags collapse into `is_loading`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthView {
    pub identity: Option<Identity>,
    #[serde(skip)]
    pub session: Option<Arc<Session>>,
    pub profile: Option<Profile>,
    pub is_loading: bool,
}

impl From<&ReconciliationState> for AuthView {
    fn from(s: &ReconciliationState) -> Self {
        Self {
            identity: s.identity.clone(),
            session: s.session.clone(),
            profile: s.profile.clone(),
            is_loading: s.is_loading(),
        }
    }
}

#[derive(Clone)]
pub struct AuthContext {
    state: watch::Receiver<ReconciliationState>,
    provider: Arc<dyn IdentityProvider>,
}

impl AuthContext {
    pub(crate) fn new(state: watch::Receiver<ReconciliationState>, provider: Arc<dyn IdentityProvider>) -> Self {
        Self { state, provider }
    }

    pub fn view(&self) -> AuthView { AuthView::from(&*self.state.borrow()) }

    pub fn state(&self) -> ReconciliationState { self.state.borrow().clone() }

    pub fn identity(&self) -> Option<Identity> { self.state.borrow().identity.clone() }

    pub fn session(&self) -> Option<Arc<Session>> { self.state.borrow().session.clone() }

    pub fn profile(&self) -> Option<Profile> { self.state.borrow().profile.clone() }

    pub fn is_loading(&self) -> bool { self.state.borrow().is_loading() }

    /// Ask the provider to end the session. Local state changes arrive only through the
    /// resulting `SIGNED_OUT` event.
    pub async fn sign_out(&self) {
        info!(target: "talkzii::auth", "sign-out requested");
        if let Err(e) = self.provider.sign_out().await {
            error!(target: "talkzii::auth", "error signing out: {}", e);
        }
    }

    /// Wait for the next published change. Returns false once the reconciler is gone.
    pub async fn changed(&mut self) -> bool { self.state.changed().await.is_ok() }

    /// Wait until `pred` holds for the current state; `None` if the reconciler is gone first.
    pub async fn wait_for<F>(&mut self, pred: F) -> Option<ReconciliationState>
    where
        F: FnMut(&ReconciliationState) -> bool,
    {
        self.state.wait_for(pred).await.ok().map(|s| s.clone())
    }

    /// Wait until nothing is loading.
    pub async fn settled(&mut self) -> Option<AuthView> {
        self.wait_for(|s| !s.is_loading()).await.map(|s| AuthView::from(&s))
    }

    pub fn watch(&self) -> watch::Receiver<ReconciliationState> { self.state.clone() }
}
