use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::model::{Identity, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    SignedIn,
    SignedOut,
    UserUpdated,
    TokenRefreshed,
    InitialSession,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::SignedIn => "SIGNED_IN",
            ChangeKind::SignedOut => "SIGNED_OUT",
            ChangeKind::UserUpdated => "USER_UPDATED",
            ChangeKind::TokenRefreshed => "TOKEN_REFRESHED",
            ChangeKind::InitialSession => "INITIAL_SESSION",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Identity-change notification pushed by the provider, carrying the new session (if any).
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub session: Option<Arc<Session>>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, session: Option<Session>) -> Self {
        Self { kind, session: session.map(Arc::new) }
    }

    pub fn signed_in(session: Session) -> Self { Self::new(ChangeKind::SignedIn, Some(session)) }
    pub fn signed_out() -> Self { Self::new(ChangeKind::SignedOut, None) }
    pub fn user_updated(session: Session) -> Self { Self::new(ChangeKind::UserUpdated, Some(session)) }
    pub fn token_refreshed(session: Session) -> Self { Self::new(ChangeKind::TokenRefreshed, Some(session)) }
    pub fn initial_session(session: Option<Session>) -> Self { Self::new(ChangeKind::InitialSession, session) }

    pub fn identity(&self) -> Option<&Identity> { self.session.as_deref().map(Session::identity) }
}

/// Receiving end of a provider's change stream.
///
/// The release hook runs exactly once: on `unsubscribe()` or, failing that, on drop.
pub struct Subscription {
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new<F>(events: mpsc::UnboundedReceiver<ChangeEvent>, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self { events, release: Some(Box::new(release)) }
    }

    pub async fn recv(&mut self) -> Option<ChangeEvent> { self.events.recv().await }

    pub fn unsubscribe(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if let Some(release) = self.release.take() {
            self.events.close();
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) { self.release_once(); }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("released", &self.release.is_none()).finish()
    }
}
