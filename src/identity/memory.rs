//! In-process identity provider and profile store. Used by the demo binary and tests;
//! both behave like the hosted services (push stream, sign-out event, missing rows).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::debug;

use super::event::{ChangeEvent, Subscription};
use super::model::{Identity, Profile, Session};
use super::provider::{IdentityProvider, ProfileStore};
use crate::error::{AuthError, AuthResult};

#[derive(Default)]
struct ProviderState {
    current: Option<Session>,
    subscribers: HashMap<u64, mpsc::UnboundedSender<ChangeEvent>>,
    next_subscriber: u64,
    fail_next_session: Option<AuthError>,
    fail_sign_out: Option<AuthError>,
    sign_out_calls: usize,
}

#[derive(Clone, Default)]
pub struct MemoryIdentityProvider {
    state: Arc<Mutex<ProviderState>>,
}

fn issue_token() -> String { uuid::Uuid::new_v4().simple().to_string() }

impl MemoryIdentityProvider {
    pub fn new() -> Self { Self::default() }

    /// Start with an existing session, as if restored from persisted storage.
    pub fn with_session(identity: Identity) -> Self {
        let p = Self::default();
        p.state.lock().current = Some(Self::new_session(identity));
        p
    }

    fn new_session(identity: Identity) -> Session {
        let mut s = Session::new(identity, issue_token());
        s.refresh_token = Some(issue_token());
        s.expires_at = Some(chrono::Utc::now() + chrono::Duration::hours(1));
        s
    }

    /// Push an event to every live subscriber without touching the stored session.
    pub fn emit(&self, event: ChangeEvent) {
        let mut st = self.state.lock();
        st.subscribers.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    pub fn sign_in(&self, identity: Identity) -> Session {
        let session = Self::new_session(identity);
        self.state.lock().current = Some(session.clone());
        debug!(target: "talkzii::auth", "provider.sign_in user={}", session.user.id);
        self.emit(ChangeEvent::signed_in(session.clone()));
        session
    }

    /// Rotate the access token of the current session. No-op when signed out.
    pub fn refresh_token(&self) -> Option<Session> {
        let session = {
            let mut st = self.state.lock();
            let cur = st.current.as_mut()?;
            cur.access_token = issue_token();
            cur.expires_at = Some(chrono::Utc::now() + chrono::Duration::hours(1));
            cur.clone()
        };
        self.emit(ChangeEvent::token_refreshed(session.clone()));
        Some(session)
    }

    /// Replace the current identity's attributes (e.g. a verified email change).
    pub fn update_user(&self, primary_email: Option<String>) -> Option<Session> {
        let session = {
            let mut st = self.state.lock();
            let cur = st.current.as_mut()?;
            cur.user = Identity { primary_email, ..cur.user.clone() };
            cur.clone()
        };
        self.emit(ChangeEvent::user_updated(session.clone()));
        Some(session)
    }

    pub fn fail_next_session_with(&self, err: AuthError) { self.state.lock().fail_next_session = Some(err); }

    pub fn fail_sign_out_with(&self, err: AuthError) { self.state.lock().fail_sign_out = Some(err); }

    pub fn current(&self) -> Option<Session> { self.state.lock().current.clone() }

    pub fn subscriber_count(&self) -> usize { self.state.lock().subscribers.len() }

    pub fn sign_out_calls(&self) -> usize { self.state.lock().sign_out_calls }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn current_session(&self) -> AuthResult<Option<Session>> {
        let mut st = self.state.lock();
        if let Some(err) = st.fail_next_session.take() {
            return Err(err);
        }
        Ok(st.current.clone())
    }

    fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut st = self.state.lock();
            let id = st.next_subscriber;
            st.next_subscriber += 1;
            st.subscribers.insert(id, tx);
            id
        };
        let state = self.state.clone();
        Subscription::new(rx, move || {
            state.lock().subscribers.remove(&id);
        })
    }

    async fn sign_out(&self) -> AuthResult<()> {
        {
            let mut st = self.state.lock();
            st.sign_out_calls += 1;
            if let Some(err) = st.fail_sign_out.take() {
                return Err(err);
            }
            st.current = None;
        }
        self.emit(ChangeEvent::signed_out());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryProfileStore {
    rows: RwLock<HashMap<String, Profile>>,
    failure: Mutex<Option<AuthError>>,
    fetches: Mutex<HashMap<String, usize>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self { Self::default() }

    pub fn upsert(&self, profile: Profile) { self.rows.write().insert(profile.id.clone(), profile); }

    pub fn remove(&self, identity_id: &str) { self.rows.write().remove(identity_id); }

    /// Every fetch fails with `err` until `clear_failure` is called.
    pub fn fail_with(&self, err: AuthError) { *self.failure.lock() = Some(err); }

    pub fn clear_failure(&self) { *self.failure.lock() = None; }

    pub fn fetch_count(&self, identity_id: &str) -> usize {
        self.fetches.lock().get(identity_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn fetch_profile(&self, identity_id: &str) -> AuthResult<Profile> {
        *self.fetches.lock().entry(identity_id.to_string()).or_insert(0) += 1;
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }
        self.rows
            .read()
            .get(identity_id)
            .cloned()
            .ok_or_else(|| AuthError::from_store_code(crate::error::NO_ROWS_CODE, "no profile row"))
    }
}
