//!
//! Session reconciler
//! ------------------
//! Keeps one observable notion of "who is signed in and what is their profile" consistent
//! across the bootstrap lookup, the provider's change stream, and independently fetched
//! profile rows.
//!
//! Responsibilities:
//! - Bootstrap once from `IdentityProvider::current_session`.
//! - Drain the provider's change stream in arrival order from a single task.
//! - Re-fetch profiles on identity change, `USER_UPDATED`, or a missing/mismatched profile,
//!   discarding fetch results that resolve after the identity has moved on.
//! - Clear per-identity local data on sign-out.
//! - Publish every settled state through a `watch` (latest) and a `broadcast` (every transition).

mod bootstrap;
mod events;
mod state;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub use events::{classify, Classification};
pub use state::{Phase, ReconciliationState};

use crate::config::ReconcilerConfig;
use crate::context::AuthContext;
use crate::identity::{ChangeEvent, IdentityProvider, LocalUserCache, ProfileStore, Subscription};
use events::Followup;
use state::{Ledger, ProfileTicket};

pub(crate) struct Inner {
    ledger: Mutex<Ledger>,
    snapshots: watch::Sender<ReconciliationState>,
    transitions: broadcast::Sender<ReconciliationState>,
    provider: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileStore>,
    cache: Arc<dyn LocalUserCache>,
}

impl Inner {
    /// Publish while the ledger lock is held so observers see transitions in order.
    fn publish(&self, ledger: &Ledger) {
        debug_assert!(ledger.state.profile_matches_identity());
        let snapshot = ledger.state.clone();
        // no receivers is fine: nobody is observing transitions yet
        let _ = self.transitions.send(snapshot.clone());
        self.snapshots.send_replace(snapshot);
    }

    fn handle_event(self: &Arc<Self>, event: ChangeEvent) {
        info!(target: "talkzii::auth", "auth event: {}", event.kind);
        let followup = {
            let mut ledger = self.ledger.lock();
            let followup = events::apply_event(&mut ledger, self.cache.as_ref(), &event);
            self.publish(&ledger);
            followup
        };
        if let Followup::Fetch { ticket, auth_epoch } = followup {
            tokio::spawn(self.clone().refresh_profile(ticket, auth_epoch));
        }
    }

    async fn refresh_profile(self: Arc<Self>, ticket: ProfileTicket, auth_epoch: Option<u64>) {
        let fetch = AssertUnwindSafe(self.profiles.fetch_profile(&ticket.identity_id));
        let profile = match fetch.catch_unwind().await {
            Ok(Ok(p)) => Some(p),
            Ok(Err(e)) => {
                bootstrap::log_profile_error("profile fetch on auth change", &ticket.identity_id, &e);
                None
            }
            Err(_) => {
                error!(target: "talkzii::auth", "profile fetch panicked for identity={}", ticket.identity_id);
                None
            }
        };

        let mut ledger = self.ledger.lock();
        if !ledger.complete_fetch(&ticket, profile) {
            debug!(
                target: "talkzii::auth",
                "discarding stale profile result identity={} epoch={} current={:?}",
                ticket.identity_id,
                ticket.epoch,
                ledger.state.identity_id()
            );
        }
        if let Some(epoch) = auth_epoch {
            ledger.release_auth(epoch);
        }
        ledger.settle_phase();
        self.publish(&ledger);
    }
}

async fn drain_events(inner: Arc<Inner>, mut subscription: Subscription, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            event = subscription.recv() => match event {
                Some(event) => inner.handle_event(event),
                None => {
                    debug!(target: "talkzii::auth", "change stream closed by provider");
                    break;
                }
            }
        }
    }
    subscription.unsubscribe();
    debug!(target: "talkzii::auth", "change stream subscription released");
}

/// Owner of the reconciliation state. Dropping it (or calling `shutdown`) releases the
/// provider subscription; fetches already in flight finish but cannot resurrect stale state.
pub struct Reconciler {
    inner: Arc<Inner>,
    shutdown_tx: watch::Sender<bool>,
    drain: Option<JoinHandle<()>>,
    bootstrap: Option<JoinHandle<()>>,
}

impl Reconciler {
    /// Subscribe to the provider and kick off bootstrap. Must be called inside a tokio runtime.
    pub fn start(
        provider: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileStore>,
        cache: Arc<dyn LocalUserCache>,
        config: &ReconcilerConfig,
    ) -> Self {
        let initial = ReconciliationState::bootstrapping();
        let (snapshots, _) = watch::channel(initial);
        let (transitions, _) = broadcast::channel(config.transition_buffer.max(1));
        let inner = Arc::new(Inner {
            ledger: Mutex::new(Ledger::new()),
            snapshots,
            transitions,
            provider: provider.clone(),
            profiles,
            cache,
        });

        // subscribe before bootstrapping so no change is missed in between
        let subscription = provider.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let drain = tokio::spawn(drain_events(inner.clone(), subscription, shutdown_rx));
        let bootstrap = tokio::spawn(inner.clone().bootstrap());

        Self { inner, shutdown_tx, drain: Some(drain), bootstrap: Some(bootstrap) }
    }

    pub fn context(&self) -> AuthContext {
        AuthContext::new(self.inner.snapshots.subscribe(), self.inner.provider.clone())
    }

    pub fn subscribe(&self) -> watch::Receiver<ReconciliationState> { self.inner.snapshots.subscribe() }

    /// Every published state in order. Receivers that fall behind see `Lagged`.
    pub fn transitions(&self) -> broadcast::Receiver<ReconciliationState> { self.inner.transitions.subscribe() }

    pub fn snapshot(&self) -> ReconciliationState { self.inner.ledger.lock().state.clone() }

    pub fn phase(&self) -> Phase { self.inner.ledger.lock().phase }

    /// Wait until bootstrap has run to completion.
    pub async fn bootstrapped(&mut self) {
        if let Some(handle) = self.bootstrap.take() {
            if let Err(e) = handle.await {
                error!(target: "talkzii::auth", "bootstrap task failed: {}", e);
            }
        }
    }

    /// Release the change-stream subscription and wait for the drain task to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.drain.take() {
            if let Err(e) = handle.await {
                error!(target: "talkzii::auth", "event drain task failed: {}", e);
            }
        }
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}
