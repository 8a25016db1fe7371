//! One-shot bootstrap: read the provider's current session, fetch its profile, and always
//! finish with both loading flags lowered (unless a later event has taken them over).

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt; // for catch_unwind on async blocks
use tracing::{error, info, warn};

use super::state::BOOTSTRAP_EPOCH;
use super::Inner;
use crate::error::AuthError;

impl Inner {
    pub(crate) async fn bootstrap(self: Arc<Self>) {
        let mut owned_profile_epoch = BOOTSTRAP_EPOCH;
        let run = AssertUnwindSafe(self.bootstrap_inner(&mut owned_profile_epoch));
        if run.catch_unwind().await.is_err() {
            error!(target: "talkzii::auth", "bootstrap panicked; degrading to signed-out state");
            let mut ledger = self.ledger.lock();
            if ledger.events_applied == 0 {
                ledger.apply_session(None);
                ledger.state.profile = None;
            }
        }

        let mut ledger = self.ledger.lock();
        ledger.release_auth(BOOTSTRAP_EPOCH);
        ledger.release_profile(owned_profile_epoch);
        if ledger.phase == super::Phase::Bootstrapping {
            ledger.settle_phase();
        }
        info!(
            target: "talkzii::auth",
            "bootstrap complete identity={:?} profile={} loading={}",
            ledger.state.identity_id(),
            ledger.state.profile.is_some(),
            ledger.state.is_loading()
        );
        self.publish(&ledger);
    }

    async fn bootstrap_inner(&self, owned_profile_epoch: &mut u64) {
        let session = match self.provider.current_session().await {
            Ok(session) => session,
            Err(e) => {
                error!(target: "talkzii::auth", "error fetching initial session: {}", e);
                if e.is_invalid_credential() {
                    // clear corrupt provider-side credentials
                    if let Err(sign_out_err) = self.provider.sign_out().await {
                        error!(target: "talkzii::auth", "forced sign-out after invalid credential failed: {}", sign_out_err);
                    }
                }
                let mut ledger = self.ledger.lock();
                if ledger.events_applied == 0 {
                    ledger.apply_session(None);
                    ledger.state.profile = None;
                }
                return;
            }
        };

        let ticket = {
            let mut ledger = self.ledger.lock();
            if ledger.events_applied > 0 {
                // change stream already delivered fresher state
                info!(target: "talkzii::auth", "bootstrap session superseded by {} event(s)", ledger.events_applied);
                return;
            }
            ledger.apply_session(session.map(Arc::new));
            let Some(id) = ledger.state.identity_id().map(str::to_string) else {
                ledger.state.profile = None;
                return;
            };
            let ticket = ledger.begin_fetch(&id);
            *owned_profile_epoch = ticket.epoch;
            self.publish(&ledger);
            ticket
        };

        let profile = match self.profiles.fetch_profile(&ticket.identity_id).await {
            Ok(p) => Some(p),
            Err(e) => {
                log_profile_error("initial profile fetch", &ticket.identity_id, &e);
                None
            }
        };
        let mut ledger = self.ledger.lock();
        if !ledger.complete_fetch(&ticket, profile) {
            info!(target: "talkzii::auth", "discarding stale initial profile for identity={}", ticket.identity_id);
        }
    }
}

/// NotFound is a valid state for a new identity; network failures are expected and only warned.
pub(crate) fn log_profile_error(context: &str, identity_id: &str, e: &AuthError) {
    match e {
        AuthError::NotFound { .. } => {
            tracing::debug!(target: "talkzii::auth", "{}: no profile row yet for identity={}", context, identity_id)
        }
        AuthError::TransientNetwork { .. } => {
            warn!(target: "talkzii::auth", "{}: network error for identity={}: {}", context, identity_id, e)
        }
        _ => error!(target: "talkzii::auth", "{}: {} error for identity={}: {}", context, e.code_str(), identity_id, e),
    }
}
