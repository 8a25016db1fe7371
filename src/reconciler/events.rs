//! Synchronous part of change-event handling. Runs under the ledger lock in the drain task;
//! the profile fetch it may request runs afterwards in its own task.

use tracing::{debug, info};

use super::state::{Ledger, ProfileTicket};
use crate::identity::{ChangeEvent, ChangeKind, LocalUserCache};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub identity_changed: bool,
    pub is_login: bool,
    pub is_logout: bool,
}

impl Classification {
    /// Login and logout are the only disruptive transitions; they alone touch `auth_loading`.
    pub fn is_disruptive(&self) -> bool { self.is_login || self.is_logout }
}

/// Classify `kind` against the identity held before the event is applied. Absent is its own id class.
pub fn classify(kind: ChangeKind, previous_id: Option<&str>, new_id: Option<&str>) -> Classification {
    let identity_changed = previous_id != new_id;
    Classification {
        identity_changed,
        is_login: kind == ChangeKind::SignedIn && identity_changed,
        is_logout: kind == ChangeKind::SignedOut,
    }
}

/// What the drain task must do once the lock is released.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Followup {
    Done,
    Fetch { ticket: ProfileTicket, auth_epoch: Option<u64> },
}

pub(crate) fn apply_event(ledger: &mut Ledger, cache: &dyn LocalUserCache, event: &ChangeEvent) -> Followup {
    // Read the previous identity from the live ledger, never from a captured copy.
    let previous = ledger.state.identity.clone();
    let new_identity = event.identity().cloned();
    let class = classify(
        event.kind,
        previous.as_ref().map(|i| i.id.as_str()),
        new_identity.as_ref().map(|i| i.id.as_str()),
    );
    debug!(
        target: "talkzii::auth",
        "event={} prev={:?} new={:?} changed={} login={} logout={}",
        event.kind,
        previous.as_ref().map(|i| i.id.as_str()),
        new_identity.as_ref().map(|i| i.id.as_str()),
        class.identity_changed,
        class.is_login,
        class.is_logout
    );

    let auth_epoch = if class.is_disruptive() {
        let epoch = ledger.raise_auth();
        ledger.state.profile_loading = true;
        Some(epoch)
    } else {
        None
    };

    ledger.apply_session(event.session.clone());
    ledger.events_applied += 1;

    if class.is_logout {
        if let Some(prev) = previous.as_ref() {
            info!(target: "talkzii::auth", "signed out; clearing local data for identity={}", prev.id);
            cache.clear(&prev.id);
        }
        ledger.settle_profile(None);
        if let Some(epoch) = auth_epoch {
            ledger.release_auth(epoch);
        }
        ledger.settle_phase();
        return Followup::Done;
    }

    let Some(identity) = new_identity else {
        ledger.settle_profile(None);
        if let Some(epoch) = auth_epoch {
            ledger.release_auth(epoch);
        }
        ledger.settle_phase();
        return Followup::Done;
    };

    let user_updated = event.kind == ChangeKind::UserUpdated && !class.identity_changed;
    let held_mismatch = ledger.state.profile.as_ref().map_or(true, |p| !p.belongs_to(&identity));
    if class.identity_changed || user_updated || held_mismatch {
        let ticket = ledger.begin_fetch(&identity.id);
        return Followup::Fetch { ticket, auth_epoch };
    }

    ledger.release_idle_profile();
    if let Some(epoch) = auth_epoch {
        ledger.release_auth(epoch);
    }
    ledger.settle_phase();
    Followup::Done
}
