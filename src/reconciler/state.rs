use std::sync::Arc;

use crate::identity::{Identity, Profile, Session};

/// Canonical auth state. Owned by the reconciler; everyone else sees clones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationState {
    pub identity: Option<Identity>,
    pub session: Option<Arc<Session>>,
    pub profile: Option<Profile>,
    pub auth_loading: bool,
    pub profile_loading: bool,
}

impl ReconciliationState {
    pub fn bootstrapping() -> Self {
        Self { auth_loading: true, profile_loading: true, ..Default::default() }
    }

    /// Derived, never stored: auth still resolving, or a signed-in user's profile still loading.
    pub fn is_loading(&self) -> bool {
        self.auth_loading || (self.identity.is_some() && self.profile_loading)
    }

    pub fn has_session(&self) -> bool { self.session.is_some() }

    pub fn identity_id(&self) -> Option<&str> { self.identity.as_ref().map(|i| i.id.as_str()) }

    /// `profile` is only ever held against the identity it belongs to.
    pub fn profile_matches_identity(&self) -> bool {
        match (&self.profile, &self.identity) {
            (None, _) => true,
            (Some(p), Some(i)) => p.belongs_to(i),
            (Some(_), None) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Bootstrapping,
    Settled { has_identity: bool },
}

/// Profile fetch in flight: applied only if both fields still match the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProfileTicket {
    pub identity_id: String,
    pub epoch: u64,
}

/// State plus the bookkeeping that decides who may clear which loading flag.
///
/// Every raise of `auth_loading` takes a new auth epoch and only the holder of the current
/// epoch may lower it. Every profile decision (fetch started, profile cleared) takes a new
/// profile epoch; a fetch result is applied only if its epoch is still current.
#[derive(Debug)]
pub(crate) struct Ledger {
    pub state: ReconciliationState,
    pub phase: Phase,
    pub auth_epoch: u64,
    pub profile_epoch: u64,
    pub profile_in_flight: bool,
    pub events_applied: u64,
}

/// Epoch held by the bootstrap sequence for both flags.
pub(crate) const BOOTSTRAP_EPOCH: u64 = 0;

impl Ledger {
    pub fn new() -> Self {
        Self {
            state: ReconciliationState::bootstrapping(),
            phase: Phase::Bootstrapping,
            auth_epoch: BOOTSTRAP_EPOCH,
            profile_epoch: BOOTSTRAP_EPOCH,
            // bootstrap counts as the outstanding profile lookup
            profile_in_flight: true,
            events_applied: 0,
        }
    }

    pub fn raise_auth(&mut self) -> u64 {
        self.auth_epoch += 1;
        self.state.auth_loading = true;
        self.auth_epoch
    }

    /// Lower `auth_loading` if `epoch` still owns it. A newer raise keeps ownership.
    pub fn release_auth(&mut self, epoch: u64) -> bool {
        if self.auth_epoch != epoch {
            return false;
        }
        self.state.auth_loading = false;
        true
    }

    /// Replace the identity and session together. A held profile that no longer matches is dropped.
    pub fn apply_session(&mut self, session: Option<Arc<Session>>) {
        self.state.identity = session.as_deref().map(|s| s.identity().clone());
        self.state.session = session;
        if !self.state.profile_matches_identity() {
            self.state.profile = None;
        }
    }

    pub fn begin_fetch(&mut self, identity_id: &str) -> ProfileTicket {
        self.profile_epoch += 1;
        self.profile_in_flight = true;
        self.state.profile_loading = true;
        ProfileTicket { identity_id: identity_id.to_string(), epoch: self.profile_epoch }
    }

    /// Settle the profile without a fetch. Supersedes any fetch still in flight.
    pub fn settle_profile(&mut self, profile: Option<Profile>) {
        self.profile_epoch += 1;
        self.profile_in_flight = false;
        self.state.profile = profile;
        self.state.profile_loading = false;
        debug_assert!(self.state.profile_matches_identity());
    }

    pub fn is_current(&self, ticket: &ProfileTicket) -> bool {
        self.profile_epoch == ticket.epoch && self.state.identity_id() == Some(ticket.identity_id.as_str())
    }

    /// Apply a fetch result if its ticket is still current. Returns false for stale results.
    pub fn complete_fetch(&mut self, ticket: &ProfileTicket, profile: Option<Profile>) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.state.profile = profile.filter(|p| p.id == ticket.identity_id);
        self.profile_in_flight = false;
        self.state.profile_loading = false;
        true
    }

    /// Lower `profile_loading` if `epoch` is still the latest profile decision.
    pub fn release_profile(&mut self, epoch: u64) -> bool {
        if self.profile_epoch != epoch {
            return false;
        }
        self.profile_in_flight = false;
        self.state.profile_loading = false;
        true
    }

    /// Lower `profile_loading` when nothing is fetching on its behalf.
    pub fn release_idle_profile(&mut self) {
        if !self.profile_in_flight {
            self.state.profile_loading = false;
        }
    }

    pub fn settle_phase(&mut self) {
        self.phase = Phase::Settled { has_identity: self.state.identity.is_some() };
    }
}
