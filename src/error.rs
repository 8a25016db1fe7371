//! Unified error model for the session reconciliation engine.
//! Collaborators (identity provider, profile store) report failures through `AuthError`;
//! the reconciler classifies them and degrades to a safe state instead of surfacing them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// PostgREST code returned by `.single()` style lookups when no row matched.
pub const NO_ROWS_CODE: &str = "PGRST116";

const INVALID_CREDENTIAL_MARKERS: &[&str] = &["invalid refresh token", "refresh token not found", "invalid_grant"];

const NETWORK_MARKERS: &[&str] = &[
    "failed to fetch",
    "network",
    "timed out",
    "timeout",
    "connection refused",
    "connection reset",
    "dns",
    "unreachable",
];

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthError {
    /// Expected transient condition; logged as a warning, no retry loop.
    #[error("network: {message}")]
    TransientNetwork { message: String },
    /// Absence of a row. A valid state for a brand-new identity.
    #[error("not_found: {message}")]
    NotFound { message: String },
    /// Refresh credential is invalid or expired; provider state must be cleared.
    #[error("invalid_credential: {message}")]
    InvalidCredential { message: String },
    #[error("unclassified: {message}")]
    Unclassified { message: String },
}

impl AuthError {
    pub fn network<S: Into<String>>(msg: S) -> Self { AuthError::TransientNetwork { message: msg.into() } }
    pub fn not_found<S: Into<String>>(msg: S) -> Self { AuthError::NotFound { message: msg.into() } }
    pub fn invalid_credential<S: Into<String>>(msg: S) -> Self { AuthError::InvalidCredential { message: msg.into() } }
    pub fn unclassified<S: Into<String>>(msg: S) -> Self { AuthError::Unclassified { message: msg.into() } }

    pub fn code_str(&self) -> &'static str {
        match self {
            AuthError::TransientNetwork { .. } => "network",
            AuthError::NotFound { .. } => "not_found",
            AuthError::InvalidCredential { .. } => "invalid_credential",
            AuthError::Unclassified { .. } => "unclassified",
        }
    }

    pub fn is_not_found(&self) -> bool { matches!(self, AuthError::NotFound { .. }) }

    pub fn is_transient(&self) -> bool { matches!(self, AuthError::TransientNetwork { .. }) }

    pub fn is_invalid_credential(&self) -> bool { matches!(self, AuthError::InvalidCredential { .. }) }

    /// Classify a raw provider message. Refresh-token failures win over network wording
    /// because they require a forced sign-out.
    pub fn classify_message(msg: &str) -> Self {
        let lower = msg.to_ascii_lowercase();
        if INVALID_CREDENTIAL_MARKERS.iter().any(|m| lower.contains(m)) {
            return AuthError::invalid_credential(msg);
        }
        if NETWORK_MARKERS.iter().any(|m| lower.contains(m)) {
            return AuthError::network(msg);
        }
        AuthError::unclassified(msg)
    }

    /// Map a profile-store error code. `PGRST116` means the row does not exist yet.
    pub fn from_store_code(code: &str, msg: &str) -> Self {
        if code.eq_ignore_ascii_case(NO_ROWS_CODE) {
            return AuthError::not_found(msg);
        }
        AuthError::classify_message(msg)
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
