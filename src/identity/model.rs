use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authenticated principal as reported by the identity provider. Replaced wholesale, never edited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub primary_email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn new<S: Into<String>>(id: S, primary_email: Option<String>) -> Self {
        Self { id: id.into(), primary_email, created_at: Utc::now() }
    }
}

/// Provider-issued credential bundle. The reconciler only re-exports it and reads the
/// identity it implies.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub user: Identity,
}

impl Session {
    pub fn new(user: Identity, access_token: String) -> Self {
        Self { access_token, refresh_token: None, expires_at: None, user }
    }

    pub fn identity(&self) -> &Identity { &self.user }
}

// Tokens stay out of logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user.id)
            .field("expires_at", &self.expires_at)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Gender {
    Male,
    Female,
    PreferNotToSay,
    Other(String),
}

impl From<String> for Gender {
    fn from(s: String) -> Self {
        match s.as_str() {
            "male" => Gender::Male,
            "female" => Gender::Female,
            "prefer_not_to_say" => Gender::PreferNotToSay,
            _ => Gender::Other(s),
        }
    }
}

impl From<Gender> for String {
    fn from(g: Gender) -> Self {
        match g {
            Gender::Male => "male".into(),
            Gender::Female => "female".into(),
            Gender::PreferNotToSay => "prefer_not_to_say".into(),
            Gender::Other(s) => s,
        }
    }
}

/// Application-owned record keyed 1:1 by `Identity::id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: String,
    #[serde(default, rename = "username")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub gender: Option<Gender>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn new<S: Into<String>>(id: S) -> Self {
        let now = Utc::now();
        Self { id: id.into(), display_name: None, email: None, gender: None, created_at: now, updated_at: now }
    }

    pub fn belongs_to(&self, identity: &Identity) -> bool { self.id == identity.id }
}
