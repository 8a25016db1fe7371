//! Reconciler configuration: route policy for the navigation guard, per-identity cache
//! key layout, and channel sizing. Loadable from defaults, a JSON file, or environment.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct RoutePolicy {
    /// Routes an authenticated user should be bounced away from.
    #[serde(default = "RoutePolicy::default_auth_routes")]
    pub auth_routes: Vec<String>,
    /// Default landing route for an authenticated user.
    #[serde(default = "RoutePolicy::default_landing_route")]
    pub landing_route: String,
}

impl RoutePolicy {
    fn default_auth_routes() -> Vec<String> { vec!["/login".into(), "/signup".into()] }
    fn default_landing_route() -> String { "/aipersona".into() }
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self { auth_routes: Self::default_auth_routes(), landing_route: Self::default_landing_route() }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct CachePolicy {
    /// Every per-identity key is `<prefix><identity id>`.
    #[serde(default = "CachePolicy::default_prefixes")]
    pub key_prefixes: Vec<String>,
    /// Suffix used in place of an identity id for signed-out (guest) data.
    #[serde(default = "CachePolicy::default_guest_suffix")]
    pub guest_suffix: String,
}

impl CachePolicy {
    fn default_prefixes() -> Vec<String> {
        vec![
            "talkzii_chat_history_".into(),
            "talkzii_ai_friend_type_".into(),
            "talkzii_chat_memory_".into(),
            "talkzii_memory_warning_shown_".into(),
        ]
    }
    fn default_guest_suffix() -> String { "guest".into() }

    /// Keys owned by `identity_id`, or the guest keys when `None`.
    pub fn keys_for(&self, identity_id: Option<&str>) -> Vec<String> {
        let suffix = identity_id.unwrap_or(self.guest_suffix.as_str());
        self.key_prefixes.iter().map(|p| format!("{}{}", p, suffix)).collect()
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self { key_prefixes: Self::default_prefixes(), guest_suffix: Self::default_guest_suffix() }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ReconcilerConfig {
    #[serde(default)]
    pub routes: RoutePolicy,
    #[serde(default)]
    pub cache: CachePolicy,
    /// Capacity of the transition feed; slow observers lag rather than block the reconciler.
    #[serde(default = "ReconcilerConfig::default_transition_buffer")]
    pub transition_buffer: usize,
}

impl ReconcilerConfig {
    fn default_transition_buffer() -> usize { 64 }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading reconciler config '{}'", path.display()))?;
        let cfg: ReconcilerConfig = serde_json::from_str(&text)
            .with_context(|| format!("parsing reconciler config '{}'", path.display()))?;
        Ok(cfg)
    }

    /// Overlay `TALKZII_*` environment variables on top of `self`.
    pub fn with_env(self) -> Self {
        self.with_vars(|name| std::env::var(name).ok())
    }

    pub fn from_env() -> Self { Self::default().with_env() }

    fn with_vars<F: Fn(&str) -> Option<String>>(mut self, get: F) -> Self {
        if let Some(v) = get("TALKZII_AUTH_ROUTES") {
            let routes: Vec<String> = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
            if !routes.is_empty() { self.routes.auth_routes = routes; }
        }
        if let Some(v) = get("TALKZII_LANDING_ROUTE") {
            let v = v.trim();
            if !v.is_empty() { self.routes.landing_route = v.to_string(); }
        }
        if let Some(n) = get("TALKZII_TRANSITION_BUFFER").and_then(|v| v.trim().parse::<usize>().ok()) {
            if n > 0 { self.transition_buffer = n; }
        }
        self
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self { routes: RoutePolicy::default(), cache: CachePolicy::default(), transition_buffer: Self::default_transition_buffer() }
    }
}
