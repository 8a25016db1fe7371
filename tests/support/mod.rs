//! Shared fakes for reconciler integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tokio::sync::{Notify, Semaphore};

use talkzii_session::identity::{LocalUserCache, MemoryUserCache, ProfileStore, Profile};
use talkzii_session::{AuthContext, AuthError, AuthResult, CachePolicy, ReconciliationState};

pub const WAIT: Duration = Duration::from_secs(5);

/// Wait (bounded) until `pred` holds on the published state.
pub async fn wait_until<F>(ctx: &mut AuthContext, what: &str, pred: F) -> ReconciliationState
where
    F: FnMut(&ReconciliationState) -> bool,
{
    match tokio::time::timeout(WAIT, ctx.wait_for(pred)).await {
        Ok(Some(state)) => state,
        Ok(None) => panic!("reconciler dropped while waiting for: {}", what),
        Err(_) => panic!("timed out waiting for: {}; last state: {:?}", what, ctx.state()),
    }
}

/// Profile store whose fetches block until the test releases them, per identity.
pub struct GatedProfileStore {
    rows: Mutex<HashMap<String, AuthResult<Profile>>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    started: Mutex<HashMap<String, usize>>,
    notify: Notify,
}

impl GatedProfileStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            started: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        })
    }

    pub fn set(&self, id: &str, result: AuthResult<Profile>) { self.rows.lock().insert(id.to_string(), result); }

    fn gate(&self, id: &str) -> Arc<Semaphore> {
        self.gates.lock().entry(id.to_string()).or_insert_with(|| Arc::new(Semaphore::new(0))).clone()
    }

    /// Let one pending (or future) fetch for `id` complete.
    pub fn release(&self, id: &str) { self.gate(id).add_permits(1); }

    pub fn started_count(&self, id: &str) -> usize { self.started.lock().get(id).copied().unwrap_or(0) }

    /// Wait until at least one fetch for `id` has started.
    pub async fn started(&self, id: &str) {
        let fut = async {
            loop {
                let notified = self.notify.notified();
                if self.started_count(id) > 0 {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(WAIT, fut).await.is_err() {
            panic!("fetch for {} never started", id);
        }
    }
}

#[async_trait]
impl ProfileStore for GatedProfileStore {
    async fn fetch_profile(&self, identity_id: &str) -> AuthResult<Profile> {
        let gate = self.gate(identity_id);
        *self.started.lock().entry(identity_id.to_string()).or_insert(0) += 1;
        self.notify.notify_waiters();
        if let Ok(permit) = gate.acquire().await {
            permit.forget();
        }
        self.rows
            .lock()
            .get(identity_id)
            .cloned()
            .unwrap_or_else(|| Err(AuthError::not_found("no profile row")))
    }
}

/// Profile store that panics on every fetch.
pub struct PanickingProfileStore;

#[async_trait]
impl ProfileStore for PanickingProfileStore {
    async fn fetch_profile(&self, identity_id: &str) -> AuthResult<Profile> {
        panic!("profile backend exploded for {}", identity_id);
    }
}

/// Memory cache that counts `clear` calls per identity.
pub struct CountingCache {
    inner: MemoryUserCache,
    clears: Mutex<HashMap<String, usize>>,
}

impl CountingCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { inner: MemoryUserCache::new(CachePolicy::default()), clears: Mutex::new(HashMap::new()) })
    }

    pub fn clears_for(&self, id: &str) -> usize { self.clears.lock().get(id).copied().unwrap_or(0) }

    pub fn total_clears(&self) -> usize { self.clears.lock().values().sum() }

    pub fn seed(&self, id: &str) {
        for key in self.inner.policy().keys_for(Some(id)) {
            self.inner.put(&key, serde_json::json!({"owner": id}));
        }
    }

    pub fn keys(&self) -> Vec<String> { self.inner.keys() }
}

impl LocalUserCache for CountingCache {
    fn get(&self, key: &str) -> Option<JsonValue> { self.inner.get(key) }
    fn put(&self, key: &str, value: JsonValue) { self.inner.put(key, value) }
    fn remove(&self, key: &str) { self.inner.remove(key) }
    fn policy(&self) -> &CachePolicy { self.inner.policy() }

    fn clear(&self, identity_id: &str) {
        *self.clears.lock().entry(identity_id.to_string()).or_insert(0) += 1;
        self.inner.clear(identity_id);
    }
}

pub fn profile(id: &str, name: &str) -> Profile {
    let mut p = Profile::new(id);
    p.display_name = Some(name.to_string());
    p
}
