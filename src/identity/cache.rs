//! Per-identity local storage (chat history, persona choice, memory flags).
//! Keys follow `CachePolicy`: `<prefix><identity id>` or `<prefix>guest`.
//! `clear` is idempotent and never fails outward; backend errors are logged.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use tracing::{debug, error};

use crate::config::CachePolicy;

/// `clear` runs while the reconciler's state lock is held, before the signed-out state is
/// published. Implementations must return quickly and must not block on I/O beyond a few
/// local file operations.
pub trait LocalUserCache: Send + Sync {
    fn get(&self, key: &str) -> Option<JsonValue>;
    fn put(&self, key: &str, value: JsonValue);
    fn remove(&self, key: &str);
    fn policy(&self) -> &CachePolicy;

    /// Drop everything stored for `identity_id`.
    fn clear(&self, identity_id: &str) {
        for key in self.policy().keys_for(Some(identity_id)) {
            self.remove(&key);
        }
        debug!(target: "talkzii::cache", "cleared user cache for identity={}", identity_id);
    }

    fn clear_guest(&self) {
        for key in self.policy().keys_for(None) {
            self.remove(&key);
        }
    }
}

#[derive(Default)]
pub struct MemoryUserCache {
    policy: CachePolicy,
    entries: RwLock<HashMap<String, JsonValue>>,
}

impl MemoryUserCache {
    pub fn new(policy: CachePolicy) -> Self { Self { policy, entries: RwLock::new(HashMap::new()) } }

    pub fn len(&self) -> usize { self.entries.read().len() }

    pub fn is_empty(&self) -> bool { self.entries.read().is_empty() }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl LocalUserCache for MemoryUserCache {
    fn get(&self, key: &str) -> Option<JsonValue> { self.entries.read().get(key).cloned() }
    fn put(&self, key: &str, value: JsonValue) { self.entries.write().insert(key.to_string(), value); }
    fn remove(&self, key: &str) { self.entries.write().remove(key); }
    fn policy(&self) -> &CachePolicy { &self.policy }
}

/// Reversible key -> file stem. `[A-Za-z0-9-]` pass through, every other byte (including
/// `_`) becomes `_xx`, so distinct keys never share a file.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("_{:02x}", b));
        }
    }
    out
}

fn decode_key(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'_' {
            let hex = stem.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// One JSON file per key under `root`, with an in-memory index of the keys on disk so
/// lookups and clears of absent keys never touch the filesystem.
pub struct FileUserCache {
    policy: CachePolicy,
    root: PathBuf,
    index: RwLock<HashSet<String>>,
}

impl FileUserCache {
    pub fn new<P: AsRef<Path>>(root: P, policy: CachePolicy) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        let mut index = HashSet::new();
        for entry in std::fs::read_dir(&root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()).and_then(decode_key) {
                Some(key) => {
                    index.insert(key);
                }
                None => debug!(target: "talkzii::cache", "skipping foreign file {}", path.display()),
            }
        }
        debug!(target: "talkzii::cache", "opened file cache root={} entries={}", root.display(), index.len());
        Ok(Self { policy, root, index: RwLock::new(index) })
    }

    pub fn root(&self) -> &Path { &self.root }

    fn path_for(&self, key: &str) -> PathBuf { self.root.join(format!("{}.json", encode_key(key))) }
}

impl LocalUserCache for FileUserCache {
    fn get(&self, key: &str) -> Option<JsonValue> {
        if !self.index.read().contains(key) {
            return None;
        }
        let text = std::fs::read_to_string(self.path_for(key)).ok()?;
        match serde_json::from_str(&text) {
            Ok(v) => Some(v),
            Err(e) => {
                error!(target: "talkzii::cache", "corrupt cache entry key={} err={}", key, e);
                None
            }
        }
    }

    fn put(&self, key: &str, value: JsonValue) {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let res = std::fs::write(&tmp, value.to_string()).and_then(|_| std::fs::rename(&tmp, &path));
        match res {
            Ok(()) => {
                self.index.write().insert(key.to_string());
            }
            Err(e) => error!(target: "talkzii::cache", "failed to write cache entry key={} err={}", key, e),
        }
    }

    fn remove(&self, key: &str) {
        if !self.index.write().remove(key) {
            return;
        }
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!(target: "talkzii::cache", "failed to remove cache entry key={} err={}", key, e),
        }
    }

    fn policy(&self) -> &CachePolicy { &self.policy }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seed(cache: &dyn LocalUserCache, id: &str) {
        for key in cache.policy().keys_for(Some(id)) {
            cache.put(&key, json!({"owner": id}));
        }
    }

    #[test]
    fn memory_clear_only_touches_one_identity() {
        let cache = MemoryUserCache::new(CachePolicy::default());
        seed(&cache, "u1");
        seed(&cache, "u2");
        cache.put("talkzii_chat_history_guest", json!([]));
        cache.clear("u1");
        assert_eq!(cache.len(), 5);
        assert!(cache.get("talkzii_chat_history_u1").is_none());
        assert!(cache.get("talkzii_chat_history_u2").is_some());
    }

    #[test]
    fn memory_clear_is_idempotent() {
        let cache = MemoryUserCache::new(CachePolicy::default());
        seed(&cache, "u1");
        cache.put("unrelated", json!(1));
        cache.clear("u1");
        let once = cache.keys();
        cache.clear("u1");
        assert_eq!(cache.keys(), once);
        assert_eq!(once, vec!["unrelated".to_string()]);
    }

    #[test]
    fn clear_with_nothing_stored_is_fine() {
        let cache = MemoryUserCache::default();
        cache.clear("never-seen");
        assert!(cache.is_empty());
    }

    #[test]
    fn guest_keys_cleared_separately() {
        let cache = MemoryUserCache::new(CachePolicy::default());
        seed(&cache, "u1");
        cache.put("talkzii_ai_friend_type_guest", json!("default"));
        cache.clear_guest();
        assert!(cache.get("talkzii_ai_friend_type_guest").is_none());
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn file_cache_roundtrip_and_idempotent_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileUserCache::new(dir.path().join("users"), CachePolicy::default()).unwrap();
        seed(&cache, "user/with:odd chars");
        assert_eq!(cache.get("talkzii_chat_memory_user/with:odd chars"), Some(json!({"owner": "user/with:odd chars"})));
        cache.clear("user/with:odd chars");
        cache.clear("user/with:odd chars");
        assert!(cache.get("talkzii_chat_memory_user/with:odd chars").is_none());
        let remaining = std::fs::read_dir(cache.root()).unwrap().count();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn file_cache_ignores_corrupt_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(format!("{}.json", encode_key("talkzii_chat_history_u1"))), "{not json").unwrap();
        let cache = FileUserCache::new(dir.path(), CachePolicy::default()).unwrap();
        assert!(cache.get("talkzii_chat_history_u1").is_none());
    }

    #[test]
    fn file_cache_keeps_lookalike_identities_apart() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileUserCache::new(dir.path(), CachePolicy::default()).unwrap();
        for id in ["a_b", "a.b", "a@b", "a/b", "a b", "a_5fb"] {
            seed(&cache, id);
        }
        cache.clear("a.b");
        for id in ["a_b", "a@b", "a/b", "a b", "a_5fb"] {
            for key in cache.policy().keys_for(Some(id)) {
                assert_eq!(cache.get(&key), Some(json!({"owner": id})), "lost {}", key);
            }
        }
        assert!(cache.policy().keys_for(Some("a.b")).iter().all(|k| cache.get(k).is_none()));
        assert_eq!(std::fs::read_dir(cache.root()).unwrap().count(), 20);
    }

    #[test]
    fn key_encoding_is_reversible() {
        for key in ["talkzii_chat_history_u1", "x.y@z/w:q r", "_5f", "ünï"] {
            assert_eq!(decode_key(&encode_key(key)).as_deref(), Some(key));
        }
        assert_ne!(encode_key("a_b"), encode_key("a.b"));
        assert!(decode_key("bad_zz").is_none());
    }

    #[test]
    fn file_cache_reopens_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = FileUserCache::new(dir.path(), CachePolicy::default()).unwrap();
            seed(&cache, "u1");
        }
        std::fs::write(dir.path().join("notes.txt"), "not ours").unwrap();
        let reopened = FileUserCache::new(dir.path(), CachePolicy::default()).unwrap();
        assert_eq!(reopened.get("talkzii_chat_memory_u1"), Some(json!({"owner": "u1"})));
        reopened.clear("u1");
        // only the foreign file is left
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
