//! Result cache: keys are table-prefixed fingerprints of the query shape

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A key-value store for serialized result sets.
///
/// Reads and writes are not atomic across callers; two concurrent misses for
/// the same key both run the query.
pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: String, ttl: Duration);

    /// Remove every entry whose key starts with `prefix`, returning how many
    fn clear_prefix(&self, prefix: &str) -> usize;
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Process-local cache with lazy expiry
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        // a panic while holding the lock cannot leave a half-written entry
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: String, ttl: Duration) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.lock().insert(key.to_string(), entry);
    }

    fn clear_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        before - entries.len()
    }
}

/// Prefix shared by every key for `table` on `connection`
pub fn table_prefix(connection: &str, table: &str) -> String {
    format!("{}/{}:", connection, table)
}

/// Cache key for a query shape: the table prefix followed by a blake3 digest
/// of the shape's JSON form
pub fn fingerprint<S: Serialize>(connection: &str, table: &str, shape: &S) -> crate::Result<String> {
    let encoded = serde_json::to_vec(shape)?;
    let digest = blake3::hash(&encoded);
    Ok(format!("{}{}", table_prefix(connection, table), digest.to_hex()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let cache = MemoryCache::new();
        cache.set("main/users:abc", "[1]".into(), Duration::from_secs(60));
        assert_eq!(cache.get("main/users:abc").as_deref(), Some("[1]"));
        assert_eq!(cache.get("main/users:def"), None);
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let cache = MemoryCache::new();
        cache.set("k", "v".into(), Duration::ZERO);
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_prefix() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("main/users:a", "1".into(), ttl);
        cache.set("main/users:b", "2".into(), ttl);
        cache.set("main/users_archive:a", "3".into(), ttl);
        cache.set("main/orders:a", "4".into(), ttl);

        assert_eq!(cache.clear_prefix(&table_prefix("main", "users")), 2);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("main/users_archive:a").is_some());
    }

    #[test]
    fn test_fingerprint_depends_on_shape() {
        let a = fingerprint("main", "users", &("id", 1)).unwrap();
        let b = fingerprint("main", "users", &("id", 1)).unwrap();
        let c = fingerprint("main", "users", &("id", 2)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("main/users:"));
    }
}
