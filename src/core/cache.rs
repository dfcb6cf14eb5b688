//! Expiring in-memory cache with an injected clock

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

/// Time source, injected so expiry can be tested deterministically
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub struct TtlCache<K, V> {
    entries: DashMap<K, (V, DateTime<Utc>)>,
    ttl: ChronoDuration,
    clock: Arc<dyn Clock>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::days(36_500)),
            clock,
        }
    }

    fn is_fresh(&self, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - stored_at < self.ttl
    }

    /// Fresh value for `key`, if any
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let entry = self.entries.get(key)?;
        let (value, stored_at) = entry.value();
        if self.is_fresh(*stored_at, now) {
            Some(value.clone())
        } else {
            None
        }
    }

    pub fn put(&self, key: K, value: V) {
        self.entries.insert(key, (value, self.clock.now()));
    }

    pub fn remove(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drop every stale entry, returning how many were removed
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, stored_at)| now - *stored_at < self.ttl);
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            debug!(evicted, "Evicted expired cache entries");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Clock that only moves when told to
#[cfg(test)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: std::sync::Mutex::new(Utc::now()),
        }
    }

    pub fn advance(&self, by: std::time::Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + ChronoDuration::from_std(by).unwrap();
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_get_respects_ttl() {
        let clock = Arc::new(ManualClock::new());
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(60), clock.clone());

        cache.put("wallets".to_string(), 7);
        assert_eq!(cache.get(&"wallets".to_string()), Some(7));

        clock.advance(Duration::from_secs(59));
        assert_eq!(cache.get(&"wallets".to_string()), Some(7));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get(&"wallets".to_string()), None);
    }

    #[test]
    fn test_evict_expired() {
        let clock = Arc::new(ManualClock::new());
        let cache: TtlCache<&'static str, u32> = TtlCache::new(Duration::from_secs(10), clock.clone());

        cache.put("old", 1);
        clock.advance(Duration::from_secs(6));
        cache.put("new", 2);
        clock.advance(Duration::from_secs(5));

        assert_eq!(cache.evict_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"new"), Some(2));
    }

    #[test]
    fn test_put_replaces_whole_value() {
        let cache: TtlCache<u8, Vec<u8>> =
            TtlCache::new(Duration::from_secs(10), Arc::new(SystemClock));
        cache.put(1, vec![1, 2, 3]);
        cache.put(1, vec![9]);
        assert_eq!(cache.get(&1), Some(vec![9]));
        cache.remove(&1);
        assert!(cache.is_empty());
    }
}
