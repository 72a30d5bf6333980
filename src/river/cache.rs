use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::error;

use super::RiverData;
use crate::store::to_json;

/// Rivers idle longer than this are dropped from memory once saved.
pub const RIVER_IDLE_SECS: u64 = 60;

struct CacheEntry {
    data: RiverData,
    last_access: Instant,
}

/// In-memory rivers keyed by their store key.
#[derive(Default)]
pub struct RiverCache {
    entries: HashMap<String, CacheEntry>,
}

impl RiverCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, key: &str, data: RiverData, now: Instant) -> &mut RiverData {
        let entry = self.entries.entry(key.to_string()).or_insert(CacheEntry {
            data,
            last_access: now,
        });
        entry.last_access = now;
        &mut entry.data
    }

    /// Serialize every dirty river and mark it saved.
    pub fn collect_dirty(&mut self, now: DateTime<Utc>) -> Vec<(String, String)> {
        let mut writes = Vec::new();
        for (key, entry) in self.entries.iter_mut() {
            if !entry.data.dirty {
                continue;
            }
            entry.data.record_save(now);
            match to_json(&entry.data) {
                Ok(text) => writes.push((key.clone(), text)),
                Err(e) => error!(key = %key, error = %e, "Failed to serialize river"),
            }
        }
        writes
    }

    /// Drop clean rivers not touched within `max_idle`.
    pub fn evict_idle(&mut self, now: Instant, max_idle: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| e.data.dirty || now.duration_since(e.last_access) <= max_idle);
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RiverItem;

    #[test]
    fn test_collect_dirty_clears_flag() {
        let mut cache = RiverCache::new();
        let now = Instant::now();
        let river = cache.insert("lists/a/riverData.json", RiverData::default(), now);
        river.push(RiverItem::default(), 10, Utc::now());

        let writes = cache.collect_dirty(Utc::now());
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, "lists/a/riverData.json");
        assert!(cache.collect_dirty(Utc::now()).is_empty());
    }

    #[test]
    fn test_evict_idle_keeps_dirty_and_recent() {
        let mut cache = RiverCache::new();
        let start = Instant::now();
        cache.insert("old", RiverData::default(), start);
        cache
            .insert("dirty", RiverData::default(), start)
            .push(RiverItem::default(), 10, Utc::now());
        let later = start + Duration::from_secs(RIVER_IDLE_SECS + 1);
        cache.insert("fresh", RiverData::default(), later);

        let evicted = cache.evict_idle(later, Duration::from_secs(RIVER_IDLE_SECS));

        assert_eq!(evicted, 1);
        assert!(!cache.contains("old"));
        assert!(cache.contains("dirty"));
        assert!(cache.contains("fresh"));
    }
}
