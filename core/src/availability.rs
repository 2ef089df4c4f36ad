//! Process-wide availability cache.
//!
//! Probing a backend (spawning its CLI, hitting its health endpoint) is
//! slow; results are cached per adapter name under a TTL. The cache is a
//! capability object created once at startup and passed into the
//! coordinator and adapters, never a global.

use std::collections::HashMap;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::Mutex;

/// Default time-to-live for a cached probe result.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
struct Entry {
    present: bool,
    observed_at: Instant,
}

/// TTL cache of adapter availability, keyed by adapter name.
#[derive(Debug)]
pub struct AvailabilityCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for AvailabilityCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl AvailabilityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cached result for `name`, or `None` when missing or expired.
    pub async fn get(&self, name: &str) -> Option<bool> {
        let entries = self.entries.lock().await;
        let entry = entries.get(name)?;
        if entry.observed_at.elapsed() < self.ttl {
            Some(entry.present)
        } else {
            None
        }
    }

    /// Record a probe result for `name`.
    pub async fn put(&self, name: &str, present: bool) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            name.to_string(),
            Entry {
                present,
                observed_at: Instant::now(),
            },
        );
    }

    /// Drop the entry for `name`, forcing the next check to re-probe.
    pub async fn invalidate(&self, name: &str) {
        let mut entries = self.entries.lock().await;
        entries.remove(name);
    }

    /// Drop all entries.
    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn hit_within_ttl() {
        let cache = AvailabilityCache::new(Duration::from_secs(30));
        cache.put("claude", true).await;
        assert_eq!(cache.get("claude").await, Some(true));
    }

    #[tokio::test]
    async fn miss_after_expiry() {
        let cache = AvailabilityCache::new(Duration::ZERO);
        cache.put("claude", true).await;
        assert_eq!(cache.get("claude").await, None);
    }

    #[tokio::test]
    async fn invalidate_drops_only_one_entry() {
        let cache = AvailabilityCache::default();
        cache.put("claude", true).await;
        cache.put("gemini", false).await;
        cache.invalidate("claude").await;
        assert_eq!(cache.get("claude").await, None);
        assert_eq!(cache.get("gemini").await, Some(false));
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let cache = AvailabilityCache::default();
        cache.put("claude", true).await;
        cache.put("gemini", true).await;
        cache.clear().await;
        assert_eq!(cache.get("claude").await, None);
        assert_eq!(cache.get("gemini").await, None);
    }
}
