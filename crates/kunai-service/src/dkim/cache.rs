use std::time::{Duration, Instant};

use dashmap::DashMap;
use kunai_rfc::rfc::dkim::PublicKeyRecord;

#[derive(Debug, Clone)]
struct CacheEntry {
    records: Vec<PublicKeyRecord>,
    fetched: Instant,
}

/// Public key records by lookup selector.
///
/// Keys are the strategy-specific selector strings, so entries of different
/// strategies never collide. Concurrent lookups of the same selector may
/// both populate the entry; the last write wins.
#[derive(Debug, Default)]
pub struct KeyCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Option<Duration>,
}

impl KeyCache {
    /// A cache whose entries expire after `ttl`; `None` keeps them until
    /// [`KeyCache::flush`].
    #[must_use]
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// ## Summary
    /// Builds a cache from a configured lifetime, 0 meaning no expiry.
    #[must_use]
    pub fn from_seconds(seconds: u64) -> Self {
        Self::new((seconds > 0).then(|| Duration::from_secs(seconds)))
    }

    /// Returns the cached records, dropping the entry if it has expired.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Vec<PublicKeyRecord>> {
        let expired = {
            let entry = self.entries.get(key)?;
            match self.ttl {
                Some(ttl) if entry.fetched.elapsed() >= ttl => true,
                _ => return Some(entry.records.clone()),
            }
        };
        if expired {
            tracing::debug!(key = %key, "Cached public keys expired");
            self.entries.remove(key);
        }
        None
    }

    pub fn insert(&self, key: impl Into<String>, records: Vec<PublicKeyRecord>) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                records,
                fetched: Instant::now(),
            },
        );
    }

    /// Removes every entry.
    pub fn flush(&self) {
        tracing::info!(entries = self.entries.len(), "Flushing public key cache");
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> PublicKeyRecord {
        PublicKeyRecord::parse("v=DKIM1; p=QUJD").unwrap()
    }

    #[test]
    fn entries_without_ttl_stay_until_flush() {
        let cache = KeyCache::from_seconds(0);
        cache.insert("ischedule._domainkey.example.org", vec![record()]);
        assert_eq!(cache.get("ischedule._domainkey.example.org").unwrap().len(), 1);
        assert!(cache.get("other").is_none());

        cache.flush();
        assert!(cache.is_empty());
    }

    #[test]
    fn entries_expire() {
        let cache = KeyCache::new(Some(Duration::ZERO));
        cache.insert("example.org#ischedule", vec![record()]);
        assert!(cache.get("example.org#ischedule").is_none());
        assert_eq!(cache.len(), 0);
    }
}
