use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::time::{Duration, Instant};

use crate::query::Query;

pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Content hash of a query, used as the cache key. Two queries that parse to the same structure
/// share a fingerprint regardless of how they were spelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(query: &Query) -> Fingerprint {
        // Serializing a plain struct of strings and enums cannot fail.
        let canonical = serde_json::to_vec(query).unwrap_or_default();
        Fingerprint(Sha256::digest(canonical).into())
    }
}

struct Entry {
    result: String,
    created_at: Instant,
}

/// Results of recently executed queries. Entries live for a fixed TTL and are purged lazily, on
/// the first lookup that finds them expired. There is no capacity bound.
///
/// Each session owns its own cache, so no locking is involved.
pub struct ResultCache {
    ttl: Duration,
    entries: HashMap<Fingerprint, Entry>,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> ResultCache {
        ResultCache {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn lookup(&mut self, query: &Query) -> Option<&str> {
        let key = Fingerprint::of(query);
        let expired = self
            .entries
            .get(&key)
            .is_some_and(|entry| entry.created_at.elapsed() >= self.ttl);

        if expired {
            self.entries.remove(&key);
            return None;
        }

        self.entries.get(&key).map(|entry| entry.result.as_str())
    }

    pub fn store(&mut self, query: &Query, result: String) {
        let entry = Entry {
            result,
            created_at: Instant::now(),
        };
        self.entries.insert(Fingerprint::of(query), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
