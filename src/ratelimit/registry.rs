//! Registry of per-client rate limit state.

use std::time::Duration;

use dashmap::mapref::one::Ref;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::backend::AdmissionControl;
use super::bucket::LimitConfig;
use super::visitor::VisitorEntry;

/// The registry that owns one [`VisitorEntry`] per client key.
///
/// This struct is thread-safe and can be shared across multiple tasks.
/// Lookups of existing keys only take a shard read lock; the per-key
/// read-modify-write happens under that entry's own mutex, so requests for
/// different keys do not serialize against each other. Creation and eviction
/// take the shard write lock.
pub struct VisitorRegistry {
    /// Visitor entries indexed by client key
    visitors: DashMap<String, Mutex<VisitorEntry>>,
    /// Limits applied to every bucket this registry creates
    limit: LimitConfig,
}

impl VisitorRegistry {
    /// Create an empty registry.
    pub fn new(limit: LimitConfig) -> Self {
        Self {
            visitors: DashMap::new(),
            limit,
        }
    }

    /// Check whether a request from `key` observed at `now` is admitted.
    ///
    /// Creates the visitor entry on first sight and always refreshes its
    /// `last_seen`, even when the request is rejected.
    pub fn allow(&self, key: &str, now: Instant) -> bool {
        let visitor = self.get_or_create(key, now);
        let allowed = visitor.lock().check(now);

        trace!(key = %key, allowed = allowed, "Checked visitor");

        allowed
    }

    /// Look up the entry for `key`, inserting a fresh one if absent.
    ///
    /// When several requests race to create the same key, the entry API
    /// holds the shard write lock so only one bucket is ever built; the
    /// others observe and use it.
    fn get_or_create(&self, key: &str, now: Instant) -> Ref<'_, String, Mutex<VisitorEntry>> {
        if let Some(visitor) = self.visitors.get(key) {
            return visitor;
        }

        self.visitors
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!(
                    key = %key,
                    burst = self.limit.capacity(),
                    requests_per_second = self.limit.refill_rate(),
                    "Creating new visitor"
                );
                Mutex::new(VisitorEntry::new(&self.limit, now))
            })
            .downgrade()
    }

    /// Remove every entry idle for longer than `threshold` at `now`.
    ///
    /// Returns the number of entries removed.
    pub fn evict_older_than(&self, threshold: Duration, now: Instant) -> usize {
        let initial_count = self.visitors.len();

        self.visitors
            .retain(|_, visitor| !visitor.get_mut().is_idle(threshold, now));

        initial_count.saturating_sub(self.visitors.len())
    }

    /// Get the remaining tokens for a key.
    ///
    /// Returns `None` if no entry exists for the key. The value is the balance
    /// as of the key's last check; it is not refilled by this call.
    pub fn tokens_remaining(&self, key: &str) -> Option<f64> {
        self.visitors
            .get(key)
            .map(|visitor| visitor.lock().bucket().tokens())
    }

    /// Whether an entry exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.visitors.contains_key(key)
    }

    /// Get the number of tracked visitors.
    pub fn len(&self) -> usize {
        self.visitors.len()
    }

    /// Whether no visitors are tracked.
    pub fn is_empty(&self) -> bool {
        self.visitors.is_empty()
    }

    /// Get the limits applied to new buckets.
    pub fn limit(&self) -> LimitConfig {
        self.limit
    }

    /// Clear all entries.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.visitors.clear();
    }
}

impl Default for VisitorRegistry {
    fn default() -> Self {
        Self::new(LimitConfig::default())
    }
}

impl AdmissionControl for VisitorRegistry {
    fn allow(&self, key: &str, now: Instant) -> bool {
        VisitorRegistry::allow(self, key, now)
    }
}
