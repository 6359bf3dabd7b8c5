//! Per-client state tracked by the registry.

use std::time::Duration;
use tokio::time::Instant;

use super::bucket::{LimitConfig, TokenBucket};

/// A client's token bucket together with the last time the client was seen.
///
/// The client key itself is the registry's map key.
#[derive(Debug, Clone)]
pub struct VisitorEntry {
    bucket: TokenBucket,
    last_seen: Instant,
}

impl VisitorEntry {
    /// Create an entry with a full bucket.
    pub fn new(limit: &LimitConfig, now: Instant) -> Self {
        Self {
            bucket: TokenBucket::new(limit, now),
            last_seen: now,
        }
    }

    /// Record a request at `now` and try to take a token for it.
    ///
    /// `last_seen` moves forward whether or not the request is admitted, so a
    /// throttled client that keeps retrying stays tracked.
    pub fn check(&mut self, now: Instant) -> bool {
        self.last_seen = self.last_seen.max(now);
        self.bucket.try_acquire(now)
    }

    /// Whether the entry has been idle for longer than `threshold` at `now`.
    pub fn is_idle(&self, threshold: Duration, now: Instant) -> bool {
        now.checked_duration_since(self.last_seen)
            .is_some_and(|idle| idle > threshold)
    }

    /// Latest instant a request from this client was checked.
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// The client's token bucket.
    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_updates_last_seen_on_rejection() {
        let limit = LimitConfig::new(1, 1.0).unwrap();
        let start = Instant::now();
        let mut entry = VisitorEntry::new(&limit, start);

        assert!(entry.check(start));

        let later = start + Duration::from_millis(100);
        assert!(!entry.check(later));
        assert_eq!(entry.last_seen(), later);
    }

    #[test]
    fn test_is_idle_is_strict() {
        let limit = LimitConfig::default();
        let start = Instant::now();
        let entry = VisitorEntry::new(&limit, start);
        let threshold = Duration::from_secs(180);

        assert!(!entry.is_idle(threshold, start));
        assert!(!entry.is_idle(threshold, start + threshold));
        assert!(entry.is_idle(threshold, start + threshold + Duration::from_millis(1)));
    }

    #[test]
    fn test_is_idle_with_stale_now() {
        let limit = LimitConfig::default();
        let start = Instant::now();
        let entry = VisitorEntry::new(&limit, start + Duration::from_secs(5));

        assert!(!entry.is_idle(Duration::ZERO, start));
    }
}
