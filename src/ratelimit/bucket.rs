//! Token bucket implementation.

use std::time::Duration;
use tokio::time::Instant;

use crate::error::{GatekeeperError, Result};

/// Default bucket capacity when no specific burst is configured.
pub const DEFAULT_BURST: u32 = 3;
/// Default refill rate (tokens per second) when none is configured.
pub const DEFAULT_REFILL_RATE: f64 = 1.0;

/// Validated limits shared by every bucket a registry creates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitConfig {
    /// Maximum number of tokens a bucket can hold (the burst size)
    capacity: u32,
    /// Tokens added per second
    refill_rate: f64,
}

impl LimitConfig {
    /// Create a new limit configuration.
    ///
    /// Fails when `capacity` is zero or `refill_rate` is not a positive,
    /// finite number.
    pub fn new(capacity: u32, refill_rate: f64) -> Result<Self> {
        if capacity == 0 {
            return Err(GatekeeperError::Config(
                "burst must be greater than zero".to_string(),
            ));
        }

        if !refill_rate.is_finite() || refill_rate <= 0.0 {
            return Err(GatekeeperError::Config(format!(
                "requests_per_second must be a positive number, got {}",
                refill_rate
            )));
        }

        Ok(Self {
            capacity,
            refill_rate,
        })
    }

    /// Get the bucket capacity.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Get the refill rate in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Time it takes to earn back a single token.
    pub fn refill_period(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.refill_rate).unwrap_or(Duration::MAX)
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BURST,
            refill_rate: DEFAULT_REFILL_RATE,
        }
    }
}

/// A token bucket for a single client.
///
/// Tokens are refilled lazily whenever the bucket is consulted, so no timer
/// is needed per bucket. The balance is fractional and is never rounded
/// between checks.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Maximum tokens (bucket capacity)
    capacity: f64,
    /// Tokens added per second
    refill_rate: f64,
    /// Current balance, always within `0..=capacity`
    tokens: f64,
    /// Last time the balance was brought up to date
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(limit: &LimitConfig, now: Instant) -> Self {
        Self {
            capacity: limit.capacity as f64,
            refill_rate: limit.refill_rate,
            tokens: limit.capacity as f64,
            last_refill: now,
        }
    }

    /// Refill the bucket for the time elapsed since the last refill and try to
    /// consume one token.
    ///
    /// Returns `true` if a token was consumed. A rejected attempt does not
    /// change the balance beyond the refill.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Get the current (fractional) token balance.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    fn refill(&mut self, now: Instant) {
        // An instant older than the last refill earns nothing and must not move
        // the refill point backwards, or the same interval would be credited twice.
        let elapsed = now
            .checked_duration_since(self.last_refill)
            .unwrap_or_default()
            .as_secs_f64();

        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = self.last_refill.max(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(capacity: u32, refill_rate: f64) -> (TokenBucket, Instant) {
        let now = Instant::now();
        let limit = LimitConfig::new(capacity, refill_rate).unwrap();
        (TokenBucket::new(&limit, now), now)
    }

    #[test]
    fn test_limit_config_rejects_zero_capacity() {
        assert!(matches!(
            LimitConfig::new(0, 1.0),
            Err(GatekeeperError::Config(_))
        ));
    }

    #[test]
    fn test_limit_config_rejects_bad_refill_rate() {
        assert!(LimitConfig::new(3, 0.0).is_err());
        assert!(LimitConfig::new(3, -1.0).is_err());
        assert!(LimitConfig::new(3, f64::NAN).is_err());
        assert!(LimitConfig::new(3, f64::INFINITY).is_err());
    }

    #[test]
    fn test_limit_config_refill_period() {
        let limit = LimitConfig::new(3, 4.0).unwrap();
        assert_eq!(limit.refill_period(), Duration::from_millis(250));
    }

    #[test]
    fn test_bucket_starts_full() {
        let (bucket, _) = bucket(5, 1.0);
        assert_eq!(bucket.tokens(), 5.0);
    }

    #[test]
    fn test_bucket_allows_burst_then_rejects() {
        let (mut bucket, now) = bucket(3, 1.0);

        for _ in 0..3 {
            assert!(bucket.try_acquire(now));
        }

        // The 4th request at the same instant should be rejected
        assert!(!bucket.try_acquire(now));
        assert_eq!(bucket.tokens(), 0.0);
    }

    #[test]
    fn test_rejection_does_not_accrue_debt() {
        let (mut bucket, now) = bucket(1, 1.0);

        assert!(bucket.try_acquire(now));
        for _ in 0..10 {
            assert!(!bucket.try_acquire(now));
        }

        // One refill period later exactly one token is available again
        let later = now + Duration::from_secs(1);
        assert!(bucket.try_acquire(later));
        assert!(!bucket.try_acquire(later));
    }

    #[test]
    fn test_refill_after_one_period_admits_exactly_one() {
        let limit = LimitConfig::new(2, 4.0).unwrap();
        let now = Instant::now();
        let mut bucket = TokenBucket::new(&limit, now);

        assert!(bucket.try_acquire(now));
        assert!(bucket.try_acquire(now));
        assert!(!bucket.try_acquire(now));

        let later = now + limit.refill_period();
        assert!(bucket.try_acquire(later));
        assert!(!bucket.try_acquire(later));
    }

    #[test]
    fn test_idle_accumulation_is_capped() {
        let (mut bucket, now) = bucket(3, 1.0);

        assert!(bucket.try_acquire(now));

        let much_later = now + Duration::from_secs(24 * 60 * 60);
        assert!(bucket.try_acquire(much_later));
        assert_eq!(bucket.tokens(), 2.0);
    }

    #[test]
    fn test_fractional_tokens_persist() {
        let (mut bucket, now) = bucket(1, 2.0);

        assert!(bucket.try_acquire(now));

        // Half a token after 250ms, not enough to admit
        let t1 = now + Duration::from_millis(250);
        assert!(!bucket.try_acquire(t1));
        assert_eq!(bucket.tokens(), 0.5);

        // Another 250ms completes the token
        let t2 = t1 + Duration::from_millis(250);
        assert!(bucket.try_acquire(t2));
    }

    #[test]
    fn test_earlier_instant_earns_nothing() {
        let (mut bucket, now) = bucket(2, 1.0);
        let later = now + Duration::from_secs(10);

        assert!(bucket.try_acquire(later));
        assert!(bucket.try_acquire(later));

        // A stale instant must not credit tokens or rewind the refill point
        assert!(!bucket.try_acquire(now));
        assert!(!bucket.try_acquire(later));
        assert_eq!(bucket.tokens(), 0.0);
    }

    #[test]
    fn test_scenario_one_per_second_burst_three() {
        let (mut bucket, start) = bucket(3, 1.0);

        assert!(bucket.try_acquire(start));
        assert!(bucket.try_acquire(start));
        assert!(bucket.try_acquire(start));
        assert!(!bucket.try_acquire(start));
        assert!(bucket.try_acquire(start + Duration::from_millis(1100)));
    }
}
