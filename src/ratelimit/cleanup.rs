//! Background eviction of idle visitors.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::registry::VisitorRegistry;
use crate::error::{GatekeeperError, Result};

/// Periodically removes visitors that have been idle longer than the
/// expiration threshold.
pub struct CleanupScheduler {
    registry: Arc<VisitorRegistry>,
    cleanup_interval: Duration,
    expiration: Duration,
}

impl CleanupScheduler {
    /// Create a new scheduler for `registry`.
    ///
    /// Both durations must be non-zero.
    pub fn new(
        registry: Arc<VisitorRegistry>,
        cleanup_interval: Duration,
        expiration: Duration,
    ) -> Result<Self> {
        if cleanup_interval.is_zero() {
            return Err(GatekeeperError::Config(
                "cleanup interval must be greater than zero".to_string(),
            ));
        }

        if expiration.is_zero() {
            return Err(GatekeeperError::Config(
                "expiration must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            registry,
            cleanup_interval,
            expiration,
        })
    }

    /// Spawn the scheduler onto the current tokio runtime.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Sweep the registry every `cleanup_interval` until `shutdown` is cancelled.
    ///
    /// The first sweep happens one full interval after start.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = interval_at(
            Instant::now() + self.cleanup_interval,
            self.cleanup_interval,
        );
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval = ?self.cleanup_interval,
            expiration = ?self.expiration,
            "Visitor cleanup started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Visitor cleanup shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.sweep(Instant::now());
                }
            }
        }
    }

    /// Run a single sweep at `now`.
    ///
    /// Returns the number of evicted visitors, or `None` if the sweep panicked.
    /// A panicking sweep is logged and does not stop later sweeps.
    pub fn sweep(&self, now: Instant) -> Option<usize> {
        self.guarded(|| self.registry.evict_older_than(self.expiration, now))
    }

    /// Run one sweep body, turning a panic into `None`.
    fn guarded<F>(&self, sweep: F) -> Option<usize>
    where
        F: FnOnce() -> usize,
    {
        match panic::catch_unwind(AssertUnwindSafe(sweep)) {
            Ok(evicted) => {
                debug!(
                    evicted = evicted,
                    remaining = self.registry.len(),
                    "Visitor cleanup sweep finished"
                );
                Some(evicted)
            }
            Err(_) => {
                error!("Visitor cleanup sweep panicked");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::LimitConfig;

    fn registry() -> Arc<VisitorRegistry> {
        Arc::new(VisitorRegistry::new(LimitConfig::new(3, 1.0).unwrap()))
    }

    #[test]
    fn test_rejects_zero_durations() {
        let one_second = Duration::from_secs(1);

        assert!(CleanupScheduler::new(registry(), Duration::ZERO, one_second).is_err());
        assert!(CleanupScheduler::new(registry(), one_second, Duration::ZERO).is_err());
    }

    #[test]
    fn test_sweep_returns_evicted_count() {
        let registry = registry();
        let scheduler = CleanupScheduler::new(
            registry.clone(),
            Duration::from_secs(60),
            Duration::from_secs(180),
        )
        .unwrap();

        let start = Instant::now();
        registry.allow("a", start);
        registry.allow("b", start);

        assert_eq!(scheduler.sweep(start + Duration::from_secs(60)), Some(0));
        assert_eq!(scheduler.sweep(start + Duration::from_secs(181)), Some(2));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_panicking_sweep_does_not_stop_later_sweeps() {
        let registry = registry();
        let scheduler = CleanupScheduler::new(
            registry.clone(),
            Duration::from_secs(60),
            Duration::from_secs(180),
        )
        .unwrap();

        let start = Instant::now();
        registry.allow("idle", start);

        assert_eq!(scheduler.guarded(|| panic!("sweep failed")), None);
        assert!(registry.contains("idle"));

        assert_eq!(scheduler.sweep(start + Duration::from_secs(181)), Some(1));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_visitor_is_evicted() {
        let registry = registry();
        let scheduler = CleanupScheduler::new(
            registry.clone(),
            Duration::from_secs(60),
            Duration::from_secs(180),
        )
        .unwrap();

        let shutdown = CancellationToken::new();
        let handle = scheduler.spawn(shutdown.clone());

        registry.allow("1.2.3.4", Instant::now());
        assert_eq!(registry.len(), 1);

        tokio::time::sleep(Duration::from_secs(4 * 60 + 1)).await;
        assert!(!registry.contains("1.2.3.4"));

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_visitor_survives() {
        let registry = registry();
        let scheduler = CleanupScheduler::new(
            registry.clone(),
            Duration::from_secs(60),
            Duration::from_secs(180),
        )
        .unwrap();

        let shutdown = CancellationToken::new();
        let handle = scheduler.spawn(shutdown.clone());

        for _ in 0..10 {
            registry.allow("active", Instant::now());
            registry.allow("active", Instant::now());
            tokio::time::sleep(Duration::from_secs(50)).await;
        }

        assert!(registry.contains("active"));

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_scheduler() {
        let scheduler = CleanupScheduler::new(
            registry(),
            Duration::from_secs(60),
            Duration::from_secs(180),
        )
        .unwrap();

        let shutdown = CancellationToken::new();
        let handle = scheduler.spawn(shutdown.clone());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
