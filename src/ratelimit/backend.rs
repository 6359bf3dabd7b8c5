//! Admission control trait for abstracting the limiter behind the HTTP layer.

use tokio::time::Instant;

/// Trait for admission decisions keyed by client identity.
///
/// This trait lets the HTTP middleware work with the [`VisitorRegistry`] or
/// any other implementation, such as a fixed decision in tests. Calls are
/// synchronous and never fail.
///
/// [`VisitorRegistry`]: super::VisitorRegistry
pub trait AdmissionControl: Send + Sync {
    /// Decide whether a request from `key` observed at `now` is admitted.
    fn allow(&self, key: &str, now: Instant) -> bool;
}
