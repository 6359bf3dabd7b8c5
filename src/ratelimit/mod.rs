//! Rate limiting logic and state management.

mod backend;
mod bucket;
mod cleanup;
mod registry;
mod visitor;

pub use backend::AdmissionControl;
pub use bucket::{LimitConfig, TokenBucket, DEFAULT_BURST, DEFAULT_REFILL_RATE};
pub use cleanup::CleanupScheduler;
pub use registry::VisitorRegistry;
pub use visitor::VisitorEntry;
