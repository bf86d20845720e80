//! Service layer
//!
//! Services contain the per-step business logic the scheduler drives:
//! fingerprinting, consulting the cache, executing and recording success.
//!
//! All services are trait-based to enable testing and dependency injection.

mod step;

// Re-export traits
pub use step::StepService;

// Re-export implementations
pub use step::{StandardStepService, StepRun};
