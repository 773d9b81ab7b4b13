//! Rate limiting logic and degradation handling.

mod decision;
mod degradation;
mod identity;
mod limiter;

pub use decision::{Decision, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET};
pub use degradation::{Degraded, DegradationPolicy, StoreErrorPolicy};
pub use identity::{ClientIdentity, LOOPBACK_IDENTITY};
pub use limiter::RateLimiter;
