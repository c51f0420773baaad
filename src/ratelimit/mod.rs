//! Rate limiting logic and state management.

mod bucket;
mod limit;
mod limiter;
mod store;
mod strategy;

pub use bucket::{scope, BucketKey};
pub use limit::{parse_limit, parse_limits, Limit, LimitSpec, TimeUnit, MAX_WINDOW_SECS};
pub use limiter::{governs, RateLimiter};
pub use store::ExpiringStore;
pub use strategy::{MovingWindow, Ratelimited, Strategy, StrategyKind};
