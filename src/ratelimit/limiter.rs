//! Bucket registry and decision engine.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use super::bucket::{scope, BucketKey};
use super::limit::{parse_limits, Limit, LimitSpec};
use super::strategy::{Ratelimited, Strategy, StrategyKind};
use crate::clock::{Clock, SystemClock};
use crate::config::WardenConfig;
use crate::error::Result;

/// The core rate limiter that owns every bucket and limit registration.
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct RateLimiter {
    /// Strategies indexed by bucket key, created on first use
    buckets: DashMap<BucketKey, Arc<dyn Strategy>>,
    /// Strategy used for new buckets
    strategy: StrategyKind,
    /// Time source handed to every new bucket
    clock: Arc<dyn Clock>,
    /// Limits applied to every request
    global_limits: RwLock<Vec<Limit>>,
    /// Limits keyed by opaque route name
    route_limits: RwLock<HashMap<String, Vec<Limit>>>,
    /// Only charge global limits for failed requests
    global_only_count_failed: AtomicBool,
    /// Routes that only charge failed requests
    route_only_count_failed: RwLock<HashSet<String>>,
    enabled: AtomicBool,
}

impl RateLimiter {
    /// Create a rate limiter with the wall clock and the default strategy.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a rate limiter reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::with_strategy(StrategyKind::default(), clock)
    }

    /// Create a rate limiter with an explicit strategy.
    pub fn with_strategy(strategy: StrategyKind, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: DashMap::new(),
            strategy,
            clock,
            global_limits: RwLock::new(Vec::new()),
            route_limits: RwLock::new(HashMap::new()),
            global_only_count_failed: AtomicBool::new(false),
            route_only_count_failed: RwLock::new(HashSet::new()),
            enabled: AtomicBool::new(true),
        }
    }

    /// Build a rate limiter with every registration from `config`.
    pub fn from_config(config: &WardenConfig, clock: Arc<dyn Clock>) -> Self {
        let limiter = Self::with_strategy(config.strategy, clock);
        limiter.set_enabled(config.enabled);

        limiter.global_limits.write().extend(config.global.limits.iter().copied());
        limiter.set_global_only_count_failed(config.global.only_count_failed);

        for (route, route_config) in &config.routes {
            limiter
                .route_limits
                .write()
                .entry(route.clone())
                .or_default()
                .extend(route_config.limits.iter().copied());
            limiter.set_route_only_count_failed(route, route_config.only_count_failed);
        }

        debug!(
            global_limits = config.global.limits.len(),
            routes = config.routes.len(),
            strategy = ?config.strategy,
            "Rate limiter configured"
        );

        limiter
    }

    /// Evaluate `limits` for `key` in `scope` and reduce them to one verdict.
    ///
    /// Every limit is evaluated, and charged when `increase` is set, even
    /// after a violation has been found. Returns `None` when `limits` is
    /// empty.
    pub fn check(
        &self,
        scope: &str,
        key: &str,
        limits: &[Limit],
        increase: bool,
    ) -> Option<Ratelimited> {
        let mut governing: Option<Ratelimited> = None;

        for limit in limits {
            let verdict = self.bucket(scope, limit).evaluate(key, increase);
            if governing.map_or(true, |current| governs(&current, &verdict)) {
                governing = Some(verdict);
            }
        }

        if let Some(verdict) = governing.filter(|v| v.limited) {
            debug!(
                scope = scope,
                key = key,
                limit = %verdict.limit,
                reset_after_ms = verdict.retry_after_ms(),
                "Rate limit exceeded"
            );
        }

        governing
    }

    /// Check the global limits for `key`.
    pub fn check_global(&self, key: &str, increase: bool) -> Option<Ratelimited> {
        let limits = self.global_limits();
        self.check(scope::GLOBAL, key, &limits, increase)
    }

    /// Check the limits registered for `route`.
    pub fn check_route(&self, route: &str, key: &str, increase: bool) -> Option<Ratelimited> {
        let limits = self.route_limits(route)?;
        self.check(route, key, &limits, increase)
    }

    /// Get or create the strategy for a bucket.
    fn bucket(&self, scope: &str, limit: &Limit) -> Arc<dyn Strategy> {
        let key = BucketKey::new(scope, limit);

        if let Some(existing) = self.buckets.get(&key) {
            return Arc::clone(existing.value());
        }

        // The entry API makes creation exactly-once per bucket.
        let entry = self.buckets.entry(key.clone()).or_insert_with(|| {
            debug!(bucket = %key, "Creating new bucket");
            self.strategy.build(*limit, self.clock.clone())
        });
        Arc::clone(entry.value())
    }

    /// Append one limit to the global limits.
    pub fn add_global_limit<'a>(&self, limit: impl Into<LimitSpec<'a>>) -> Result<()> {
        self.add_global_limits([limit])
    }

    /// Append several limits to the global limits, in order.
    pub fn add_global_limits<'a, I, S>(&self, limits: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<LimitSpec<'a>>,
    {
        let parsed = parse_limits(limits)?;
        self.global_limits.write().extend(parsed);
        Ok(())
    }

    /// Append limits to `route`, creating its registration if needed.
    pub fn add_route_limits<'a, I, S>(&self, route: &str, limits: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<LimitSpec<'a>>,
    {
        let parsed = parse_limits(limits)?;
        trace!(route = route, count = parsed.len(), "Registering route limits");
        self.route_limits
            .write()
            .entry(route.to_string())
            .or_default()
            .extend(parsed);
        Ok(())
    }

    /// Snapshot of the global limits.
    pub fn global_limits(&self) -> Vec<Limit> {
        self.global_limits.read().clone()
    }

    /// Snapshot of the limits registered for `route`.
    pub fn route_limits(&self, route: &str) -> Option<Vec<Limit>> {
        self.route_limits.read().get(route).cloned()
    }

    /// Only charge global limits once a request is known to have failed.
    pub fn set_global_only_count_failed(&self, only_failed: bool) {
        self.global_only_count_failed
            .store(only_failed, Ordering::SeqCst);
    }

    /// Only charge `route` once a request is known to have failed.
    pub fn set_route_only_count_failed(&self, route: &str, only_failed: bool) {
        let mut routes = self.route_only_count_failed.write();
        if only_failed {
            routes.insert(route.to_string());
        } else {
            routes.remove(route);
        }
    }

    /// Whether global limits only charge failed requests.
    pub fn global_only_count_failed(&self) -> bool {
        self.global_only_count_failed.load(Ordering::SeqCst)
    }

    /// Whether `route` only charges failed requests.
    pub fn route_only_count_failed(&self, route: &str) -> bool {
        self.route_only_count_failed.read().contains(route)
    }

    /// Whether requests are being counted at all.
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Turn counting on or off. Disabled limiters admit everything.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Get the number of buckets created so far.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drop every bucket and its counters. Registrations are kept.
    pub fn clear(&self) {
        self.buckets.clear();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `candidate` should replace `current` as the governing verdict.
///
/// Any violation beats a pass. Between two violations the one that takes
/// longer to clear governs, since the client has to wait it out. Between two
/// passes the one with the least remaining budget governs.
pub fn governs(current: &Ratelimited, candidate: &Ratelimited) -> bool {
    match (current.limited, candidate.limited) {
        (false, true) => true,
        (true, true) => current.reset_after < candidate.reset_after,
        (false, false) => current.remaining > candidate.remaining,
        (true, false) => false,
    }
}
