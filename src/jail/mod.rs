//! Escalation of repeat offenders into IP range bans.
//!
//! Every rate-limit violation is charged against the jail's own limits in the
//! reserved `jailed` scope. Once those are exceeded the offender's range is
//! jailed for the lifetime of the process and every reporter is notified
//! exactly once.

mod range;
mod reporter;

pub use range::reduce_ip_range;
pub use reporter::{FnReporter, Reporter, TracingReporter};

use dashmap::DashSet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::JailConfig;
use crate::error::Result;
use crate::ratelimit::{parse_limits, scope, Limit, LimitSpec, RateLimiter};

/// Tracks jailed IP ranges.
pub struct Jail {
    /// Violations allowed before a ban
    limits: Vec<Limit>,
    /// Notified once per newly jailed range
    reporters: Vec<Arc<dyn Reporter>>,
    /// Jailed ranges; never pruned
    jailed: DashSet<String>,
}

impl Jail {
    /// Create a jail that bans once `limits` are exceeded.
    pub fn new<'a, I, S>(limits: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<LimitSpec<'a>>,
    {
        Ok(Self::with_limits(parse_limits(limits)?))
    }

    fn with_limits(limits: Vec<Limit>) -> Self {
        Self {
            limits,
            reporters: Vec::new(),
            jailed: DashSet::new(),
        }
    }

    /// Build a jail from configuration.
    pub fn from_config(config: &JailConfig) -> Self {
        let jail = Self::with_limits(config.limits.clone());
        if config.log_reports {
            jail.with_reporter(TracingReporter)
        } else {
            jail
        }
    }

    /// Add a reporter, keeping registration order.
    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Arc::new(reporter));
        self
    }

    /// Add a shared reporter, keeping registration order.
    pub fn add_reporter(&mut self, reporter: Arc<dyn Reporter>) {
        self.reporters.push(reporter);
    }

    /// The escalation limits.
    pub fn limits(&self) -> &[Limit] {
        &self.limits
    }

    /// Whether `ip`'s range is jailed.
    pub fn is_jailed(&self, ip: IpAddr) -> bool {
        self.jailed.contains(&reduce_ip_range(ip))
    }

    /// Charge one violation for `key` and report whether it crossed the
    /// jail's limits.
    pub fn should_jail(&self, key: &str, limiter: &RateLimiter) -> bool {
        let escalate = limiter
            .check(scope::JAILED, key, &self.limits, true)
            .map_or(false, |verdict| verdict.limited);

        debug!(key = key, escalate = escalate, "Checked jail escalation");
        escalate
    }

    /// Jail `ip`'s range, notifying reporters if it was not already jailed.
    ///
    /// Returns whether this call jailed the range. The range stays jailed
    /// even if a reporter fails; the first reporter error is returned and
    /// later reporters are skipped.
    pub async fn commit(&self, ip: IpAddr) -> Result<bool> {
        let range = reduce_ip_range(ip);

        // Insert-if-absent gates the reporters: only one caller wins.
        if !self.jailed.insert(range.clone()) {
            debug!(ip = %ip, range = %range, "Range already jailed");
            return Ok(false);
        }

        warn!(
            ip = %ip,
            range = %range,
            reporters = self.reporters.len(),
            "Jailing IP range"
        );

        for reporter in &self.reporters {
            if let Err(e) = reporter.report(ip, &range).await {
                error!(ip = %ip, range = %range, error = %e, "Jail reporter failed");
                return Err(e);
            }
        }

        Ok(true)
    }

    /// Number of jailed ranges.
    pub fn jailed_count(&self) -> usize {
        self.jailed.len()
    }

    /// Every jailed range, sorted.
    pub fn jailed_ranges(&self) -> Vec<String> {
        let mut ranges: Vec<String> = self.jailed.iter().map(|r| r.key().clone()).collect();
        ranges.sort();
        ranges
    }
}
