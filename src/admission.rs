//! Per-request admission flow.
//!
//! [`Gatekeeper`] sequences the jail, global limits and route limits for one
//! request without depending on any HTTP framework. A request is admitted
//! with [`Gatekeeper::admit`] before the handler runs and settled with
//! [`Gatekeeper::finish`] once its status is known, which is when routes
//! that only count failed requests get charged.

use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::clock::Clock;
use crate::config::WardenConfig;
use crate::error::Result;
use crate::jail::Jail;
use crate::ratelimit::{RateLimiter, Ratelimited};

/// Status codes at or above this count as failed requests.
pub const FAILURE_STATUS: u16 = 400;

/// What the caller knows about an inbound request.
#[derive(Debug, Clone, Copy)]
pub struct RequestInfo<'a> {
    /// Opaque rate-limit key, e.g. the client IP
    pub key: &'a str,
    /// Client address, used for jailing
    pub ip: IpAddr,
    /// Registered route name, if the request matched one
    pub route: Option<&'a str>,
}

/// Why a request was turned away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Over a limit; retry after the verdict's `reset_after`
    Limited(Ratelimited),
    /// The client's range is banned
    Jailed,
}

/// An admitted request waiting for its outcome.
#[derive(Debug, Clone)]
pub struct Pass {
    key: String,
    ip: IpAddr,
    route: Option<String>,
    only_count_failed: bool,
    verdict: Option<Ratelimited>,
}

impl Pass {
    fn new(request: &RequestInfo<'_>, only_count_failed: bool, verdict: Option<Ratelimited>) -> Self {
        Self {
            key: request.key.to_string(),
            ip: request.ip,
            route: request.route.map(str::to_string),
            only_count_failed,
            verdict,
        }
    }

    /// The verdict to advertise in response headers, if any limit applied.
    pub fn verdict(&self) -> Option<&Ratelimited> {
        self.verdict.as_ref()
    }

    /// Whether charging was deferred until the response status is known.
    pub fn only_count_failed(&self) -> bool {
        self.only_count_failed
    }
}

/// Result of [`Gatekeeper::admit`].
#[derive(Debug, Clone)]
pub enum Admission {
    /// Run the handler, then call [`Gatekeeper::finish`]
    Proceed(Pass),
    Rejected(Rejection),
}

/// Result of [`Gatekeeper::finish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Serve the handler's response, with the verdict for headers
    Served(Option<Ratelimited>),
    /// The failed request pushed the client over a limit
    Rejected(Rejection),
}

/// Applies the limiter and jail to individual requests.
#[derive(Clone)]
pub struct Gatekeeper {
    limiter: Arc<RateLimiter>,
    jail: Option<Arc<Jail>>,
}

impl Gatekeeper {
    /// Create a gatekeeper without a jail.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter, jail: None }
    }

    /// Escalate repeat offenders through `jail`.
    pub fn with_jail(mut self, jail: Arc<Jail>) -> Self {
        self.jail = Some(jail);
        self
    }

    /// Build the limiter and optional jail described by `config`.
    pub fn from_config(config: &WardenConfig, clock: Arc<dyn Clock>) -> Self {
        let gatekeeper = Self::new(Arc::new(RateLimiter::from_config(config, clock)));
        match &config.jail {
            Some(jail) => gatekeeper.with_jail(Arc::new(Jail::from_config(jail))),
            None => gatekeeper,
        }
    }

    /// The shared rate limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// The jail, if escalation is configured.
    pub fn jail(&self) -> Option<&Arc<Jail>> {
        self.jail.as_ref()
    }

    /// Decide whether a request may reach its handler.
    ///
    /// Global limits are checked first, then the route's limits. When the
    /// global or route scope only counts failed requests, both are peeked
    /// here and charged later by [`finish`](Self::finish).
    #[instrument(skip(self, request), fields(key = request.key, route = ?request.route))]
    pub async fn admit(&self, request: &RequestInfo<'_>) -> Result<Admission> {
        if !self.limiter.enabled() {
            return Ok(Admission::Proceed(Pass::new(request, false, None)));
        }

        if let Some(jail) = &self.jail {
            if jail.is_jailed(request.ip) {
                debug!(ip = %request.ip, "Rejecting jailed client");
                return Ok(Admission::Rejected(Rejection::Jailed));
            }
        }

        let only_count_failed = self.limiter.global_only_count_failed()
            || request
                .route
                .map_or(false, |route| self.limiter.route_only_count_failed(route));
        let increase = !only_count_failed;

        let mut verdict = None;

        if let Some(global) = self.limiter.check_global(request.key, increase) {
            if global.limited {
                let rejection = self.reject(request.key, request.ip, global).await?;
                return Ok(Admission::Rejected(rejection));
            }
            verdict = Some(global);
        }

        if let Some(route) = request.route {
            if let Some(routed) = self.limiter.check_route(route, request.key, increase) {
                if routed.limited {
                    let rejection = self.reject(request.key, request.ip, routed).await?;
                    return Ok(Admission::Rejected(rejection));
                }
                verdict = Some(routed);
            }
        }

        Ok(Admission::Proceed(Pass::new(request, only_count_failed, verdict)))
    }

    /// Settle an admitted request once its response status is known.
    ///
    /// Deferred scopes are charged only when `status` signals failure.
    #[instrument(skip(self, pass), fields(key = %pass.key, route = ?pass.route))]
    pub async fn finish(&self, pass: Pass, status: u16) -> Result<Completion> {
        if !pass.only_count_failed || status < FAILURE_STATUS {
            return Ok(Completion::Served(pass.verdict));
        }

        debug!(status = status, "Charging failed request");
        let mut verdict = pass.verdict;

        if let Some(global) = self.limiter.check_global(&pass.key, true) {
            if global.limited {
                let rejection = self.reject(&pass.key, pass.ip, global).await?;
                return Ok(Completion::Rejected(rejection));
            }
            verdict = Some(global);
        }

        if let Some(route) = pass.route.as_deref() {
            if let Some(routed) = self.limiter.check_route(route, &pass.key, true) {
                if routed.limited {
                    let rejection = self.reject(&pass.key, pass.ip, routed).await?;
                    return Ok(Completion::Rejected(rejection));
                }
                verdict = Some(routed);
            }
        }

        Ok(Completion::Served(verdict))
    }

    /// Turn a limited verdict into a rejection, escalating to the jail when
    /// the client has been limited too often.
    async fn reject(&self, key: &str, ip: IpAddr, verdict: Ratelimited) -> Result<Rejection> {
        if let Some(jail) = &self.jail {
            if jail.should_jail(key, &self.limiter) {
                jail.commit(ip).await?;
                return Ok(Rejection::Jailed);
            }
        }
        Ok(Rejection::Limited(verdict))
    }
}
