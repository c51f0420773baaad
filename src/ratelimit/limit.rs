//! Limit declarations and the compact "N/window" notation.
//!
//! A limit is written as `"<requests>/<window><unit>"`, where every segment is
//! optional: `""`, `"1"`, `"1/1"` and `"1/s"` all mean one request per second,
//! and `"100/5m"` means one hundred requests per five minutes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, WardenError};

/// Time unit suffixes accepted in the limit notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Look up a unit suffix. An empty suffix means seconds.
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "" | "s" | "second" | "seconds" => Some(TimeUnit::Second),
            "m" | "minute" | "minutes" => Some(TimeUnit::Minute),
            "h" | "hour" | "hours" => Some(TimeUnit::Hour),
            "d" | "day" | "days" => Some(TimeUnit::Day),
            _ => None,
        }
    }

    /// Number of seconds in one of this unit.
    pub fn seconds(&self) -> u64 {
        match self {
            TimeUnit::Second => 1,
            TimeUnit::Minute => 60,
            TimeUnit::Hour => 3600,
            TimeUnit::Day => 86400,
        }
    }
}

/// Longest window accepted from text or config: one hundred years.
///
/// Keeps `now + window` representable as an [`std::time::Instant`].
pub const MAX_WINDOW_SECS: u64 = 100 * 365 * 86400;

/// A rate limit: at most `requests` requests per `window` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawLimit")]
pub struct Limit {
    /// Maximum requests allowed in the window
    pub requests: u64,
    /// Window length in seconds
    pub window: u64,
}

impl Limit {
    /// Create a limit from its parts.
    pub const fn new(requests: u64, window: u64) -> Self {
        Self { requests, window }
    }

    /// Parse the compact limit notation.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        let (requests, window) = spec.split_once('/').unwrap_or((spec, ""));

        let requests = if requests.is_empty() {
            1
        } else {
            requests
                .parse::<u64>()
                .map_err(|e| invalid(spec, format!("bad request count {:?}: {}", requests, e)))?
        };

        let unit_start = window
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(window.len());
        let (magnitude, suffix) = window.split_at(unit_start);

        let magnitude = if magnitude.is_empty() {
            1
        } else {
            magnitude
                .parse::<u64>()
                .map_err(|e| invalid(spec, format!("bad window {:?}: {}", magnitude, e)))?
        };

        let unit = TimeUnit::from_suffix(suffix)
            .ok_or_else(|| invalid(spec, format!("unknown time scale unit: {}", suffix)))?;

        let window = magnitude
            .checked_mul(unit.seconds())
            .ok_or_else(|| invalid(spec, "window overflows".to_string()))?;

        Self::checked(requests, window).map_err(|reason| invalid(spec, reason))
    }

    /// Validate parts read from text or config.
    fn checked(requests: u64, window: u64) -> std::result::Result<Self, String> {
        if requests == 0 {
            return Err("request count must be at least 1".to_string());
        }
        if window == 0 {
            return Err("window must be at least 1 second".to_string());
        }
        if window > MAX_WINDOW_SECS {
            return Err(format!("window exceeds {} seconds", MAX_WINDOW_SECS));
        }
        Ok(Self { requests, window })
    }

    /// The window as a [`Duration`], capped at [`MAX_WINDOW_SECS`].
    pub fn window_duration(&self) -> Duration {
        Duration::from_secs(self.window.min(MAX_WINDOW_SECS))
    }
}

fn invalid(spec: &str, reason: String) -> WardenError {
    WardenError::InvalidLimitSpec {
        spec: spec.to_string(),
        reason,
    }
}

impl FromStr for Limit {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        Limit::parse(s)
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}s", self.requests, self.window)
    }
}

/// Either limit notation or an already-parsed [`Limit`].
#[derive(Debug, Clone, Copy)]
pub enum LimitSpec<'a> {
    Text(&'a str),
    Parsed(Limit),
}

impl<'a> From<&'a str> for LimitSpec<'a> {
    fn from(s: &'a str) -> Self {
        LimitSpec::Text(s)
    }
}

impl<'a> From<&'a String> for LimitSpec<'a> {
    fn from(s: &'a String) -> Self {
        LimitSpec::Text(s.as_str())
    }
}

impl From<Limit> for LimitSpec<'_> {
    fn from(limit: Limit) -> Self {
        LimitSpec::Parsed(limit)
    }
}

impl From<&Limit> for LimitSpec<'_> {
    fn from(limit: &Limit) -> Self {
        LimitSpec::Parsed(*limit)
    }
}

/// Parse a single limit. Parsed limits pass through unchanged.
pub fn parse_limit<'a>(spec: impl Into<LimitSpec<'a>>) -> Result<Limit> {
    match spec.into() {
        LimitSpec::Text(text) => Limit::parse(text),
        LimitSpec::Parsed(limit) => Ok(limit),
    }
}

/// Parse every limit in order. Duplicates are kept.
pub fn parse_limits<'a, I, S>(specs: I) -> Result<Vec<Limit>>
where
    I: IntoIterator<Item = S>,
    S: Into<LimitSpec<'a>>,
{
    specs.into_iter().map(|spec| parse_limit(spec)).collect()
}

/// Config representation: either notation or explicit fields.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawLimit {
    Text(String),
    Requests(u64),
    Fields { requests: u64, window: u64 },
}

impl TryFrom<RawLimit> for Limit {
    type Error = WardenError;

    fn try_from(raw: RawLimit) -> Result<Self> {
        let (requests, window) = match raw {
            RawLimit::Text(text) => return Limit::parse(&text),
            RawLimit::Requests(requests) => (requests, 1),
            RawLimit::Fields { requests, window } => (requests, window),
        };
        Limit::checked(requests, window)
            .map_err(|reason| invalid(&format!("{}/{}", requests, window), reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let one_per_second = Limit::new(1, 1);
        for spec in ["", "1", "1/1", "/1", "/", "1/", "1/s", "1/second", "1/seconds", "1/1second"] {
            assert_eq!(Limit::parse(spec).unwrap(), one_per_second, "spec {:?}", spec);
        }
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(Limit::parse("1/1m").unwrap(), Limit::new(1, 60));
        assert_eq!(Limit::parse("50/1m").unwrap(), Limit::new(50, 60));
        assert_eq!(Limit::parse("10/minutes").unwrap(), Limit::new(10, 60));
        assert_eq!(Limit::parse("3/2h").unwrap(), Limit::new(3, 7200));
        assert_eq!(Limit::parse("1000/day").unwrap(), Limit::new(1000, 86400));
        assert_eq!(Limit::parse("5/30").unwrap(), Limit::new(5, 30));
    }

    #[test]
    fn test_parse_rejects_zero() {
        for spec in ["0/1s", "0", "1/0s", "1/0m", "0/0"] {
            assert!(
                matches!(Limit::parse(spec), Err(WardenError::InvalidLimitSpec { .. })),
                "spec {:?}",
                spec
            );
        }
    }

    #[test]
    fn test_parse_rejects_unbounded_window() {
        assert!(matches!(
            Limit::parse("1/10000000000000000000"),
            Err(WardenError::InvalidLimitSpec { .. })
        ));
        assert!(Limit::parse("1/36501d").is_err());
        assert_eq!(
            Limit::parse("1/36500d").unwrap(),
            Limit::new(1, MAX_WINDOW_SECS)
        );
    }

    #[test]
    fn test_parse_unknown_unit() {
        let err = Limit::parse("1/something").unwrap_err();
        assert!(matches!(err, WardenError::InvalidLimitSpec { .. }));
    }

    #[test]
    fn test_parse_bad_requests() {
        assert!(matches!(
            Limit::parse("many/1s"),
            Err(WardenError::InvalidLimitSpec { .. })
        ));
    }

    #[test]
    fn test_parse_passthrough() {
        let limit = Limit::new(7, 42);
        assert_eq!(parse_limit(limit).unwrap(), limit);
        assert_eq!(parse_limit(&limit).unwrap(), limit);
    }

    #[test]
    fn test_parse_limits_keeps_order_and_duplicates() {
        let limits = parse_limits(["", "1", "1/1", "2/1m"]).unwrap();
        assert_eq!(
            limits,
            vec![Limit::new(1, 1), Limit::new(1, 1), Limit::new(1, 1), Limit::new(2, 60)]
        );
    }

    #[test]
    fn test_parse_limits_fails_on_any_bad_entry() {
        assert!(parse_limits(["1/1s", "1/fortnight"]).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Limit::new(5, 60).to_string(), "5/60s");
        let limit: Limit = "5/1m".parse().unwrap();
        assert_eq!(limit, Limit::parse(&limit.to_string()).unwrap());
    }

    #[test]
    fn test_deserialize_text_and_fields() {
        let limits: Vec<Limit> =
            serde_yaml::from_str("- 10/1m\n- requests: 3\n  window: 5\n").unwrap();
        assert_eq!(limits, vec![Limit::new(10, 60), Limit::new(3, 5)]);

        let bad: std::result::Result<Vec<Limit>, _> = serde_yaml::from_str("- 10/1y\n");
        assert!(bad.is_err());
    }

    #[test]
    fn test_deserialize_rejects_zero_and_huge_windows() {
        for yaml in [
            "requests: 0\nwindow: 0\n",
            "requests: 1\nwindow: 0\n",
            "requests: 0\nwindow: 60\n",
            "requests: 1\nwindow: 18446744073709551615\n",
            "0\n",
            "\"1/0s\"\n",
        ] {
            let parsed: std::result::Result<Limit, _> = serde_yaml::from_str(yaml);
            assert!(parsed.is_err(), "yaml {:?}", yaml);
        }

        let limit: Limit = serde_yaml::from_str("3\n").unwrap();
        assert_eq!(limit, Limit::new(3, 1));
    }
}
