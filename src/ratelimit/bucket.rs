//! Bucket identity.

use std::fmt;

use super::limit::Limit;

/// Scope names reserved by Warden itself.
pub mod scope {
    /// Limits applied to every request.
    pub const GLOBAL: &str = "global";
    /// Escalation limits counted by the jail.
    pub const JAILED: &str = "jailed";
}

/// A key that uniquely identifies one counting bucket.
///
/// Buckets are addressed by scope plus the numeric limit, so two declarations
/// of the same `requests/window` in one scope share a counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    /// The scope the limit was declared in
    pub scope: String,
    /// Maximum requests of the limit
    pub requests: u64,
    /// Window of the limit, in seconds
    pub window: u64,
}

impl BucketKey {
    /// Create a bucket key for a limit declared in `scope`.
    pub fn new(scope: &str, limit: &Limit) -> Self {
        Self {
            scope: scope.to_string(),
            requests: limit.requests,
            window: limit.window,
        }
    }

    /// The `scope:requests/window` form used in logs.
    pub fn to_string_key(&self) -> String {
        format!("{}:{}/{}", self.scope, self.requests, self.window)
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_key_to_string() {
        let key = BucketKey::new(scope::GLOBAL, &Limit::new(5, 60));
        assert_eq!(key.to_string_key(), "global:5/60");
        assert_eq!(key.to_string(), "global:5/60");
    }

    #[test]
    fn test_same_numbers_share_a_bucket() {
        let a = BucketKey::new("route.login", &Limit::parse("5/1m").unwrap());
        let b = BucketKey::new("route.login", &Limit::parse("5/60").unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn test_scopes_are_separate() {
        let limit = Limit::new(1, 1);
        assert_ne!(
            BucketKey::new(scope::GLOBAL, &limit),
            BucketKey::new(scope::JAILED, &limit)
        );
    }
}
