//! Side effects fired when a range is jailed.

use async_trait::async_trait;
use std::net::IpAddr;
use tracing::warn;

use crate::error::Result;

/// Receives each newly jailed range exactly once.
///
/// Reporters run sequentially inside [`Jail::commit`](super::Jail::commit);
/// an error stops the remaining reporters and is returned to the caller.
/// Timeouts and retries are the reporter's own business.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Report that `identity` got `range` jailed.
    async fn report(&self, identity: IpAddr, range: &str) -> Result<()>;
}

/// Logs every ban at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

#[async_trait]
impl Reporter for TracingReporter {
    async fn report(&self, identity: IpAddr, range: &str) -> Result<()> {
        warn!(ip = %identity, range = range, "IP range jailed");
        Ok(())
    }
}

/// Adapts a synchronous closure into a [`Reporter`].
pub struct FnReporter<F> {
    f: F,
}

impl<F> FnReporter<F>
where
    F: Fn(IpAddr, &str) -> Result<()> + Send + Sync,
{
    /// Wrap `f` as a reporter.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Reporter for FnReporter<F>
where
    F: Fn(IpAddr, &str) -> Result<()> + Send + Sync,
{
    async fn report(&self, identity: IpAddr, range: &str) -> Result<()> {
        (self.f)(identity, range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WardenError;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_fn_reporter_passes_arguments() {
        let seen = Mutex::new(Vec::new());
        let reporter = FnReporter::new(|ip: IpAddr, range: &str| {
            seen.lock().push((ip, range.to_string()));
            Ok(())
        });

        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        reporter.report(ip, "1.2.3.0/24").await.unwrap();

        assert_eq!(*seen.lock(), vec![(ip, "1.2.3.0/24".to_string())]);
    }

    #[tokio::test]
    async fn test_fn_reporter_propagates_errors() {
        let reporter =
            FnReporter::new(|_: IpAddr, _: &str| Err(WardenError::Report("firewall down".into())));

        let err = reporter
            .report("::1".parse().unwrap(), "0000:0000:0000:0000::/64")
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::Report(msg) if msg == "firewall down"));
    }

    #[tokio::test]
    async fn test_tracing_reporter_succeeds() {
        let ip: IpAddr = "10.1.2.3".parse().unwrap();
        assert!(TracingReporter.report(ip, "10.1.2.0/24").await.is_ok());
    }
}
