use clap::Parser;
use serde::Serialize;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use warden::admission::{Admission, Completion, Gatekeeper, Rejection, RequestInfo};
use warden::clock::SystemClock;
use warden::config::WardenConfig;
use warden::ratelimit::Ratelimited;

/// Replay a request log through the admission engine.
///
/// Each input line is `<ip> [route] [status]`; one JSON decision is printed
/// per line.
#[derive(Debug, Parser)]
#[command(name = "warden", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Request log to replay; stdin when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Log filter, overriding the configuration
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => WardenConfig::from_file(path)?,
        None => WardenConfig::default(),
    };
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json = true;
    }

    init_tracing(&config.logging.level, config.logging.json)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Warden replay");
    info!(
        enabled = config.enabled,
        global_limits = config.global.limits.len(),
        routes = config.routes.len(),
        jail = config.jail.is_some(),
        "Configuration loaded"
    );

    let gatekeeper = Gatekeeper::from_config(&config, Arc::new(SystemClock));

    let processed = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            replay(&gatekeeper, BufReader::new(file)).await?
        }
        None => replay(&gatekeeper, BufReader::new(tokio::io::stdin())).await?,
    };

    info!(
        requests = processed,
        buckets = gatekeeper.limiter().bucket_count(),
        jailed = gatekeeper.jail().map_or(0, |jail| jail.jailed_count()),
        "Replay finished"
    );
    Ok(())
}

/// Install the global subscriber, falling back to `info` on a bad filter.
fn init_tracing(level: &str, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .or_else(|_| EnvFilter::try_new("info"))?;

    // Decisions go to stdout, so logs stay on stderr.
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

/// One line of the request log.
#[derive(Debug, PartialEq, Eq)]
struct ReplayLine {
    ip: IpAddr,
    route: Option<String>,
    status: u16,
}

impl ReplayLine {
    /// Parse `<ip> [route] [status]`. A numeric second field is a status.
    fn parse(line: &str) -> anyhow::Result<Self> {
        let mut fields = line.split_whitespace();

        let ip = fields
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty line"))?
            .parse::<IpAddr>()?;

        let mut route = None;
        let mut status = 200;
        match (fields.next(), fields.next()) {
            (None, _) => {}
            (Some(only), None) => match only.parse::<u16>() {
                Ok(code) => status = code,
                Err(_) => route = Some(only.to_string()),
            },
            (Some(name), Some(code)) => {
                route = Some(name.to_string());
                status = code.parse()?;
            }
        }

        if fields.next().is_some() {
            anyhow::bail!("too many fields");
        }

        Ok(Self { ip, route, status })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum Decision {
    Allowed,
    Limited,
    Jailed,
}

#[derive(Debug, Serialize)]
struct Outcome {
    ip: IpAddr,
    route: Option<String>,
    decision: Decision,
    remaining: Option<u64>,
    retry_after_ms: Option<u64>,
}

impl Outcome {
    fn new(line: ReplayLine, decision: Decision, verdict: Option<&Ratelimited>) -> Self {
        Self {
            ip: line.ip,
            route: line.route,
            decision,
            remaining: verdict.map(|v| v.remaining),
            retry_after_ms: verdict.map(|v| v.retry_after_ms()),
        }
    }

    fn rejected(line: ReplayLine, rejection: Rejection) -> Self {
        match rejection {
            Rejection::Limited(verdict) => Self::new(line, Decision::Limited, Some(&verdict)),
            Rejection::Jailed => Self::new(line, Decision::Jailed, None),
        }
    }
}

/// Run every line through the gatekeeper, printing decisions to stdout.
async fn replay<R>(gatekeeper: &Gatekeeper, reader: R) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stdout = tokio::io::stdout();
    let mut processed = 0;

    while let Some(raw) = lines.next_line().await? {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with('#') {
            continue;
        }

        let line = match ReplayLine::parse(raw) {
            Ok(line) => line,
            Err(e) => {
                warn!(line = raw, error = %e, "Skipping malformed line");
                continue;
            }
        };

        let outcome = decide(gatekeeper, line).await?;
        let mut encoded = serde_json::to_vec(&outcome)?;
        encoded.push(b'\n');
        stdout.write_all(&encoded).await?;
        processed += 1;
    }

    stdout.flush().await?;
    Ok(processed)
}

async fn decide(gatekeeper: &Gatekeeper, line: ReplayLine) -> anyhow::Result<Outcome> {
    let key = line.ip.to_string();
    let request = RequestInfo {
        key: &key,
        ip: line.ip,
        route: line.route.as_deref(),
    };

    let pass = match gatekeeper.admit(&request).await? {
        Admission::Proceed(pass) => pass,
        Admission::Rejected(rejection) => return Ok(Outcome::rejected(line, rejection)),
    };

    let outcome = match gatekeeper.finish(pass, line.status).await? {
        Completion::Served(verdict) => Outcome::new(line, Decision::Allowed, verdict.as_ref()),
        Completion::Rejected(rejection) => Outcome::rejected(line, rejection),
    };
    Ok(outcome)
}
