use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use turnstile::config::{LogFormat, TurnstileConfig};
use turnstile::ratelimit::RateLimiter;
use turnstile::replay::{ReplayHarness, Verdict};

/// Replay request lines through the Turnstile admission engine.
///
/// Each input line is `<client-ip> <VERB> <resource> [authorization]`.
#[derive(Parser, Debug)]
#[command(name = "turnstile", version)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Request lines to replay (stdin if omitted)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Log level, overrides the configured level (RUST_LOG wins over both)
    #[arg(long)]
    log_level: Option<String>,

    /// Print verdicts as JSON lines
    #[arg(long)]
    json: bool,

    /// Flag an IP as hostile before replaying (needs store_hostile_ips)
    #[arg(long = "hostile", value_name = "IP")]
    hostile_ips: Vec<String>,

    /// Register an authorization value as approved before replaying
    #[arg(long = "approve", value_name = "TOKEN")]
    approved_users: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = TurnstileConfig::load(args.config.as_deref()).context("loading configuration")?;
    init_tracing(&config, args.log_level.as_deref());

    info!("Starting Turnstile replay");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let behaviour = config.behaviour().context("validating configuration")?;
    let rate_limiter = Arc::new(RateLimiter::new(behaviour)?);
    info!(
        request_limit = rate_limiter.behaviour().request_limit,
        window_seconds = rate_limiter.behaviour().window_seconds,
        "Rate limiter initialized"
    );

    for ip in &args.hostile_ips {
        rate_limiter.record_ip_as_hostile(ip);
    }
    for token in &args.approved_users {
        rate_limiter.store_user_auth(token);
    }

    let sweeper = tokio::spawn(purge_idle_identities(rate_limiter.clone()));

    let harness = ReplayHarness::new(rate_limiter);
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let verdicts = harness.run(reader).await;
    sweeper.abort();
    let verdicts = verdicts?;
    for verdict in &verdicts {
        print_verdict(verdict, args.json)?;
    }

    info!("Turnstile replay finished");
    Ok(())
}

/// Drop idle identities once per window, at most hourly, for as long as
/// the replay runs.
async fn purge_idle_identities(rate_limiter: Arc<RateLimiter>) {
    let period = Duration::from_secs(rate_limiter.behaviour().window_seconds.clamp(1, 3600));
    let mut interval = tokio::time::interval(period);
    interval.tick().await;

    loop {
        interval.tick().await;
        let purged = rate_limiter.purge_expired();
        debug!(purged, "Idle identity sweep");
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// CLI level, which takes precedence over the configured one.
fn init_tracing(config: &TurnstileConfig, cli_level: Option<&str>) {
    let level = cli_level.unwrap_or(&config.logging.level);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match config.logging.format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

fn print_verdict(verdict: &Verdict, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(verdict)?);
    } else {
        let retry = verdict
            .retry_after_secs
            .map(|secs| format!(" (retry after {}s)", secs))
            .unwrap_or_default();
        println!(
            "{:>4} {} {} {} {}{}",
            verdict.line, verdict.status, verdict.client_ip, verdict.endpoint, verdict.message, retry
        );
    }
    Ok(())
}
