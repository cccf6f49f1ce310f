use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use permit_gate::config::GateSettings;
use permit_gate::{RateLimiter, RateLimiterConfig, RateLimiterRegistry};

const SERVICE_NAME: &str = "flightSearchService";

#[derive(Debug, Parser)]
#[command(name = "permit-gate", version, about = "Replay rate limiter usage scenarios")]
struct Cli {
    /// YAML settings used by the `concurrent` and `metrics` scenarios
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Scenario>,
}

#[derive(Debug, Clone, Subcommand)]
enum Scenario {
    /// Print the default configuration
    Defaults,
    /// One permit per second, one second timeout: every call eventually passes
    Basic,
    /// One permit per second, 250 ms timeout: waiting calls are rejected
    Timeout,
    /// Wrap an operation that has its own error type
    Fallible,
    /// Fire many async calls at one limiter from the settings registry
    Concurrent {
        #[arg(long, default_value = SERVICE_NAME)]
        limiter: String,
        #[arg(long, default_value_t = 20)]
        tasks: usize,
    },
    /// Print a JSON metrics snapshot of every limiter in the settings registry
    Metrics,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let registry = load_registry(cli.config.as_deref())?;

    match cli.command {
        Some(scenario) => run(scenario, &registry).await?,
        None => {
            for scenario in [Scenario::Defaults, Scenario::Basic, Scenario::Timeout, Scenario::Fallible] {
                run(scenario, &registry).await?;
            }
        }
    }

    Ok(())
}

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if cli.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_registry(path: Option<&std::path::Path>) -> anyhow::Result<RateLimiterRegistry> {
    let settings = match path {
        Some(path) => GateSettings::from_file(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => GateSettings::default(),
    };
    Ok(RateLimiterRegistry::from_settings(&settings)?)
}

async fn run(scenario: Scenario, registry: &RateLimiterRegistry) -> anyhow::Result<()> {
    info!(scenario = ?scenario, "Running scenario");
    match scenario {
        Scenario::Defaults => display_defaults(),
        Scenario::Basic => {
            let config = RateLimiterConfig::new(1, Duration::from_secs(1), Duration::from_secs(1))?;
            blocking(move || search_repeatedly(config)).await??
        }
        Scenario::Timeout => {
            let config = RateLimiterConfig::new(1, Duration::from_secs(1), Duration::from_millis(250))?;
            blocking(move || search_repeatedly(config)).await??
        }
        Scenario::Fallible => blocking(fallible_search).await??,
        Scenario::Concurrent { limiter, tasks } => {
            concurrent_search(registry.rate_limiter(&limiter), tasks).await
        }
        Scenario::Metrics => print_metrics(registry)?,
    }
    Ok(())
}

/// Run blocking limiter calls off the async runtime.
async fn blocking<F>(scenario: F) -> anyhow::Result<anyhow::Result<()>>
where
    F: FnOnce() -> anyhow::Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(scenario)
        .await
        .context("scenario thread panicked")
}

fn display_defaults() {
    let config = RateLimiterConfig::of_defaults();
    info!(
        limit_for_period = config.limit_for_period(),
        limit_refresh_period_nanos = config.limit_refresh_period().as_nanos() as u64,
        timeout_millis = config.timeout_duration().as_millis() as u64,
        "Default configuration"
    );
}

/// Stand-in for the throttled remote call.
fn search_flights(route: &str) -> String {
    format!("{}: AA101, UA202, DL303", route)
}

fn search_repeatedly(config: RateLimiterConfig) -> anyhow::Result<()> {
    let registry = RateLimiterRegistry::of(config);
    let limiter = registry.rate_limiter(SERVICE_NAME);
    let search = limiter.decorate(|| search_flights("NYC-LAX"));
    let start = Instant::now();

    for call in 1..=3 {
        match search() {
            Ok(flights) => info!(call, elapsed = ?start.elapsed(), flights = %flights, "Search completed"),
            Err(err) => warn!(call, elapsed = ?start.elapsed(), error = %err, "Search rejected"),
        }
    }
    Ok(())
}

fn fallible_search() -> anyhow::Result<()> {
    let config = RateLimiterConfig::new(1, Duration::from_secs(1), Duration::from_secs(1))?;
    let limiter = RateLimiterRegistry::of(config).rate_limiter(SERVICE_NAME);

    let search = limiter.decorate_fallible(|| -> anyhow::Result<String> {
        anyhow::bail!("flight search backend unavailable")
    });

    match search() {
        Ok(flights) => info!(flights = %flights, "Search completed"),
        Err(err) => warn!(error = %err, "Search failed"),
    }
    Ok(())
}

async fn concurrent_search(limiter: Arc<RateLimiter>, tasks: usize) {
    let start = Instant::now();
    let calls = (0..tasks).map(|_| {
        let limiter = Arc::clone(&limiter);
        async move {
            limiter
                .execute_async(async { search_flights("NYC-LAX") })
                .await
        }
    });

    let outcomes = futures::future::join_all(calls).await;
    let admitted = outcomes.iter().filter(|outcome| outcome.is_ok()).count();

    info!(
        limiter = %limiter.name(),
        admitted,
        rejected = tasks - admitted,
        elapsed = ?start.elapsed(),
        "Concurrent searches finished"
    );
}

fn print_metrics(registry: &RateLimiterRegistry) -> anyhow::Result<()> {
    let snapshots: Vec<_> = registry
        .all_rate_limiters()
        .iter()
        .map(|limiter| limiter.metrics())
        .collect();
    println!("{}", serde_json::to_string_pretty(&snapshots)?);
    Ok(())
}
