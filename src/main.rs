//! VEGA — Volatility Earnings Gap Analyzer
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds the network stack (proxy pool, rotating sessions), and runs
//! either a full earnings scan or a single-ticker analysis. Ctrl+C
//! cancels a running scan at its next checkpoint instead of killing
//! the process mid-request.

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use vega::cache::ScanCache;
use vega::config;
use vega::engine::scanner::EarningsScanner;
use vega::net::proxy::ProxyPool;
use vega::net::session::SessionManager;
use vega::providers::calendar::NasdaqCalendar;
use vega::providers::otc::OtcList;
use vega::providers::yahoo::YahooProvider;
use vega::types::{AnalysisResult, ScanStatus};

const BANNER: &str = r#"
__     _______ ____    _
\ \   / / ____/ ___|  / \
 \ \ / /|  _|| |  _  / _ \
  \ V / | |__| |_| |/ ___ \
   \_/  |_____\____/_/   \_\

  Volatility Earnings Gap Analyzer
  v0.1.0
"#;

#[derive(Parser, Debug)]
#[command(name = "vega")]
#[command(about = "Volatility earnings gap analyzer")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Bare date shorthand for `scan YYYY-MM-DD`
    #[arg(value_parser = parse_date)]
    date: Option<NaiveDate>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan the earnings calendar (today when no date is given)
    Scan {
        /// Calendar date, YYYY-MM-DD
        #[arg(value_parser = parse_date)]
        date: Option<NaiveDate>,
    },
    /// Analyze a single ticker outside the calendar flow
    Analyze {
        /// Ticker symbol
        ticker: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = config::AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    // Print startup banner
    println!("{BANNER}");
    info!(
        batch_size = cfg.scan.batch_size,
        concurrency = cfg.scan.analysis_concurrency,
        history_range = %cfg.scan.history_range,
        proxies = cfg.proxy.enabled,
        "VEGA starting up"
    );

    // -- Cache and OTC snapshot --------------------------------------------

    let cache = ScanCache::new(&cfg.cache);
    if let Err(e) = cache.purge_expired() {
        warn!(error = %e, "Cache purge failed");
    }

    let otc = Arc::new(OtcList::load(&cfg.otc.snapshot_path)?);
    info!(symbols = otc.len().await, "OTC snapshot loaded");

    // -- Network stack -------------------------------------------------------

    let pool = Arc::new(ProxyPool::new(&cfg.proxy)?);
    if pool.is_enabled() {
        let observer = |msg: &str| info!("{msg}");
        let size = pool.build_pool(Some(&observer)).await;
        if size == 0 {
            warn!("No working proxies; continuing with direct connections");
        }
    }

    let sessions = Arc::new(
        SessionManager::new(
            pool,
            Duration::from_secs(cfg.scan.request_timeout_secs),
        )
        .await?,
    );

    // Refresh the OTC snapshot in the background; the loaded snapshot
    // keeps serving until the refresh lands.
    if cfg.otc.refresh_on_start {
        let otc = otc.clone();
        let sessions = sessions.clone();
        tokio::spawn(async move {
            match otc.refresh(&sessions).await {
                Ok(count) => info!(count, "OTC snapshot refreshed"),
                Err(e) => warn!(error = %e, "OTC refresh failed; keeping existing snapshot"),
            }
        });
    }

    // -- Scanner --------------------------------------------------------------

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let scanner = EarningsScanner::new(
        Arc::new(NasdaqCalendar::new(sessions.clone())),
        Arc::new(YahooProvider::new(sessions.clone())),
        sessions,
        cache,
        otc,
        cfg.scan.clone(),
        cancel_rx,
    );

    match cli.command.unwrap_or(Commands::Scan { date: cli.date }) {
        Commands::Analyze { ticker } => {
            match scanner.analyze_single(&ticker).await? {
                Some(result) => print_results(std::slice::from_ref(&result)),
                None => println!("No analysis available for {}", ticker.trim().to_uppercase()),
            }
        }
        Commands::Scan { date } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            info!(%date, "Scanning earnings calendar");
            let progress = progress_logger();

            let scan = scanner.scan(date, Some(&progress));
            tokio::pin!(scan);

            let report = tokio::select! {
                result = &mut scan => result?,
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl+C received; cancelling at next checkpoint");
                    let _ = cancel_tx.send(true);
                    (&mut scan).await?
                }
            };

            print_results(&report.results);
            match report.status {
                ScanStatus::Completed => {
                    info!(results = report.results.len(), "Scan finished");
                }
                ScanStatus::Cancelled => {
                    warn!(partial = report.results.len(), "Scan cancelled; partial results shown");
                }
            }
        }
    }

    Ok(())
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| format!("invalid date (expected YYYY-MM-DD): {e}"))
}

/// Progress observer that logs roughly every 10%.
fn progress_logger() -> impl Fn(f32) + Send + Sync {
    let last_bucket = std::sync::Mutex::new(-1i32);
    move |pct: f32| {
        let bucket = (pct / 10.0) as i32;
        let mut last = match last_bucket.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        if bucket > *last {
            *last = bucket;
            info!(progress = format!("{pct:.0}%"), "Scanning");
        }
    }
}

/// Render results as a fixed-width table, ranked best-first.
fn print_results(results: &[AnalysisResult]) {
    if results.is_empty() {
        println!("No results.");
        return;
    }
    println!();
    println!(
        "{:<8} {:>10} {:>10} {:>10} {:>7} {:>10} {:>9}  {:<12} {}",
        "Ticker", "Price", "Mkt Cap", "Avg Vol", "IV/RV", "Slope", "Exp Move", "Earnings", "Verdict"
    );
    for r in results {
        println!(
            "{:<8} {:>10} {:>10} {:>10} {:>7} {:>10} {:>9}  {:<12} {}",
            r.ticker,
            fmt_opt(r.current_price, |v| format!("{v:.2}")),
            fmt_opt(r.market_cap, fmt_compact),
            fmt_opt(r.avg_volume, fmt_compact),
            fmt_opt(r.iv_rv_ratio, |v| format!("{v:.2}")),
            fmt_opt(r.term_slope, |v| format!("{v:.5}")),
            fmt_opt(r.expected_move_pct, |v| format!("{v:.1}%")),
            r.earnings_time.label(),
            r.recommendation,
        );
    }
    println!();
}

fn fmt_opt(value: Option<f64>, render: impl Fn(f64) -> String) -> String {
    value.map(render).unwrap_or_else(|| "-".to_string())
}

/// Compact large counts: 1.5M, 2.3B.
fn fmt_compact(v: f64) -> String {
    if v >= 1e12 {
        format!("{:.1}T", v / 1e12)
    } else if v >= 1e9 {
        format!("{:.1}B", v / 1e9)
    } else if v >= 1e6 {
        format!("{:.1}M", v / 1e6)
    } else if v >= 1e3 {
        format!("{:.1}K", v / 1e3)
    } else {
        format!("{v:.0}")
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vega=info"));

    let json_logging = std::env::var("VEGA_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
