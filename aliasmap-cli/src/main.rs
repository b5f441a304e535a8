//! aliasmap CLI
//!
//! Probes a handle across the site registry and writes scan events to
//! stdout as JSON lines. Logs go to stderr.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use serde_json::json;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use aliasmap_core::{SiteRegistry, Tier};
use aliasmap_http::{HttpConfig, TriageConfig};
use aliasmap_runtime::{ScanOptions, Scanner, ScannerConfig};
use aliasmap_validate::ValidationMode;

#[derive(Parser)]
#[command(name = "aliasmap")]
#[command(author, version, about = "aliasmap: find which sites know a handle", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (0-3)
    #[arg(short, long, default_value = "1", global = true)]
    verbose: u8,

    /// TOML file with extra or overriding site definitions
    #[arg(long, env = "ALIASMAP_SITES", global = true)]
    sites: Option<PathBuf>,

    /// Proxy for all requests, e.g. socks5h://127.0.0.1:9050
    #[arg(long, env = "ALIASMAP_PROXY", global = true)]
    proxy: Option<String>,

    /// Rotate desktop user agents between requests
    #[arg(long, global = true)]
    rotate_user_agent: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum TierArg {
    Fundamental,
    Core,
    Optional,
    All,
}

impl TierArg {
    fn tier(self) -> Option<Tier> {
        match self {
            Self::Fundamental => Some(Tier::Fundamental),
            Self::Core => Some(Tier::Core),
            Self::Optional => Some(Tier::Optional),
            Self::All => None,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Probe a handle and stream events
    Scan {
        /// The handle to look up
        handle: String,

        /// Site tier to scan
        #[arg(short, long, value_enum, default_value = "fundamental")]
        tier: TierArg,

        /// Sites probed concurrently per window (1-10)
        #[arg(short, long, default_value = "6")]
        concurrency: usize,

        /// Skip secondary validation of inconclusive verdicts
        #[arg(long)]
        no_validate: bool,

        /// Also re-validate found verdicts without canonical or og:url evidence
        #[arg(long, conflicts_with = "no_validate")]
        strict: bool,

        /// Shortlist sites with a status-code triage first
        #[arg(long)]
        two_phase: bool,

        /// Do not record the scan in the precision tracker
        #[arg(long)]
        no_metrics: bool,

        /// Delay after each result in milliseconds
        #[arg(long, default_value = "10")]
        pacing_ms: u64,

        /// Write tracker metrics as JSON (default: metrics_<timestamp>.json)
        #[arg(long, num_args = 0..=1)]
        export_metrics: Option<Option<PathBuf>>,
    },

    /// Status-code triage only
    Triage {
        handle: String,

        #[arg(short, long, value_enum, default_value = "fundamental")]
        tier: TierArg,

        /// Concurrent requests (1-24)
        #[arg(short, long, default_value = "10")]
        concurrency: usize,
    },

    /// List registered sites
    Sites {
        #[arg(short, long, value_enum, default_value = "all")]
        tier: TierArg,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let registry = match &cli.sites {
        Some(path) => SiteRegistry::load(path)?,
        None => SiteRegistry::builtin(),
    };
    if !registry.rejected().is_empty() {
        warn!("{} site definitions were excluded", registry.rejected().len());
    }

    let config = ScannerConfig {
        http: HttpConfig {
            proxy: cli.proxy.clone(),
            rotate_user_agent: cli.rotate_user_agent,
            ..Default::default()
        },
        ..Default::default()
    };

    match cli.command {
        Commands::Scan {
            handle,
            tier,
            concurrency,
            no_validate,
            strict,
            two_phase,
            no_metrics,
            pacing_ms,
            export_metrics,
        } => {
            let validation = match (no_validate, strict) {
                (true, _) => None,
                (false, true) => Some(ValidationMode::Strict),
                (false, false) => Some(ValidationMode::InconclusiveOnly),
            };
            let options = ScanOptions::new(handle)
                .with_tier(tier.tier())
                .with_concurrency(concurrency)
                .with_validation(validation)
                .with_metrics(!no_metrics)
                .with_two_phase(two_phase)
                .with_pacing(Duration::from_millis(pacing_ms));

            let scanner = Scanner::from_config(registry, config)?;
            run_scan(&scanner, options).await?;

            if let Some(path) = export_metrics {
                let path = path.unwrap_or_else(|| {
                    let timestamp = chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S");
                    PathBuf::from(format!("metrics_{}.json", timestamp))
                });
                let export = scanner.tracker().lock().export_metrics();
                fs::write(&path, serde_json::to_string_pretty(&export)?)?;
                info!("Metrics saved to {}", path.display());
            }
        }
        Commands::Triage {
            handle,
            tier,
            concurrency,
        } => {
            let scanner = Scanner::from_config(registry, config)?;
            let triage = TriageConfig::default().with_concurrency(concurrency);
            let results = scanner.triage(&handle, tier.tier(), &triage).await?;
            let mut out = std::io::stdout().lock();
            for result in results {
                writeln!(out, "{}", serde_json::to_string(&result)?)?;
            }
        }
        Commands::Sites { tier } => {
            let mut out = std::io::stdout().lock();
            for site in registry.select(tier.tier()) {
                let line = json!({
                    "id": site.id,
                    "tier": site.tier,
                    "url": site.url_template,
                    "risk": site.risk,
                    "timeoutMs": site.timeout.as_millis() as u64,
                });
                writeln!(out, "{}", line)?;
            }
        }
    }

    Ok(())
}

async fn run_scan(scanner: &Scanner, options: ScanOptions) -> Result<()> {
    let mut stream = scanner.scan(options)?;
    while let Some(event) = stream.next().await {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", serde_json::to_string(&event)?)?;
        out.flush()?;
    }
    Ok(())
}
