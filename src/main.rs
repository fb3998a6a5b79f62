use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use br_aqi::cache::FetchCache;
use br_aqi::config::AppConfig;
use br_aqi::connectors::http::ReqwestHttp;
use br_aqi::domain::TimeWindow;
use br_aqi::pipeline::runner::{run_extract, run_normalize, run_validate};
use br_aqi::pipeline::storage::{CanonicalStore, RawStore};
use br_aqi::registry::SourceRegistry;

#[derive(Parser)]
#[command(name = "br-aqi")]
#[command(about = "Brasília air quality data pipeline")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "br-aqi.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download raw data from all configured sources into the bronze layer
    Extract {
        /// Earliest date (ISO format) from which to retrieve data
        #[arg(long, default_value = "2020-01-01")]
        since: String,
        /// Latest date (ISO format), or 'today'
        #[arg(long, default_value = "today")]
        until: String,
    },
    /// Normalize bronze data into the canonical silver layer
    Normalize,
    /// Validate the silver layer; exits non-zero on any error-severity issue
    Validate,
    /// Run extract, normalize and validate in sequence
    Run {
        #[arg(long, default_value = "2020-01-01")]
        since: String,
        #[arg(long, default_value = "today")]
        until: String,
    },
}

fn parse_date(value: &str) -> anyhow::Result<NaiveDate> {
    if value.eq_ignore_ascii_case("today") {
        return Ok(Utc::now().date_naive());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("'{value}' is not an ISO date (YYYY-MM-DD)"))
}

fn window_from_args(since: &str, until: &str) -> anyhow::Result<TimeWindow> {
    let since = parse_date(since)?;
    let until = parse_date(until)?;
    if until < since {
        bail!("until date must be on or after since date");
    }
    Ok(TimeWindow::from_dates(since, until))
}

async fn extract(config: &AppConfig, registry: &SourceRegistry, window: TimeWindow) -> anyhow::Result<()> {
    let cache = Arc::new(FetchCache::new(&config.cache_dir));
    let raw_store = RawStore::new(&config.bronze_dir);
    let http = Arc::new(ReqwestHttp::new()?);
    let cancel = Arc::new(AtomicBool::new(false));

    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling remaining sources");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    let summary = run_extract(
        registry,
        window,
        cache,
        &raw_store,
        http,
        config.retry_policy(),
        cancel,
    )
    .await;
    for (source_id, count) in &summary.fetched {
        println!("extracted {source_id}: {count} records");
    }
    for (source_id, error) in &summary.failed {
        println!("failed {source_id}: {error}");
    }
    info!(
        fetched = summary.fetched.len(),
        failed = summary.failed.len(),
        "extraction complete"
    );
    Ok(())
}

fn normalize(config: &AppConfig, registry: &SourceRegistry) -> anyhow::Result<()> {
    let raw_store = RawStore::new(&config.bronze_dir);
    let canonical_store = CanonicalStore::new(&config.silver_dir);
    let summary = run_normalize(registry, &raw_store, &canonical_store, Utc::now())?;
    println!(
        "normalized {} records ({} discarded)",
        summary.produced, summary.discarded
    );
    Ok(())
}

/// Returns false when any file fails validation.
fn validate(config: &AppConfig, registry: &SourceRegistry) -> anyhow::Result<bool> {
    let canonical_store = CanonicalStore::new(&config.silver_dir);
    let reports = run_validate(registry, &canonical_store)?;
    let mut all_passed = true;
    for (path, report) in &reports {
        if report.issues.is_empty() {
            continue;
        }
        println!("issues in {}:", path.display());
        for issue in &report.issues {
            let record = issue
                .record
                .map(|i| format!("record {i}"))
                .unwrap_or_else(|| "batch".to_string());
            println!(" - [{:?}] {} ({}): {}", issue.severity, issue.kind.as_str(), record, issue.detail);
        }
        if !report.passed() {
            all_passed = false;
        }
    }
    if all_passed {
        println!("all files passed validation");
    }
    Ok(all_passed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    br_aqi::logging::init_logging();

    let cli = Cli::parse();
    let config = AppConfig::load(Path::new(&cli.config))?;
    let registry = SourceRegistry::load_dir(&config.registry_dir)?;
    info!(sources = registry.len(), "registry loaded");

    match cli.command {
        Commands::Extract { since, until } => {
            extract(&config, &registry, window_from_args(&since, &until)?).await?;
        }
        Commands::Normalize => normalize(&config, &registry)?,
        Commands::Validate => {
            if !validate(&config, &registry)? {
                std::process::exit(1);
            }
        }
        Commands::Run { since, until } => {
            extract(&config, &registry, window_from_args(&since, &until)?).await?;
            normalize(&config, &registry)?;
            if !validate(&config, &registry)? {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
