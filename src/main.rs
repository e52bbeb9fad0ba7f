//! Shelfscan main entry point
//!
//! This is the command-line interface for the Shelfscan catalog engine.

use anyhow::{bail, Context};
use clap::Parser;
use shelfscan::cache::{BackingStore, MemoryStore, ResultCache, SqliteStore};
use shelfscan::config::{load_config_with_hash, Config, ConfigLayer, RequestDelay, TargetConfig};
use shelfscan::engine::{Engine, ReqwestTransport, Target, DEFAULT_USER_AGENT};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Shelfscan: a generic catalog page engine
///
/// Shelfscan fetches catalog pages under the site's delay, retry and proxy
/// policy, classifies each as valid, not found or a dead link, and prints
/// one JSON record per target.
#[derive(Parser, Debug)]
#[command(name = "shelfscan")]
#[command(version)]
#[command(about = "A generic catalog fetch-and-extract engine", long_about = None)]
struct Cli {
    /// Path to TOML site bundle
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Target links (absolute, or relative to the site host)
    #[arg(value_name = "URL")]
    urls: Vec<String>,

    /// Read additional target links from a file, one per line
    #[arg(long, value_name = "FILE")]
    urls_file: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Resolve the configuration and print it without fetching anything
    #[arg(long)]
    dry_run: bool,

    /// Override the request delay, in seconds ("3,5" or "2")
    #[arg(long, value_name = "MIN,MAX")]
    delay: Option<RequestDelay>,

    /// Override the retry count
    #[arg(long)]
    retries: Option<u32>,

    /// Override the proxy pool
    #[arg(long, value_name = "ID")]
    proxy_pool: Option<String>,

    /// Maximum number of targets processed at once
    #[arg(long)]
    workers: Option<usize>,

    /// Drop every cached outcome before running
    #[arg(long)]
    fresh: bool,
}

impl Cli {
    /// The override layer formed by command-line flags
    fn overrides(&self) -> ConfigLayer {
        ConfigLayer {
            delay: self.delay.map(|d| (d.min(), d.max())),
            max_retries: self.retries,
            proxy_pool: self.proxy_pool.clone(),
            ..ConfigLayer::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    let target_config = Arc::new(
        config
            .resolve(&cli.overrides())
            .context("failed to resolve site configuration")?,
    );

    let urls = collect_urls(&cli)?;

    if cli.dry_run {
        return handle_dry_run(&config, &target_config, &urls);
    }

    if urls.is_empty() {
        bail!("no target URLs given (pass them as arguments or with --urls-file)");
    }

    handle_run(&cli, &config, target_config, urls).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// Logs go to stderr so stdout carries only result records.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("shelfscan=info,warn"),
            1 => EnvFilter::new("shelfscan=debug,info"),
            2 => EnvFilter::new("shelfscan=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Gathers target links from arguments and the optional links file
fn collect_urls(cli: &Cli) -> anyhow::Result<Vec<String>> {
    let mut urls = cli.urls.clone();
    if let Some(path) = &cli.urls_file {
        urls.extend(read_urls_file(path)?);
    }
    Ok(urls)
}

/// Reads one link per line, skipping blanks and `#` comments
fn read_urls_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Handles the --dry-run mode: prints the effective configuration
fn handle_dry_run(
    config: &Config,
    target_config: &TargetConfig,
    urls: &[String],
) -> anyhow::Result<()> {
    println!("=== Shelfscan Dry Run ===\n");

    println!("Effective configuration:");
    println!("{}", serde_json::to_string_pretty(&target_config.to_json())?);

    println!("\nFields:");
    for &kind in target_config.fields() {
        let optional = if target_config.is_optional(kind) { ", optional" } else { "" };
        println!("  - {}: {}{}", kind.as_str(), kind.description(), optional);
    }

    println!("\nProxy pools ({}):", config.proxy_pools.len());
    for pool in &config.proxy_pools {
        println!("  - {} ({} proxies)", pool.id, pool.proxies.len());
    }

    println!("\nCache:");
    match &config.cache.database_path {
        Some(path) => println!("  SQLite: {}", path),
        None => println!("  In memory"),
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would process {} target(s)", urls.len());
    for url in urls {
        match target_config.target_url(url) {
            Ok(resolved) => println!("  * {}", resolved),
            Err(e) => println!("  ✗ {} ({})", url, e),
        }
    }

    Ok(())
}

/// Logs how many cached outcomes of each kind a run starts with
fn log_cache_summary(store: &dyn BackingStore) -> anyhow::Result<()> {
    let counts = store.count_by_state()?;
    let negative: usize = counts
        .iter()
        .filter(|(state, _)| state.is_negative())
        .map(|(_, n)| n)
        .sum();
    for (state, count) in &counts {
        tracing::debug!("Cached {}: {}", state, count);
    }
    if negative > 0 {
        tracing::info!("{} link(s) are cached as not found or dead", negative);
    }
    Ok(())
}

/// Handles the main run: processes every target and prints JSON lines
async fn handle_run(
    cli: &Cli,
    config: &Config,
    target_config: Arc<TargetConfig>,
    urls: Vec<String>,
) -> anyhow::Result<()> {
    let store: Arc<dyn BackingStore> = match &config.cache.database_path {
        Some(path) => {
            let store = SqliteStore::new(Path::new(path))
                .with_context(|| format!("failed to open cache {}", path))?;
            tracing::info!("Using cache database {} ({} entries)", path, store.len()?);
            Arc::new(store)
        }
        None => Arc::new(MemoryStore::new()),
    };

    if cli.fresh {
        tracing::info!("Clearing cached outcomes");
        store.clear()?;
    } else {
        log_cache_summary(store.as_ref())?;
    }

    let user_agent = config
        .engine
        .user_agent
        .clone()
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
    let workers = cli.workers.unwrap_or_else(|| config.workers());

    let engine = Engine::new(
        ReqwestTransport::with_user_agent(user_agent),
        config.proxy_pools(),
        Arc::new(ResultCache::new(store)),
    )
    .with_workers(workers);
    engine.check_config(&target_config)?;

    tracing::info!("Processing {} target(s) with {} worker(s)", urls.len(), workers);

    let targets = urls
        .into_iter()
        .map(|url| Target::new(url, Arc::clone(&target_config)))
        .collect();
    let reports = Arc::new(engine).run_batch(targets).await;

    let mut ok = 0;
    for report in &reports {
        if report.result.is_ok() {
            ok += 1;
        }
        println!("{}", serde_json::to_string(&report.to_json())?);
    }

    tracing::info!(
        "Done: {} item(s), {} error(s)",
        ok,
        reports.len() - ok
    );

    Ok(())
}
