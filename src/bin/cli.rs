//! jobwatch CLI
//!
//! Local execution entry point. For AWS Lambda, use `jobwatch-lambda`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use jobwatch::{
    config::{Credentials, admin_channel},
    error::Result,
    models::{Config, Destination},
    notify::{DiscordNotifier, LogNotifier},
    pipeline::{self, RunContext},
    services::{DescriptionService, HtmlListingExtractor, HttpPageSource},
    storage::{DuplicateStore, LocalStorage},
    utils::http,
};
use tokio_util::sync::CancellationToken;

/// jobwatch - relay fresh job postings to chat channels
#[derive(Parser, Debug)]
#[command(
    name = "jobwatch",
    version,
    about = "Relays fresh, matching job postings to chat channels"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Duplicate store directory (overrides storage.dir)
    #[arg(short, long)]
    storage_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch, filter and deliver new postings for every channel
    Run {
        /// Stop cleanly after this many seconds
        #[arg(long)]
        max_runtime_secs: Option<u64>,
    },

    /// Show what a run would deliver, without sending or recording
    Preview,

    /// Validate configuration and resolve channels
    Validate,

    /// Print the description of a posting
    Describe {
        /// Posting URL
        url: String,
    },

    /// Drop delivery records older than the given age
    Prune {
        #[arg(long)]
        older_than_days: u32,
    },

    /// Show duplicate store contents
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Cancel the token on Ctrl-C or when the runtime limit expires.
fn spawn_cancel_triggers(cancel: &CancellationToken, max_runtime: Option<Duration>) {
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, finishing the current posting...");
            token.cancel();
        }
    });

    if let Some(limit) = max_runtime {
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            log::warn!("Runtime limit of {}s reached", limit.as_secs());
            token.cancel();
        });
    }
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();
    init_logging(cli.verbose);

    log::info!("jobwatch starting...");

    let config = Config::load(&cli.config)?;
    log::info!("Loaded configuration from {}", cli.config.display());

    let storage_dir = cli
        .storage_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.storage.dir));
    let env = |key: &str| std::env::var(key).ok();

    match cli.command {
        Command::Run { max_runtime_secs } => {
            let credentials = Credentials::from_env()?;
            let destinations = Destination::resolve_all(&config, env)?;
            let admin = admin_channel(&config, env)?;

            let notifier = DiscordNotifier::new(&credentials.bot_token)
                .with_timeout(config.crawler.timeout_secs);
            let store = Arc::new(LocalStorage::new(&storage_dir));

            let cancel = CancellationToken::new();
            spawn_cancel_triggers(&cancel, max_runtime_secs.map(Duration::from_secs));

            let ctx = RunContext::from_config(Arc::new(config), store, Arc::new(notifier))?
                .with_admin_channel(admin)
                .with_cancel(cancel);

            let summary = pipeline::run_pipeline(&ctx, &destinations).await;
            summary.log();
        }

        Command::Preview => {
            let destinations = Destination::resolve_all(&config, env)?;
            let store = Arc::new(LocalStorage::new(&storage_dir));

            let cancel = CancellationToken::new();
            spawn_cancel_triggers(&cancel, None);

            let ctx = RunContext::from_config(Arc::new(config), store, Arc::new(LogNotifier))?
                .with_cancel(cancel);

            let summary = pipeline::preview(&ctx, &destinations).await;
            for report in &summary.reports {
                log::info!(
                    "[{}] {} new of {} matching postings",
                    report.label,
                    report.postings.len(),
                    report.matched
                );
                for posting in &report.postings {
                    log::info!("    {} | {}", posting.title, posting.url);
                }
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            let destinations = Destination::resolve_all(&config, env).inspect_err(|e| {
                log::error!("Channel resolution failed: {}", e);
            })?;
            log::info!("✓ Config OK");
            for destination in &destinations {
                log::info!(
                    "    {} -> {} (include: {:?}, exclude: {:?}, {} params)",
                    destination.label,
                    destination.id,
                    destination.include_keywords,
                    destination.exclude_keywords,
                    destination.query_params.len()
                );
            }

            match Credentials::from_env() {
                Ok(_) => log::info!("✓ Bot token present"),
                Err(e) => log::warn!("{}", e),
            }

            log::info!("All validations passed!");
        }

        Command::Describe { url } => {
            let client = http::create_async_client(&config.crawler)?;
            let source = Arc::new(HttpPageSource::new(client, &config.crawler));
            let extractor = Arc::new(HtmlListingExtractor::new(
                &config.selectors,
                &config.crawler.origin,
            )?);
            let descriptions = DescriptionService::new(
                source,
                extractor,
                config.crawler.user_agents.clone(),
                &config.descriptions,
            );

            let text = descriptions.describe_url(&url).await?;
            println!("{text}");
        }

        Command::Prune { older_than_days } => {
            let store = LocalStorage::new(&storage_dir);
            let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(older_than_days));
            let removed = store.prune(cutoff).await?;
            log::info!("Removed {} records older than {} days", removed, older_than_days);
        }

        Command::Info => {
            let store = LocalStorage::new(&storage_dir);
            log::info!("Storage directory: {}", store.root_dir().display());

            let counts = store.partition_counts().await?;
            if counts.is_empty() {
                log::info!("No deliveries recorded yet.");
            }
            for (destination, count) in counts {
                log::info!("    {}: {} delivered postings", destination, count);
            }
        }
    }

    log::info!("Done!");

    Ok(())
}
