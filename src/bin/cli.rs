//! Listing Alert CLI
//!
//! Runs the alert service and offers one-shot maintenance commands.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use listing_alert::{
    error::Result,
    models::{Config, Messages, QueryRequest},
    pipeline::{PollScheduler, RetentionSweeper},
    services::{
        CommandHandler, KleinanzeigenFetcher, ListingFetcher, LogNotifier, Notifier,
        QueryService, TelegramClient, TelegramNotifier,
    },
    storage::{SqliteStorage, Storage},
};

/// Listing Alert - marketplace search notifications
#[derive(Parser, Debug)]
#[command(
    name = "listing-alert",
    version,
    about = "Polls marketplace searches and reports new listings"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "data/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll all queries, prune old records and answer chat commands
    Run,

    /// Add a query for an owner
    Add {
        /// Owner (chat) ID that receives notifications
        #[arg(long)]
        owner: i64,

        #[arg(long)]
        term: String,

        /// Location name or postal code
        #[arg(long, default_value = "")]
        location: String,

        #[arg(long, default_value_t = 0)]
        radius: u32,

        #[arg(long)]
        max_price: Option<u32>,

        #[arg(long)]
        min_price: Option<u32>,

        /// Search result URL used instead of term and location
        #[arg(long)]
        link: Option<String>,
    },

    /// List the queries of an owner
    List {
        #[arg(long)]
        owner: i64,
    },

    /// Remove a query of an owner
    Remove {
        #[arg(long)]
        owner: i64,

        #[arg(long)]
        id: i64,
    },

    /// Show the listings recorded for a query
    Seen {
        #[arg(long)]
        query: i64,
    },

    /// Run one retention sweep
    Prune,

    /// Run one poll cycle
    Poll,

    /// Validate the configuration
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Telegram client when a token is configured.
fn telegram_client(config: &Config) -> Result<Option<TelegramClient>> {
    match &config.telegram.token {
        Some(_) => TelegramClient::new(&config.telegram).map(Some),
        None => Ok(None),
    }
}

fn notifier_for(client: Option<&TelegramClient>) -> Arc<dyn Notifier> {
    match client {
        Some(client) => Arc::new(TelegramNotifier::new(client.clone())),
        None => {
            log::warn!("No Telegram token configured, notifications are only logged");
            Arc::new(LogNotifier)
        }
    }
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load_or_default(&cli.config).with_env();
    log::info!("Loaded configuration from {}", cli.config.display());

    if let Command::Validate = cli.command {
        log::info!("Validating configuration...");
        config.validate()?;
        KleinanzeigenFetcher::new(&config.fetcher)?;
        log::info!("✓ Config OK (including listing selectors)");
        return Ok(());
    }
    config.validate()?;

    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open(&config.storage.database_path)?);
    let messages = Arc::new(config.messages.clone());

    match cli.command {
        Command::Run => run(&config, storage, messages).await?,

        Command::Add {
            owner,
            term,
            location,
            radius,
            max_price,
            min_price,
            link,
        } => {
            let fetcher: Arc<dyn ListingFetcher> =
                Arc::new(KleinanzeigenFetcher::new(&config.fetcher)?);
            let service = QueryService::new(storage, fetcher, config.fetcher.max_radius_km);
            let request = QueryRequest {
                term,
                location,
                radius_km: radius,
                max_price,
                min_price,
                custom_link: link,
            };
            let query = service.create_query(request, owner).await?;
            log::info!("{}", messages.query_added(&query).plain);
        }

        Command::List { owner } => {
            let queries = storage.list_queries(owner).await?;
            if queries.is_empty() {
                log::info!("{}", messages.text(&messages.no_queries).plain);
            }
            for query in &queries {
                log::info!("{}", messages.query_summary(query).plain.replace('\n', " | "));
            }
        }

        Command::Remove { owner, id } => match storage.delete_query(id, owner).await? {
            Some(query) => log::info!("{}", messages.query_deleted(&query).plain),
            None => log::warn!("{}", messages.text(&messages.query_not_found).plain),
        },

        Command::Seen { query } => {
            let seen = storage.list_seen(query).await?;
            log::info!("Query {} has {} recorded listings", query, seen.len());
            for record in &seen {
                log::info!(
                    "  {} first seen {}{}",
                    record.listing_id,
                    record.first_seen_at.format("%Y-%m-%d %H:%M:%S"),
                    record
                        .location
                        .as_deref()
                        .map(|l| format!(" ({l})"))
                        .unwrap_or_default()
                );
            }
        }

        Command::Prune => {
            let sweeper = RetentionSweeper::new(storage, &config.scheduler);
            let pruned = sweeper.sweep_once(Utc::now()).await?;
            log::info!("Pruned {} records", pruned);
        }

        Command::Poll => {
            let fetcher: Arc<dyn ListingFetcher> =
                Arc::new(KleinanzeigenFetcher::new(&config.fetcher)?);
            let client = telegram_client(&config)?;
            let scheduler = PollScheduler::new(
                storage,
                fetcher,
                notifier_for(client.as_ref()),
                messages,
                config.scheduler.clone(),
                Duration::from_secs(config.fetcher.timeout_secs),
            );
            let report = scheduler.run_cycle().await?;
            log::info!("{:#?}", report);
        }

        Command::Validate => {}
    }

    Ok(())
}

/// Start every loop and wait for Ctrl-C.
async fn run(config: &Config, storage: Arc<dyn Storage>, messages: Arc<Messages>) -> Result<()> {
    let fetcher: Arc<dyn ListingFetcher> = Arc::new(KleinanzeigenFetcher::new(&config.fetcher)?);
    let client = telegram_client(config)?;
    let notifier = notifier_for(client.as_ref());

    let scheduler = Arc::new(PollScheduler::new(
        Arc::clone(&storage),
        Arc::clone(&fetcher),
        Arc::clone(&notifier),
        Arc::clone(&messages),
        config.scheduler.clone(),
        Duration::from_secs(config.fetcher.timeout_secs),
    ));
    let sweeper = RetentionSweeper::new(Arc::clone(&storage), &config.scheduler);

    let commands = async move {
        match client {
            Some(client) => {
                let queries = Arc::new(QueryService::new(
                    storage,
                    fetcher,
                    config.fetcher.max_radius_km,
                ));
                let handler = Arc::new(CommandHandler::new(queries, notifier, messages));
                handler.run(client).await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    log::info!("Listing alert running, press Ctrl-C to stop");

    tokio::select! {
        _ = scheduler.run() => {}
        _ = sweeper.run() => {}
        _ = commands => {}
        signal = tokio::signal::ctrl_c() => {
            signal?;
            log::info!("Shutting down");
        }
    }

    Ok(())
}
