use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use newsdesk_core::{storage::Database, AppConfig};

mod commands;

#[derive(Parser)]
#[command(name = "newsdesk")]
#[command(author, version, about = "News aggregation daemon with cached category feeds")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Background daemon serving news and running the periodic jobs
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// Show cached articles of a category (asks the daemon)
    News {
        category: String,
        #[arg(short, long)]
        language: Option<String>,
        #[arg(short, long)]
        country: Option<String>,
        /// Drop the cached entries first so the daemon refetches
        #[arg(short, long)]
        refresh: bool,
    },
    /// Search the news provider across categories (uncached)
    Search {
        #[arg(required = true)]
        categories: Vec<String>,
        #[arg(short, long, default_value_t = 1)]
        page: u32,
        #[arg(short = 's', long, default_value_t = 100)]
        page_size: u32,
        #[arg(short, long)]
        language: Option<String>,
        #[arg(short, long)]
        country: Option<String>,
    },
    /// Balanced page of the seeded corpus
    Corpus {
        /// Category to keep (repeatable)
        #[arg(short, long = "category")]
        categories: Vec<String>,
        #[arg(short, long, default_value_t = 0)]
        page: u32,
        #[arg(short = 's', long)]
        page_size: Option<u32>,
    },
    /// A user's latest recommendations (asks the daemon)
    Latest {
        user_id: String,
        #[arg(short, long, default_value_t = 0)]
        page: i64,
        #[arg(short = 's', long)]
        page_size: Option<usize>,
    },
    /// Run one notification batch now
    Notify,
    /// Run one deletion sweep now
    Sweep,
    /// List the available categories
    Categories,
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start the background daemon
    Start,
    /// Stop the background daemon, letting running jobs finish
    Stop {
        /// Seconds to wait for the daemon to exit
        #[arg(long, default_value_t = 120)]
        timeout: u64,
        /// Send SIGKILL if the daemon is still running after the timeout
        #[arg(long)]
        force: bool,
    },
    /// Check daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Arc::new(AppConfig::load()?);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.general.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Daemon { action } => match action {
            DaemonAction::Start => {
                let db = Database::new(&config).await?;
                commands::daemon::start(db, config).await
            }
            DaemonAction::Stop { timeout, force } => {
                commands::daemon::stop(Duration::from_secs(timeout), force).await
            }
            DaemonAction::Status => commands::daemon::status(&config).await,
        },
        Commands::News {
            category,
            language,
            country,
            refresh,
        } => {
            commands::news::run(
                &config,
                &category,
                language.as_deref(),
                country.as_deref(),
                refresh,
            )
            .await
        }
        Commands::Search {
            categories,
            page,
            page_size,
            language,
            country,
        } => {
            commands::search::run(
                &config,
                &categories,
                page,
                page_size,
                language.as_deref(),
                country.as_deref(),
            )
            .await
        }
        Commands::Corpus {
            categories,
            page,
            page_size,
        } => commands::corpus::run(&config, &categories, page, page_size).await,
        Commands::Latest {
            user_id,
            page,
            page_size,
        } => commands::latest::run(&config, &user_id, page, page_size).await,
        Commands::Notify => {
            let db = Database::new(&config).await?;
            commands::jobs::notify(&db, &config).await
        }
        Commands::Sweep => {
            let db = Database::new(&config).await?;
            commands::jobs::sweep(&db, &config).await
        }
        Commands::Categories => {
            let db = Database::new(&config).await?;
            commands::categories::run(&db).await
        }
    }
}
