use std::path::PathBuf;

use anyhow::Context;
use axum::extract::FromRef;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod controllers;
mod db;
mod duration;
mod error;
mod models;
mod rate_limit;
mod reaper;
mod store;
mod types;

pub(crate) use error::ApiResult;

use config::Config;
use db::Driver;
use rate_limit::RateLimitSystem;
use store::PasteStore;

/// Self-hosted pastebin.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the paste API.
    Serve,
    /// Delete expired pastes once and exit.
    PurgeExpired,
    /// Delete a single paste by id.
    Delete {
        /// Id of the paste to delete.
        id: String,
    },
    /// Copy every paste from a previous backend into the configured one.
    Migrate {
        /// Driver of the backend to copy from.
        #[arg(long, value_enum)]
        from_driver: Driver,
        /// Connection string or SQLite path of the backend to copy from.
        #[arg(long)]
        from_source: String,
    },
}

/// Rate limits for each class of operation.
#[derive(Clone)]
pub struct RateLimits {
    pub get_pastes: RateLimitSystem,
    pub new_pastes: RateLimitSystem,
}

impl RateLimits {
    pub fn new(config: &config::RateLimits) -> Self {
        RateLimits {
            get_pastes: RateLimitSystem::new(config.get_pastes),
            new_pastes: RateLimitSystem::new(config.new_pastes),
        }
    }
}

#[derive(Clone, FromRef)]
pub struct App {
    pub config: Config,
    pub store: PasteStore,
    pub rate_limits: RateLimits,
}

impl App {
    async fn load(config: Config) -> anyhow::Result<Self> {
        let store = PasteStore::open(&config.database)
            .await
            .with_context(|| format!("failed to open {} database", config.database.driver))?;
        store.reconcile_replica().await;
        Ok(App {
            rate_limits: RateLimits::new(&config.rate_limit),
            config,
            store,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pastestore=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Command::Serve => commands::serve::run(App::load(config).await?).await,
        Command::PurgeExpired => commands::purge_expired::run(App::load(config).await?).await,
        Command::Delete { id } => commands::delete::run(App::load(config).await?, &id).await,
        Command::Migrate {
            from_driver,
            from_source,
        } => commands::migrate::run(config, from_driver, from_source).await,
    }
}
