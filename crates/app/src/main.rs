//! Tally CLI
//!
//! Usage:
//!   tally plan create --month 2025-01-01     Create a month plan
//!   tally expected add --plan 1 ...          Plan a bill or income
//!   tally tx --description ... --amount ...  Record what actually happened
//!   tally auto-match --plan 1                Link confident matches
//!   tally sweep                              Mark past-due expectations overdue

mod cli;
mod commands;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::Cli;
use config::AppConfig;
use tally_core::UserId;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let data_dir = config::data_dir()?;
    let config = AppConfig::load(cli.config.as_deref(), &data_dir)?;
    let db_path = config.database_path(cli.db.as_deref(), &data_dir);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let db = tally_storage::create_db(&db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    tracing::debug!("Using database {}", db_path.display());

    let engine = commands::build_engine(db, &config.matching);
    commands::run(&engine, UserId(cli.user), cli.command).await
}
