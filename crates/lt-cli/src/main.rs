use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use lt_cli::commands::{backfill, run, sessions, status, usage};
use lt_cli::{Cli, Commands, Config, UsageAction};
use lt_db::{Database, SharedDatabase};

/// Load config and open database, ensuring the parent directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(Database, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let db = Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;
    Ok((db, config))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support; stdout is reserved for payloads
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match &cli.command {
        Some(Commands::Run { no_backfill }) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            run::run(&config, SharedDatabase::new(db), *no_backfill)?;
        }
        Some(Commands::Backfill { dry_run, now }) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            let now = now.unwrap_or_else(Utc::now);
            backfill::run(
                &mut io::stdout(),
                &SharedDatabase::new(db),
                &config.backfill,
                now,
                *dry_run,
            )?;
        }
        Some(Commands::Usage(action)) => {
            let (mut db, _config) = open_database(cli.config.as_deref())?;
            match action {
                UsageAction::Add { package, kind, at } => {
                    let at = at.unwrap_or_else(Utc::now);
                    if usage::add(&mut db, package, (*kind).into(), at)? {
                        tracing::debug!("usage event recorded");
                    } else {
                        tracing::debug!("usage event already recorded");
                    }
                }
                UsageAction::Import => {
                    let inserted = usage::import(&mut db, io::stdin().lock())?;
                    println!("Imported {inserted} usage event(s).");
                }
            }
        }
        Some(Commands::Sessions { json, limit }) => {
            let (db, _config) = open_database(cli.config.as_deref())?;
            sessions::run(&mut io::stdout(), &db, *json, *limit)?;
        }
        Some(Commands::Status) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            status::run(&mut io::stdout(), &db, &config)?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
