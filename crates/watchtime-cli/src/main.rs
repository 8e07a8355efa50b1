//! `watchtime` operator CLI.
//!
//! Drives one user's quota through the engine against the local store, or
//! Firestore for migrated users when `WATCHTIME_REMOTE_ENABLED` is set.

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use watchtime_engine::{
    BackendSelector, EngineConfig, FirestoreQuotaStore, LocalQuotaStore, QuotaError, QuotaStore,
};
use watchtime_firestore::{FirestoreClient, QuotaDocumentRepository};

/// Exit code for a business-rule refusal.
const EXIT_REJECTED: i32 = 2;

#[derive(Parser)]
#[command(name = "watchtime")]
#[command(author, version, about = "Inspect and drive a user's daily watch-time quota", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    /// User whose quota to operate on
    #[arg(long, short, env = "WATCHTIME_USER_ID", global = true, default_value = "local")]
    user: String,

    /// Local store directory (overrides WATCHTIME_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        if let Some(QuotaError::Rejected(rejection)) = e.downcast_ref::<QuotaError>() {
            eprintln!("rejected ({}): {}", rejection.code(), rejection);
            std::process::exit(EXIT_REJECTED);
        }
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

/// Colored text for terminals, JSON when `LOG_FORMAT=json`.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("watchtime=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .with(env_filter)
            .init();
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = EngineConfig::from_env().context("Invalid watch-time configuration")?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = Some(dir);
    }

    let selector = build_selector(&config).await?;
    let ctx = commands::Context {
        selector,
        user_id: cli.user,
        json: cli.json,
    };
    commands::execute(&ctx, cli.command).await
}

async fn build_selector(config: &EngineConfig) -> Result<BackendSelector> {
    let local = match &config.data_dir {
        Some(dir) => LocalQuotaStore::open(dir)
            .await
            .with_context(|| format!("Failed to open local store at {}", dir.display()))?,
        None => {
            warn!("WATCHTIME_DATA_DIR not set, records are kept in memory for this run only");
            LocalQuotaStore::in_memory()
        }
    };

    let remote: Option<Arc<dyn QuotaStore>> = if config.remote_enabled {
        let client = FirestoreClient::from_env()
            .await
            .context("Failed to create Firestore client")?;
        info!(project_id = %client.config().project_id, "Remote backend enabled");
        Some(Arc::new(FirestoreQuotaStore::new(QuotaDocumentRepository::new(
            client,
        ))))
    } else {
        None
    };

    Ok(BackendSelector::new(
        Arc::new(local),
        remote,
        config.policy.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["watchtime", "apply", "30", "--user", "kid-1", "--json"])
            .unwrap();
        assert_eq!(cli.user, "kid-1");
        assert!(cli.json);
        assert!(matches!(cli.command, commands::Command::Apply { minutes: 30 }));
    }
}
