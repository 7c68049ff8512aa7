use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use preopen_client::{ChromeOptions, ChromeSessionProvider, HttpObjectStore};
use preopen_core::config::{DEFAULT_CATEGORY, StorageConfig};
use preopen_core::traits::{NullObjectStore, ObjectStore};
use preopen_core::{Archiver, Pipeline, PipelineConfig, RunReport, StorageKey};

#[derive(Parser)]
#[command(name = "preopen", version, about = "Pre-open market CSV archiver")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture today's pre-open market CSV and archive it (one run)
    Run {
        /// Target page URL (overrides PREOPEN_TARGET_URL)
        #[arg(short, long)]
        url: Option<String>,

        /// Storage key prefix (overrides PREOPEN_CATEGORY)
        #[arg(short, long)]
        category: Option<String>,

        /// Show the browser window instead of running headless
        #[arg(long, default_value_t = false)]
        headed: bool,

        /// User-Agent header for the browser session
        #[arg(long, env = "PREOPEN_USER_AGENT")]
        user_agent: Option<String>,

        /// Exit non-zero unless the run completed or was skipped
        #[arg(long, default_value_t = false)]
        strict: bool,
    },

    /// Print the storage key an artifact would be archived under
    Key {
        /// Artifact file name (e.g. "preopen_20240924.csv")
        #[arg(short, long)]
        file_name: String,

        /// Archival date, YYYY-MM-DD (defaults to today, UTC)
        #[arg(short, long)]
        date: Option<NaiveDate>,

        /// Storage key prefix
        #[arg(short, long, env = "PREOPEN_CATEGORY", default_value = DEFAULT_CATEGORY)]
        category: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Setup tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("preopen=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            url,
            category,
            headed,
            user_agent,
            strict,
        } => {
            let report = match cmd_run(url, category, headed, user_agent).await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(error = %format!("{e:#}"), "Run aborted");
                    return Err(e);
                }
            };

            println!("{}", serde_json::to_string_pretty(&report)?);

            if strict && !report.outcome.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Key {
            file_name,
            date,
            category,
        } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            println!("{}", StorageKey::new(&category, date, &file_name));
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn cmd_run(
    url: Option<String>,
    category: Option<String>,
    headed: bool,
    user_agent: Option<String>,
) -> Result<RunReport> {
    let config = PipelineConfig::from_env()
        .context("Invalid configuration")?
        .with_overrides(url, category);
    config.validate().context("Invalid configuration")?;

    // Before launch: an early return here must not leave Chromium running.
    let store = storage_client(&config.storage)?;

    let defaults = ChromeOptions::default();
    let options = ChromeOptions {
        headless: !headed,
        user_agent: user_agent.or(defaults.user_agent),
        ..defaults
    }
    .with_navigation_timeout(config.navigation_timeout);

    let provider = ChromeSessionProvider::with_options(options)
        .await
        .context("Failed to launch browser")?;

    let result = match store {
        Some(store) => {
            let archiver =
                Archiver::with_store(store, config.category.clone(), config.origin.clone());
            run_once(&provider, archiver, &config).await
        }
        None => {
            let archiver = Archiver::<NullObjectStore>::disabled(
                config.category.clone(),
                config.origin.clone(),
            );
            run_once(&provider, archiver, &config).await
        }
    };

    if let Err(e) = provider.shutdown().await {
        tracing::warn!(error = %e, "Browser did not shut down cleanly");
    }

    result
}

async fn run_once<S: ObjectStore>(
    provider: &ChromeSessionProvider,
    archiver: Archiver<S>,
    config: &PipelineConfig,
) -> Result<RunReport> {
    let report = Pipeline::new(provider, archiver, config)
        .run()
        .await
        .context("Pipeline aborted")?;
    Ok(report)
}

/// Storage client for `storage`, or `None` when no credential is configured.
fn storage_client(storage: &StorageConfig) -> Result<Option<HttpObjectStore>> {
    if !storage.is_configured() {
        return Ok(None);
    }
    let store = HttpObjectStore::new(storage).context("Failed to build storage client")?;
    Ok(Some(store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_storage_client_without_credentials() {
        let storage = StorageConfig {
            bucket: "market-data".into(),
            ..StorageConfig::default()
        };
        assert!(storage_client(&storage).unwrap().is_none());
    }

    #[test]
    fn test_storage_client_with_single_credential() {
        let storage = StorageConfig {
            url: Some("https://x.supabase.co".into()),
            key: None,
            bucket: "market-data".into(),
        };
        assert!(storage_client(&storage).unwrap().is_some());
    }

    #[test]
    fn test_run_overrides_parse() {
        let cli = Cli::try_parse_from([
            "preopen",
            "run",
            "--url",
            "https://example.com/pre-open",
            "--headed",
            "--strict",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                url, headed, strict, category, ..
            } => {
                assert_eq!(url.as_deref(), Some("https://example.com/pre-open"));
                assert!(headed);
                assert!(strict);
                assert!(category.is_none());
            }
            Commands::Key { .. } => panic!("expected run"),
        }
    }
}
