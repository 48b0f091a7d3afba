use booth_cloud::reconcile::{fix_timestamps, reconcile};
use booth_cloud::Stores;
use booth_common::config::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

/// Maintenance commands for the booth's cloud storage.
#[derive(Parser, Debug)]
#[command(name = "booth-sync", version, about)]
struct Cli {
    /// Booth config file. Environment variables override it.
    #[arg(short, long, default_value = "booth.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add rows for stored objects that have none and drop rows whose object is gone
    Reconcile,
    /// Rewrite each row's created_at from the timestamp in its filename
    FixTimestamps,
    /// Retry every pending upload in the sync queue once
    RetryQueue,
    /// Run one retention pass
    Retention,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", cli.config.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration");
        std::process::exit(1);
    }

    let stores = match Stores::open(&config).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to open cloud stores");
            std::process::exit(1);
        }
    };

    match cli.command {
        Command::Reconcile => match reconcile(stores.objects.as_ref(), stores.rows.as_ref()).await {
            Ok(report) => info!(inserted = report.inserted, removed = report.removed, "reconcile complete"),
            Err(e) => {
                error!(error = %e, "reconcile failed");
                std::process::exit(1);
            }
        },
        Command::FixTimestamps => match fix_timestamps(stores.rows.as_ref()).await {
            Ok(fixed) => info!(fixed, "timestamps fixed"),
            Err(e) => {
                error!(error = %e, "fix-timestamps failed");
                std::process::exit(1);
            }
        },
        Command::RetryQueue => {
            let uploader = stores.uploader(&config);
            let sweep = uploader.process_queue().await;
            info!(
                attempted = sweep.attempted,
                uploaded = sweep.uploaded,
                failed = sweep.failed,
                "sync queue sweep complete"
            );
        }
        Command::Retention => {
            let uploader = stores.uploader(&config);
            match uploader.enforce_retention().await {
                Some(report) => info!(
                    total = report.total,
                    deleted = report.deleted,
                    failed = report.failed,
                    object_errors = report.object_errors,
                    "retention complete"
                ),
                None => std::process::exit(1),
            }
        }
    }
}
