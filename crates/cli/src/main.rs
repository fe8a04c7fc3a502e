// Taskvault CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: Logs go to stderr so stdout stays parseable.

mod commands;
mod output;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use taskvault_store::{DatabaseBackend, ResultBackend, StoreConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "taskvault")]
#[command(about = "Taskvault CLI - Inspect and maintain stored task results")]
#[command(version)]
pub struct Cli {
    /// Database URL (sqlite://... or postgres://...)
    #[arg(long, env = "TASKVAULT_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the status of a task
    Status {
        /// Task ID
        task_id: String,
    },

    /// Show everything stored for a task
    Meta {
        /// Task ID
        task_id: String,
    },

    /// Show the result of a task
    Result {
        /// Task ID
        task_id: String,
    },

    /// Show the traceback of a failed task
    Traceback {
        /// Task ID
        task_id: String,
    },

    /// Wait until a task is ready
    Wait {
        /// Task ID
        task_id: String,

        /// Max wait time in seconds
        #[arg(long, default_value = "60")]
        timeout: u64,

        /// Poll interval in milliseconds
        #[arg(long, default_value = "500", value_parser = clap::value_parser!(u64).range(1..))]
        interval: u64,
    },

    /// Mark a task as revoked
    Revoke {
        /// Task ID
        task_id: String,
    },

    /// Delete everything stored for a task
    Forget {
        /// Task ID
        task_id: String,
    },

    /// Manage group results
    Group {
        #[command(subcommand)]
        command: commands::groups::GroupCommand,
    },

    /// Delete expired task and group results
    Cleanup {
        /// Retention in seconds (defaults to TASKVAULT_RESULT_EXPIRES_SECS or one day)
        #[arg(long)]
        expires_secs: Option<u64>,
    },

    /// Run cleanup periodically until interrupted
    Sweep {
        /// Seconds between sweeps
        #[arg(long, default_value = "3600", value_parser = clap::value_parser!(u64).range(1..))]
        interval_secs: u64,

        /// Retention in seconds (defaults to TASKVAULT_RESULT_EXPIRES_SECS or one day)
        #[arg(long)]
        expires_secs: Option<u64>,
    },
}

fn init_logging() {
    // RUST_LOG wins; LOG_LEVEL only sets the level for our own crates.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        format!("taskvault={level},taskvault_store={level}").into()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn build_backend(database_url: Option<String>) -> Result<DatabaseBackend> {
    let mut config = StoreConfig::from_env().context("Invalid store configuration")?;
    if database_url.is_some() {
        config.database_uri = database_url;
    }
    DatabaseBackend::new(config).context("Failed to create result backend")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging();

    let backend = build_backend(cli.database_url)?;
    let output_format = output::OutputFormat::from_str(&cli.output);
    let quiet = cli.quiet;

    let result = match cli.command {
        Commands::Status { task_id } => {
            commands::tasks::status(&backend, output_format, &task_id).await
        }
        Commands::Meta { task_id } => commands::tasks::meta(&backend, output_format, &task_id).await,
        Commands::Result { task_id } => {
            commands::tasks::result(&backend, output_format, &task_id).await
        }
        Commands::Traceback { task_id } => {
            commands::tasks::traceback(&backend, output_format, &task_id).await
        }
        Commands::Wait {
            task_id,
            timeout,
            interval,
        } => {
            commands::tasks::wait(
                &backend,
                output_format,
                &task_id,
                Duration::from_secs(timeout),
                Duration::from_millis(interval),
            )
            .await
        }
        Commands::Revoke { task_id } => {
            commands::tasks::revoke(&backend, output_format, quiet, &task_id).await
        }
        Commands::Forget { task_id } => {
            commands::tasks::forget(&backend, output_format, quiet, &task_id).await
        }
        Commands::Group { command } => {
            commands::groups::run(command, &backend, output_format, quiet).await
        }
        Commands::Cleanup { expires_secs } => {
            commands::maintenance::cleanup(
                &backend,
                output_format,
                quiet,
                expires_secs.map(Duration::from_secs),
            )
            .await
        }
        Commands::Sweep {
            interval_secs,
            expires_secs,
        } => {
            commands::maintenance::sweep(
                &backend,
                Duration::from_secs(interval_secs),
                expires_secs.map(Duration::from_secs),
            )
            .await
        }
    };

    backend
        .process_cleanup()
        .await
        .context("Failed to release connections")?;

    result
}
