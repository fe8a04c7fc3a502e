// Expiry commands

use std::time::Duration;

use anyhow::{Context, Result};
use taskvault_store::{CleanupReport, ResultBackend};

use crate::output::{print_field, OutputFormat};

async fn run_cleanup(
    backend: &impl ResultBackend,
    expires: Option<Duration>,
) -> Result<CleanupReport> {
    let retention = expires.unwrap_or_else(|| backend.result_expires());
    backend
        .cleanup(retention)
        .await
        .context("Failed to clean up expired results")
}

pub async fn cleanup(
    backend: &impl ResultBackend,
    output: OutputFormat,
    quiet: bool,
    expires: Option<Duration>,
) -> Result<()> {
    let report = run_cleanup(backend, expires).await?;

    if output.is_text() {
        if !quiet {
            print_field("Tasks", &report.tasks_deleted.to_string());
            print_field("Groups", &report.groups_deleted.to_string());
        }
    } else {
        output.print_value(&report)?;
    }

    Ok(())
}

/// Clean up every `interval` until Ctrl-C
///
/// A failed sweep is logged and retried on the next tick.
pub async fn sweep(
    backend: &impl ResultBackend,
    interval: Duration,
    expires: Option<Duration>,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::info!(interval_secs = interval.as_secs(), "Sweeper started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = run_cleanup(backend, expires).await {
                    tracing::error!(error = ?e, "Sweep failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
                break;
            }
        }
    }

    tracing::info!("Sweeper stopped");
    Ok(())
}
