// Group result commands

use anyhow::{Context, Result};
use clap::Subcommand;
use taskvault_store::ResultBackend;

use crate::output::{display_value, print_field, OutputFormat};

#[derive(Subcommand)]
pub enum GroupCommand {
    /// Show the stored result of a group
    Show {
        /// Group ID
        group_id: String,
    },

    /// Delete the stored result of a group
    Delete {
        /// Group ID
        group_id: String,
    },
}

pub async fn run(
    command: GroupCommand,
    backend: &impl ResultBackend,
    output: OutputFormat,
    quiet: bool,
) -> Result<()> {
    match command {
        GroupCommand::Show { group_id } => show(backend, output, &group_id).await,
        GroupCommand::Delete { group_id } => delete(backend, output, quiet, &group_id).await,
    }
}

async fn show(backend: &impl ResultBackend, output: OutputFormat, group_id: &str) -> Result<()> {
    let meta = backend
        .get_group_meta(group_id)
        .await
        .with_context(|| format!("Failed to read group {}", group_id))?
        .ok_or_else(|| anyhow::anyhow!("Group not found: {}", group_id))?;

    if output.is_text() {
        print_field("ID", &meta.group_id);
        print_field("Result", &display_value(&meta.result));
        print_field("Done", &meta.date_done.to_rfc3339());
    } else {
        output.print_value(&meta)?;
    }

    Ok(())
}

async fn delete(
    backend: &impl ResultBackend,
    output: OutputFormat,
    quiet: bool,
    group_id: &str,
) -> Result<()> {
    backend
        .delete_group(group_id)
        .await
        .with_context(|| format!("Failed to delete group {}", group_id))?;

    if output.is_text() {
        if quiet {
            println!("{}", group_id);
        } else {
            println!("Deleted group: {}", group_id);
        }
    } else {
        output.print_value(&serde_json::json!({ "group_id": group_id, "deleted": true }))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskvault_store::InMemoryBackend;

    #[tokio::test]
    async fn test_show_missing_group_is_error() {
        let backend = InMemoryBackend::new();
        let err = show(&backend, OutputFormat::Text, "g1").await.unwrap_err();
        assert!(err.to_string().contains("Group not found"));
    }

    #[tokio::test]
    async fn test_delete_group() {
        let backend = InMemoryBackend::new();
        backend.save_group("g1", json!(["t1"])).await.unwrap();

        show(&backend, OutputFormat::Json, "g1").await.unwrap();
        run(
            GroupCommand::Delete {
                group_id: "g1".into(),
            },
            &backend,
            OutputFormat::Text,
            false,
        )
        .await
        .unwrap();

        assert!(backend.restore_group("g1").await.unwrap().is_none());
    }
}
