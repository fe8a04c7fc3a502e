// Task inspection and update commands

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use taskvault_store::{ResultBackend, TaskMeta, TaskResult, TaskStatus};

use crate::output::{display_value, print_field, OutputFormat};

#[derive(Debug, Serialize)]
struct StatusView<'a> {
    task_id: &'a str,
    status: TaskStatus,
}

fn result_text(result: &TaskResult) -> String {
    match result {
        TaskResult::Value(value) => display_value(value),
        TaskResult::Exception(exc) => exc.to_string(),
    }
}

fn print_meta(meta: &TaskMeta) {
    print_field("ID", &meta.task_id);
    print_field("Status", meta.status.as_str());
    if let Some(result) = &meta.result {
        print_field("Result", &result_text(result));
    }
    if let Some(done) = meta.date_done {
        print_field("Done", &done.to_rfc3339());
    }
    if let Some(traceback) = &meta.traceback {
        println!("Traceback:\n{}", traceback);
    }
}

pub async fn status(backend: &impl ResultBackend, output: OutputFormat, task_id: &str) -> Result<()> {
    let status = backend
        .get_status(task_id)
        .await
        .with_context(|| format!("Failed to read status of task {}", task_id))?;

    if output.is_text() {
        println!("{}", status);
    } else {
        output.print_value(&StatusView { task_id, status })?;
    }

    Ok(())
}

pub async fn meta(backend: &impl ResultBackend, output: OutputFormat, task_id: &str) -> Result<()> {
    let meta = backend
        .get_task_meta(task_id)
        .await
        .with_context(|| format!("Failed to read task {}", task_id))?;

    if output.is_text() {
        print_meta(&meta);
    } else {
        output.print_value(&meta)?;
    }

    Ok(())
}

pub async fn result(backend: &impl ResultBackend, output: OutputFormat, task_id: &str) -> Result<()> {
    let result = backend
        .get_result(task_id)
        .await
        .with_context(|| format!("Failed to read result of task {}", task_id))?;

    if output.is_text() {
        match &result {
            Some(result) => println!("{}", result_text(result)),
            None => println!("No result for task {}", task_id),
        }
    } else {
        output.print_value(&result)?;
    }

    Ok(())
}

pub async fn traceback(
    backend: &impl ResultBackend,
    output: OutputFormat,
    task_id: &str,
) -> Result<()> {
    let traceback = backend
        .get_traceback(task_id)
        .await
        .with_context(|| format!("Failed to read traceback of task {}", task_id))?;

    if output.is_text() {
        match &traceback {
            Some(traceback) => println!("{}", traceback),
            None => println!("No traceback for task {}", task_id),
        }
    } else {
        output.print_value(&traceback)?;
    }

    Ok(())
}

pub async fn wait(
    backend: &impl ResultBackend,
    output: OutputFormat,
    task_id: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<()> {
    let meta = backend
        .wait_for(task_id, timeout, interval)
        .await
        .with_context(|| format!("Task {} did not become ready", task_id))?;

    if output.is_text() {
        print_meta(&meta);
    } else {
        output.print_value(&meta)?;
    }

    Ok(())
}

pub async fn revoke(
    backend: &impl ResultBackend,
    output: OutputFormat,
    quiet: bool,
    task_id: &str,
) -> Result<()> {
    backend
        .mark_as_revoked(task_id)
        .await
        .with_context(|| format!("Failed to revoke task {}", task_id))?;

    if output.is_text() {
        if quiet {
            println!("{}", task_id);
        } else {
            println!("Revoked task: {}", task_id);
        }
    } else {
        let meta = backend.get_task_meta(task_id).await?;
        output.print_value(&meta)?;
    }

    Ok(())
}

pub async fn forget(
    backend: &impl ResultBackend,
    output: OutputFormat,
    quiet: bool,
    task_id: &str,
) -> Result<()> {
    backend
        .forget(task_id)
        .await
        .with_context(|| format!("Failed to forget task {}", task_id))?;

    if output.is_text() {
        if quiet {
            println!("{}", task_id);
        } else {
            println!("Forgot task: {}", task_id);
        }
    } else {
        output.print_value(&StatusView {
            task_id,
            status: TaskStatus::Pending,
        })?;
    }

    Ok(())
}
