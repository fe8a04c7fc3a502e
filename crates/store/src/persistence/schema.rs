//! SQL statements for the task and group tables
//!
//! All statements use `$N` placeholders, which both the SQLite and the
//! PostgreSQL drivers accept. Only the blob column type differs by dialect.

use sqlx::AnyPool;
use tracing::debug;

use crate::config::{Dialect, TableNames};
use crate::error::StoreError;

/// Every statement the database backend runs, rendered for one table pair
#[derive(Debug, Clone)]
pub(crate) struct Statements {
    create: [String; 4],
    pub select_task: String,
    pub upsert_task: String,
    pub delete_task: String,
    pub expire_tasks: String,
    pub select_group: String,
    pub upsert_group: String,
    pub delete_group: String,
    pub expire_groups: String,
}

impl Statements {
    pub fn new(dialect: Dialect, tables: &TableNames) -> Self {
        let task = &tables.task;
        let group = &tables.group;
        let blob = dialect.blob_type();

        Self {
            create: [
                format!(
                    "CREATE TABLE IF NOT EXISTS {task} (
                        task_id VARCHAR(155) NOT NULL PRIMARY KEY,
                        status VARCHAR(50) NOT NULL,
                        result {blob},
                        traceback TEXT,
                        date_done BIGINT
                    )"
                ),
                format!("CREATE INDEX IF NOT EXISTS {task}_date_done_idx ON {task} (date_done)"),
                format!(
                    "CREATE TABLE IF NOT EXISTS {group} (
                        group_id VARCHAR(155) NOT NULL PRIMARY KEY,
                        result {blob} NOT NULL,
                        date_done BIGINT NOT NULL
                    )"
                ),
                format!("CREATE INDEX IF NOT EXISTS {group}_date_done_idx ON {group} (date_done)"),
            ],
            select_task: format!(
                "SELECT task_id, status, result, traceback, date_done FROM {task} WHERE task_id = $1"
            ),
            upsert_task: format!(
                "INSERT INTO {task} (task_id, status, result, traceback, date_done)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (task_id) DO UPDATE SET
                    status = excluded.status,
                    result = excluded.result,
                    traceback = excluded.traceback,
                    date_done = excluded.date_done"
            ),
            delete_task: format!("DELETE FROM {task} WHERE task_id = $1"),
            expire_tasks: format!("DELETE FROM {task} WHERE date_done < $1"),
            select_group: format!(
                "SELECT group_id, result, date_done FROM {group} WHERE group_id = $1"
            ),
            upsert_group: format!(
                "INSERT INTO {group} (group_id, result, date_done)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (group_id) DO UPDATE SET
                    result = excluded.result,
                    date_done = excluded.date_done"
            ),
            delete_group: format!("DELETE FROM {group} WHERE group_id = $1"),
            expire_groups: format!("DELETE FROM {group} WHERE date_done < $1"),
        }
    }

    /// Create both tables and their indexes if they do not exist
    pub async fn create_all(&self, pool: &AnyPool) -> Result<(), StoreError> {
        for statement in &self.create {
            sqlx::query(statement).execute(pool).await?;
        }
        debug!("result tables ready");
        Ok(())
    }
}
