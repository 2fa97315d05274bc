//! SQLite-backed analysis store

use super::{AnalysisOutcome, AnalysisStore};
use crate::models::{
    Amount, AnomalyCategory, AnomalyRecord, HistoryPage, MessageFile, MessageStatus, Pagination,
    Sender, Severity, StoredMessage, ThreadDetail, ThreadSummary,
};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS threads (
        thread_id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        message_id INTEGER PRIMARY KEY AUTOINCREMENT,
        thread_id INTEGER NOT NULL,
        sender TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'Success',
        FOREIGN KEY (thread_id) REFERENCES threads(thread_id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS message_files (
        file_id INTEGER PRIMARY KEY AUTOINCREMENT,
        message_id INTEGER NOT NULL,
        file_name TEXT NOT NULL,
        size_kb REAL,
        mime_type TEXT,
        remote_file_name TEXT NOT NULL,
        FOREIGN KEY (message_id) REFERENCES messages(message_id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS anomalies (
        anomaly_id INTEGER PRIMARY KEY AUTOINCREMENT,
        thread_id INTEGER NOT NULL,
        message_id INTEGER NOT NULL,
        source_file TEXT NOT NULL,
        category TEXT NOT NULL,
        description TEXT NOT NULL,
        location TEXT NOT NULL,
        impact_text TEXT NOT NULL,
        impact_value REAL NOT NULL DEFAULT 0,
        impact_currency TEXT NOT NULL,
        severity TEXT NOT NULL,
        recommendation TEXT NOT NULL,
        FOREIGN KEY (thread_id) REFERENCES threads(thread_id) ON DELETE CASCADE,
        FOREIGN KEY (message_id) REFERENCES messages(message_id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_messages_thread_id ON messages(thread_id)",
    "CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_threads_updated_at ON threads(updated_at)",
    "CREATE INDEX IF NOT EXISTS idx_anomalies_thread_id ON anomalies(thread_id)",
];

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database file behind `database_url` and apply the schema
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        info!(database = database_url, "Database initialized");
        Ok(store)
    }

    /// Private in-memory database; one connection that never expires
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn anomaly_from_row(row: &SqliteRow) -> Result<AnomalyRecord> {
    Ok(AnomalyRecord {
        source_file: row.try_get("source_file")?,
        category: AnomalyCategory::from_db(row.try_get("category")?),
        description: row.try_get("description")?,
        location: row.try_get("location")?,
        impact_text: row.try_get("impact_text")?,
        estimated_impact: Amount {
            value: row.try_get("impact_value")?,
            currency: row.try_get("impact_currency")?,
        },
        severity: Severity::from_db(row.try_get("severity")?),
        recommendation: row.try_get("recommendation")?,
    })
}

#[async_trait]
impl AnalysisStore for SqliteStore {
    async fn create_thread(&self, title: &str) -> Result<i64> {
        let now = Utc::now();
        let result = sqlx::query("INSERT INTO threads (title, created_at, updated_at) VALUES (?, ?, ?)")
            .bind(title)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;

        let thread_id = result.last_insert_rowid();
        info!(thread_id, "New thread created");
        Ok(thread_id)
    }

    async fn touch_thread(&self, thread_id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE threads SET updated_at = ? WHERE thread_id = ?")
            .bind(Utc::now())
            .bind(thread_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_message(
        &self,
        thread_id: i64,
        sender: Sender,
        content: &str,
        status: MessageStatus,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO messages (thread_id, sender, content, created_at, status) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(thread_id)
        .bind(sender.as_str())
        .bind(content)
        .bind(Utc::now())
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        let message_id = result.last_insert_rowid();
        debug!(message_id, thread_id, "Message saved");
        Ok(message_id)
    }

    async fn save_message_files(&self, message_id: i64, files: &[MessageFile]) -> Result<()> {
        for file in files {
            sqlx::query(
                r#"INSERT INTO message_files
                   (message_id, file_name, size_kb, mime_type, remote_file_name)
                   VALUES (?, ?, ?, ?, ?)"#,
            )
            .bind(message_id)
            .bind(&file.file_name)
            .bind(file.size_kb)
            .bind(&file.mime_type)
            .bind(&file.remote_file_name)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn save_outcome(&self, outcome: &AnalysisOutcome) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let assistant_message_id = sqlx::query(
            "INSERT INTO messages (thread_id, sender, content, created_at, status) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(outcome.thread_id)
        .bind(Sender::Assistant.as_str())
        .bind(&outcome.content)
        .bind(now)
        .bind(outcome.status.as_str())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        if let Some(user_message_id) = outcome.user_message_id {
            sqlx::query("UPDATE messages SET status = ? WHERE message_id = ?")
                .bind(outcome.status.as_str())
                .bind(user_message_id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("UPDATE threads SET updated_at = ? WHERE thread_id = ?")
            .bind(now)
            .bind(outcome.thread_id)
            .execute(&mut *tx)
            .await?;

        for record in &outcome.records {
            sqlx::query(
                r#"INSERT INTO anomalies
                   (thread_id, message_id, source_file, category, description, location,
                    impact_text, impact_value, impact_currency, severity, recommendation)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(outcome.thread_id)
            .bind(assistant_message_id)
            .bind(&record.source_file)
            .bind(record.category.as_str())
            .bind(&record.description)
            .bind(&record.location)
            .bind(&record.impact_text)
            .bind(record.estimated_impact.value)
            .bind(&record.estimated_impact.currency)
            .bind(record.severity.as_str())
            .bind(&record.recommendation)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(assistant_message_id)
    }

    async fn list_threads(&self, limit: i64, offset: i64) -> Result<HistoryPage> {
        let rows = sqlx::query(
            r#"
            SELECT
                t.thread_id,
                t.title,
                t.updated_at,
                (SELECT COUNT(*) FROM messages m WHERE m.thread_id = t.thread_id) AS message_count
            FROM threads t
            ORDER BY t.updated_at DESC, t.thread_id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let history = rows
            .iter()
            .map(|row| -> Result<ThreadSummary> {
                Ok(ThreadSummary {
                    id: row.try_get("thread_id")?,
                    title: row.try_get("title")?,
                    date: row.try_get::<DateTime<Utc>, _>("updated_at")?,
                    message_count: row.try_get("message_count")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM threads")
            .fetch_one(&self.pool)
            .await?;

        Ok(HistoryPage {
            history,
            pagination: Pagination { total, limit, offset },
        })
    }

    async fn load_thread(&self, thread_id: i64) -> Result<Option<ThreadDetail>> {
        let title: Option<String> = sqlx::query_scalar("SELECT title FROM threads WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(title) = title else {
            return Ok(None);
        };

        let file_rows = sqlx::query(
            r#"
            SELECT f.message_id, f.file_name
            FROM message_files f
            JOIN messages m ON m.message_id = f.message_id
            WHERE m.thread_id = ?
            ORDER BY f.file_id ASC
            "#,
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;

        let mut files_by_message: HashMap<i64, Vec<String>> = HashMap::new();
        for row in &file_rows {
            let message_id: i64 = row.try_get("message_id")?;
            let file_name: String = row.try_get("file_name")?;
            files_by_message.entry(message_id).or_default().push(file_name);
        }

        let message_rows = sqlx::query(
            r#"
            SELECT message_id, sender, content, created_at, status
            FROM messages
            WHERE thread_id = ?
            ORDER BY created_at ASC, message_id ASC
            "#,
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;

        let messages = message_rows
            .iter()
            .map(|row| -> Result<StoredMessage> {
                let id: i64 = row.try_get("message_id")?;
                Ok(StoredMessage {
                    id,
                    sender: Sender::from_db(row.try_get("sender")?),
                    content: row.try_get("content")?,
                    date: row.try_get::<DateTime<Utc>, _>("created_at")?,
                    status: row.try_get("status")?,
                    files: files_by_message.remove(&id).unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let anomaly_rows = sqlx::query(
            "SELECT * FROM anomalies WHERE thread_id = ? ORDER BY anomaly_id ASC",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;

        let anomalies = anomaly_rows
            .iter()
            .map(anomaly_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(ThreadDetail {
            id: thread_id,
            title,
            messages,
            anomalies,
        }))
    }

    async fn delete_thread(&self, thread_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM threads WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(thread_id, "Thread deleted");
        }
        Ok(deleted)
    }
}
