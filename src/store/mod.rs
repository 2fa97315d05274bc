//! Persistence layer
//!
//! Threads, their messages, attached file metadata and the findings
//! extracted from each analysis. SQLite through sqlx; the pipeline only sees
//! the [`AnalysisStore`] trait.

use crate::models::{
    AnomalyRecord, HistoryPage, MessageFile, MessageStatus, Sender, ThreadDetail,
};
use crate::Result;
use async_trait::async_trait;

pub mod sqlite;
pub use sqlite::SqliteStore;

/// Everything written once an analysis run is over
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub thread_id: i64,
    pub user_message_id: Option<i64>,
    /// Report text, or the error shown to the user
    pub content: String,
    pub status: MessageStatus,
    pub records: Vec<AnomalyRecord>,
}

/// Trait for thread/message persistence
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn create_thread(&self, title: &str) -> Result<i64>;

    /// Bump the modification date; `false` when the thread does not exist
    async fn touch_thread(&self, thread_id: i64) -> Result<bool>;

    async fn save_message(
        &self,
        thread_id: i64,
        sender: Sender,
        content: &str,
        status: MessageStatus,
    ) -> Result<i64>;

    async fn save_message_files(&self, message_id: i64, files: &[MessageFile]) -> Result<()>;

    /// Store the assistant reply, final user message status and findings
    /// in a single transaction. Returns the assistant message id.
    async fn save_outcome(&self, outcome: &AnalysisOutcome) -> Result<i64>;

    async fn list_threads(&self, limit: i64, offset: i64) -> Result<HistoryPage>;

    async fn load_thread(&self, thread_id: i64) -> Result<Option<ThreadDetail>>;

    /// `false` when the thread does not exist
    async fn delete_thread(&self, thread_id: i64) -> Result<bool>;
}
