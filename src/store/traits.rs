//! The narrow read/write contract the risk core needs from storage.
//!
//! Threads and deals are created and mutated by the sync side; the risk core
//! reads business fields and writes back only the risk columns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::deals::model::{Deal, DealStage};
use crate::error::DatabaseError;
use crate::risk::model::{RiskFlag, RiskLevel};
use crate::threads::model::{Thread, ThreadCategory};

/// Outcome of a bulk read where each row is decoded on its own.
#[derive(Debug)]
pub struct RowBatch<T> {
    pub rows: Vec<T>,
    /// Rows that exist but could not be decoded.
    pub rejected: Vec<RejectedRow>,
}

impl<T> Default for RowBatch<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

impl<T> RowBatch<T> {
    /// Drop the rejected rows with a warning each and keep the rest.
    pub fn into_rows_logged(self, entity: &str) -> Vec<T> {
        for rejected in &self.rejected {
            warn!(
                entity,
                entity_id = %rejected.id,
                error = %rejected.error,
                "Skipping undecodable row"
            );
        }
        self.rows
    }
}

#[derive(Debug)]
pub struct RejectedRow {
    /// Raw primary key as stored; empty if even that was unreadable.
    pub id: String,
    pub error: DatabaseError,
}

/// Backend-agnostic entity store.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Threads ─────────────────────────────────────────────────────

    /// Insert a thread.
    async fn insert_thread(&self, thread: &Thread) -> Result<(), DatabaseError>;

    /// Get a thread by ID.
    async fn get_thread(&self, id: Uuid) -> Result<Option<Thread>, DatabaseError>;

    /// All threads owned by a user. Undecodable rows are skipped.
    async fn list_threads(&self, user_id: &str) -> Result<Vec<Thread>, DatabaseError>;

    /// All threads owned by a user, with undecodable rows reported.
    async fn scan_threads(&self, user_id: &str) -> Result<RowBatch<Thread>, DatabaseError>;

    /// A user's threads in one category.
    async fn list_threads_by_category(
        &self,
        user_id: &str,
        category: ThreadCategory,
    ) -> Result<Vec<Thread>, DatabaseError>;

    /// Threads pointing at a deal.
    async fn list_deal_threads(&self, deal_id: Uuid) -> Result<Vec<Thread>, DatabaseError>;

    /// Move a thread between Focus and Waiting (sync side).
    /// Returns false if the thread does not exist.
    async fn update_thread_category(
        &self,
        id: Uuid,
        category: ThreadCategory,
        last_message_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Persist derived risk on a thread. Returns false if it does not exist.
    async fn update_thread_risk(
        &self,
        id: Uuid,
        level: RiskLevel,
        reason: &str,
    ) -> Result<bool, DatabaseError>;

    /// Record one message timestamp on a thread (sync side).
    async fn record_thread_message(
        &self,
        thread_id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Communication count for a deal since `since`.
    ///
    /// Threads with recorded messages contribute their message count inside
    /// the window; threads without any contribute one if their last activity
    /// falls inside it.
    async fn count_deal_messages_since(
        &self,
        deal_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<usize, DatabaseError>;

    // ── Deals ───────────────────────────────────────────────────────

    /// Insert a deal.
    async fn insert_deal(&self, deal: &Deal) -> Result<(), DatabaseError>;

    /// Get a deal by ID.
    async fn get_deal(&self, id: Uuid) -> Result<Option<Deal>, DatabaseError>;

    /// All deals owned by a user. Undecodable rows are skipped.
    async fn list_deals(&self, user_id: &str) -> Result<Vec<Deal>, DatabaseError>;

    /// All deals owned by a user, with undecodable rows reported.
    async fn scan_deals(&self, user_id: &str) -> Result<RowBatch<Deal>, DatabaseError>;

    /// Move a deal to a new stage, resetting the stage clock (sync side).
    /// Returns false if the deal does not exist.
    async fn update_deal_stage(
        &self,
        id: Uuid,
        stage: DealStage,
        entered_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Persist derived risk on a deal. Returns false if it does not exist.
    async fn update_deal_risk(
        &self,
        id: Uuid,
        level: RiskLevel,
        flags: &[RiskFlag],
        reason: &str,
    ) -> Result<bool, DatabaseError>;

    // ── Users ───────────────────────────────────────────────────────

    /// Every user that owns at least one thread or deal.
    async fn list_user_ids(&self) -> Result<Vec<String>, DatabaseError>;
}
