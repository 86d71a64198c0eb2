//! libSQL implementation of the `Database` trait.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::deals::model::{Deal, DealStage};
use crate::error::DatabaseError;
use crate::risk::model::{RiskFlag, RiskLevel};
use crate::store::migrations;
use crate::store::traits::{Database, RejectedRow, RowBatch};
use crate::threads::model::{NextActionOwner, Thread, ThreadCategory};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run a SELECT and decode each row on its own.
    ///
    /// A query or cursor failure fails the whole read; a row that does not
    /// decode lands in `rejected` and the rest are still returned.
    async fn scan<T>(
        &self,
        sql: &str,
        args: impl libsql::params::IntoParams,
        op: &str,
        decode: fn(&libsql::Row) -> Result<T, DatabaseError>,
    ) -> Result<RowBatch<T>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, args)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut batch = RowBatch::default();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op} row: {e}")))?
        {
            match decode(&row) {
                Ok(item) => batch.rows.push(item),
                Err(error) => batch.rejected.push(RejectedRow {
                    id: row.get::<String>(0).unwrap_or_default(),
                    error,
                }),
            }
        }
        Ok(batch)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format. Fixed width so text comparison orders correctly.
fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(ndt.and_utc());
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(ndt.and_utc());
    }
    None
}

/// Bookkeeping timestamps only. Never used for risk rules.
fn parse_datetime_or_min(s: &str, entity_id: &Uuid, column: &str) -> DateTime<Utc> {
    parse_datetime(s).unwrap_or_else(|| {
        warn!(entity_id = %entity_id, column, value = s, "Unreadable timestamp");
        DateTime::<Utc>::MIN_UTC
    })
}

fn flags_to_json(flags: &[RiskFlag]) -> Result<String, DatabaseError> {
    serde_json::to_string(flags).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

/// Flags are derived state and get rewritten on the next evaluation, so an
/// unreadable column decodes as empty instead of rejecting the deal.
fn flags_from_json(s: &str, deal_id: &Uuid) -> Vec<RiskFlag> {
    serde_json::from_str(s).unwrap_or_else(|e| {
        warn!(deal_id = %deal_id, error = %e, "Unreadable risk_flags; treating as empty");
        Vec::new()
    })
}

/// Column list for thread SELECT queries (11 columns).
const THREAD_COLUMNS: &str = "id, user_id, subject, category, next_action_owner, last_message_at, risk_level, risk_reason, deal_id, created_at, updated_at";

/// Column list for deal SELECT queries (10 columns).
const DEAL_COLUMNS: &str = "id, user_id, title, stage, stage_entered_at, risk_level, risk_flags, risk_reason, created_at, updated_at";

fn row_to_thread(row: &libsql::Row) -> Result<Thread, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("thread.id: {e}")))?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| DatabaseError::Query(format!("thread.id parse: {e}")))?;

    let user_id: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("thread.user_id: {e}")))?;
    let subject: Option<String> = row.get::<String>(2).ok().filter(|s| !s.is_empty());

    let category_str: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("thread.category: {e}")))?;
    let category: ThreadCategory = category_str
        .parse()
        .map_err(|e| DatabaseError::Serialization(format!("thread {id}: {e}")))?;

    let owner_str: String = row.get(4).unwrap_or_default();
    let next_action_owner: NextActionOwner = owner_str
        .parse()
        .unwrap_or_else(|_| NextActionOwner::for_category(category));

    let last_message_str: String = row
        .get(5)
        .map_err(|e| DatabaseError::Query(format!("thread.last_message_at: {e}")))?;
    // Drives response-delay risk, so a bad value rejects the row.
    let last_message_at = parse_datetime(&last_message_str).ok_or_else(|| {
        DatabaseError::Serialization(format!(
            "thread {id}: unreadable last_message_at '{last_message_str}'"
        ))
    })?;

    let risk_level: RiskLevel = row
        .get::<String>(6)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();
    let risk_reason: String = row.get(7).unwrap_or_default();

    let deal_id = row
        .get::<String>(8)
        .ok()
        .filter(|s| !s.is_empty())
        .and_then(|s| Uuid::parse_str(&s).ok());

    let created_str: String = row.get(9).unwrap_or_default();
    let updated_str: String = row.get(10).unwrap_or_default();

    Ok(Thread {
        id,
        user_id,
        subject,
        category,
        next_action_owner,
        last_message_at,
        risk_level,
        risk_reason,
        deal_id,
        created_at: parse_datetime_or_min(&created_str, &id, "created_at"),
        updated_at: parse_datetime_or_min(&updated_str, &id, "updated_at"),
    })
}

fn row_to_deal(row: &libsql::Row) -> Result<Deal, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("deal.id: {e}")))?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| DatabaseError::Query(format!("deal.id parse: {e}")))?;

    let user_id: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("deal.user_id: {e}")))?;
    let title: String = row.get(2).unwrap_or_default();

    let stage_str: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("deal.stage: {e}")))?;
    let stage: DealStage = stage_str
        .parse()
        .map_err(|e| DatabaseError::Serialization(format!("deal {id}: {e}")))?;

    // Unreadable stage clock falls back to created_at via `Deal::stage_clock`.
    let stage_entered_at = row
        .get::<String>(4)
        .ok()
        .filter(|s| !s.is_empty())
        .and_then(|s| {
            let parsed = parse_datetime(&s);
            if parsed.is_none() {
                warn!(deal_id = %id, value = %s, "Unreadable stage_entered_at");
            }
            parsed
        });

    let risk_level: RiskLevel = row
        .get::<String>(5)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();
    let flags_str: String = row.get(6).unwrap_or_else(|_| "[]".to_string());
    let risk_flags = flags_from_json(&flags_str, &id);
    let risk_reason: String = row.get(7).unwrap_or_default();

    let created_str: String = row.get(8).unwrap_or_default();
    let updated_str: String = row.get(9).unwrap_or_default();
    // created_at doubles as the stage clock, so it must be readable then.
    let created_at = match (stage_entered_at, parse_datetime(&created_str)) {
        (_, Some(at)) => at,
        (Some(_), None) => parse_datetime_or_min(&created_str, &id, "created_at"),
        (None, None) => {
            return Err(DatabaseError::Serialization(format!(
                "deal {id}: no readable stage clock (created_at '{created_str}')"
            )));
        }
    };

    Ok(Deal {
        id,
        user_id,
        title,
        stage,
        stage_entered_at,
        risk_level,
        risk_flags,
        risk_reason,
        created_at,
        updated_at: parse_datetime_or_min(&updated_str, &id, "updated_at"),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Threads ─────────────────────────────────────────────────────

    async fn insert_thread(&self, thread: &Thread) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO threads ({THREAD_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    thread.id.to_string(),
                    thread.user_id.as_str(),
                    thread.subject.as_deref(),
                    thread.category.as_str(),
                    thread.next_action_owner.as_str(),
                    fmt_ts(thread.last_message_at),
                    thread.risk_level.as_str(),
                    thread.risk_reason.as_str(),
                    thread.deal_id.map(|id| id.to_string()),
                    fmt_ts(thread.created_at),
                    fmt_ts(thread.updated_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_thread: {e}")))?;
        debug!(thread_id = %thread.id, "Thread inserted");
        Ok(())
    }

    async fn get_thread(&self, id: Uuid) -> Result<Option<Thread>, DatabaseError> {
        let mut batch = self
            .scan(
                &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE id = ?1"),
                params![id.to_string()],
                "get_thread",
                row_to_thread,
            )
            .await?;
        if let Some(rejected) = batch.rejected.pop() {
            return Err(rejected.error);
        }
        Ok(batch.rows.pop())
    }

    async fn list_threads(&self, user_id: &str) -> Result<Vec<Thread>, DatabaseError> {
        Ok(self.scan_threads(user_id).await?.into_rows_logged("thread"))
    }

    async fn scan_threads(&self, user_id: &str) -> Result<RowBatch<Thread>, DatabaseError> {
        self.scan(
            &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE user_id = ?1 ORDER BY last_message_at ASC"),
            params![user_id],
            "scan_threads",
            row_to_thread,
        )
        .await
    }

    async fn list_threads_by_category(
        &self,
        user_id: &str,
        category: ThreadCategory,
    ) -> Result<Vec<Thread>, DatabaseError> {
        let batch = self
            .scan(
                &format!(
                    "SELECT {THREAD_COLUMNS} FROM threads WHERE user_id = ?1 AND category = ?2 ORDER BY last_message_at ASC"
                ),
                params![user_id, category.as_str()],
                "list_threads_by_category",
                row_to_thread,
            )
            .await?;
        Ok(batch.into_rows_logged("thread"))
    }

    async fn list_deal_threads(&self, deal_id: Uuid) -> Result<Vec<Thread>, DatabaseError> {
        let batch = self
            .scan(
                &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE deal_id = ?1 ORDER BY last_message_at ASC"),
                params![deal_id.to_string()],
                "list_deal_threads",
                row_to_thread,
            )
            .await?;
        Ok(batch.into_rows_logged("thread"))
    }

    async fn update_thread_category(
        &self,
        id: Uuid,
        category: ThreadCategory,
        last_message_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE threads SET category = ?1, next_action_owner = ?2, last_message_at = ?3, updated_at = ?4 WHERE id = ?5",
                params![
                    category.as_str(),
                    NextActionOwner::for_category(category).as_str(),
                    fmt_ts(last_message_at),
                    fmt_ts(Utc::now()),
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_thread_category: {e}")))?;
        Ok(count > 0)
    }

    async fn update_thread_risk(
        &self,
        id: Uuid,
        level: RiskLevel,
        reason: &str,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE threads SET risk_level = ?1, risk_reason = ?2 WHERE id = ?3",
                params![level.as_str(), reason, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_thread_risk: {e}")))?;
        Ok(count > 0)
    }

    async fn record_thread_message(
        &self,
        thread_id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO thread_messages (thread_id, sent_at) VALUES (?1, ?2)",
                params![thread_id.to_string(), fmt_ts(sent_at)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_thread_message: {e}")))?;
        Ok(())
    }

    async fn count_deal_messages_since(
        &self,
        deal_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<usize, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COALESCE(SUM(
                    CASE
                        WHEN EXISTS (SELECT 1 FROM thread_messages m WHERE m.thread_id = t.id)
                            THEN (SELECT COUNT(*) FROM thread_messages m
                                  WHERE m.thread_id = t.id AND m.sent_at >= ?2)
                        WHEN t.last_message_at >= ?2 THEN 1
                        ELSE 0
                    END), 0)
                 FROM threads t WHERE t.deal_id = ?1",
                params![deal_id.to_string(), fmt_ts(since)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_deal_messages_since: {e}")))?;

        let count: i64 = match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("count_deal_messages_since row: {e}")))?
        {
            Some(row) => row.get(0).unwrap_or(0),
            None => 0,
        };
        Ok(count.max(0) as usize)
    }

    // ── Deals ───────────────────────────────────────────────────────

    async fn insert_deal(&self, deal: &Deal) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO deals ({DEAL_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    deal.id.to_string(),
                    deal.user_id.as_str(),
                    deal.title.as_str(),
                    deal.stage.as_str(),
                    deal.stage_entered_at.map(fmt_ts),
                    deal.risk_level.as_str(),
                    flags_to_json(&deal.risk_flags)?,
                    deal.risk_reason.as_str(),
                    fmt_ts(deal.created_at),
                    fmt_ts(deal.updated_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_deal: {e}")))?;
        debug!(deal_id = %deal.id, "Deal inserted");
        Ok(())
    }

    async fn get_deal(&self, id: Uuid) -> Result<Option<Deal>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {DEAL_COLUMNS} FROM deals WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_deal: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_deal(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_deal row: {e}"))),
        }
    }

    async fn list_deals(&self, user_id: &str) -> Result<Vec<Deal>, DatabaseError> {
        Ok(self.scan_deals(user_id).await?.into_rows_logged("deal"))
    }

    async fn scan_deals(&self, user_id: &str) -> Result<RowBatch<Deal>, DatabaseError> {
        self.scan(
            &format!("SELECT {DEAL_COLUMNS} FROM deals WHERE user_id = ?1 ORDER BY created_at ASC"),
            params![user_id],
            "scan_deals",
            row_to_deal,
        )
        .await
    }

    async fn update_deal_stage(
        &self,
        id: Uuid,
        stage: DealStage,
        entered_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE deals SET stage = ?1, stage_entered_at = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    stage.as_str(),
                    fmt_ts(entered_at),
                    fmt_ts(Utc::now()),
                    id.to_string()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_deal_stage: {e}")))?;
        Ok(count > 0)
    }

    async fn update_deal_risk(
        &self,
        id: Uuid,
        level: RiskLevel,
        flags: &[RiskFlag],
        reason: &str,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE deals SET risk_level = ?1, risk_flags = ?2, risk_reason = ?3 WHERE id = ?4",
                params![level.as_str(), flags_to_json(flags)?, reason, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_deal_risk: {e}")))?;
        Ok(count > 0)
    }

    // ── Users ───────────────────────────────────────────────────────

    async fn list_user_ids(&self) -> Result<Vec<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT user_id FROM threads UNION SELECT user_id FROM deals ORDER BY 1",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_user_ids: {e}")))?;

        let mut users = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_user_ids row: {e}")))?
        {
            let user: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("list_user_ids.user_id: {e}")))?;
            users.push(user);
        }
        Ok(users)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
