//! Single-entity risk analyze/update over the entity store.
//!
//! `analyze_*` evaluate without writing; `update_*` evaluate and persist the
//! risk columns. The store fetch is the only suspension point.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::config::RiskConfig;
use crate::deals::model::Deal;
use crate::error::DatabaseError;
use crate::risk::evaluator::{self, DealSignals};
use crate::risk::model::RiskAnalysisResult;
use crate::store::Database;
use crate::threads::model::Thread;

/// Evaluates and persists risk for individual threads and deals.
#[derive(Clone)]
pub struct RiskService {
    store: Arc<dyn Database>,
    config: RiskConfig,
}

impl RiskService {
    pub fn new(store: Arc<dyn Database>, config: RiskConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn Database> {
        &self.store
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    // ── Threads ─────────────────────────────────────────────────────

    /// Evaluate a thread without persisting.
    pub async fn analyze_thread_risk(&self, id: Uuid) -> Result<RiskAnalysisResult, DatabaseError> {
        let thread = self.load_thread(id).await?;
        Ok(evaluator::evaluate_thread(&thread, Utc::now(), &self.config))
    }

    /// Evaluate a thread and persist its risk level and reason.
    pub async fn update_thread_risk(&self, id: Uuid) -> Result<Thread, DatabaseError> {
        let thread = self.load_thread(id).await?;
        self.persist_thread_risk(thread, Utc::now()).await
    }

    /// Evaluate an already-fetched thread at `now` and write the result back.
    pub async fn persist_thread_risk(
        &self,
        mut thread: Thread,
        now: DateTime<Utc>,
    ) -> Result<Thread, DatabaseError> {
        let result = evaluator::evaluate_thread(&thread, now, &self.config);
        let found = self
            .store
            .update_thread_risk(thread.id, result.risk_level, &result.risk_reason)
            .await?;
        if !found {
            return Err(DatabaseError::thread_not_found(thread.id));
        }
        debug!(
            thread_id = %thread.id,
            risk_level = %result.risk_level,
            "Thread risk updated"
        );
        thread.apply_risk(&result);
        Ok(thread)
    }

    async fn load_thread(&self, id: Uuid) -> Result<Thread, DatabaseError> {
        self.store
            .get_thread(id)
            .await?
            .ok_or_else(|| DatabaseError::thread_not_found(id))
    }

    // ── Deals ───────────────────────────────────────────────────────

    /// Evaluate a deal without persisting.
    pub async fn analyze_deal_risk(&self, id: Uuid) -> Result<RiskAnalysisResult, DatabaseError> {
        let deal = self.load_deal(id).await?;
        self.evaluate_deal(&deal, Utc::now()).await
    }

    /// Evaluate a deal and persist its risk level, flags and reason.
    pub async fn update_deal_risk(&self, id: Uuid) -> Result<Deal, DatabaseError> {
        let deal = self.load_deal(id).await?;
        self.persist_deal_risk(deal, Utc::now()).await
    }

    /// Evaluate an already-fetched deal at `now` and write the result back.
    pub async fn persist_deal_risk(
        &self,
        mut deal: Deal,
        now: DateTime<Utc>,
    ) -> Result<Deal, DatabaseError> {
        let result = self.evaluate_deal(&deal, now).await?;
        let found = self
            .store
            .update_deal_risk(deal.id, result.risk_level, &result.risk_flags, &result.risk_reason)
            .await?;
        if !found {
            return Err(DatabaseError::deal_not_found(deal.id));
        }
        debug!(
            deal_id = %deal.id,
            risk_level = %result.risk_level,
            flags = result.risk_flags.len(),
            "Deal risk updated"
        );
        deal.apply_risk(&result);
        Ok(deal)
    }

    /// Gather the deal's linked threads and recent activity, then evaluate.
    async fn evaluate_deal(
        &self,
        deal: &Deal,
        now: DateTime<Utc>,
    ) -> Result<RiskAnalysisResult, DatabaseError> {
        let threads = self.store.list_deal_threads(deal.id).await?;
        let since = now - Duration::days(self.config.frequency_window_days);
        let recent_messages = self.store.count_deal_messages_since(deal.id, since).await?;

        let signals = DealSignals {
            stage: deal.stage,
            stage_entered_at: deal.stage_clock(),
            threads: &threads,
            recent_messages,
        };
        Ok(evaluator::evaluate_deal(&signals, now, &self.config))
    }

    async fn load_deal(&self, id: Uuid) -> Result<Deal, DatabaseError> {
        self.store
            .get_deal(id)
            .await?
            .ok_or_else(|| DatabaseError::deal_not_found(id))
    }
}
