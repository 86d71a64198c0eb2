//! Batch reconciler: recompute and persist risk for every entity a user owns.
//!
//! One bulk read per batch, then per-entity evaluate + persist on a bounded
//! pool. Rows the store cannot decode and per-entity write failures are
//! logged and counted as failed; they never abort the batch. Cancellation stops dispatch, lets in-flight work finish, and counts
//! the rest as skipped.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ReconcilerConfig;
use crate::error::{ConfigError, DatabaseError, Error};
use crate::risk::service::RiskService;
use crate::store::RejectedRow;

/// Floor for the interval ticker period.
const MIN_TICK: Duration = Duration::from_millis(10);

/// Which entity set a batch covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Threads,
    Deals,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Threads => "threads",
            Self::Deals => "deals",
        }
    }
}

impl std::fmt::Display for BatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome counts for one batch.
///
/// `total = succeeded + failed + skipped` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub kind: BatchKind,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

impl BatchReport {
    /// Every entity was evaluated and persisted.
    pub fn is_complete(&self) -> bool {
        self.succeeded == self.total
    }
}

/// Both batches for one user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserReport {
    pub user_id: String,
    pub threads: BatchReport,
    pub deals: BatchReport,
}

/// Runs risk recomputation over whole users.
pub struct BatchReconciler {
    risk: RiskService,
    max_concurrency: usize,
}

impl BatchReconciler {
    pub fn new(risk: RiskService, max_concurrency: usize) -> Self {
        Self {
            risk,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn from_config(risk: RiskService, config: &ReconcilerConfig) -> Self {
        Self::new(risk, config.max_concurrency)
    }

    /// Recompute and persist risk for all of a user's threads.
    pub async fn update_all_threads_risk(
        &self,
        user_id: &str,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, Error> {
        let batch = self.risk.store().scan_threads(user_id).await?;
        let now = Utc::now();
        let report = self
            .run_batch(
                BatchKind::Threads,
                batch.rows,
                batch.rejected,
                cancel,
                |t| t.id,
                move |risk, thread| async move {
                    risk.persist_thread_risk(thread, now).await.map(|_| ())
                },
            )
            .await;
        log_report(user_id, &report);
        Ok(report)
    }

    /// Recompute and persist risk for all of a user's deals.
    pub async fn update_all_deals_risk(
        &self,
        user_id: &str,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, Error> {
        let batch = self.risk.store().scan_deals(user_id).await?;
        let now = Utc::now();
        let report = self
            .run_batch(
                BatchKind::Deals,
                batch.rows,
                batch.rejected,
                cancel,
                |d| d.id,
                move |risk, deal| async move {
                    risk.persist_deal_risk(deal, now).await.map(|_| ())
                },
            )
            .await;
        log_report(user_id, &report);
        Ok(report)
    }

    /// Threads first, then deals. This is the post-sync hook.
    pub async fn reconcile_user(
        &self,
        user_id: &str,
        cancel: &CancellationToken,
    ) -> Result<UserReport, Error> {
        let threads = self.update_all_threads_risk(user_id, cancel).await?;
        let deals = self.update_all_deals_risk(user_id, cancel).await?;
        Ok(UserReport {
            user_id: user_id.to_string(),
            threads,
            deals,
        })
    }

    /// Reconcile every user in the store.
    ///
    /// A user whose bulk read fails is logged and skipped; failing to list
    /// users at all is returned.
    pub async fn reconcile_all(&self, cancel: &CancellationToken) -> Result<Vec<UserReport>, Error> {
        let users = self.risk.store().list_user_ids().await?;
        let mut reports = Vec::with_capacity(users.len());

        for user_id in &users {
            if cancel.is_cancelled() {
                info!(remaining = users.len() - reports.len(), "Reconcile cancelled");
                break;
            }
            match self.reconcile_user(user_id, cancel).await {
                Ok(report) => reports.push(report),
                Err(e) => warn!(user_id = %user_id, error = %e, "Reconcile failed for user"),
            }
        }
        Ok(reports)
    }

    async fn run_batch<T, I, F, Fut>(
        &self,
        kind: BatchKind,
        items: Vec<T>,
        rejected: Vec<RejectedRow>,
        cancel: &CancellationToken,
        id_of: I,
        work: F,
    ) -> BatchReport
    where
        T: Send + 'static,
        I: Fn(&T) -> Uuid,
        F: Fn(RiskService, T) -> Fut,
        Fut: Future<Output = Result<(), DatabaseError>> + Send + 'static,
    {
        for row in &rejected {
            warn!(kind = %kind, entity_id = %row.id, error = %row.error, "Row could not be decoded");
        }
        let total = items.len() + rejected.len();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();
        let mut dispatched = 0;
        let mut cancelled = false;

        for item in items {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let id = id_of(&item);
            let fut = work(self.risk.clone(), item);
            tasks.spawn(async move {
                let _permit = permit;
                (id, fut.await)
            });
            dispatched += 1;
        }

        let mut succeeded = 0;
        let mut failed = rejected.len();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => succeeded += 1,
                Ok((id, Err(e))) => {
                    warn!(kind = %kind, entity_id = %id, error = %e, "Risk update failed");
                    failed += 1;
                }
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Risk update task aborted");
                    failed += 1;
                }
            }
        }

        BatchReport {
            kind,
            total,
            succeeded,
            failed,
            skipped: total - dispatched - rejected.len(),
            cancelled,
        }
    }
}

fn log_report(user_id: &str, report: &BatchReport) {
    info!(
        user_id = %user_id,
        kind = %report.kind,
        total = report.total,
        succeeded = report.succeeded,
        failed = report.failed,
        skipped = report.skipped,
        cancelled = report.cancelled,
        "Risk batch complete"
    );
}

// ── Scheduling ──────────────────────────────────────────────────────

/// When the periodic reconcile pass fires.
#[derive(Debug, Clone)]
pub enum ReconcileSchedule {
    Interval(Duration),
    Cron(Box<cron::Schedule>),
}

impl ReconcileSchedule {
    /// Cron wins when set; otherwise the fixed interval.
    pub fn from_config(config: &ReconcilerConfig) -> Result<Self, ConfigError> {
        match &config.cron {
            Some(expr) => {
                let schedule = cron::Schedule::from_str(expr).map_err(|e| ConfigError::InvalidValue {
                    key: "RISK_RECONCILE_CRON".into(),
                    message: format!("invalid cron: {e}"),
                })?;
                Ok(Self::Cron(Box::new(schedule)))
            }
            None if config.interval.is_zero() => Err(ConfigError::InvalidValue {
                key: "RISK_RECONCILE_INTERVAL_SECS".into(),
                message: "must be > 0".into(),
            }),
            None => Ok(Self::Interval(config.interval)),
        }
    }

    /// Delay from `now` until the next pass, or `None` if a cron schedule
    /// has no future occurrences.
    pub fn next_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Self::Interval(period) => Some((*period).max(MIN_TICK)),
            Self::Cron(schedule) => {
                let next = schedule.after(&now).next()?;
                Some((next - now).to_std().unwrap_or_default())
            }
        }
    }
}

/// Spawn the periodic reconcile loop. Stops when `cancel` fires.
pub fn spawn_reconcile_ticker(
    reconciler: Arc<BatchReconciler>,
    schedule: ReconcileSchedule,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match &schedule {
            ReconcileSchedule::Interval(period) => {
                let mut ticker = tokio::time::interval((*period).max(MIN_TICK));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // Skip immediate first tick
                ticker.tick().await;

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    run_pass(&reconciler, &cancel).await;
                }
            }
            ReconcileSchedule::Cron(_) => loop {
                let Some(delay) = schedule.next_delay(Utc::now()) else {
                    warn!("Cron schedule has no upcoming fire time; ticker exiting");
                    break;
                };
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                run_pass(&reconciler, &cancel).await;
            },
        }
        debug!("Reconcile ticker stopped");
    })
}

async fn run_pass(reconciler: &BatchReconciler, cancel: &CancellationToken) {
    match reconciler.reconcile_all(cancel).await {
        Ok(reports) => {
            let failed: usize = reports
                .iter()
                .map(|r| r.threads.failed + r.deals.failed)
                .sum();
            info!(users = reports.len(), failed, "Reconcile pass complete");
        }
        Err(e) => warn!(error = %e, "Reconcile pass failed"),
    }
}
