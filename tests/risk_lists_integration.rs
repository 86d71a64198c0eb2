//! Integration tests for risk evaluation, batch reconciliation and the
//! Focus/Waiting lists over the libSQL store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use risk_triage::config::{ListConfig, RiskConfig};
use risk_triage::deals::{Deal, DealStage};
use risk_triage::lists::{ListService, WaitingListOptions};
use risk_triage::risk::{BatchReconciler, RiskFlag, RiskLevel, RiskService};
use risk_triage::store::{Database, LibSqlBackend};
use risk_triage::threads::{Thread, ThreadCategory};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    store: Arc<dyn Database>,
    risk: RiskService,
    lists: ListService,
    reconciler: BatchReconciler,
}

async fn harness() -> Harness {
    let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let risk = RiskService::new(Arc::clone(&store), RiskConfig::default());
    Harness {
        lists: ListService::new(Arc::clone(&store), ListConfig::default()),
        reconciler: BatchReconciler::new(risk.clone(), 4),
        risk,
        store,
    }
}

fn days_ago(days: i64) -> chrono::DateTime<Utc> {
    Utc::now() - ChronoDuration::days(days)
}

#[tokio::test]
async fn waiting_thread_twelve_days_is_high() {
    let h = harness().await;
    let thread = Thread::new("alice", ThreadCategory::Waiting, days_ago(12));
    h.store.insert_thread(&thread).await.unwrap();

    let result = timeout(TEST_TIMEOUT, h.risk.analyze_thread_risk(thread.id))
        .await
        .expect("timed out")
        .unwrap();

    assert_eq!(
        serde_json::to_value(&result).unwrap(),
        json!({
            "riskLevel": "high",
            "riskFlags": ["response_delay"],
            "riskReason": "No response for 12 days",
        })
    );
}

#[tokio::test]
async fn lead_deal_past_one_and_a_half_thresholds_is_high() {
    let h = harness().await;
    let deal = Deal::new("alice", "12 Elm St", DealStage::Lead).with_stage_entered_at(days_ago(25));
    h.store.insert_deal(&deal).await.unwrap();

    let updated = h.risk.update_deal_risk(deal.id).await.unwrap();
    assert_eq!(updated.risk_level, RiskLevel::High);
    assert!(updated.risk_flags.contains(&RiskFlag::StageDuration));
    assert!(updated.risk_reason.contains("lead stage"));
    assert!(updated.risk_reason.contains("25 days, threshold 14"));
}

#[tokio::test]
async fn fifteen_focus_threads_show_ten() {
    let h = harness().await;
    for i in 0..15 {
        h.store
            .insert_thread(&Thread::new("alice", ThreadCategory::Focus, days_ago(i)))
            .await
            .unwrap();
    }

    let list = h.lists.get_focus_list("alice").await.unwrap();
    assert_eq!(list.threads.len(), 10);
    assert_eq!(list.total, 15);
    assert!(list.has_more);

    let body: Value = serde_json::to_value(&list).unwrap();
    assert_eq!(body["hasMore"], json!(true));
    assert_eq!(body["displayed"], json!(10));
}

#[tokio::test]
async fn focus_threads_never_carry_time_risk() {
    let h = harness().await;
    for days in [1, 4, 8, 30] {
        h.store
            .insert_thread(&Thread::new("alice", ThreadCategory::Focus, days_ago(days)))
            .await
            .unwrap();
    }

    let report = h
        .reconciler
        .update_all_threads_risk("alice", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.succeeded, 4);

    let threads = h.store.list_threads("alice").await.unwrap();
    assert!(threads.iter().all(|t| t.risk_level == RiskLevel::None));
}

#[tokio::test]
async fn reconcile_then_lists_agree() {
    let h = harness().await;
    for days in [0, 2, 3, 5, 9, 10, 40] {
        h.store
            .insert_thread(&Thread::new("alice", ThreadCategory::Waiting, days_ago(days)))
            .await
            .unwrap();
    }
    for days in 0..12 {
        h.store
            .insert_thread(&Thread::new("alice", ThreadCategory::Focus, days_ago(days)))
            .await
            .unwrap();
    }

    let report = h
        .reconciler
        .reconcile_user("alice", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.threads.total, 19);
    assert!(report.threads.is_complete());

    let waiting = h
        .lists
        .get_waiting_list("alice", WaitingListOptions::default())
        .await
        .unwrap();
    let levels: Vec<RiskLevel> = waiting.threads.iter().map(|t| t.risk_level).collect();
    assert_eq!(
        levels,
        vec![
            RiskLevel::High,   // 40 days
            RiskLevel::High,   // 10 days
            RiskLevel::Medium, // 9 days
            RiskLevel::Medium, // 5 days
            RiskLevel::Low,    // 3 days
            RiskLevel::None,   // 2 days
            RiskLevel::None,   // today
        ]
    );

    let at_risk = h
        .lists
        .get_waiting_list("alice", WaitingListOptions::at_risk())
        .await
        .unwrap();
    let stats = h.lists.get_list_statistics("alice").await.unwrap();
    let focus = h.lists.get_focus_list("alice").await.unwrap();

    assert_eq!(stats.waiting.total, waiting.total);
    assert_eq!(stats.waiting.at_risk, at_risk.total);
    assert_eq!(stats.waiting.at_risk, 5);
    assert_eq!(stats.focus.total, focus.total);
    assert_eq!(stats.focus.displayed, focus.displayed);
    assert_eq!(stats.focus.displayed, 10);
}

#[tokio::test]
async fn category_change_is_picked_up_on_next_pass() {
    let h = harness().await;
    let thread = Thread::new("alice", ThreadCategory::Waiting, days_ago(11));
    h.store.insert_thread(&thread).await.unwrap();

    let updated = h.risk.update_thread_risk(thread.id).await.unwrap();
    assert_eq!(updated.risk_level, RiskLevel::High);

    // Reply arrives: the thread moves to Focus.
    h.store
        .update_thread_category(thread.id, ThreadCategory::Focus, Utc::now())
        .await
        .unwrap();
    let updated = h.risk.update_thread_risk(thread.id).await.unwrap();
    assert_eq!(updated.risk_level, RiskLevel::None);
    assert_eq!(updated.risk_reason, "");
}

#[tokio::test]
async fn repeated_batches_leave_identical_state() {
    let h = harness().await;
    let deal = Deal::new("alice", "12 Elm St", DealStage::Conditional)
        .with_stage_entered_at(days_ago(50));
    h.store.insert_deal(&deal).await.unwrap();
    let thread = Thread::new("alice", ThreadCategory::Waiting, days_ago(7)).with_deal(deal.id);
    h.store.insert_thread(&thread).await.unwrap();
    for day in [7, 14, 21] {
        h.store.record_thread_message(thread.id, days_ago(day)).await.unwrap();
    }

    let cancel = CancellationToken::new();
    h.reconciler.reconcile_user("alice", &cancel).await.unwrap();
    let first = h.store.get_deal(deal.id).await.unwrap().unwrap();
    h.reconciler.reconcile_user("alice", &cancel).await.unwrap();
    let second = h.store.get_deal(deal.id).await.unwrap().unwrap();

    assert_eq!(first.risk_level, second.risk_level);
    assert_eq!(first.risk_flags, second.risk_flags);
    assert_eq!(first.risk_reason, second.risk_reason);

    // 7 days waiting: medium; 3 messages in 30 days = 0.7/week: medium;
    // 50 days in conditional (threshold 45): medium.
    assert_eq!(second.risk_level, RiskLevel::Medium);
    assert_eq!(
        second.risk_flags,
        vec![
            RiskFlag::ResponseDelay,
            RiskFlag::CommunicationFrequency,
            RiskFlag::StageDuration,
        ]
    );
    assert_eq!(
        second.risk_reason,
        "No response for 7 days; Low communication frequency (0.7 messages per week); \
         Deal in conditional stage too long (50 days, threshold 45)"
    );
}

#[tokio::test]
async fn unknown_entities_report_not_found() {
    let h = harness().await;
    let id = uuid::Uuid::new_v4();

    let err = h.risk.analyze_deal_risk(id).await.unwrap_err();
    assert_eq!(err.to_string(), format!("Deal not found: {id}"));
    let err = h.risk.update_thread_risk(id).await.unwrap_err();
    assert_eq!(err.to_string(), format!("Thread not found: {id}"));
}

#[tokio::test]
async fn cancelled_reconcile_skips_remaining_work() {
    let h = harness().await;
    for days in 0..6 {
        h.store
            .insert_thread(&Thread::new("alice", ThreadCategory::Waiting, days_ago(days)))
            .await
            .unwrap();
    }
    h.store
        .insert_deal(&Deal::new("alice", "12 Elm St", DealStage::Offer))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = h.reconciler.reconcile_user("alice", &cancel).await.unwrap();
    assert!(report.threads.cancelled);
    assert_eq!(report.threads.skipped, 6);
    assert!(report.deals.cancelled);
    assert_eq!((report.deals.total, report.deals.skipped), (1, 1));
}
