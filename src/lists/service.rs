//! List service: one bulk read per call, then the pure ranker.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::config::ListConfig;
use crate::error::DatabaseError;
use crate::lists::ranker::{
    self, FocusList, ListStatistics, WaitingList, WaitingListOptions,
};
use crate::store::Database;
use crate::threads::model::{Thread, ThreadCategory};

pub struct ListService {
    store: Arc<dyn Database>,
    config: ListConfig,
}

impl ListService {
    pub fn new(store: Arc<dyn Database>, config: ListConfig) -> Self {
        Self { store, config }
    }

    pub async fn get_focus_list(&self, user_id: &str) -> Result<FocusList, DatabaseError> {
        let threads = self
            .store
            .list_threads_by_category(user_id, ThreadCategory::Focus)
            .await?;
        let list = ranker::focus_list(threads, self.config.focus_limit);
        debug!(user_id, total = list.total, displayed = list.displayed, "Focus list built");
        Ok(list)
    }

    pub async fn get_waiting_list(
        &self,
        user_id: &str,
        options: WaitingListOptions,
    ) -> Result<WaitingList, DatabaseError> {
        let threads = self
            .store
            .list_threads_by_category(user_id, ThreadCategory::Waiting)
            .await?;
        let list = ranker::waiting_list(threads, options);
        debug!(user_id, total = list.total, risk_only = options.risk_only, "Waiting list built");
        Ok(list)
    }

    /// Both lists' counts from a single snapshot, so they cannot disagree.
    pub async fn get_list_statistics(&self, user_id: &str) -> Result<ListStatistics, DatabaseError> {
        let threads = self.store.list_threads(user_id).await?;
        Ok(ranker::list_statistics(&threads, self.config.focus_limit))
    }

    /// A deal's threads in list order.
    pub async fn get_deal_threads(&self, deal_id: Uuid) -> Result<Vec<Thread>, DatabaseError> {
        if self.store.get_deal(deal_id).await?.is_none() {
            return Err(DatabaseError::deal_not_found(deal_id));
        }
        let mut threads = self.store.list_deal_threads(deal_id).await?;
        ranker::rank_threads(&mut threads);
        Ok(threads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    use crate::deals::model::{Deal, DealStage};
    use crate::risk::model::RiskLevel;
    use crate::store::LibSqlBackend;

    async fn setup() -> (Arc<dyn Database>, ListService) {
        let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let service = ListService::new(Arc::clone(&store), ListConfig::default());
        (store, service)
    }

    #[tokio::test]
    async fn focus_list_from_store() {
        let (store, service) = setup().await;
        for i in 0..15 {
            let thread = Thread::new("alice", ThreadCategory::Focus, Utc::now() - Duration::hours(i));
            store.insert_thread(&thread).await.unwrap();
        }
        store
            .insert_thread(&Thread::new("bob", ThreadCategory::Focus, Utc::now()))
            .await
            .unwrap();

        let list = service.get_focus_list("alice").await.unwrap();
        assert_eq!(list.threads.len(), 10);
        assert_eq!(list.total, 15);
        assert!(list.has_more);
        assert!(list.threads.iter().all(|t| t.user_id == "alice"));
    }

    #[tokio::test]
    async fn waiting_list_risk_only() {
        let (store, service) = setup().await;
        let now = Utc::now();
        store
            .insert_thread(
                &Thread::new("alice", ThreadCategory::Waiting, now - Duration::days(12))
                    .with_risk(RiskLevel::High, "No response for 12 days"),
            )
            .await
            .unwrap();
        store
            .insert_thread(&Thread::new("alice", ThreadCategory::Waiting, now))
            .await
            .unwrap();

        let all = service
            .get_waiting_list("alice", WaitingListOptions::default())
            .await
            .unwrap();
        assert_eq!(all.total, 2);
        assert_eq!(all.threads[0].risk_level, RiskLevel::High);

        let at_risk = service
            .get_waiting_list("alice", WaitingListOptions::at_risk())
            .await
            .unwrap();
        assert_eq!(at_risk.total, 1);

        let stats = service.get_list_statistics("alice").await.unwrap();
        assert_eq!(stats.waiting.total, 2);
        assert_eq!(stats.waiting.at_risk, 1);
        assert_eq!(stats.focus.total, 0);
    }

    #[tokio::test]
    async fn deal_threads_ranked_and_checked() {
        let (store, service) = setup().await;
        let deal = Deal::new("alice", "12 Elm St", DealStage::Offer);
        store.insert_deal(&deal).await.unwrap();
        let calm = Thread::new("alice", ThreadCategory::Focus, Utc::now()).with_deal(deal.id);
        let hot = Thread::new("alice", ThreadCategory::Waiting, Utc::now())
            .with_deal(deal.id)
            .with_risk(RiskLevel::Medium, "No response for 6 days");
        store.insert_thread(&calm).await.unwrap();
        store.insert_thread(&hot).await.unwrap();

        let threads = service.get_deal_threads(deal.id).await.unwrap();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].id, hot.id);

        let missing = Uuid::new_v4();
        let err = service.get_deal_threads(missing).await.unwrap_err();
        assert_eq!(err.to_string(), format!("Deal not found: {missing}"));
    }
}
