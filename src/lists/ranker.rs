//! Priority ranker for the Focus and Waiting lists.
//!
//! Everything here is pure over a thread snapshot. Both lists share one
//! ordering: risk descending, then oldest `last_message_at` first, then id
//! so that equal keys still produce a stable, deterministic order.

use std::cmp::Ordering;

use serde::Serialize;

use crate::threads::model::{Thread, ThreadCategory};

/// Bounded Focus list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusList {
    pub threads: Vec<Thread>,
    /// Focus threads before truncation.
    pub total: usize,
    pub displayed: usize,
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WaitingListOptions {
    /// Keep only threads with a risk level above `None`.
    pub risk_only: bool,
    /// Truncate after ranking. Unbounded when `None`.
    pub limit: Option<usize>,
}

impl WaitingListOptions {
    pub fn at_risk() -> Self {
        Self {
            risk_only: true,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingList {
    pub threads: Vec<Thread>,
    /// Waiting threads after the risk filter, before any limit.
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusStats {
    pub total: usize,
    pub displayed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingStats {
    pub total: usize,
    pub at_risk: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListStatistics {
    pub focus: FocusStats,
    pub waiting: WaitingStats,
}

/// Shared list ordering.
pub fn compare_priority(a: &Thread, b: &Thread) -> Ordering {
    b.risk_level
        .cmp(&a.risk_level)
        .then_with(|| a.last_message_at.cmp(&b.last_message_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Sort in place by [`compare_priority`].
pub fn rank_threads(threads: &mut [Thread]) {
    threads.sort_by(compare_priority);
}

fn in_category(threads: Vec<Thread>, category: ThreadCategory) -> Vec<Thread> {
    threads
        .into_iter()
        .filter(|t| t.category == category)
        .collect()
}

/// Rank the Focus threads and keep the first `limit`.
pub fn focus_list(threads: Vec<Thread>, limit: usize) -> FocusList {
    let mut focus = in_category(threads, ThreadCategory::Focus);
    let total = focus.len();
    rank_threads(&mut focus);
    focus.truncate(limit);

    FocusList {
        displayed: focus.len(),
        has_more: total > limit,
        total,
        threads: focus,
    }
}

/// Rank the Waiting threads, optionally filtered to at-risk ones.
pub fn waiting_list(threads: Vec<Thread>, options: WaitingListOptions) -> WaitingList {
    let mut waiting = in_category(threads, ThreadCategory::Waiting);
    if options.risk_only {
        waiting.retain(|t| t.risk_level.is_at_risk());
    }
    let total = waiting.len();
    rank_threads(&mut waiting);
    if let Some(limit) = options.limit {
        waiting.truncate(limit);
    }

    WaitingList {
        threads: waiting,
        total,
    }
}

/// Counts for both lists from one snapshot.
pub fn list_statistics(threads: &[Thread], focus_limit: usize) -> ListStatistics {
    let (mut focus_total, mut waiting_total, mut at_risk) = (0, 0, 0);
    for thread in threads {
        match thread.category {
            ThreadCategory::Focus => focus_total += 1,
            ThreadCategory::Waiting => {
                waiting_total += 1;
                if thread.risk_level.is_at_risk() {
                    at_risk += 1;
                }
            }
        }
    }

    ListStatistics {
        focus: FocusStats {
            total: focus_total,
            displayed: focus_total.min(focus_limit),
        },
        waiting: WaitingStats {
            total: waiting_total,
            at_risk,
        },
    }
}
