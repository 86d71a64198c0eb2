//! Pure rules mapping thread and deal signals to a risk result.
//!
//! Nothing here touches the store. Callers fetch the entity, pass `now`, and
//! get back a [`RiskAnalysisResult`]. Deal evaluation runs each factor
//! independently and folds the triggered ones through [`combine`].

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::RiskConfig;
use crate::deals::model::DealStage;
use crate::risk::model::{FactorResult, RiskAnalysisResult, RiskFlag, RiskLevel};
use crate::threads::model::{NextActionOwner, Thread, ThreadCategory};

/// Everything the deal rules look at.
#[derive(Debug, Clone)]
pub struct DealSignals<'a> {
    pub stage: DealStage,
    pub stage_entered_at: DateTime<Utc>,
    /// Threads linked to the deal (all categories).
    pub threads: &'a [Thread],
    /// Messages (or thread activity) inside the frequency window.
    pub recent_messages: usize,
}

/// Whole days elapsed since `from`, floored. Future timestamps count as zero.
pub fn days_since(from: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    now.signed_duration_since(from).num_days().max(0)
}

/// Map a no-reply day count onto the response-delay buckets.
pub fn response_delay_level(days: i64, config: &RiskConfig) -> RiskLevel {
    if days >= config.high_days {
        RiskLevel::High
    } else if days >= config.medium_days {
        RiskLevel::Medium
    } else if days >= config.low_days {
        RiskLevel::Low
    } else {
        RiskLevel::None
    }
}

/// Evaluate a single thread.
///
/// Only waiting threads accrue delay risk; the operator's own threads are
/// never penalized for elapsed time.
pub fn evaluate_thread(thread: &Thread, now: DateTime<Utc>, config: &RiskConfig) -> RiskAnalysisResult {
    if thread.category != ThreadCategory::Waiting {
        return RiskAnalysisResult::none();
    }
    if thread.next_action_owner == NextActionOwner::Agent {
        debug!(
            thread_id = %thread.id,
            "Waiting thread has agent as next action owner; evaluating by category"
        );
    }

    combine(response_delay_factor(thread.last_message_at, now, config))
}

/// Evaluate a deal from its stage clock, linked threads, and recent activity.
pub fn evaluate_deal(signals: &DealSignals<'_>, now: DateTime<Utc>, config: &RiskConfig) -> RiskAnalysisResult {
    let latest_waiting = signals
        .threads
        .iter()
        .filter(|t| t.category == ThreadCategory::Waiting)
        .map(|t| t.last_message_at)
        .max();

    let factors = [
        latest_waiting.and_then(|at| response_delay_factor(at, now, config)),
        communication_frequency_factor(signals.recent_messages, config),
        stage_duration_factor(signals.stage, signals.stage_entered_at, now, config),
    ];

    combine(factors.into_iter().flatten())
}

/// Response delay: days since the last message, bucketed.
pub fn response_delay_factor(
    last_message_at: DateTime<Utc>,
    now: DateTime<Utc>,
    config: &RiskConfig,
) -> Option<FactorResult> {
    let days = days_since(last_message_at, now);
    match response_delay_level(days, config) {
        RiskLevel::None => None,
        level => Some(FactorResult::new(
            level,
            RiskFlag::ResponseDelay,
            format!("No response for {days} days"),
        )),
    }
}

/// Communication frequency: messages per week over the trailing window.
pub fn communication_frequency_factor(message_count: usize, config: &RiskConfig) -> Option<FactorResult> {
    let window = config.frequency_window_days;
    if message_count == 0 {
        return Some(FactorResult::new(
            RiskLevel::High,
            RiskFlag::CommunicationFrequency,
            format!("No communication in the last {window} days"),
        ));
    }

    let per_week = message_count as f64 / window as f64 * 7.0;
    let bands = &config.frequency_bands;
    let level = if per_week < bands.high_below {
        RiskLevel::High
    } else if per_week < bands.medium_below {
        RiskLevel::Medium
    } else if per_week < bands.low_below {
        RiskLevel::Low
    } else {
        return None;
    };

    Some(FactorResult::new(
        level,
        RiskFlag::CommunicationFrequency,
        format!("Low communication frequency ({per_week:.1} messages per week)"),
    ))
}

/// Stage duration: time in the current stage against its threshold.
///
/// Both boundaries fall into the higher tier: exactly `threshold` days is
/// medium, exactly `threshold * multiplier` days is high.
pub fn stage_duration_factor(
    stage: DealStage,
    stage_entered_at: DateTime<Utc>,
    now: DateTime<Utc>,
    config: &RiskConfig,
) -> Option<FactorResult> {
    let threshold = config.stage_threshold(stage)?;
    let days = days_since(stage_entered_at, now);

    let level = if days as f64 >= threshold as f64 * config.stage_high_multiplier {
        RiskLevel::High
    } else if days >= threshold {
        RiskLevel::Medium
    } else {
        return None;
    };

    Some(FactorResult::new(
        level,
        RiskFlag::StageDuration,
        format!("Deal in {stage} stage too long ({days} days, threshold {threshold})"),
    ))
}

/// Fold triggered factors into one result.
///
/// Flags come out in fixed order (response delay, communication frequency,
/// stage duration) with one entry per flag; the level is the maximum; the
/// reason joins each kept factor's clause with `"; "`. Factors at level
/// `None` are ignored.
pub fn combine(factors: impl IntoIterator<Item = FactorResult>) -> RiskAnalysisResult {
    let mut kept: Vec<FactorResult> = factors
        .into_iter()
        .filter(|f| f.level != RiskLevel::None)
        .collect();

    // Highest severity first within a flag so dedup keeps the strongest clause.
    kept.sort_by(|a, b| a.flag.cmp(&b.flag).then_with(|| b.level.cmp(&a.level)));
    kept.dedup_by_key(|f| f.flag);

    RiskAnalysisResult {
        risk_level: kept.iter().map(|f| f.level).max().unwrap_or_default(),
        risk_flags: kept.iter().map(|f| f.flag).collect(),
        risk_reason: kept
            .iter()
            .map(|f| f.clause.as_str())
            .collect::<Vec<_>>()
            .join("; "),
    }
}
