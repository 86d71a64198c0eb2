//! Deal data model: pipeline stages and persisted risk fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::risk::model::{RiskAnalysisResult, RiskFlag, RiskLevel};

/// Pipeline stage of a deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStage {
    Lead,
    Qualified,
    Viewing,
    Offer,
    Conditional,
    PreSettlement,
    Sold,
    Nurture,
}

impl DealStage {
    pub const ALL: [DealStage; 8] = [
        Self::Lead,
        Self::Qualified,
        Self::Viewing,
        Self::Offer,
        Self::Conditional,
        Self::PreSettlement,
        Self::Sold,
        Self::Nurture,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Qualified => "qualified",
            Self::Viewing => "viewing",
            Self::Offer => "offer",
            Self::Conditional => "conditional",
            Self::PreSettlement => "pre_settlement",
            Self::Sold => "sold",
            Self::Nurture => "nurture",
        }
    }
}

impl std::fmt::Display for DealStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DealStage {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DealStage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("Unknown deal stage: {}", s))
    }
}

/// A tracked transaction moving through pipeline stages.
///
/// Threads are not owned here; they point back via `Thread::deal_id` and are
/// looked up through the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub stage: DealStage,
    /// When the deal entered `stage`. Falls back to `created_at` when unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_entered_at: Option<DateTime<Utc>>,
    pub risk_level: RiskLevel,
    pub risk_flags: Vec<RiskFlag>,
    pub risk_reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deal {
    pub fn new(user_id: impl Into<String>, title: impl Into<String>, stage: DealStage) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            title: title.into(),
            stage,
            stage_entered_at: Some(now),
            risk_level: RiskLevel::None,
            risk_flags: Vec::new(),
            risk_reason: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: set when the current stage was entered.
    pub fn with_stage_entered_at(mut self, at: DateTime<Utc>) -> Self {
        self.stage_entered_at = Some(at);
        self
    }

    /// Builder: set creation time (also the stage clock when none is recorded).
    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// Stage-entry timestamp used for stage-duration rules.
    pub fn stage_clock(&self) -> DateTime<Utc> {
        self.stage_entered_at.unwrap_or(self.created_at)
    }

    /// Copy an evaluation result onto this deal.
    pub fn apply_risk(&mut self, result: &RiskAnalysisResult) {
        self.risk_level = result.risk_level;
        self.risk_flags = result.risk_flags.clone();
        self.risk_reason = result.risk_reason.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_str_roundtrip() {
        for stage in DealStage::ALL {
            assert_eq!(stage.as_str().parse::<DealStage>().unwrap(), stage);
        }
        assert!("closed".parse::<DealStage>().is_err());
    }

    #[test]
    fn stage_serde_snake_case() {
        let json = serde_json::to_string(&DealStage::PreSettlement).unwrap();
        assert_eq!(json, "\"pre_settlement\"");
    }

    #[test]
    fn stage_clock_falls_back_to_created_at() {
        let created = Utc::now() - chrono::Duration::days(40);
        let mut deal = Deal::new("u", "12 Elm St", DealStage::Lead).with_created_at(created);
        deal.stage_entered_at = None;
        assert_eq!(deal.stage_clock(), created);

        let entered = Utc::now() - chrono::Duration::days(3);
        let deal = deal.with_stage_entered_at(entered);
        assert_eq!(deal.stage_clock(), entered);
    }

    #[test]
    fn apply_risk_copies_all_fields() {
        let mut deal = Deal::new("u", "t", DealStage::Offer);
        let result = RiskAnalysisResult {
            risk_level: RiskLevel::Medium,
            risk_flags: vec![RiskFlag::StageDuration],
            risk_reason: "Deal in offer stage too long".into(),
        };
        deal.apply_risk(&result);
        assert_eq!(deal.risk_level, RiskLevel::Medium);
        assert_eq!(deal.risk_flags, vec![RiskFlag::StageDuration]);
        assert_eq!(deal.risk_reason, "Deal in offer stage too long");
    }
}
