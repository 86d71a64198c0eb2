//! Conversation threads and whose turn it is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::risk::model::{RiskAnalysisResult, RiskLevel};

/// Whose turn it is to respond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadCategory {
    /// The operator owes a reply.
    Focus,
    /// The counterpart owes a reply.
    Waiting,
}

impl ThreadCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Focus => "focus",
            Self::Waiting => "waiting",
        }
    }
}

impl std::fmt::Display for ThreadCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ThreadCategory {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "focus" => Ok(Self::Focus),
            "waiting" => Ok(Self::Waiting),
            _ => Err(format!("Unknown thread category: {}", s)),
        }
    }
}

/// Who takes the next action on a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextActionOwner {
    Agent,
    Other,
}

impl NextActionOwner {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Other => "other",
        }
    }

    /// The owner implied by a category.
    pub fn for_category(category: ThreadCategory) -> Self {
        match category {
            ThreadCategory::Focus => Self::Agent,
            ThreadCategory::Waiting => Self::Other,
        }
    }
}

impl std::fmt::Display for NextActionOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NextActionOwner {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(Self::Agent),
            "other" => Ok(Self::Other),
            _ => Err(format!("Unknown next action owner: {}", s)),
        }
    }
}

/// A single message conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    /// Unique ID.
    pub id: Uuid,
    /// Owner of this thread.
    pub user_id: String,
    /// Subject line, if the channel has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Whose turn it is.
    pub category: ThreadCategory,
    /// Who acts next. Should agree with `category`.
    pub next_action_owner: NextActionOwner,
    /// Most recent message in the thread.
    pub last_message_at: DateTime<Utc>,
    /// Derived risk level.
    pub risk_level: RiskLevel,
    /// Derived explanation for `risk_level`.
    pub risk_reason: String,
    /// Deal this thread belongs to (weak reference, lookup only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deal_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    /// Create a thread with no derived risk yet.
    pub fn new(
        user_id: impl Into<String>,
        category: ThreadCategory,
        last_message_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            subject: None,
            category,
            next_action_owner: NextActionOwner::for_category(category),
            last_message_at,
            risk_level: RiskLevel::None,
            risk_reason: String::new(),
            deal_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: set subject.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Builder: attach to a deal.
    pub fn with_deal(mut self, deal_id: Uuid) -> Self {
        self.deal_id = Some(deal_id);
        self
    }

    /// Builder: preset a risk level (used when seeding lists).
    pub fn with_risk(mut self, level: RiskLevel, reason: impl Into<String>) -> Self {
        self.risk_level = level;
        self.risk_reason = reason.into();
        self
    }

    /// Copy an evaluation result onto this thread.
    pub fn apply_risk(&mut self, result: &RiskAnalysisResult) {
        self.risk_level = result.risk_level;
        self.risk_reason = result.risk_reason.clone();
    }
}
