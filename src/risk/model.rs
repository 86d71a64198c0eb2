//! Risk levels, flag codes, and evaluation results.

use serde::{Deserialize, Serialize};

/// Ordinal risk severity. Variant order is the severity order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Whether this level counts as "at risk".
    pub fn is_at_risk(&self) -> bool {
        *self != Self::None
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("Unknown risk level: {}", s)),
        }
    }
}

/// Which factor triggered a risk. Variant order is the reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFlag {
    ResponseDelay,
    CommunicationFrequency,
    StageDuration,
}

impl RiskFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResponseDelay => "response_delay",
            Self::CommunicationFrequency => "communication_frequency",
            Self::StageDuration => "stage_duration",
        }
    }
}

impl std::fmt::Display for RiskFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskFlag {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "response_delay" => Ok(Self::ResponseDelay),
            "communication_frequency" => Ok(Self::CommunicationFrequency),
            "stage_duration" => Ok(Self::StageDuration),
            _ => Err(format!("Unknown risk flag: {}", s)),
        }
    }
}

/// One triggered factor: its severity, flag, and explanatory clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactorResult {
    pub level: RiskLevel,
    pub flag: RiskFlag,
    pub clause: String,
}

impl FactorResult {
    pub fn new(level: RiskLevel, flag: RiskFlag, clause: impl Into<String>) -> Self {
        Self {
            level,
            flag,
            clause: clause.into(),
        }
    }
}

/// Output of a single evaluation. Not persisted as its own entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAnalysisResult {
    pub risk_level: RiskLevel,
    pub risk_flags: Vec<RiskFlag>,
    pub risk_reason: String,
}

impl RiskAnalysisResult {
    /// The "nothing to report" result.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn has_flag(&self, flag: RiskFlag) -> bool {
        self.risk_flags.contains(&flag)
    }
}
