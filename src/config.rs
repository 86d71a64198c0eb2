//! Configuration types.
//!
//! Every threshold the evaluator uses lives here so tests and deployments can
//! override them without touching rule logic.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::deals::model::DealStage;
use crate::error::ConfigError;

/// Messages-per-week bands for the communication-frequency factor.
///
/// A rate below `high_below` is high risk, below `medium_below` medium,
/// below `low_below` low; anything at or above `low_below` does not trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyBands {
    pub high_below: f64,
    pub medium_below: f64,
    pub low_below: f64,
}

impl Default for FrequencyBands {
    fn default() -> Self {
        Self {
            high_below: 0.5,
            medium_below: 1.0,
            low_below: 2.0,
        }
    }
}

/// Thresholds for thread and deal risk evaluation.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Days without a reply before a waiting thread is low risk.
    pub low_days: i64,
    /// Days before medium risk.
    pub medium_days: i64,
    /// Days before high risk.
    pub high_days: i64,
    /// Trailing window for communication frequency.
    pub frequency_window_days: i64,
    pub frequency_bands: FrequencyBands,
    /// Maximum days per stage before a deal is considered stalled.
    /// Stages without an entry are never flagged.
    pub stage_thresholds: HashMap<DealStage, i64>,
    /// Multiple of the stage threshold at which stalling becomes high risk.
    pub stage_high_multiplier: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            low_days: 3,
            medium_days: 5,
            high_days: 10,
            frequency_window_days: 30,
            frequency_bands: FrequencyBands::default(),
            stage_thresholds: default_stage_thresholds(),
            stage_high_multiplier: 1.5,
        }
    }
}

fn default_stage_thresholds() -> HashMap<DealStage, i64> {
    HashMap::from([
        (DealStage::Lead, 14),
        (DealStage::Qualified, 21),
        (DealStage::Viewing, 30),
        (DealStage::Offer, 14),
        (DealStage::Conditional, 45),
        (DealStage::PreSettlement, 60),
    ])
}

impl RiskConfig {
    /// Load from environment, falling back to defaults for unset keys.
    ///
    /// `RISK_STAGE_THRESHOLDS` takes `stage=days` pairs, e.g. `lead=10,offer=7`;
    /// listed stages override the defaults, others keep theirs.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mut stage_thresholds = defaults.stage_thresholds;
        if let Ok(raw) = std::env::var("RISK_STAGE_THRESHOLDS") {
            stage_thresholds.extend(parse_stage_thresholds(&raw)?);
        }

        let config = Self {
            low_days: env_or("RISK_LOW_DAYS", defaults.low_days)?,
            medium_days: env_or("RISK_MEDIUM_DAYS", defaults.medium_days)?,
            high_days: env_or("RISK_HIGH_DAYS", defaults.high_days)?,
            frequency_window_days: env_or(
                "RISK_FREQUENCY_WINDOW_DAYS",
                defaults.frequency_window_days,
            )?,
            frequency_bands: defaults.frequency_bands,
            stage_thresholds,
            stage_high_multiplier: defaults.stage_high_multiplier,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the day buckets and frequency bands are ordered and every
    /// window or threshold is positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0 < self.low_days && self.low_days < self.medium_days && self.medium_days < self.high_days)
        {
            return Err(ConfigError::InvalidValue {
                key: "RISK_LOW_DAYS/RISK_MEDIUM_DAYS/RISK_HIGH_DAYS".into(),
                message: format!(
                    "expected 0 < low < medium < high, got {} / {} / {}",
                    self.low_days, self.medium_days, self.high_days
                ),
            });
        }
        if self.frequency_window_days <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "RISK_FREQUENCY_WINDOW_DAYS".into(),
                message: "must be positive".into(),
            });
        }
        let bands = &self.frequency_bands;
        if !(0.0 < bands.high_below
            && bands.high_below <= bands.medium_below
            && bands.medium_below <= bands.low_below)
        {
            return Err(ConfigError::InvalidValue {
                key: "frequency_bands".into(),
                message: format!(
                    "expected 0 < high <= medium <= low, got {} / {} / {}",
                    bands.high_below, bands.medium_below, bands.low_below
                ),
            });
        }
        let mut non_positive: Vec<_> = self
            .stage_thresholds
            .iter()
            .filter(|(_, days)| **days <= 0)
            .map(|(stage, days)| format!("{}={days}", stage.as_str()))
            .collect();
        if !non_positive.is_empty() {
            non_positive.sort();
            return Err(ConfigError::InvalidValue {
                key: "RISK_STAGE_THRESHOLDS".into(),
                message: format!("thresholds must be positive: {}", non_positive.join(", ")),
            });
        }
        if self.stage_high_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                key: "stage_high_multiplier".into(),
                message: "must be at least 1.0".into(),
            });
        }
        Ok(())
    }

    pub fn stage_threshold(&self, stage: DealStage) -> Option<i64> {
        self.stage_thresholds.get(&stage).copied()
    }
}

fn parse_stage_thresholds(raw: &str) -> Result<HashMap<DealStage, i64>, ConfigError> {
    let mut out = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (stage, days) = pair.split_once('=').ok_or_else(|| {
            ConfigError::ParseError(format!("RISK_STAGE_THRESHOLDS: expected stage=days, got '{pair}'"))
        })?;
        let stage: DealStage = stage
            .trim()
            .parse()
            .map_err(|e: String| ConfigError::ParseError(format!("RISK_STAGE_THRESHOLDS: {e}")))?;
        let days: i64 = days.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: "RISK_STAGE_THRESHOLDS".into(),
            message: format!("'{}' is not a day count", days.trim()),
        })?;
        out.insert(stage, days);
    }
    Ok(out)
}

/// Focus/Waiting list bounds.
#[derive(Debug, Clone)]
pub struct ListConfig {
    /// Maximum threads shown in the Focus list.
    pub focus_limit: usize,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self { focus_limit: 10 }
    }
}

impl ListConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            focus_limit: env_or("RISK_FOCUS_LIMIT", Self::default().focus_limit)?,
        })
    }
}

/// Batch reconciler scheduling.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Whether the periodic ticker runs at all.
    pub enabled: bool,
    /// Fixed interval between passes, used when `cron` is unset.
    pub interval: Duration,
    /// Six-field cron expression (`sec min hour dom mon dow`).
    pub cron: Option<String>,
    /// Maximum entities evaluated and persisted at once.
    pub max_concurrency: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(900), // 15 minutes
            cron: None,
            max_concurrency: 8,
        }
    }
}

impl ReconcilerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let interval_secs: u64 = env_or("RISK_RECONCILE_INTERVAL_SECS", defaults.interval.as_secs())?;
        let max_concurrency: usize = env_or("RISK_RECONCILE_CONCURRENCY", defaults.max_concurrency)?;
        if interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RISK_RECONCILE_INTERVAL_SECS".into(),
                message: "must be positive".into(),
            });
        }
        if max_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RISK_RECONCILE_CONCURRENCY".into(),
                message: "must be positive".into(),
            });
        }

        Ok(Self {
            enabled: env_or("RISK_RECONCILE_ENABLED", defaults.enabled)?,
            interval: Duration::from_secs(interval_secs),
            cron: std::env::var("RISK_RECONCILE_CRON")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            max_concurrency,
        })
    }
}

/// Read and parse an env var, or return `default` when it is unset.
fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("cannot parse '{raw}'"),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_thresholds() {
        let config = RiskConfig::default();
        assert_eq!((config.low_days, config.medium_days, config.high_days), (3, 5, 10));
        assert_eq!(config.frequency_window_days, 30);
        assert_eq!(config.stage_threshold(DealStage::Lead), Some(14));
        assert_eq!(config.stage_threshold(DealStage::Qualified), Some(21));
        assert_eq!(config.stage_threshold(DealStage::Viewing), Some(30));
        assert_eq!(config.stage_threshold(DealStage::Offer), Some(14));
        assert_eq!(config.stage_threshold(DealStage::Conditional), Some(45));
        assert_eq!(config.stage_threshold(DealStage::PreSettlement), Some(60));
        assert_eq!(config.stage_threshold(DealStage::Sold), None);
        assert_eq!(config.stage_threshold(DealStage::Nurture), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_unordered_buckets() {
        let config = RiskConfig {
            medium_days: 2,
            ..RiskConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn validate_rejects_non_positive_stage_threshold() {
        let mut config = RiskConfig::default();
        config.stage_thresholds.insert(DealStage::Lead, 0);
        match config.validate() {
            Err(ConfigError::InvalidValue { key, message }) => {
                assert_eq!(key, "RISK_STAGE_THRESHOLDS");
                assert!(message.contains("lead=0"));
            }
            other => panic!("expected InvalidValue, got {other:?}"),
        }

        config.stage_thresholds.insert(DealStage::Lead, -3);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_misordered_frequency_bands() {
        let inverted = RiskConfig {
            frequency_bands: FrequencyBands {
                high_below: 2.0,
                medium_below: 1.0,
                low_below: 0.5,
            },
            ..RiskConfig::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "frequency_bands"
        ));

        let zero_floor = RiskConfig {
            frequency_bands: FrequencyBands {
                high_below: 0.0,
                ..FrequencyBands::default()
            },
            ..RiskConfig::default()
        };
        assert!(zero_floor.validate().is_err());

        let collapsed = RiskConfig {
            frequency_bands: FrequencyBands {
                high_below: 1.0,
                medium_below: 1.0,
                low_below: 1.0,
            },
            ..RiskConfig::default()
        };
        assert!(collapsed.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_window() {
        let config = RiskConfig {
            frequency_window_days: 0,
            ..RiskConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_stage_threshold_overrides() {
        let parsed = parse_stage_thresholds("lead=10, offer = 7,").unwrap();
        assert_eq!(parsed.get(&DealStage::Lead), Some(&10));
        assert_eq!(parsed.get(&DealStage::Offer), Some(&7));
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn parse_stage_threshold_errors() {
        assert!(matches!(
            parse_stage_thresholds("lead"),
            Err(ConfigError::ParseError(_))
        ));
        assert!(matches!(
            parse_stage_thresholds("closed=3"),
            Err(ConfigError::ParseError(_))
        ));
        assert!(matches!(
            parse_stage_thresholds("lead=soon"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn list_and_reconciler_defaults() {
        assert_eq!(ListConfig::default().focus_limit, 10);
        let reconciler = ReconcilerConfig::default();
        assert!(reconciler.enabled);
        assert_eq!(reconciler.interval, Duration::from_secs(900));
        assert!(reconciler.cron.is_none());
        assert_eq!(reconciler.max_concurrency, 8);
    }

    #[test]
    fn env_or_uses_default_when_unset() {
        let value: i64 = env_or("RISK_TRIAGE_TEST_UNSET_KEY_8f3a", 42).unwrap();
        assert_eq!(value, 42);
    }
}
