//! Risk evaluation rules, the single-entity service, and batch reconciliation.

pub mod evaluator;
pub mod model;
pub mod reconciler;
pub mod service;

pub use model::{FactorResult, RiskAnalysisResult, RiskFlag, RiskLevel};
pub use reconciler::{
    BatchKind, BatchReconciler, BatchReport, ReconcileSchedule, UserReport,
    spawn_reconcile_ticker,
};
pub use service::RiskService;
