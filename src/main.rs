use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use risk_triage::config::{ListConfig, ReconcilerConfig, RiskConfig};
use risk_triage::lists::ListService;
use risk_triage::risk::{BatchReconciler, ReconcileSchedule, RiskService, spawn_reconcile_ticker};
use risk_triage::shutdown::install_signal_handler;
use risk_triage::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let risk_config = RiskConfig::from_env().context("loading risk thresholds")?;
    let list_config = ListConfig::from_env().context("loading list config")?;
    let reconciler_config = ReconcilerConfig::from_env().context("loading reconciler config")?;
    let schedule =
        ReconcileSchedule::from_config(&reconciler_config).context("parsing reconcile schedule")?;

    // ── Database ─────────────────────────────────────────────────────────
    let db_path = std::env::var("RISK_TRIAGE_DB_PATH")
        .unwrap_or_else(|_| "./data/risk-triage.db".to_string());
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(Path::new(&db_path))
            .await
            .with_context(|| format!("opening database at {db_path}"))?,
    );

    let risk = RiskService::new(Arc::clone(&db), risk_config);
    let lists = ListService::new(Arc::clone(&db), list_config);
    let reconciler = Arc::new(BatchReconciler::from_config(risk, &reconciler_config));

    eprintln!("Risk triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {db_path}");
    eprintln!(
        "   Reconcile: {}",
        if reconciler_config.enabled {
            match &reconciler_config.cron {
                Some(expr) => format!("cron '{expr}'"),
                None => format!("every {}s", reconciler_config.interval.as_secs()),
            }
        } else {
            "disabled".to_string()
        }
    );

    let cancel = install_signal_handler();

    // ── Startup pass ─────────────────────────────────────────────────────
    match reconciler.reconcile_all(&cancel).await {
        Ok(reports) => {
            for report in &reports {
                match lists.get_list_statistics(&report.user_id).await {
                    Ok(stats) => info!(
                        user_id = %report.user_id,
                        focus = stats.focus.total,
                        waiting = stats.waiting.total,
                        at_risk = stats.waiting.at_risk,
                        "User lists"
                    ),
                    Err(e) => warn!(user_id = %report.user_id, error = %e, "List statistics failed"),
                }
            }
            info!(users = reports.len(), "Startup reconcile complete");
        }
        Err(e) => warn!(error = %e, "Startup reconcile failed"),
    }

    // ── Ticker ───────────────────────────────────────────────────────────
    let ticker = reconciler_config
        .enabled
        .then(|| spawn_reconcile_ticker(Arc::clone(&reconciler), schedule, cancel.clone()));

    cancel.cancelled().await;

    if let Some(handle) = ticker {
        if let Err(e) = handle.await {
            warn!(error = %e, "Reconcile ticker ended abnormally");
        }
    }
    info!("Shutdown complete");
    Ok(())
}
