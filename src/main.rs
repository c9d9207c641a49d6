//! NAVPOOL: pooled-deposit NAV ledger service
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the SQLite ledger, seeds pools from config, then runs the daily
//! revaluation scheduler and the dashboard API until Ctrl+C.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use navpool::config;
use navpool::dashboard::{self, DashboardState};
use navpool::engine::ledger::Ledger;
use navpool::engine::reports::Reports;
use navpool::engine::scheduler::{CycleReport, Scheduler};
use navpool::storage::{SqliteStore, Store};
use navpool::venues::ProviderSet;

const BANNER: &str = r#"
 _   _    ___     ______   ___   ___  _
| \ | |  / \ \   / /  _ \ / _ \ / _ \| |
|  \| | / _ \ \ / /| |_) | | | | | | | |
| |\  |/ ___ \ V / |  __/| |_| | |_| | |___
|_| \_/_/   \_\_/  |_|    \___/ \___/|_____|

  Pooled-deposit NAV ledger
  v0.1.0, daily revaluation service
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;
    init_logging(&cfg.service);

    println!("{BANNER}");
    info!(
        service = %cfg.service.name,
        db_path = %cfg.service.db_path,
        daily_at = %cfg.scheduler.daily_at,
        utc_offset_hours = cfg.scheduler.utc_offset_hours,
        pools = cfg.pools.len(),
        "NAVPOOL starting up"
    );

    // -- Ledger ------------------------------------------------------------

    ensure_db_dir(&cfg.service.db_path)?;
    let sqlite = Arc::new(
        SqliteStore::open(&cfg.service.db_path)
            .await
            .with_context(|| format!("Failed to open ledger at {}", cfg.service.db_path))?,
    );
    let store: Arc<dyn Store> = sqlite.clone();
    let ledger = Arc::new(Ledger::new(store.clone()));

    let seeds = cfg.pools.iter().map(|p| p.to_pool()).collect();
    let bootstrap = ledger
        .bootstrap_pools(seeds)
        .await
        .context("Failed to seed pools")?;
    info!(
        pools = bootstrap.pools,
        configured = bootstrap.configured,
        "Ledger ready"
    );

    // -- Scheduler ---------------------------------------------------------

    let providers = ProviderSet::live()?;
    let scheduler = Arc::new(Scheduler::new(
        ledger.clone(),
        providers,
        cfg.scheduler.settings()?,
    ));

    if cfg.scheduler.run_on_startup {
        info!("Running start-up revaluation");
        match scheduler.run_now().await {
            Ok(report) => log_cycle_report(&report),
            Err(e) => error!(error = %e, "Start-up revaluation failed"),
        }
    }

    // -- Dashboard ---------------------------------------------------------

    let dashboard_task = if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState {
            ledger: ledger.clone(),
            reports: Reports::new(store.clone()),
            scheduler: scheduler.clone(),
        });
        Some(dashboard::spawn_dashboard(state, &cfg.dashboard.bind, cfg.dashboard.port).await?)
    } else {
        warn!("Dashboard disabled");
        None
    };

    // -- Main loop ---------------------------------------------------------

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.clone().run(shutdown_rx));

    info!(next_run = %scheduler.next_run(), "Entering main loop. Press Ctrl+C to stop.");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received.");

    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_task.await {
        error!(error = %e, "Scheduler task ended abnormally");
    }
    if let Some(task) = dashboard_task {
        task.abort();
    }

    sqlite.close().await;
    info!("NAVPOOL shut down cleanly.");

    Ok(())
}

/// Create the parent directory of the SQLite file if it is missing.
fn ensure_db_dir(db_path: &str) -> Result<()> {
    if db_path == ":memory:" {
        return Ok(());
    }
    if let Some(dir) = Path::new(db_path).parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
    }
    Ok(())
}

/// Log a human-readable cycle summary.
fn log_cycle_report(report: &CycleReport) {
    for outcome in report.outcomes.iter().filter(|o| !o.succeeded()) {
        warn!(
            pool_id = outcome.pool_id,
            pool = %outcome.pool_name,
            error = ?outcome.error,
            "Pool not revalued"
        );
    }
    info!(
        run_id = %report.run_id,
        date = %report.date,
        succeeded = report.succeeded,
        failed = report.failed,
        "Start-up cycle complete"
    );
}

/// Initialise the `tracing` subscriber: `RUST_LOG` or `navpool=info`,
/// human-readable unless JSON is asked for.
fn init_logging(service: &config::ServiceConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("navpool=info"));
    let json = service.log_json || std::env::var("NAVPOOL_LOG_JSON").is_ok();

    let builder = fmt().with_env_filter(filter).with_target(true);
    if json {
        builder.json().with_current_span(false).init();
    } else {
        builder.compact().init();
    }
}
