//! Revaluation scheduler.
//!
//! Two states, Idle and Running. A cycle is started by the daily timer
//! or by a manual trigger; a trigger that arrives while a cycle is
//! running is rejected with `CycleInProgress`.
//!
//! Within a cycle every active pool runs its own pipeline concurrently:
//! read balance → revalue → value deposits. A pool's failure is recorded
//! in the report and never stops the other pools.

use chrono::{
    DateTime, Duration as ChronoDuration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc,
};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::ledger::{DepositValuation, Ledger};
use crate::types::{LedgerError, LedgerResult, Pool, PoolId};
use crate::venues::ProviderSet;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// UTC+8, the ledger's home timezone.
const DEFAULT_OFFSET_SECS: i32 = 8 * 3600;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Local wall-clock time of the daily run.
    pub daily_at: NaiveTime,
    /// Offset of the wall clock and of the ledger's calendar dates.
    pub utc_offset: FixedOffset,
    /// Upper bound on a single venue balance read.
    pub provider_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            daily_at: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            utc_offset: FixedOffset::east_opt(DEFAULT_OFFSET_SECS).unwrap_or_else(|| Utc.fix()),
            provider_timeout: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
}

/// What happened to one pool during a cycle.
#[derive(Debug, Clone, Serialize)]
pub struct PoolOutcome {
    pub pool_id: PoolId,
    pub pool_name: String,
    /// Balance recorded for the day, absent on failure.
    pub balance: Option<Decimal>,
    pub deposits: DepositValuation,
    /// Sub-ledgers that could not be read.
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

impl PoolOutcome {
    fn failed(pool: &Pool, e: &LedgerError) -> Self {
        Self {
            pool_id: pool.id,
            pool_name: pool.name.clone(),
            balance: None,
            deposits: DepositValuation::default(),
            warnings: Vec::new(),
            error: Some(e.to_string()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate result of one revaluation cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub run_id: Uuid,
    pub date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<PoolOutcome>,
}

/// Status snapshot for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub next_run: DateTime<Utc>,
    pub last_report: Option<CycleReport>,
}

/// Next instant strictly after `now` at which the local clock reads `at`.
pub fn next_run_after(now: DateTime<Utc>, at: NaiveTime, offset: FixedOffset) -> DateTime<Utc> {
    let local_date = now.with_timezone(&offset).date_naive();
    let to_utc = |date: NaiveDate| {
        let naive = date.and_time(at) - ChronoDuration::seconds(offset.local_minus_utc() as i64);
        Utc.from_utc_datetime(&naive)
    };
    let today = to_utc(local_date);
    if today > now {
        today
    } else {
        to_utc(local_date + ChronoDuration::days(1))
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Raised while a cycle runs; lowered on drop, whichever way the cycle ends.
struct RunningFlag<'a>(&'a AtomicBool);

impl<'a> RunningFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Scheduler {
    ledger: Arc<Ledger>,
    providers: ProviderSet,
    settings: SchedulerSettings,
    /// Serialises cycles. Only `run_cycle` takes it.
    cycle_lock: Mutex<()>,
    running: AtomicBool,
    last_report: RwLock<Option<CycleReport>>,
}

impl Scheduler {
    pub fn new(ledger: Arc<Ledger>, providers: ProviderSet, settings: SchedulerSettings) -> Self {
        Self {
            ledger,
            providers,
            settings,
            cycle_lock: Mutex::new(()),
            running: AtomicBool::new(false),
            last_report: RwLock::new(None),
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.running.load(Ordering::SeqCst) {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    /// Calendar date in the scheduler's offset.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.settings.utc_offset).date_naive()
    }

    pub fn next_run(&self) -> DateTime<Utc> {
        next_run_after(Utc::now(), self.settings.daily_at, self.settings.utc_offset)
    }

    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            state: self.state(),
            next_run: self.next_run(),
            last_report: self.last_report.read().await.clone(),
        }
    }

    /// Run a cycle dated today.
    pub async fn run_now(&self) -> LedgerResult<CycleReport> {
        self.run_cycle(self.today()).await
    }

    /// Revalue every active pool for `date`.
    ///
    /// Rejected with `CycleInProgress` while another cycle runs. Only
    /// a failure to list pools fails the cycle itself.
    pub async fn run_cycle(&self, date: NaiveDate) -> LedgerResult<CycleReport> {
        let _running = self
            .cycle_lock
            .try_lock()
            .map_err(|_| LedgerError::CycleInProgress)?;
        let _flag = RunningFlag::raise(&self.running);

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, %date, "Revaluation cycle started");

        let pools: Vec<Pool> = self
            .ledger
            .store()
            .list_pools()
            .await?
            .into_iter()
            .filter(|p| p.is_active)
            .collect();

        let outcomes = join_all(pools.iter().map(|p| self.run_pool(p, date))).await;
        let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();

        let report = CycleReport {
            run_id,
            date,
            started_at,
            finished_at: Utc::now(),
            succeeded,
            failed: outcomes.len() - succeeded,
            outcomes,
        };

        let valued: usize = report.outcomes.iter().map(|o| o.deposits.valued).sum();
        let skipped: usize = report.outcomes.iter().map(|o| o.deposits.skipped).sum();
        info!(
            %run_id,
            %date,
            succeeded = report.succeeded,
            failed = report.failed,
            deposits_valued = valued,
            deposits_skipped = skipped,
            elapsed_ms = (report.finished_at - started_at).num_milliseconds(),
            "Cycle complete"
        );

        *self.last_report.write().await = Some(report.clone());
        Ok(report)
    }

    async fn run_pool(&self, pool: &Pool, date: NaiveDate) -> PoolOutcome {
        let report = match self.read_balance(pool).await {
            Ok(r) => r,
            Err(e) => {
                warn!(pool_id = pool.id, pool = %pool.name, error = %e, "Pool skipped this cycle");
                return PoolOutcome::failed(pool, &e);
            }
        };

        match self.ledger.revalue_pool(pool.id, report.total, date).await {
            Ok(reval) => PoolOutcome {
                pool_id: pool.id,
                pool_name: pool.name.clone(),
                balance: Some(reval.snapshot.balance),
                deposits: reval.deposits,
                warnings: report.warnings,
                error: None,
            },
            Err(e) => {
                error!(pool_id = pool.id, pool = %pool.name, error = %e, "Pool revaluation failed");
                PoolOutcome::failed(pool, &e)
            }
        }
    }

    async fn read_balance(&self, pool: &Pool) -> LedgerResult<crate::venues::BalanceReport> {
        let transient = |message: String| LedgerError::ProviderTransient {
            pool_id: pool.id,
            message,
        };

        if !pool.is_configured() {
            return Err(transient("credentials not configured".into()));
        }
        let provider = self
            .providers
            .get(pool.kind)
            .ok_or_else(|| transient(format!("no balance provider for {}", pool.kind)))?;

        match tokio::time::timeout(self.settings.provider_timeout, provider.get_balance(pool)).await {
            Err(_) => Err(transient(format!(
                "balance read timed out after {}s",
                self.settings.provider_timeout.as_secs_f64()
            ))),
            Ok(Err(e)) => Err(transient(format!("{e:#}"))),
            Ok(Ok(report)) => {
                if report.is_partial() {
                    warn!(pool_id = pool.id, warnings = ?report.warnings, "Partial balance read");
                }
                Ok(report)
            }
        }
    }

    /// Fire a cycle at every daily tick until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let next = self.next_run();
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            info!(next_run = %next, wait_secs = wait.as_secs(), "Next revaluation scheduled");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    match self.run_now().await {
                        Ok(report) => info!(run_id = %report.run_id, "Scheduled cycle finished"),
                        Err(LedgerError::CycleInProgress) => {
                            warn!("Scheduled cycle skipped, a manual cycle is running");
                        }
                        Err(e) => error!(error = %e, "Scheduled cycle failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Scheduler stopping");
                        break;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
