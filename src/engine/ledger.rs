//! Ledger: store-backed pool accounting.
//!
//! Loads current values, applies the `Accountant` arithmetic and writes
//! back. Holds no state of its own beyond one lock per pool, which makes
//! issuance and revaluation single-writer per pool while different pools
//! proceed in parallel.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::engine::accountant::{Accountant, ProfitValuation};
use crate::storage::Store;
use crate::types::{
    Credentials, Deposit, DepositId, DepositProfit, Depositor, DepositorId, LedgerError,
    LedgerResult, NewDeposit, Pool, PoolId, PoolSnapshot, Stablecoin,
};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A committed deposit and the NAV its shares were bought at.
#[derive(Debug, Clone, Serialize)]
pub struct Issuance {
    pub deposit: Deposit,
    pub nav: Decimal,
}

/// Per-deposit outcome counts of one valuation pass over a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DepositValuation {
    pub valued: usize,
    /// Deposits with zero shares or a share-less pool.
    pub skipped: usize,
    /// Deposits whose profit row failed to persist.
    pub failed: usize,
}

/// Result of revaluing one pool and its deposits.
#[derive(Debug, Clone)]
pub struct PoolRevaluation {
    pub snapshot: PoolSnapshot,
    pub deposits: DepositValuation,
}

/// Outcome of seeding pools at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapReport {
    pub pools: usize,
    pub configured: usize,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct Ledger {
    store: Arc<dyn Store>,
    pool_locks: Mutex<HashMap<PoolId, Arc<Mutex<()>>>>,
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            pool_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    async fn pool_lock(&self, pool_id: PoolId) -> Arc<Mutex<()>> {
        self.pool_locks.lock().await.entry(pool_id).or_default().clone()
    }

    async fn require_pool(&self, pool_id: PoolId) -> LedgerResult<Pool> {
        self.store
            .load_pool(pool_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("pool {pool_id}")))
    }

    async fn require_depositor(&self, id: DepositorId) -> LedgerResult<Depositor> {
        self.store
            .get_depositor(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("depositor {id}")))
    }

    // -- Issuance ----------------------------------------------------------

    /// Record a deposit, buying pool shares at the current NAV.
    pub async fn issue_shares(
        &self,
        depositor_id: DepositorId,
        pool_id: PoolId,
        principal: Decimal,
        currency: Stablecoin,
        now: DateTime<Utc>,
    ) -> LedgerResult<Issuance> {
        if principal <= Decimal::ZERO {
            return Err(LedgerError::InvalidArgument(format!(
                "principal must be positive, got {principal}"
            )));
        }

        let lock = self.pool_lock(pool_id).await;
        let _guard = lock.lock().await;

        let pool = self.require_pool(pool_id).await?;
        if !pool.is_active {
            return Err(LedgerError::InvalidArgument(format!(
                "pool {pool_id} is not active"
            )));
        }
        self.require_depositor(depositor_id).await?;

        let issue = Accountant::issue_shares(pool.current_balance, pool.total_shares, principal)?;
        let new_total = pool.total_shares + issue.shares;

        let deposit = self
            .store
            .commit_issuance(
                &pool,
                new_total,
                NewDeposit {
                    depositor_id,
                    pool_id,
                    principal,
                    currency,
                    shares_issued: issue.shares,
                    issuance_balance: pool.current_balance,
                    created_at: now,
                },
            )
            .await?;

        info!(
            deposit_id = deposit.id,
            depositor_id,
            pool_id,
            principal = %format!("${:.2}", principal),
            currency = %currency,
            nav = %issue.nav,
            shares = %issue.shares,
            total_shares = %new_total,
            "Shares issued"
        );

        Ok(Issuance {
            deposit,
            nav: issue.nav,
        })
    }

    // -- Revaluation -------------------------------------------------------

    /// Record today's observed balance and set it as the pool balance.
    pub async fn revalue(
        &self,
        pool_id: PoolId,
        observed: Decimal,
        today: NaiveDate,
    ) -> LedgerResult<PoolSnapshot> {
        let lock = self.pool_lock(pool_id).await;
        let _guard = lock.lock().await;
        self.revalue_locked(pool_id, observed, today).await
    }

    /// Revalue a pool, then value every active deposit against the new
    /// balance, holding the pool lock for both steps.
    pub async fn revalue_pool(
        &self,
        pool_id: PoolId,
        observed: Decimal,
        today: NaiveDate,
    ) -> LedgerResult<PoolRevaluation> {
        let lock = self.pool_lock(pool_id).await;
        let _guard = lock.lock().await;

        let snapshot = self.revalue_locked(pool_id, observed, today).await?;
        let deposits = self.value_deposits_locked(pool_id, today).await?;
        Ok(PoolRevaluation { snapshot, deposits })
    }

    async fn revalue_locked(
        &self,
        pool_id: PoolId,
        observed: Decimal,
        today: NaiveDate,
    ) -> LedgerResult<PoolSnapshot> {
        if observed < Decimal::ZERO {
            warn!(pool_id, observed = %observed, "Negative balance reading, keeping prior balance");
            return Err(LedgerError::ProviderTransient {
                pool_id,
                message: format!("negative balance reading {observed}"),
            });
        }

        let pool = self.require_pool(pool_id).await?;

        let prior = self
            .store
            .latest_pool_snapshot(pool_id, today)
            .await?
            .map(|s| s.balance);
        let delta = Accountant::balance_change(prior, observed);

        let snapshot = PoolSnapshot {
            pool_id,
            record_date: today,
            balance: observed,
            change: delta.change,
            change_rate: delta.change_rate,
        };
        self.store
            .commit_revaluation(pool.current_balance, &snapshot)
            .await?;

        info!(
            pool_id,
            date = %today,
            balance = %format!("${:.2}", observed),
            change = %format!("${:.2}", delta.change),
            change_rate = %format!("{:.4}%", delta.change_rate),
            "Pool revalued"
        );
        Ok(snapshot)
    }

    /// Value one deposit at the pool's current NAV.
    pub fn compute_deposit_profit(deposit: &Deposit, pool: &Pool) -> LedgerResult<ProfitValuation> {
        Accountant::deposit_profit(
            deposit.shares_issued,
            deposit.principal,
            pool.current_balance,
            pool.total_shares,
        )
    }

    /// Write today's profit row for every active deposit of a pool.
    pub async fn value_pool_deposits(
        &self,
        pool_id: PoolId,
        today: NaiveDate,
    ) -> LedgerResult<DepositValuation> {
        let lock = self.pool_lock(pool_id).await;
        let _guard = lock.lock().await;
        self.value_deposits_locked(pool_id, today).await
    }

    async fn value_deposits_locked(
        &self,
        pool_id: PoolId,
        today: NaiveDate,
    ) -> LedgerResult<DepositValuation> {
        let pool = self.require_pool(pool_id).await?;
        let deposits = self.store.list_active_deposits(pool_id).await?;
        let mut tally = DepositValuation::default();

        for deposit in &deposits {
            let valuation = match Self::compute_deposit_profit(deposit, &pool) {
                Ok(v) => v,
                Err(e) => {
                    warn!(deposit_id = deposit.id, pool_id, error = %e, "Deposit skipped");
                    tally.skipped += 1;
                    continue;
                }
            };

            let row = DepositProfit {
                deposit_id: deposit.id,
                record_date: today,
                pool_balance: pool.current_balance,
                profit: valuation.profit,
                profit_rate: valuation.profit_rate,
            };
            match self.store.upsert_deposit_profit(&row).await {
                Ok(()) => tally.valued += 1,
                Err(e) => {
                    error!(deposit_id = deposit.id, pool_id, error = %e, "Failed to save deposit profit");
                    tally.failed += 1;
                }
            }
        }

        info!(
            pool_id,
            nav = %pool.nav().unwrap_or(Decimal::ONE),
            valued = tally.valued,
            skipped = tally.skipped,
            failed = tally.failed,
            "Deposits valued"
        );
        Ok(tally)
    }

    // -- Depositors --------------------------------------------------------

    pub async fn create_depositor(&self, name: &str, now: DateTime<Utc>) -> LedgerResult<Depositor> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::InvalidArgument("depositor name is empty".into()));
        }
        let depositor = self.store.create_depositor(name, now).await?;
        info!(depositor_id = depositor.id, name = %depositor.name, "Depositor created");
        Ok(depositor)
    }

    pub async fn set_depositor_active(&self, id: DepositorId, active: bool) -> LedgerResult<()> {
        self.store.set_depositor_active(id, active).await?;
        info!(depositor_id = id, active, "Depositor status changed");
        Ok(())
    }

    /// Flip a depositor's active flag and return the new value.
    pub async fn toggle_depositor(&self, id: DepositorId) -> LedgerResult<bool> {
        let depositor = self.require_depositor(id).await?;
        let active = !depositor.is_active;
        self.set_depositor_active(id, active).await?;
        Ok(active)
    }

    // -- Deposits ----------------------------------------------------------

    /// Soft delete. The deposit's shares stay in the pool total.
    pub async fn deactivate_deposit(&self, id: DepositId) -> LedgerResult<()> {
        self.store.set_deposit_active(id, false).await?;
        info!(deposit_id = id, "Deposit deactivated");
        Ok(())
    }

    /// Hard delete with profit history. The pool share total is unchanged.
    pub async fn delete_deposit(&self, id: DepositId) -> LedgerResult<()> {
        self.store.delete_deposit(id).await?;
        info!(deposit_id = id, "Deposit deleted");
        Ok(())
    }

    // -- Pools -------------------------------------------------------------

    /// Replace a pool's credentials and re-activate it.
    pub async fn configure_pool(&self, pool_id: PoolId, credentials: Credentials) -> LedgerResult<Pool> {
        let lock = self.pool_lock(pool_id).await;
        let _guard = lock.lock().await;

        let mut pool = self.require_pool(pool_id).await?;
        pool.credentials = credentials;
        pool.is_active = true;
        self.store.save_pool(&pool).await?;

        info!(
            pool_id,
            name = %pool.name,
            identifier = %pool.credentials.display_identifier(pool.kind),
            configured = pool.is_configured(),
            "Pool configured"
        );
        Ok(pool)
    }

    /// Create missing pools and apply any credentials they carry.
    ///
    /// Existing balances and share totals are never touched. Raises an
    /// alarm when no pool ends up configured.
    pub async fn bootstrap_pools(&self, seeds: Vec<Pool>) -> LedgerResult<BootstrapReport> {
        for seed in seeds {
            let bare = Pool {
                credentials: Credentials::default(),
                ..seed.clone()
            };
            self.store.ensure_pool(&bare).await?;
            if seed.is_configured() {
                self.configure_pool(seed.id, seed.credentials).await?;
            }
        }

        let pools = self.store.list_pools().await?;
        let configured = pools.iter().filter(|p| p.is_configured()).count();
        if configured == 0 {
            error!(
                pools = pools.len(),
                "No pool has credentials configured; revaluation will fail for every pool"
            );
        } else {
            info!(pools = pools.len(), configured, "Pools bootstrapped");
        }

        Ok(BootstrapReport {
            pools: pools.len(),
            configured,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
