//! Persistence layer.
//!
//! The `Store` trait is the ledger's only view of durable state. Two
//! implementations ship: `SqliteStore` (sqlx, used by the service) and
//! `MemoryStore` (in-process, used by tests and dry runs).
//!
//! Daily snapshot writes are upserts keyed by (entity, date), so a
//! re-run for the same day overwrites instead of duplicating.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{error, warn};

use crate::types::{
    Deposit, DepositId, DepositProfit, Depositor, DepositorId, LedgerResult, NewDeposit, Pool,
    PoolId, PoolSnapshot,
};

#[async_trait]
pub trait Store: Send + Sync {
    // -- Depositors --------------------------------------------------------

    /// Create a depositor. A duplicate name is `InvalidArgument`.
    async fn create_depositor(&self, name: &str, created_at: DateTime<Utc>)
        -> LedgerResult<Depositor>;

    async fn get_depositor(&self, id: DepositorId) -> LedgerResult<Option<Depositor>>;

    /// All depositors, newest first.
    async fn list_depositors(&self) -> LedgerResult<Vec<Depositor>>;

    /// `NotFound` when the depositor does not exist.
    async fn set_depositor_active(&self, id: DepositorId, active: bool) -> LedgerResult<()>;

    // -- Pools -------------------------------------------------------------

    /// Insert the pool if no pool with its id exists. Never overwrites.
    async fn ensure_pool(&self, pool: &Pool) -> LedgerResult<()>;

    async fn load_pool(&self, id: PoolId) -> LedgerResult<Option<Pool>>;

    /// All pools ordered by id.
    async fn list_pools(&self) -> LedgerResult<Vec<Pool>>;

    /// Overwrite every mutable field of the pool.
    async fn save_pool(&self, pool: &Pool) -> LedgerResult<()>;

    async fn update_pool_balance(&self, id: PoolId, balance: Decimal) -> LedgerResult<()>;

    async fn update_pool_shares(&self, id: PoolId, total_shares: Decimal) -> LedgerResult<()>;

    // -- Deposits ----------------------------------------------------------

    async fn create_deposit(&self, deposit: NewDeposit) -> LedgerResult<Deposit>;

    async fn get_deposit(&self, id: DepositId) -> LedgerResult<Option<Deposit>>;

    async fn list_active_deposits(&self, pool_id: PoolId) -> LedgerResult<Vec<Deposit>>;

    /// Every deposit of a depositor (active or not), newest first.
    async fn list_deposits_by_depositor(
        &self,
        depositor_id: DepositorId,
    ) -> LedgerResult<Vec<Deposit>>;

    async fn set_deposit_active(&self, id: DepositId, active: bool) -> LedgerResult<()>;

    /// Remove the deposit and its profit history.
    async fn delete_deposit(&self, id: DepositId) -> LedgerResult<()>;

    // -- Daily snapshots ---------------------------------------------------

    async fn upsert_pool_snapshot(&self, snapshot: &PoolSnapshot) -> LedgerResult<()>;

    /// Latest snapshot dated strictly before `before`.
    async fn latest_pool_snapshot(
        &self,
        pool_id: PoolId,
        before: NaiveDate,
    ) -> LedgerResult<Option<PoolSnapshot>>;

    async fn pool_snapshot_on(
        &self,
        pool_id: PoolId,
        date: NaiveDate,
    ) -> LedgerResult<Option<PoolSnapshot>>;

    async fn upsert_deposit_profit(&self, profit: &DepositProfit) -> LedgerResult<()>;

    async fn latest_deposit_profit(&self, deposit_id: DepositId)
        -> LedgerResult<Option<DepositProfit>>;

    /// Profit rows of one deposit, newest first.
    async fn deposit_profit_history(&self, deposit_id: DepositId)
        -> LedgerResult<Vec<DepositProfit>>;

    // -- Issuance ----------------------------------------------------------

    /// Persist a share issuance: raise the pool's share total, then
    /// create the deposit.
    ///
    /// The default writes the two aggregates separately and restores
    /// the pool's previous share total if the deposit insert fails.
    /// Stores with transactions override this with a single atomic write.
    async fn commit_issuance(
        &self,
        pool: &Pool,
        new_total_shares: Decimal,
        deposit: NewDeposit,
    ) -> LedgerResult<Deposit> {
        self.update_pool_shares(pool.id, new_total_shares).await?;

        match self.create_deposit(deposit).await {
            Ok(created) => Ok(created),
            Err(e) => {
                warn!(
                    pool_id = pool.id,
                    restore_to = %pool.total_shares,
                    error = %e,
                    "Deposit insert failed, rolling back share total"
                );
                if let Err(rollback) = self.update_pool_shares(pool.id, pool.total_shares).await {
                    error!(
                        pool_id = pool.id,
                        error = %rollback,
                        "Share rollback failed; pool total_shares needs manual correction"
                    );
                }
                Err(e)
            }
        }
    }

    // -- Revaluation -------------------------------------------------------

    /// Persist a revaluation: set the pool's balance, then write the
    /// day's snapshot.
    ///
    /// The default restores `previous_balance` if the snapshot write
    /// fails. Stores with transactions override this with a single
    /// atomic write.
    async fn commit_revaluation(
        &self,
        previous_balance: Decimal,
        snapshot: &PoolSnapshot,
    ) -> LedgerResult<()> {
        let pool_id = snapshot.pool_id;
        self.update_pool_balance(pool_id, snapshot.balance).await?;

        if let Err(e) = self.upsert_pool_snapshot(snapshot).await {
            warn!(
                pool_id,
                restore_to = %previous_balance,
                error = %e,
                "Snapshot write failed, rolling back balance"
            );
            if let Err(rollback) = self.update_pool_balance(pool_id, previous_balance).await {
                error!(
                    pool_id,
                    error = %rollback,
                    "Balance rollback failed; pool current_balance needs manual correction"
                );
            }
            return Err(e);
        }
        Ok(())
    }
}
