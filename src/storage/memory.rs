//! In-memory `Store`.
//!
//! Holds everything behind a single `RwLock`. Has no transactions, so
//! issuance goes through the trait's compensating default. Failure
//! switches let tests exercise the rollback and persistence paths.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::Store;
use crate::types::{
    Deposit, DepositId, DepositProfit, Depositor, DepositorId, LedgerError, LedgerResult,
    NewDeposit, Pool, PoolId, PoolSnapshot,
};

#[derive(Default)]
struct Inner {
    depositors: BTreeMap<DepositorId, Depositor>,
    pools: BTreeMap<PoolId, Pool>,
    deposits: BTreeMap<DepositId, Deposit>,
    pool_snapshots: HashMap<(PoolId, NaiveDate), PoolSnapshot>,
    deposit_profits: HashMap<(DepositId, NaiveDate), DepositProfit>,
    next_depositor_id: DepositorId,
    next_deposit_id: DepositId,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    fail_deposit_create: AtomicBool,
    fail_profit_upsert: AtomicBool,
    fail_snapshot_upsert: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `create_deposit` fail with a persistence error.
    pub fn fail_deposit_create(&self, fail: bool) {
        self.fail_deposit_create.store(fail, Ordering::SeqCst);
    }

    /// Make every `upsert_deposit_profit` fail with a persistence error.
    pub fn fail_profit_upsert(&self, fail: bool) {
        self.fail_profit_upsert.store(fail, Ordering::SeqCst);
    }

    /// Make every `upsert_pool_snapshot` fail with a persistence error.
    pub fn fail_snapshot_upsert(&self, fail: bool) {
        self.fail_snapshot_upsert.store(fail, Ordering::SeqCst);
    }

    /// Number of stored snapshots for a pool.
    pub async fn pool_snapshot_count(&self, pool_id: PoolId) -> usize {
        let inner = self.inner.read().await;
        inner.pool_snapshots.keys().filter(|(p, _)| *p == pool_id).count()
    }
}

fn missing(what: &str, id: i64) -> LedgerError {
    LedgerError::NotFound(format!("{what} {id}"))
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_depositor(
        &self,
        name: &str,
        created_at: DateTime<Utc>,
    ) -> LedgerResult<Depositor> {
        let mut inner = self.inner.write().await;
        if inner.depositors.values().any(|d| d.name == name) {
            return Err(LedgerError::InvalidArgument(format!(
                "depositor already exists: {name}"
            )));
        }
        inner.next_depositor_id += 1;
        let depositor = Depositor {
            id: inner.next_depositor_id,
            name: name.to_string(),
            is_active: true,
            created_at,
        };
        inner.depositors.insert(depositor.id, depositor.clone());
        Ok(depositor)
    }

    async fn get_depositor(&self, id: DepositorId) -> LedgerResult<Option<Depositor>> {
        Ok(self.inner.read().await.depositors.get(&id).cloned())
    }

    async fn list_depositors(&self) -> LedgerResult<Vec<Depositor>> {
        let inner = self.inner.read().await;
        let mut all: Vec<Depositor> = inner.depositors.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(all)
    }

    async fn set_depositor_active(&self, id: DepositorId, active: bool) -> LedgerResult<()> {
        let mut inner = self.inner.write().await;
        let depositor = inner.depositors.get_mut(&id).ok_or_else(|| missing("depositor", id))?;
        depositor.is_active = active;
        Ok(())
    }

    async fn ensure_pool(&self, pool: &Pool) -> LedgerResult<()> {
        let mut inner = self.inner.write().await;
        inner.pools.entry(pool.id).or_insert_with(|| pool.clone());
        Ok(())
    }

    async fn load_pool(&self, id: PoolId) -> LedgerResult<Option<Pool>> {
        Ok(self.inner.read().await.pools.get(&id).cloned())
    }

    async fn list_pools(&self) -> LedgerResult<Vec<Pool>> {
        Ok(self.inner.read().await.pools.values().cloned().collect())
    }

    async fn save_pool(&self, pool: &Pool) -> LedgerResult<()> {
        let mut inner = self.inner.write().await;
        let slot = inner.pools.get_mut(&pool.id).ok_or_else(|| missing("pool", pool.id))?;
        *slot = pool.clone();
        slot.updated_at = Utc::now();
        Ok(())
    }

    async fn update_pool_balance(&self, id: PoolId, balance: Decimal) -> LedgerResult<()> {
        let mut inner = self.inner.write().await;
        let pool = inner.pools.get_mut(&id).ok_or_else(|| missing("pool", id))?;
        pool.current_balance = balance;
        pool.updated_at = Utc::now();
        Ok(())
    }

    async fn update_pool_shares(&self, id: PoolId, total_shares: Decimal) -> LedgerResult<()> {
        let mut inner = self.inner.write().await;
        let pool = inner.pools.get_mut(&id).ok_or_else(|| missing("pool", id))?;
        pool.total_shares = total_shares;
        pool.updated_at = Utc::now();
        Ok(())
    }

    async fn create_deposit(&self, deposit: NewDeposit) -> LedgerResult<Deposit> {
        if self.fail_deposit_create.load(Ordering::SeqCst) {
            return Err(LedgerError::Persistence("deposit insert rejected".into()));
        }
        let mut inner = self.inner.write().await;
        inner.next_deposit_id += 1;
        let created = deposit.into_deposit(inner.next_deposit_id);
        inner.deposits.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_deposit(&self, id: DepositId) -> LedgerResult<Option<Deposit>> {
        Ok(self.inner.read().await.deposits.get(&id).cloned())
    }

    async fn list_active_deposits(&self, pool_id: PoolId) -> LedgerResult<Vec<Deposit>> {
        let inner = self.inner.read().await;
        Ok(inner
            .deposits
            .values()
            .filter(|d| d.pool_id == pool_id && d.is_active)
            .cloned()
            .collect())
    }

    async fn list_deposits_by_depositor(
        &self,
        depositor_id: DepositorId,
    ) -> LedgerResult<Vec<Deposit>> {
        let inner = self.inner.read().await;
        let mut found: Vec<Deposit> = inner
            .deposits
            .values()
            .filter(|d| d.depositor_id == depositor_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(found)
    }

    async fn set_deposit_active(&self, id: DepositId, active: bool) -> LedgerResult<()> {
        let mut inner = self.inner.write().await;
        let deposit = inner.deposits.get_mut(&id).ok_or_else(|| missing("deposit", id))?;
        deposit.is_active = active;
        Ok(())
    }

    async fn delete_deposit(&self, id: DepositId) -> LedgerResult<()> {
        let mut inner = self.inner.write().await;
        inner.deposits.remove(&id).ok_or_else(|| missing("deposit", id))?;
        inner.deposit_profits.retain(|(deposit_id, _), _| *deposit_id != id);
        Ok(())
    }

    async fn upsert_pool_snapshot(&self, snapshot: &PoolSnapshot) -> LedgerResult<()> {
        if self.fail_snapshot_upsert.load(Ordering::SeqCst) {
            return Err(LedgerError::Persistence("snapshot upsert rejected".into()));
        }
        let mut inner = self.inner.write().await;
        inner
            .pool_snapshots
            .insert((snapshot.pool_id, snapshot.record_date), snapshot.clone());
        Ok(())
    }

    async fn latest_pool_snapshot(
        &self,
        pool_id: PoolId,
        before: NaiveDate,
    ) -> LedgerResult<Option<PoolSnapshot>> {
        let inner = self.inner.read().await;
        Ok(inner
            .pool_snapshots
            .values()
            .filter(|s| s.pool_id == pool_id && s.record_date < before)
            .max_by_key(|s| s.record_date)
            .cloned())
    }

    async fn pool_snapshot_on(
        &self,
        pool_id: PoolId,
        date: NaiveDate,
    ) -> LedgerResult<Option<PoolSnapshot>> {
        Ok(self.inner.read().await.pool_snapshots.get(&(pool_id, date)).cloned())
    }

    async fn upsert_deposit_profit(&self, profit: &DepositProfit) -> LedgerResult<()> {
        if self.fail_profit_upsert.load(Ordering::SeqCst) {
            return Err(LedgerError::Persistence("profit upsert rejected".into()));
        }
        let mut inner = self.inner.write().await;
        inner
            .deposit_profits
            .insert((profit.deposit_id, profit.record_date), profit.clone());
        Ok(())
    }

    async fn latest_deposit_profit(
        &self,
        deposit_id: DepositId,
    ) -> LedgerResult<Option<DepositProfit>> {
        let inner = self.inner.read().await;
        Ok(inner
            .deposit_profits
            .values()
            .filter(|p| p.deposit_id == deposit_id)
            .max_by_key(|p| p.record_date)
            .cloned())
    }

    async fn deposit_profit_history(
        &self,
        deposit_id: DepositId,
    ) -> LedgerResult<Vec<DepositProfit>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<DepositProfit> = inner
            .deposit_profits
            .values()
            .filter(|p| p.deposit_id == deposit_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.record_date.cmp(&a.record_date));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Stablecoin, VenueKind};
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_upsert_overwrites() {
        let store = MemoryStore::new();
        for balance in [dec!(100), dec!(250)] {
            store
                .upsert_pool_snapshot(&PoolSnapshot {
                    pool_id: 1,
                    record_date: day(1),
                    balance,
                    change: Decimal::ZERO,
                    change_rate: Decimal::ZERO,
                })
                .await
                .unwrap();
        }
        assert_eq!(store.pool_snapshot_count(1).await, 1);
        let snap = store.pool_snapshot_on(1, day(1)).await.unwrap().unwrap();
        assert_eq!(snap.balance, dec!(250));
    }

    #[tokio::test]
    async fn test_compensating_issuance_rolls_back() {
        let store = MemoryStore::new();
        let mut pool = Pool::new(1, "Binance", VenueKind::ExchangeDerivativeAggregate);
        pool.total_shares = dec!(40);
        store.ensure_pool(&pool).await.unwrap();
        store.fail_deposit_create(true);

        let new = NewDeposit {
            depositor_id: 1,
            pool_id: 1,
            principal: dec!(10),
            currency: Stablecoin::Usdt,
            shares_issued: dec!(10),
            issuance_balance: dec!(40),
            created_at: Utc::now(),
        };
        let result = store.commit_issuance(&pool, dec!(50), new).await;
        assert!(matches!(result, Err(LedgerError::Persistence(_))));

        let reloaded = store.load_pool(1).await.unwrap().unwrap();
        assert_eq!(reloaded.total_shares, dec!(40));
    }

    #[tokio::test]
    async fn test_compensating_revaluation_restores_balance() {
        let store = MemoryStore::new();
        let mut pool = Pool::new(1, "Binance", VenueKind::ExchangeDerivativeAggregate);
        pool.current_balance = dec!(1000);
        store.ensure_pool(&pool).await.unwrap();
        store.fail_snapshot_upsert(true);

        let snapshot = PoolSnapshot {
            pool_id: 1,
            record_date: day(2),
            balance: dec!(1100),
            change: dec!(100),
            change_rate: dec!(10),
        };
        let result = store.commit_revaluation(dec!(1000), &snapshot).await;
        assert!(matches!(result, Err(LedgerError::Persistence(_))));

        let reloaded = store.load_pool(1).await.unwrap().unwrap();
        assert_eq!(reloaded.current_balance, dec!(1000));
        assert_eq!(store.pool_snapshot_count(1).await, 0);

        store.fail_snapshot_upsert(false);
        store.commit_revaluation(dec!(1000), &snapshot).await.unwrap();
        let reloaded = store.load_pool(1).await.unwrap().unwrap();
        assert_eq!(reloaded.current_balance, dec!(1100));
        assert!(store.pool_snapshot_on(1, day(2)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_depositor_rejected() {
        let store = MemoryStore::new();
        store.create_depositor("alice", Utc::now()).await.unwrap();
        let dup = store.create_depositor("alice", Utc::now()).await;
        assert!(matches!(dup, Err(LedgerError::InvalidArgument(_))));
    }
}
