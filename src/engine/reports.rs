//! Read-only projections over pools, deposits and daily profit rows.
//!
//! Nothing here is persisted; every figure is derived on request from
//! the latest profit snapshot of each deposit.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::accountant::{Accountant, AnnualizedRates};
use crate::storage::Store;
use crate::types::{
    Deposit, DepositId, DepositProfit, Depositor, DepositorId, LedgerError, LedgerResult, Pool,
    PoolId, Stablecoin, VenueKind,
};

const HUNDRED: Decimal = dec!(100);

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct DepositView {
    pub deposit_id: DepositId,
    pub pool_id: PoolId,
    pub pool_name: String,
    pub pool_kind: Option<VenueKind>,
    pub principal: Decimal,
    pub currency: Stablecoin,
    pub shares_issued: Decimal,
    pub issuance_balance: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    /// Profit from the latest daily snapshot, zero before the first one.
    pub current_profit: Decimal,
    pub current_rate: Decimal,
    pub current_value: Decimal,
    pub days_held: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DepositorSummary {
    pub total_principal: Decimal,
    pub current_value: Decimal,
    pub total_profit: Decimal,
    pub total_profit_rate: Decimal,
    /// Active deposits only.
    pub deposit_count: usize,
    pub avg_hold_days: i64,
    pub rates: AnnualizedRates,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepositorListItem {
    pub depositor: Depositor,
    pub total_principal: Decimal,
    pub current_value: Decimal,
    pub total_profit: Decimal,
    pub profit_rate: Decimal,
    /// Every deposit, active or not.
    pub deposit_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepositorDetail {
    #[serde(flatten)]
    pub item: DepositorListItem,
    pub deposits: Vec<DepositView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub id: PoolId,
    pub name: String,
    pub kind: VenueKind,
    /// Wallet address or masked API key.
    pub identifier: String,
    pub is_configured: bool,
    pub is_active: bool,
    pub current_balance: Decimal,
    pub total_shares: Decimal,
    pub nav: Option<Decimal>,
    pub daily_change: Decimal,
    pub daily_change_rate: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolDepositStats {
    pub pool_id: PoolId,
    pub pool_name: String,
    pub kind: VenueKind,
    pub usdc: Decimal,
    pub usdt: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepositStatistics {
    pub total: Decimal,
    pub pools: Vec<PoolDepositStats>,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Principal grown by the latest profit rate.
fn current_value(principal: Decimal, latest: Option<&DepositProfit>) -> Decimal {
    match latest {
        Some(p) => principal * (Decimal::ONE + p.profit_rate / HUNDRED),
        None => principal,
    }
}

fn rate_of(profit: Decimal, principal: Decimal) -> Decimal {
    if principal > Decimal::ZERO {
        profit / principal * HUNDRED
    } else {
        Decimal::ZERO
    }
}

pub struct Reports {
    store: Arc<dyn Store>,
}

impl Reports {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn require_depositor(&self, id: DepositorId) -> LedgerResult<Depositor> {
        self.store
            .get_depositor(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("depositor {id}")))
    }

    async fn pools_by_id(&self) -> LedgerResult<HashMap<PoolId, Pool>> {
        Ok(self
            .store
            .list_pools()
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect())
    }

    async fn view(
        &self,
        deposit: Deposit,
        pools: &HashMap<PoolId, Pool>,
        now: DateTime<Utc>,
    ) -> LedgerResult<DepositView> {
        let latest = self.store.latest_deposit_profit(deposit.id).await?;
        let pool = pools.get(&deposit.pool_id);

        Ok(DepositView {
            deposit_id: deposit.id,
            pool_id: deposit.pool_id,
            pool_name: pool.map(|p| p.name.clone()).unwrap_or_else(|| "unknown".into()),
            pool_kind: pool.map(|p| p.kind),
            principal: deposit.principal,
            currency: deposit.currency,
            shares_issued: deposit.shares_issued,
            issuance_balance: deposit.issuance_balance,
            is_active: deposit.is_active,
            created_at: deposit.created_at,
            current_profit: latest.as_ref().map(|p| p.profit).unwrap_or_default(),
            current_rate: latest.as_ref().map(|p| p.profit_rate).unwrap_or_default(),
            current_value: current_value(deposit.principal, latest.as_ref()),
            days_held: (now - deposit.created_at).num_days().max(0),
        })
    }

    /// Every deposit of a depositor, newest first.
    pub async fn deposit_views(
        &self,
        depositor_id: DepositorId,
        now: DateTime<Utc>,
    ) -> LedgerResult<Vec<DepositView>> {
        self.require_depositor(depositor_id).await?;
        let pools = self.pools_by_id().await?;
        let deposits = self.store.list_deposits_by_depositor(depositor_id).await?;

        let mut views = Vec::with_capacity(deposits.len());
        for deposit in deposits {
            views.push(self.view(deposit, &pools, now).await?);
        }
        Ok(views)
    }

    /// Aggregate of a depositor's active deposits with linear
    /// monthly/quarterly/annual rates.
    pub async fn depositor_summary(
        &self,
        depositor_id: DepositorId,
        now: DateTime<Utc>,
    ) -> LedgerResult<DepositorSummary> {
        self.require_depositor(depositor_id).await?;
        let deposits = self.store.list_deposits_by_depositor(depositor_id).await?;

        let mut summary = DepositorSummary::default();
        let mut total_hold_days = 0i64;

        for deposit in deposits.iter().filter(|d| d.is_active) {
            let latest = self.store.latest_deposit_profit(deposit.id).await?;
            summary.total_principal += deposit.principal;
            summary.current_value += current_value(deposit.principal, latest.as_ref());
            total_hold_days += Accountant::hold_days(deposit.created_at, now);
            summary.deposit_count += 1;
        }

        summary.total_profit = summary.current_value - summary.total_principal;
        summary.total_profit_rate = rate_of(summary.total_profit, summary.total_principal);
        if summary.deposit_count > 0 {
            summary.avg_hold_days = total_hold_days / summary.deposit_count as i64;
        }
        summary.rates = Accountant::annualize(summary.total_profit_rate, summary.avg_hold_days);
        Ok(summary)
    }

    async fn list_item(&self, depositor: Depositor) -> LedgerResult<DepositorListItem> {
        let deposits = self.store.list_deposits_by_depositor(depositor.id).await?;
        let mut total_principal = Decimal::ZERO;
        let mut value = Decimal::ZERO;

        for deposit in deposits.iter().filter(|d| d.is_active) {
            let latest = self.store.latest_deposit_profit(deposit.id).await?;
            total_principal += deposit.principal;
            value += current_value(deposit.principal, latest.as_ref());
        }

        let total_profit = value - total_principal;
        Ok(DepositorListItem {
            depositor,
            total_principal,
            current_value: value,
            total_profit,
            profit_rate: rate_of(total_profit, total_principal),
            deposit_count: deposits.len(),
        })
    }

    /// All depositors with their totals, newest first.
    pub async fn list_depositors(&self) -> LedgerResult<Vec<DepositorListItem>> {
        let depositors = self.store.list_depositors().await?;
        let mut items = Vec::with_capacity(depositors.len());
        for depositor in depositors {
            items.push(self.list_item(depositor).await?);
        }
        Ok(items)
    }

    pub async fn depositor_detail(
        &self,
        depositor_id: DepositorId,
        now: DateTime<Utc>,
    ) -> LedgerResult<DepositorDetail> {
        let depositor = self.require_depositor(depositor_id).await?;
        let item = self.list_item(depositor).await?;
        let deposits = self.deposit_views(depositor_id, now).await?;
        Ok(DepositorDetail { item, deposits })
    }

    /// Daily profit rows of a deposit, newest first. A deposit that
    /// belongs to another depositor reads as missing.
    pub async fn deposit_history(
        &self,
        deposit_id: DepositId,
        depositor_id: DepositorId,
    ) -> LedgerResult<Vec<DepositProfit>> {
        match self.store.get_deposit(deposit_id).await? {
            Some(d) if d.depositor_id == depositor_id => {
                self.store.deposit_profit_history(deposit_id).await
            }
            _ => Err(LedgerError::NotFound(format!(
                "deposit {deposit_id} of depositor {depositor_id}"
            ))),
        }
    }

    /// Configuration and valuation state of every pool.
    pub async fn pool_statuses(&self, today: NaiveDate) -> LedgerResult<Vec<PoolStatus>> {
        let pools = self.store.list_pools().await?;
        let mut statuses = Vec::with_capacity(pools.len());

        for pool in pools {
            let snapshot = self.store.pool_snapshot_on(pool.id, today).await?;
            statuses.push(PoolStatus {
                id: pool.id,
                identifier: pool.credentials.display_identifier(pool.kind),
                is_configured: pool.is_configured(),
                is_active: pool.is_active,
                current_balance: pool.current_balance,
                total_shares: pool.total_shares,
                nav: pool.nav(),
                daily_change: snapshot.as_ref().map(|s| s.change).unwrap_or_default(),
                daily_change_rate: snapshot.as_ref().map(|s| s.change_rate).unwrap_or_default(),
                kind: pool.kind,
                name: pool.name,
            });
        }
        Ok(statuses)
    }

    /// Active principal per pool, split by stablecoin.
    pub async fn deposit_statistics(&self) -> LedgerResult<DepositStatistics> {
        let pools = self.store.list_pools().await?;
        let mut stats = DepositStatistics {
            total: Decimal::ZERO,
            pools: Vec::with_capacity(pools.len()),
        };

        for pool in pools {
            let mut entry = PoolDepositStats {
                pool_id: pool.id,
                pool_name: pool.name.clone(),
                kind: pool.kind,
                usdc: Decimal::ZERO,
                usdt: Decimal::ZERO,
                total: Decimal::ZERO,
            };
            for deposit in self.store.list_active_deposits(pool.id).await? {
                match deposit.currency {
                    Stablecoin::Usdc => entry.usdc += deposit.principal,
                    Stablecoin::Usdt => entry.usdt += deposit.principal,
                }
                entry.total += deposit.principal;
            }
            stats.total += entry.total;
            stats.pools.push(entry);
        }
        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ledger::Ledger;
    use crate::storage::MemoryStore;
    use chrono::Duration;

    struct Fixture {
        ledger: Ledger,
        reports: Reports,
        alice: DepositorId,
        bob: DepositorId,
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store
            .ensure_pool(&Pool::new(1, "Binance", VenueKind::ExchangeDerivativeAggregate))
            .await
            .unwrap();
        store
            .ensure_pool(&Pool::new(2, "OKX", VenueKind::ExchangeSpot))
            .await
            .unwrap();
        let ledger = Ledger::new(store.clone());
        let alice = ledger.create_depositor("alice", Utc::now()).await.unwrap().id;
        let bob = ledger.create_depositor("bob", Utc::now()).await.unwrap().id;
        Fixture {
            ledger,
            reports: Reports::new(store),
            alice,
            bob,
        }
    }

    #[tokio::test]
    async fn test_summary_uses_latest_rate_and_linear_scaling() {
        let f = fixture().await;
        let now = Utc::now();
        f.ledger
            .issue_shares(f.alice, 1, dec!(1000), Stablecoin::Usdt, now - Duration::days(10))
            .await
            .unwrap();
        f.ledger.revalue_pool(1, dec!(1100), day(1)).await.unwrap();

        let s = f.reports.depositor_summary(f.alice, now).await.unwrap();
        assert_eq!(s.total_principal, dec!(1000));
        assert_eq!(s.current_value, dec!(1100));
        assert_eq!(s.total_profit, dec!(100));
        assert_eq!(s.total_profit_rate, dec!(10));
        assert_eq!(s.avg_hold_days, 10);
        assert_eq!(s.rates.daily, dec!(1));
        assert_eq!(s.rates.monthly, dec!(30));
        assert_eq!(s.rates.annual, dec!(365));
    }

    #[tokio::test]
    async fn test_summary_before_first_snapshot() {
        let f = fixture().await;
        f.ledger
            .issue_shares(f.alice, 1, dec!(500), Stablecoin::Usdc, Utc::now())
            .await
            .unwrap();
        let s = f.reports.depositor_summary(f.alice, Utc::now()).await.unwrap();
        assert_eq!(s.current_value, dec!(500));
        assert_eq!(s.avg_hold_days, 1);
        assert_eq!(s.rates, AnnualizedRates::default());
    }

    #[tokio::test]
    async fn test_inactive_deposits_excluded_from_totals_but_counted() {
        let f = fixture().await;
        let now = Utc::now();
        let d = f
            .ledger
            .issue_shares(f.alice, 1, dec!(100), Stablecoin::Usdc, now)
            .await
            .unwrap()
            .deposit;
        f.ledger
            .issue_shares(f.alice, 2, dec!(40), Stablecoin::Usdt, now)
            .await
            .unwrap();
        f.ledger.deactivate_deposit(d.id).await.unwrap();

        let detail = f.reports.depositor_detail(f.alice, now).await.unwrap();
        assert_eq!(detail.item.total_principal, dec!(40));
        assert_eq!(detail.item.deposit_count, 2);
        assert_eq!(detail.deposits.len(), 2);

        let summary = f.reports.depositor_summary(f.alice, now).await.unwrap();
        assert_eq!(summary.deposit_count, 1);
    }

    #[tokio::test]
    async fn test_deposit_views_carry_pool_and_profit() {
        let f = fixture().await;
        f.ledger
            .issue_shares(f.alice, 1, dec!(1000), Stablecoin::Usdt, Utc::now())
            .await
            .unwrap();
        f.ledger.revalue_pool(1, dec!(900), day(1)).await.unwrap();

        let views = f.reports.deposit_views(f.alice, Utc::now()).await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].pool_name, "Binance");
        assert_eq!(views[0].pool_kind, Some(VenueKind::ExchangeDerivativeAggregate));
        assert_eq!(views[0].current_profit, dec!(-100));
        assert_eq!(views[0].current_rate, dec!(-10));
        assert_eq!(views[0].current_value, dec!(900));
        assert_eq!(views[0].days_held, 0);
    }

    #[tokio::test]
    async fn test_history_of_foreign_deposit_is_not_found() {
        let f = fixture().await;
        let d = f
            .ledger
            .issue_shares(f.alice, 1, dec!(10), Stablecoin::Usdc, Utc::now())
            .await
            .unwrap()
            .deposit;
        f.ledger.revalue_pool(1, dec!(10), day(1)).await.unwrap();
        f.ledger.revalue_pool(1, dec!(11), day(2)).await.unwrap();

        let history = f.reports.deposit_history(d.id, f.alice).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].record_date, day(2));

        assert!(matches!(
            f.reports.deposit_history(d.id, f.bob).await,
            Err(LedgerError::NotFound(_))
        ));
        assert!(matches!(
            f.reports.deposit_history(999, f.alice).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_pool_statuses_show_today_change() {
        let f = fixture().await;
        f.ledger.revalue(1, dec!(1000), day(1)).await.unwrap();
        f.ledger.revalue(1, dec!(1050), day(2)).await.unwrap();

        let statuses = f.reports.pool_statuses(day(2)).await.unwrap();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].daily_change, dec!(50));
        assert_eq!(statuses[0].daily_change_rate, dec!(5));
        assert_eq!(statuses[0].identifier, "not configured");
        assert!(!statuses[0].is_configured);
        assert_eq!(statuses[1].daily_change, Decimal::ZERO);
        assert_eq!(statuses[1].nav, None);
    }

    #[tokio::test]
    async fn test_deposit_statistics_split_by_currency() {
        let f = fixture().await;
        let now = Utc::now();
        f.ledger.issue_shares(f.alice, 1, dec!(100), Stablecoin::Usdc, now).await.unwrap();
        f.ledger.issue_shares(f.bob, 1, dec!(50), Stablecoin::Usdt, now).await.unwrap();
        f.ledger.issue_shares(f.bob, 2, dec!(25), Stablecoin::Usdt, now).await.unwrap();

        let stats = f.reports.deposit_statistics().await.unwrap();
        assert_eq!(stats.total, dec!(175));
        assert_eq!(stats.pools[0].usdc, dec!(100));
        assert_eq!(stats.pools[0].usdt, dec!(50));
        assert_eq!(stats.pools[1].total, dec!(25));
    }

    #[tokio::test]
    async fn test_list_depositors_newest_first() {
        let f = fixture().await;
        let list = f.reports.list_depositors().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].depositor.name, "bob");
        assert_eq!(list[0].deposit_count, 0);
    }

    #[tokio::test]
    async fn test_unknown_depositor_is_not_found() {
        let f = fixture().await;
        assert!(matches!(
            f.reports.depositor_summary(77, Utc::now()).await,
            Err(LedgerError::NotFound(_))
        ));
    }
}
