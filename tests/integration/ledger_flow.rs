//! End-to-end ledger scenario: two depositors buying into one pool
//! across two revaluations, run against both stores.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;

use navpool::engine::ledger::Ledger;
use navpool::engine::reports::Reports;
use navpool::storage::{MemoryStore, SqliteStore, Store};
use navpool::types::{LedgerError, Pool, Stablecoin, VenueKind};

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
}

async fn sqlite_store() -> Arc<dyn Store> {
    Arc::new(SqliteStore::open(":memory:").await.unwrap())
}

async fn two_depositor_scenario(store: Arc<dyn Store>) {
    store
        .ensure_pool(&Pool::new(1, "Pool A", VenueKind::ExchangeDerivativeAggregate))
        .await
        .unwrap();
    let ledger = Ledger::new(store.clone());
    let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
    let alice = ledger.create_depositor("alice", t0).await.unwrap();
    let bob = ledger.create_depositor("bob", t0).await.unwrap();

    // First deposit into an empty pool buys at NAV 1.
    let first = ledger
        .issue_shares(alice.id, 1, dec!(1000), Stablecoin::Usdt, t0)
        .await
        .unwrap();
    assert_eq!(first.nav, dec!(1));
    assert_eq!(first.deposit.shares_issued, dec!(1000));

    // Pool grows 10%.
    let reval = ledger.revalue_pool(1, dec!(1100), day(2)).await.unwrap();
    assert_eq!(reval.deposits.valued, 1);
    let pool = store.load_pool(1).await.unwrap().unwrap();
    assert_eq!(pool.nav(), Some(dec!(1.1)));
    let profit = store.latest_deposit_profit(first.deposit.id).await.unwrap().unwrap();
    assert_eq!(profit.profit, dec!(100));
    assert_eq!(profit.profit_rate, dec!(10));

    // Second depositor buys in at the grown NAV.
    let second = ledger
        .issue_shares(bob.id, 1, dec!(220), Stablecoin::Usdc, t0 + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(second.nav, dec!(1.1));
    assert_eq!(second.deposit.shares_issued, dec!(200));
    let pool = store.load_pool(1).await.unwrap().unwrap();
    assert_eq!(pool.total_shares, dec!(1200));

    // Balance now includes bob's 220 with no market move.
    let reval = ledger.revalue_pool(1, dec!(1320), day(3)).await.unwrap();
    assert_eq!(reval.deposits.valued, 2);
    assert_eq!(reval.snapshot.change, dec!(220));

    let a = store.latest_deposit_profit(first.deposit.id).await.unwrap().unwrap();
    assert_eq!((a.profit, a.profit_rate), (dec!(100), dec!(10)));
    let b = store.latest_deposit_profit(second.deposit.id).await.unwrap().unwrap();
    assert_eq!((b.profit, b.profit_rate), (dec!(0), dec!(0)));

    // Projections agree with the stored rows.
    let reports = Reports::new(store.clone());
    let now = t0 + Duration::days(10);
    let summary = reports.depositor_summary(alice.id, now).await.unwrap();
    assert_eq!(summary.total_principal, dec!(1000));
    assert_eq!(summary.current_value, dec!(1100));
    assert_eq!(summary.total_profit_rate, dec!(10));
    assert_eq!(summary.avg_hold_days, 10);
    assert_eq!(summary.rates.daily, dec!(1));
    assert_eq!(summary.rates.annual, dec!(365));

    let history = reports.deposit_history(first.deposit.id, alice.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].record_date, day(3));

    let stats = reports.deposit_statistics().await.unwrap();
    assert_eq!(stats.total, dec!(1220));
    assert_eq!(stats.pools[0].usdc, dec!(220));
    assert_eq!(stats.pools[0].usdt, dec!(1000));
}

#[tokio::test]
async fn test_two_depositor_scenario_memory() {
    two_depositor_scenario(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn test_two_depositor_scenario_sqlite() {
    two_depositor_scenario(sqlite_store().await).await;
}

async fn rerun_same_day_is_idempotent(store: Arc<dyn Store>) {
    store
        .ensure_pool(&Pool::new(1, "Pool A", VenueKind::OnChainWallet))
        .await
        .unwrap();
    let ledger = Ledger::new(store.clone());
    let alice = ledger.create_depositor("alice", Utc::now()).await.unwrap();
    let deposit = ledger
        .issue_shares(alice.id, 1, dec!(500), Stablecoin::Usdc, Utc::now())
        .await
        .unwrap()
        .deposit;

    ledger.revalue_pool(1, dec!(500), day(1)).await.unwrap();
    let first = ledger.revalue_pool(1, dec!(550), day(2)).await.unwrap();
    let again = ledger.revalue_pool(1, dec!(550), day(2)).await.unwrap();

    assert_eq!(first.snapshot.change, dec!(50));
    assert_eq!(again.snapshot, first.snapshot);
    assert_eq!(store.deposit_profit_history(deposit.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_rerun_same_day_memory() {
    rerun_same_day_is_idempotent(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn test_rerun_same_day_sqlite() {
    rerun_same_day_is_idempotent(sqlite_store().await).await;
}

#[tokio::test]
async fn test_failed_deposit_leaves_shares_untouched() {
    let memory = Arc::new(MemoryStore::new());
    let store: Arc<dyn Store> = memory.clone();
    store
        .ensure_pool(&Pool::new(1, "Pool A", VenueKind::ExchangeSpot))
        .await
        .unwrap();
    let ledger = Ledger::new(store.clone());
    let alice = ledger.create_depositor("alice", Utc::now()).await.unwrap();
    ledger
        .issue_shares(alice.id, 1, dec!(1000), Stablecoin::Usdt, Utc::now())
        .await
        .unwrap();

    memory.fail_deposit_create(true);
    let err = ledger
        .issue_shares(alice.id, 1, dec!(250), Stablecoin::Usdt, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Persistence(_)));
    assert_eq!(store.load_pool(1).await.unwrap().unwrap().total_shares, dec!(1000));
}

#[tokio::test]
async fn test_unknown_pool_and_bad_principal() {
    let store = sqlite_store().await;
    let ledger = Ledger::new(store);
    let alice = ledger.create_depositor("alice", Utc::now()).await.unwrap();

    let missing = ledger
        .issue_shares(alice.id, 9, dec!(10), Stablecoin::Usdt, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(missing, LedgerError::NotFound(_)));

    let zero = ledger
        .issue_shares(alice.id, 9, dec!(0), Stablecoin::Usdt, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(zero, LedgerError::InvalidArgument(_)));
}
