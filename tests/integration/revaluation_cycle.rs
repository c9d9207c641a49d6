//! Revaluation cycles over several pools with a scripted venue.

use chrono::{NaiveDate, Utc};
use rust_decimal_macros::dec;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;

use navpool::engine::ledger::Ledger;
use navpool::engine::scheduler::{Scheduler, SchedulerSettings, SchedulerState};
use navpool::storage::{MemoryStore, SqliteStore, Store};
use navpool::types::{Credentials, Pool, Stablecoin, VenueKind};
use navpool::venues::ProviderSet;

use crate::scripted_venue::ScriptedVenue;

const KIND: VenueKind = VenueKind::ExchangeDerivativeAggregate;

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

fn credentials() -> Credentials {
    Credentials {
        api_key: Some("key-0123456789".into()),
        api_secret: Some(SecretString::new("secret".into())),
        ..Credentials::default()
    }
}

/// Three configured pools, each with one 1000 deposit.
async fn three_pools(store: Arc<dyn Store>) -> (Arc<Ledger>, ScriptedVenue, Arc<Scheduler>) {
    let ledger = Arc::new(Ledger::new(store.clone()));
    let seeds = (1..=3)
        .map(|id| {
            let mut pool = Pool::new(id, &format!("Pool {id}"), KIND);
            pool.credentials = credentials();
            pool
        })
        .collect();
    let report = ledger.bootstrap_pools(seeds).await.unwrap();
    assert_eq!(report.configured, 3);

    let depositor = ledger.create_depositor("alice", Utc::now()).await.unwrap();
    for id in 1..=3 {
        ledger
            .issue_shares(depositor.id, id, dec!(1000), Stablecoin::Usdt, Utc::now())
            .await
            .unwrap();
    }

    let venue = ScriptedVenue::new(KIND);
    let mut providers = ProviderSet::new();
    providers.register(Arc::new(venue.clone()));
    let settings = SchedulerSettings {
        provider_timeout: Duration::from_secs(5),
        ..SchedulerSettings::default()
    };
    let scheduler = Arc::new(Scheduler::new(ledger.clone(), providers, settings));
    (ledger, venue, scheduler)
}

async fn one_failing_pool(store: Arc<dyn Store>) {
    let (_, venue, scheduler) = three_pools(store.clone()).await;
    let yesterday = date().pred_opt().unwrap();
    for id in 1..=3 {
        venue.set_balance(id, dec!(1000));
    }
    let baseline = scheduler.run_cycle(yesterday).await.unwrap();
    assert_eq!((baseline.succeeded, baseline.failed), (3, 0));

    venue.set_balance(1, dec!(1100));
    venue.set_balance(3, dec!(900));
    venue.fail(2);

    let report = scheduler.run_cycle(date()).await.unwrap();
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(scheduler.state(), SchedulerState::Idle);

    let failed: Vec<_> = report.outcomes.iter().filter(|o| !o.succeeded()).collect();
    assert_eq!(failed[0].pool_id, 2);
    assert!(failed[0].error.as_deref().unwrap().contains("unreachable"));

    // Healthy pools are revalued and their deposits valued.
    assert_eq!(store.load_pool(1).await.unwrap().unwrap().current_balance, dec!(1100));
    assert_eq!(store.load_pool(3).await.unwrap().unwrap().current_balance, dec!(900));
    let snap = store.pool_snapshot_on(3, date()).await.unwrap().unwrap();
    assert_eq!(snap.balance, dec!(900));
    assert_eq!(snap.change, dec!(-100));

    // The failed pool keeps yesterday's balance and gets no snapshot today.
    assert_eq!(store.load_pool(2).await.unwrap().unwrap().current_balance, dec!(1000));
    assert!(store.pool_snapshot_on(2, date()).await.unwrap().is_none());
    assert!(store.pool_snapshot_on(2, yesterday).await.unwrap().is_some());

    let valued: usize = report.outcomes.iter().map(|o| o.deposits.valued).sum();
    assert_eq!(valued, 2);

    let mut calls = venue.calls();
    calls.sort();
    assert_eq!(calls, vec![1, 1, 2, 2, 3, 3]);
}

#[tokio::test]
async fn test_one_failing_pool_memory() {
    one_failing_pool(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn test_one_failing_pool_sqlite() {
    one_failing_pool(Arc::new(SqliteStore::open(":memory:").await.unwrap())).await;
}

#[tokio::test]
async fn test_failed_pool_recovers_next_cycle() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (_, venue, scheduler) = three_pools(store.clone()).await;
    venue.set_balance(1, dec!(1000));
    venue.set_balance(3, dec!(1000));

    let first = scheduler.run_cycle(date()).await.unwrap();
    assert_eq!((first.succeeded, first.failed), (2, 1));

    venue.set_balance(2, dec!(1050));
    let next_day = date().succ_opt().unwrap();
    let second = scheduler.run_cycle(next_day).await.unwrap();
    assert_eq!((second.succeeded, second.failed), (3, 0));

    // No snapshot before today for pool 2, so its first change is zero.
    let snap = store.pool_snapshot_on(2, next_day).await.unwrap().unwrap();
    assert_eq!(snap.change, dec!(0));
    assert_eq!(store.load_pool(2).await.unwrap().unwrap().current_balance, dec!(1050));

    let status = scheduler.status().await;
    assert_eq!(status.last_report.unwrap().run_id, second.run_id);
}

#[tokio::test]
async fn test_deactivated_pool_is_not_read() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (_, venue, scheduler) = three_pools(store.clone()).await;
    for id in 1..=3 {
        venue.set_balance(id, dec!(1000));
    }
    let mut pool = store.load_pool(3).await.unwrap().unwrap();
    pool.is_active = false;
    store.save_pool(&pool).await.unwrap();

    let report = scheduler.run_cycle(date()).await.unwrap();
    assert_eq!(report.outcomes.len(), 2);
    assert!(!venue.calls().contains(&3));
}
