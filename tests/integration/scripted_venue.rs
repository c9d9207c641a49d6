//! Scripted venue for integration testing.
//!
//! A deterministic `BalanceProvider` whose reading per pool is set from
//! test code. Pools without a script fail like an unreachable venue.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use navpool::types::{Pool, PoolId, VenueKind};
use navpool::venues::{BalanceProvider, BalanceReport};

/// In-memory venue returning scripted balances.
#[derive(Clone)]
pub struct ScriptedVenue {
    kind: VenueKind,
    balances: Arc<Mutex<HashMap<PoolId, Decimal>>>,
    calls: Arc<Mutex<Vec<PoolId>>>,
}

impl ScriptedVenue {
    pub fn new(kind: VenueKind) -> Self {
        Self {
            kind,
            balances: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Set the balance the next reads of `pool_id` return.
    pub fn set_balance(&self, pool_id: PoolId, balance: Decimal) {
        self.balances.lock().unwrap().insert(pool_id, balance);
    }

    /// Make reads of `pool_id` fail.
    pub fn fail(&self, pool_id: PoolId) {
        self.balances.lock().unwrap().remove(&pool_id);
    }

    /// Pool ids read so far, in call order.
    pub fn calls(&self) -> Vec<PoolId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BalanceProvider for ScriptedVenue {
    async fn get_balance(&self, pool: &Pool) -> Result<BalanceReport> {
        self.calls.lock().unwrap().push(pool.id);
        let balance = self
            .balances
            .lock()
            .unwrap()
            .get(&pool.id)
            .copied()
            .ok_or_else(|| anyhow!("venue unreachable for pool {}", pool.id))?;
        Ok(BalanceReport::single("scripted", balance))
    }

    fn kind(&self) -> VenueKind {
        self.kind
    }

    fn name(&self) -> &str {
        "Scripted"
    }
}
