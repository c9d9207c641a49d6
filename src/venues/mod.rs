//! Venue integrations.
//!
//! Defines the `BalanceProvider` trait and one implementation per venue kind:
//! - Binance: spot + USDⓈ-M + COIN-M wallets (`ExchangeDerivativeAggregate`)
//! - OKX: unified trading account (`ExchangeSpot`)
//! - Etherscan: ERC-20 stablecoin balances of a wallet (`OnChainWallet`)
//!
//! Only USDC and USDT are counted, each at 1 USD.

pub mod binance;
pub mod etherscan;
pub mod okx;
pub mod signing;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::types::{Pool, VenueKind};

pub use binance::BinanceClient;
pub use etherscan::EtherscanClient;
pub use okx::OkxClient;

/// Assets summed into a pool balance.
pub const STABLECOINS: [&str; 2] = ["USDC", "USDT"];

const USER_AGENT: &str = "NAVPOOL/0.1.0 (pool-revaluation)";

// ---------------------------------------------------------------------------
// Balance report
// ---------------------------------------------------------------------------

/// One sub-ledger's contribution to a pool balance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceLeg {
    pub name: String,
    pub amount: Decimal,
}

/// USD balance of a pool with its per-sub-ledger breakdown.
///
/// `warnings` lists sub-ledgers that could not be read; their amounts
/// are missing from `total`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BalanceReport {
    pub total: Decimal,
    pub legs: Vec<BalanceLeg>,
    pub warnings: Vec<String>,
}

impl BalanceReport {
    /// Report with a single sub-ledger.
    pub fn single(name: &str, amount: Decimal) -> Self {
        Self {
            total: amount,
            legs: vec![BalanceLeg {
                name: name.to_string(),
                amount,
            }],
            warnings: Vec::new(),
        }
    }

    /// Combine independent sub-ledger reads.
    ///
    /// Failed reads become warnings and the rest are summed. Fails only
    /// when every read failed.
    pub fn from_legs(venue: &str, reads: Vec<(&str, Result<Decimal>)>) -> Result<Self> {
        let mut report = BalanceReport::default();
        let mut errors = Vec::new();

        for (name, read) in reads {
            match read {
                Ok(amount) => {
                    report.total += amount;
                    report.legs.push(BalanceLeg {
                        name: name.to_string(),
                        amount,
                    });
                }
                Err(e) => {
                    warn!(venue, leg = name, error = %e, "Sub-ledger read failed");
                    errors.push(format!("{name}: {e:#}"));
                }
            }
        }

        if report.legs.is_empty() {
            anyhow::bail!("all {venue} balance reads failed: {}", errors.join("; "));
        }
        report.warnings = errors;
        Ok(report)
    }

    pub fn is_partial(&self) -> bool {
        !self.warnings.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Reads the USD stablecoin balance of a pool's custodial account.
///
/// Implementations own their authentication; callers only ever see the
/// resulting figures.
#[async_trait]
pub trait BalanceProvider: Send + Sync {
    async fn get_balance(&self, pool: &Pool) -> Result<BalanceReport>;

    /// Venue kind this provider serves.
    fn kind(&self) -> VenueKind;

    /// Venue name for logging.
    fn name(&self) -> &str;
}

/// Balance providers keyed by venue kind.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: HashMap<VenueKind, Arc<dyn BalanceProvider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Production adapters for every venue kind.
    pub fn live() -> Result<Self> {
        let mut set = Self::new();
        set.register(Arc::new(BinanceClient::new()?));
        set.register(Arc::new(OkxClient::new()?));
        set.register(Arc::new(EtherscanClient::new()?));
        Ok(set)
    }

    /// Register a provider, replacing any previous one for its kind.
    pub fn register(&mut self, provider: Arc<dyn BalanceProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: VenueKind) -> Option<Arc<dyn BalanceProvider>> {
        self.providers.get(&kind).cloned()
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

pub(crate) fn http_client(venue: &str) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(USER_AGENT)
        .build()
        .with_context(|| format!("Failed to build HTTP client for {venue}"))
}

pub(crate) fn require<'a>(value: Option<&'a str>, what: &str) -> Result<&'a str> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => anyhow::bail!("{what} is not configured"),
    }
}

pub(crate) fn require_secret<'a>(value: Option<&'a SecretString>, what: &str) -> Result<&'a str> {
    require(value.map(|s| s.expose_secret().as_str()), what)
}

/// Parse a venue's decimal string; empty means zero.
pub(crate) fn parse_amount(raw: &str) -> Result<Decimal> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Decimal::ZERO);
    }
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .with_context(|| format!("invalid amount {raw:?}"))
}

pub(crate) fn is_stablecoin(asset: &str) -> bool {
    STABLECOINS.iter().any(|s| s.eq_ignore_ascii_case(asset))
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
