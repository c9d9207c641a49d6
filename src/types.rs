//! Shared types for the NAVPOOL ledger.
//!
//! These types form the data model used across all modules: pools
//! (custodial admin accounts), depositors, deposits and the daily
//! snapshots written by the revaluation cycle.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type PoolId = i64;
pub type DepositId = i64;
pub type DepositorId = i64;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Kind of custodial venue behind a pool. Selects the balance provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueKind {
    /// Single exchange trading account (OKX unified account).
    ExchangeSpot,
    /// Exchange spot + USDⓈ-M + COIN-M wallets summed (Binance).
    ExchangeDerivativeAggregate,
    /// ERC-20 stablecoin balances of an Ethereum address.
    OnChainWallet,
}

impl VenueKind {
    pub const ALL: [VenueKind; 3] = [
        VenueKind::ExchangeSpot,
        VenueKind::ExchangeDerivativeAggregate,
        VenueKind::OnChainWallet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VenueKind::ExchangeSpot => "exchange_spot",
            VenueKind::ExchangeDerivativeAggregate => "exchange_derivative_aggregate",
            VenueKind::OnChainWallet => "on_chain_wallet",
        }
    }
}

impl fmt::Display for VenueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VenueKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exchange_spot" => Ok(VenueKind::ExchangeSpot),
            "exchange_derivative_aggregate" => Ok(VenueKind::ExchangeDerivativeAggregate),
            "on_chain_wallet" => Ok(VenueKind::OnChainWallet),
            other => Err(LedgerError::InvalidArgument(format!(
                "unknown venue kind: {other}"
            ))),
        }
    }
}

/// The two stablecoins a deposit may arrive in. Both are valued at 1 USD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stablecoin {
    Usdc,
    Usdt,
}

impl Stablecoin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stablecoin::Usdc => "USDC",
            Stablecoin::Usdt => "USDT",
        }
    }
}

impl fmt::Display for Stablecoin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stablecoin {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "USDC" => Ok(Stablecoin::Usdc),
            "USDT" => Ok(Stablecoin::Usdt),
            other => Err(LedgerError::InvalidArgument(format!(
                "unsupported currency: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Venue credential bundle. Opaque to the engine; only balance
/// providers expose the secrets, and only while signing a request.
#[derive(Clone, Default)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub api_secret: Option<SecretString>,
    pub passphrase: Option<SecretString>,
    pub wallet_address: Option<String>,
    /// Block explorer key for on-chain pools.
    pub explorer_api_key: Option<SecretString>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key.as_deref().map(mask_key))
            .field("api_secret", &self.api_secret.as_ref().map(|_| "****"))
            .field("passphrase", &self.passphrase.as_ref().map(|_| "****"))
            .field("wallet_address", &self.wallet_address)
            .field("explorer_api_key", &self.explorer_api_key.as_ref().map(|_| "****"))
            .finish()
    }
}

fn non_empty(s: Option<&str>) -> bool {
    s.map(|v| !v.trim().is_empty()).unwrap_or(false)
}

fn non_empty_secret(s: Option<&SecretString>) -> bool {
    non_empty(s.map(|v| v.expose_secret().as_str()))
}

/// Show the first 8 characters of an API key.
pub fn mask_key(key: &str) -> String {
    if key.chars().count() > 8 {
        let head: String = key.chars().take(8).collect();
        format!("API: {head}****")
    } else {
        "API configured".to_string()
    }
}

impl Credentials {
    /// Whether enough credentials are present to read this kind of venue.
    pub fn is_configured(&self, kind: VenueKind) -> bool {
        match kind {
            VenueKind::ExchangeSpot => {
                non_empty(self.api_key.as_deref())
                    && non_empty_secret(self.api_secret.as_ref())
                    && non_empty_secret(self.passphrase.as_ref())
            }
            VenueKind::ExchangeDerivativeAggregate => {
                non_empty(self.api_key.as_deref()) && non_empty_secret(self.api_secret.as_ref())
            }
            VenueKind::OnChainWallet => non_empty(self.wallet_address.as_deref()),
        }
    }

    /// Identifier safe to show in status listings.
    pub fn display_identifier(&self, kind: VenueKind) -> String {
        if !self.is_configured(kind) {
            return "not configured".to_string();
        }
        match kind {
            VenueKind::OnChainWallet => self.wallet_address.clone().unwrap_or_default(),
            _ => mask_key(self.api_key.as_deref().unwrap_or_default()),
        }
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// A custodial admin account aggregating many depositors' funds.
#[derive(Debug, Clone)]
pub struct Pool {
    pub id: PoolId,
    pub name: String,
    pub kind: VenueKind,
    pub credentials: Credentials,
    /// Latest known USD value of the account.
    pub current_balance: Decimal,
    /// Sum of all shares ever issued from this pool.
    pub total_shares: Decimal,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}) balance=${:.2} shares={:.4}",
            self.id, self.name, self.kind, self.current_balance, self.total_shares
        )
    }
}

impl Pool {
    /// Fresh, empty pool as created at bootstrap.
    pub fn new(id: PoolId, name: &str, kind: VenueKind) -> Self {
        Self {
            id,
            name: name.to_string(),
            kind,
            credentials: Credentials::default(),
            current_balance: Decimal::ZERO,
            total_shares: Decimal::ZERO,
            is_active: true,
            updated_at: Utc::now(),
        }
    }

    /// Net asset value per share, `None` while the pool has no shares.
    pub fn nav(&self) -> Option<Decimal> {
        if self.total_shares > Decimal::ZERO {
            Some(self.current_balance / self.total_shares)
        } else {
            None
        }
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_configured(self.kind)
    }
}

// ---------------------------------------------------------------------------
// Depositors and deposits
// ---------------------------------------------------------------------------

/// A third party whose funds sit in one or more pools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Depositor {
    pub id: DepositorId,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// One funds-in event. `shares_issued` is fixed at issuance forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deposit {
    pub id: DepositId,
    pub depositor_id: DepositorId,
    pub pool_id: PoolId,
    pub principal: Decimal,
    pub currency: Stablecoin,
    pub shares_issued: Decimal,
    /// Pool balance observed at issuance, kept for audit only.
    pub issuance_balance: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for Deposit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deposit #{} depositor={} pool={} ${:.2} {} shares={:.4}{}",
            self.id,
            self.depositor_id,
            self.pool_id,
            self.principal,
            self.currency,
            self.shares_issued,
            if self.is_active { "" } else { " (inactive)" },
        )
    }
}

/// Deposit row before the store assigns its id.
#[derive(Debug, Clone)]
pub struct NewDeposit {
    pub depositor_id: DepositorId,
    pub pool_id: PoolId,
    pub principal: Decimal,
    pub currency: Stablecoin,
    pub shares_issued: Decimal,
    pub issuance_balance: Decimal,
    pub created_at: DateTime<Utc>,
}

impl NewDeposit {
    pub fn into_deposit(self, id: DepositId) -> Deposit {
        Deposit {
            id,
            depositor_id: self.depositor_id,
            pool_id: self.pool_id,
            principal: self.principal,
            currency: self.currency,
            shares_issued: self.shares_issued,
            issuance_balance: self.issuance_balance,
            is_active: true,
            created_at: self.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Daily snapshots
// ---------------------------------------------------------------------------

/// One row per (pool, calendar date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub pool_id: PoolId,
    pub record_date: NaiveDate,
    pub balance: Decimal,
    pub change: Decimal,
    /// Percentage change versus the prior snapshot.
    pub change_rate: Decimal,
}

/// One row per (deposit, calendar date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositProfit {
    pub deposit_id: DepositId,
    pub record_date: NaiveDate,
    pub pool_balance: Decimal,
    pub profit: Decimal,
    /// Percentage of principal.
    pub profit_rate: Decimal,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Ledger error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Provider error (pool {pool_id}): {message}")]
    ProviderTransient { pool_id: PoolId, message: String },

    #[error("Data anomaly: {0}")]
    DataAnomaly(String),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("A revaluation cycle is already running")]
    CycleInProgress,
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Persistence(e.to_string())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
