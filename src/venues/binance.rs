//! Binance balance provider.
//!
//! Sums USDC/USDT across three independently read wallets:
//! - Spot: `GET /api/v3/account` (free + locked)
//! - USDⓈ-M futures: `GET /fapi/v2/balance` (cross wallet + unrealised PnL)
//! - COIN-M futures: `GET /dapi/v1/balance` (same fields)
//!
//! Auth: `X-MBX-APIKEY` header plus a hex HMAC-SHA256 `signature`
//! query parameter over `timestamp=<ms>`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info};

use super::{
    http_client, is_stablecoin, parse_amount, require, require_secret, signing, BalanceProvider,
    BalanceReport,
};
use crate::types::{Pool, VenueKind};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const SPOT_URL: &str = "https://api.binance.com";
const USDM_URL: &str = "https://fapi.binance.com";
const COINM_URL: &str = "https://dapi.binance.com";
const VENUE_NAME: &str = "binance";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SpotAccount {
    #[serde(default)]
    balances: Vec<SpotBalance>,
}

#[derive(Debug, Deserialize)]
struct SpotBalance {
    asset: String,
    #[serde(default)]
    free: String,
    #[serde(default)]
    locked: String,
}

/// Entry of `/fapi/v2/balance` and `/dapi/v1/balance`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FuturesBalance {
    asset: String,
    #[serde(default)]
    cross_wallet_balance: String,
    #[serde(default)]
    cross_un_pnl: String,
}

fn sum_spot(account: &SpotAccount) -> Result<Decimal> {
    let mut total = Decimal::ZERO;
    for b in account.balances.iter().filter(|b| is_stablecoin(&b.asset)) {
        total += parse_amount(&b.free)? + parse_amount(&b.locked)?;
    }
    Ok(total)
}

fn sum_futures(balances: &[FuturesBalance]) -> Result<Decimal> {
    let mut total = Decimal::ZERO;
    for b in balances.iter().filter(|b| is_stablecoin(&b.asset)) {
        total += parse_amount(&b.cross_wallet_balance)? + parse_amount(&b.cross_un_pnl)?;
    }
    Ok(total)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct BinanceClient {
    http: Client,
    spot_url: String,
    usdm_url: String,
    coinm_url: String,
}

impl BinanceClient {
    pub fn new() -> Result<Self> {
        Self::with_base_urls(SPOT_URL, USDM_URL, COINM_URL)
    }

    /// Point the three wallets at other hosts (test servers).
    pub fn with_base_urls(spot: &str, usdm: &str, coinm: &str) -> Result<Self> {
        Ok(Self {
            http: http_client(VENUE_NAME)?,
            spot_url: spot.trim_end_matches('/').to_string(),
            usdm_url: usdm.trim_end_matches('/').to_string(),
            coinm_url: coinm.trim_end_matches('/').to_string(),
        })
    }

    /// Signed GET. `Ok(None)` when the status is in `absent_on`.
    async fn signed_get(
        &self,
        url: &str,
        api_key: &str,
        secret: &str,
        absent_on: &[StatusCode],
    ) -> Result<Option<String>> {
        let query = format!("timestamp={}", Utc::now().timestamp_millis());
        let signature = signing::sign_hex(&query, secret)?;
        let full = format!("{url}?{query}&signature={signature}");

        debug!(url = %url, "Fetching Binance balance");

        let resp = self
            .http
            .get(&full)
            .header("X-MBX-APIKEY", api_key)
            .send()
            .await
            .context("Binance API request failed")?;

        let status = resp.status();
        if absent_on.contains(&status) {
            debug!(url = %url, status = %status, "Binance wallet not enabled, counting as zero");
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Binance API error {status}: {body}");
        }

        let body = resp
            .text()
            .await
            .context("Failed to read Binance response")?;
        Ok(Some(body))
    }

    async fn spot_balance(&self, api_key: &str, secret: &str) -> Result<Decimal> {
        let url = format!("{}/api/v3/account", self.spot_url);
        let body = self
            .signed_get(&url, api_key, secret, &[])
            .await?
            .unwrap_or_default();
        let account: SpotAccount =
            serde_json::from_str(&body).context("Failed to parse Binance spot account")?;
        sum_spot(&account)
    }

    async fn usdm_balance(&self, api_key: &str, secret: &str) -> Result<Decimal> {
        let url = format!("{}/fapi/v2/balance", self.usdm_url);
        let body = self
            .signed_get(&url, api_key, secret, &[])
            .await?
            .unwrap_or_default();
        let balances: Vec<FuturesBalance> =
            serde_json::from_str(&body).context("Failed to parse Binance USDⓈ-M balance")?;
        sum_futures(&balances)
    }

    async fn coinm_balance(&self, api_key: &str, secret: &str) -> Result<Decimal> {
        let url = format!("{}/dapi/v1/balance", self.coinm_url);
        // Accounts without COIN-M permission answer 400/401.
        let absent = [StatusCode::BAD_REQUEST, StatusCode::UNAUTHORIZED];
        match self.signed_get(&url, api_key, secret, &absent).await? {
            None => Ok(Decimal::ZERO),
            Some(body) => {
                let balances: Vec<FuturesBalance> = serde_json::from_str(&body)
                    .context("Failed to parse Binance COIN-M balance")?;
                sum_futures(&balances)
            }
        }
    }
}

#[async_trait]
impl BalanceProvider for BinanceClient {
    async fn get_balance(&self, pool: &Pool) -> Result<BalanceReport> {
        let creds = &pool.credentials;
        let api_key = require(creds.api_key.as_deref(), "Binance API key")?;
        let secret = require_secret(creds.api_secret.as_ref(), "Binance API secret")?;

        let (spot, usdm, coinm) = tokio::join!(
            self.spot_balance(api_key, secret),
            self.usdm_balance(api_key, secret),
            self.coinm_balance(api_key, secret),
        );

        let report = BalanceReport::from_legs(
            VENUE_NAME,
            vec![("spot", spot), ("usdm_futures", usdm), ("coinm_futures", coinm)],
        )?;

        info!(
            pool_id = pool.id,
            total = %format!("${:.2}", report.total),
            legs = report.legs.len(),
            "Binance balance read"
        );
        Ok(report)
    }

    fn kind(&self) -> VenueKind {
        VenueKind::ExchangeDerivativeAggregate
    }

    fn name(&self) -> &str {
        VENUE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
