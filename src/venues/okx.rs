//! OKX balance provider.
//!
//! Reads the unified trading account, which already includes positions,
//! unrealised PnL and idle funds. Sums the equity (`eq`) of USDC and USDT.
//!
//! API docs: https://www.okx.com/docs-v5/en/#trading-account-rest-api-get-balance
//! Auth: `OK-ACCESS-*` headers, base64 HMAC-SHA256 over
//! `timestamp + method + requestPath + body`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info};

use super::{
    http_client, is_stablecoin, parse_amount, require, require_secret, signing, BalanceProvider,
    BalanceReport,
};
use crate::types::{Pool, VenueKind};

const BASE_URL: &str = "https://www.okx.com";
const BALANCE_PATH: &str = "/api/v5/account/balance";
const VENUE_NAME: &str = "okx";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OkxResponse {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Vec<OkxAccount>,
}

#[derive(Debug, Deserialize)]
struct OkxAccount {
    #[serde(default)]
    details: Vec<OkxDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OkxDetail {
    ccy: String,
    /// Total equity of the currency.
    #[serde(default)]
    eq: String,
    #[serde(default)]
    avail_eq: String,
    #[serde(default)]
    upl: String,
}

fn sum_equity(resp: &OkxResponse) -> Result<Decimal> {
    if resp.code != "0" {
        anyhow::bail!("OKX API error [{}]: {}", resp.code, resp.msg);
    }
    let mut total = Decimal::ZERO;
    let details = resp.data.first().map(|a| a.details.as_slice()).unwrap_or_default();
    for d in details.iter().filter(|d| is_stablecoin(&d.ccy)) {
        let eq = parse_amount(&d.eq)?;
        debug!(ccy = %d.ccy, eq = %eq, avail = %d.avail_eq, upl = %d.upl, "OKX currency equity");
        total += eq;
    }
    Ok(total)
}

/// Request timestamp in the ISO-8601 millisecond form OKX expects.
fn okx_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OkxClient {
    http: Client,
    base_url: String,
}

impl OkxClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        Ok(Self {
            http: http_client(VENUE_NAME)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BalanceProvider for OkxClient {
    async fn get_balance(&self, pool: &Pool) -> Result<BalanceReport> {
        let creds = &pool.credentials;
        let api_key = require(creds.api_key.as_deref(), "OKX API key")?;
        let secret = require_secret(creds.api_secret.as_ref(), "OKX API secret")?;
        let passphrase = require_secret(creds.passphrase.as_ref(), "OKX passphrase")?;

        let timestamp = okx_timestamp();
        let prehash = signing::okx_prehash(&timestamp, "GET", BALANCE_PATH, "");
        let signature = signing::sign_base64(&prehash, secret)?;

        let url = format!("{}{BALANCE_PATH}", self.base_url);
        debug!(url = %url, "Fetching OKX balance");

        let resp = self
            .http
            .get(&url)
            .header("OK-ACCESS-KEY", api_key)
            .header("OK-ACCESS-SIGN", signature)
            .header("OK-ACCESS-TIMESTAMP", &timestamp)
            .header("OK-ACCESS-PASSPHRASE", passphrase)
            .header("Content-Type", "application/json")
            .send()
            .await
            .context("OKX API request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("OKX API error {status}: {body}");
        }

        let parsed: OkxResponse = resp
            .json()
            .await
            .context("Failed to parse OKX balance response")?;
        let total = sum_equity(&parsed)?;

        info!(pool_id = pool.id, total = %format!("${:.2}", total), "OKX balance read");
        Ok(BalanceReport::single("trading", total))
    }

    fn kind(&self) -> VenueKind {
        VenueKind::ExchangeSpot
    }

    fn name(&self) -> &str {
        VENUE_NAME
    }
}
