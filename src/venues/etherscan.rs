//! On-chain wallet balance via the Etherscan `tokenbalance` endpoint.
//!
//! Reads USDC and USDT (both 6 decimals) on Ethereum mainnet. Each token
//! is an independent read; one failing token still yields the other.
//! The explorer key is optional; without it Etherscan applies its
//! anonymous rate limit.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, info};

use super::{http_client, require, BalanceProvider, BalanceReport};
use crate::types::{Pool, VenueKind};

const BASE_URL: &str = "https://api.etherscan.io/api";
const VENUE_NAME: &str = "etherscan";

/// ERC-20 contracts read for a wallet: (symbol, contract, decimals).
const TOKENS: [(&str, &str, u32); 2] = [
    ("USDC", "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", 6),
    ("USDT", "0xdAC17F958D2ee523a2206206994597C13D831ec7", 6),
];

#[derive(Debug, Deserialize)]
struct TokenBalanceResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: String,
}

/// Convert a raw integer token amount into units.
fn token_units(raw: &str, decimals: u32) -> Result<Decimal> {
    let raw = raw.trim();
    let base: i128 = raw
        .parse()
        .with_context(|| format!("invalid token amount {raw:?}"))?;
    Decimal::try_from_i128_with_scale(base, decimals)
        .with_context(|| format!("token amount out of range: {raw}"))
}

fn parse_token_balance(resp: &TokenBalanceResponse, decimals: u32) -> Result<Decimal> {
    if resp.status != "1" {
        anyhow::bail!("Etherscan API error: {} - {}", resp.message, resp.result);
    }
    token_units(&resp.result, decimals)
}

pub struct EtherscanClient {
    http: Client,
    base_url: String,
}

impl EtherscanClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        Ok(Self {
            http: http_client(VENUE_NAME)?,
            base_url: base_url.to_string(),
        })
    }

    async fn token_balance(
        &self,
        wallet: &str,
        contract: &str,
        decimals: u32,
        api_key: Option<&str>,
    ) -> Result<Decimal> {
        let mut url = format!(
            "{}?module=account&action=tokenbalance&contractaddress={}&address={}&tag=latest",
            self.base_url,
            urlencoding::encode(contract),
            urlencoding::encode(wallet),
        );
        debug!(url = %url, "Fetching ERC-20 balance");
        if let Some(key) = api_key {
            url.push_str(&format!("&apikey={}", urlencoding::encode(key)));
        }

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("Etherscan request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Etherscan HTTP error {status}: {body}");
        }

        let parsed: TokenBalanceResponse = resp
            .json()
            .await
            .context("Failed to parse Etherscan response")?;
        parse_token_balance(&parsed, decimals)
    }
}

#[async_trait]
impl BalanceProvider for EtherscanClient {
    async fn get_balance(&self, pool: &Pool) -> Result<BalanceReport> {
        let creds = &pool.credentials;
        let wallet = require(creds.wallet_address.as_deref(), "wallet address")?;
        let api_key = creds
            .explorer_api_key
            .as_ref()
            .map(|k| k.expose_secret().as_str())
            .filter(|k| !k.trim().is_empty());

        let [(usdc_sym, usdc_contract, usdc_dec), (usdt_sym, usdt_contract, usdt_dec)] = TOKENS;
        let (usdc, usdt) = tokio::join!(
            self.token_balance(wallet, usdc_contract, usdc_dec, api_key),
            self.token_balance(wallet, usdt_contract, usdt_dec, api_key),
        );

        let report = BalanceReport::from_legs(VENUE_NAME, vec![(usdc_sym, usdc), (usdt_sym, usdt)])?;

        info!(
            pool_id = pool.id,
            wallet = %wallet,
            total = %format!("${:.2}", report.total),
            "On-chain balance read"
        );
        Ok(report)
    }

    fn kind(&self) -> VenueKind {
        VenueKind::OnChainWallet
    }

    fn name(&self) -> &str {
        VENUE_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venues::test_server;
    use axum::{extract::Query, routing::get, Json, Router};
    use rust_decimal_macros::dec;
    use secrecy::SecretString;
    use serde_json::json;
    use std::collections::HashMap;

    const WALLET: &str = "0x1111111111111111111111111111111111111111";
    const EXPLORER_KEY: &str = "explorer-key";

    fn wallet_pool() -> Pool {
        let mut pool = Pool::new(3, "Wallet", VenueKind::OnChainWallet);
        pool.credentials.wallet_address = Some(WALLET.into());
        pool.credentials.explorer_api_key = Some(SecretString::new(EXPLORER_KEY.into()));
        pool
    }

    /// Explorer that knows the wallet's USDC balance and fails every other token.
    async fn explorer(usdc_raw: &'static str) -> String {
        let usdc_contract = TOKENS[0].1;
        let router = Router::new().route(
            "/api",
            get(move |Query(q): Query<HashMap<String, String>>| async move {
                let param = |k: &str| q.get(k).map(String::as_str);
                let well_formed = param("module") == Some("account")
                    && param("action") == Some("tokenbalance")
                    && param("address") == Some(WALLET)
                    && param("tag") == Some("latest")
                    && param("apikey") == Some(EXPLORER_KEY);
                if well_formed && param("contractaddress") == Some(usdc_contract) {
                    Json(json!({"status": "1", "message": "OK", "result": usdc_raw}))
                } else {
                    Json(json!({"status": "0", "message": "NOTOK", "result": "Max rate limit reached"}))
                }
            }),
        );
        format!("{}/api", test_server::serve(router).await)
    }

    #[test]
    fn test_token_units_exact() {
        assert_eq!(token_units("1234567890", 6).unwrap(), dec!(1234.567890));
        assert_eq!(token_units("0", 6).unwrap(), Decimal::ZERO);
        assert_eq!(token_units("1", 6).unwrap(), dec!(0.000001));
    }

    #[test]
    fn test_token_units_rejects_non_integer() {
        assert!(token_units("12.5", 6).is_err());
        assert!(token_units("", 6).is_err());
    }

    #[test]
    fn test_status_zero_is_error() {
        let resp: TokenBalanceResponse = serde_json::from_str(
            r#"{"status": "0", "message": "NOTOK", "result": "Invalid API Key"}"#,
        )
        .unwrap();
        let err = parse_token_balance(&resp, 6).unwrap_err();
        assert!(err.to_string().contains("Invalid API Key"));
    }

    #[test]
    fn test_status_one_parses_result() {
        let resp: TokenBalanceResponse =
            serde_json::from_str(r#"{"status": "1", "message": "OK", "result": "500000000"}"#)
                .unwrap();
        assert_eq!(parse_token_balance(&resp, 6).unwrap(), dec!(500));
    }

    #[tokio::test]
    async fn test_wallet_address_required() {
        let client = EtherscanClient::new().unwrap();
        let pool = Pool::new(3, "Wallet", VenueKind::OnChainWallet);
        assert!(client.get_balance(&pool).await.is_err());
    }

    #[tokio::test]
    async fn test_one_failing_token_keeps_the_other() {
        let base = explorer("1234567").await;
        let client = EtherscanClient::with_base_url(&base).unwrap();
        let report = client.get_balance(&wallet_pool()).await.unwrap();

        assert_eq!(report.total, dec!(1.234567));
        assert_eq!(report.legs.len(), 1);
        assert_eq!(report.legs[0].name, "USDC");
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].starts_with("USDT"));
        assert!(report.warnings[0].contains("Max rate limit reached"));
    }

    #[tokio::test]
    async fn test_missing_explorer_key_fails_both_tokens() {
        let base = explorer("1234567").await;
        let mut pool = wallet_pool();
        pool.credentials.explorer_api_key = None;

        let client = EtherscanClient::with_base_url(&base).unwrap();
        let err = client.get_balance(&pool).await.unwrap_err();
        assert!(err.to_string().contains("all etherscan balance reads failed"));
    }
}
