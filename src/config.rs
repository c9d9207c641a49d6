//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Venue secrets are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use chrono::{FixedOffset, NaiveTime};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::time::Duration;
use tracing::warn;

use crate::engine::scheduler::SchedulerSettings;
use crate::types::{Credentials, Pool, PoolId, VenueKind};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    #[serde(default = "default_name")]
    pub name: String,
    /// SQLite file; its directory is created on start.
    pub db_path: String,
    /// JSON log lines instead of the human format. `NAVPOOL_LOG_JSON`
    /// in the environment forces it on.
    #[serde(default)]
    pub log_json: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Local time of the daily run, `HH:MM:SS`.
    #[serde(default = "default_daily_at")]
    pub daily_at: String,
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
    /// Run one cycle immediately at start-up.
    #[serde(default)]
    pub run_on_startup: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
    pub port: u16,
}

/// One custodial account seeded at start-up.
#[derive(Debug, Deserialize, Clone)]
pub struct PoolConfig {
    pub id: PoolId,
    pub name: String,
    pub kind: VenueKind,
    pub api_key_env: Option<String>,
    pub api_secret_env: Option<String>,
    pub passphrase_env: Option<String>,
    pub explorer_api_key_env: Option<String>,
    pub wallet_address: Option<String>,
}

fn default_name() -> String {
    "navpool".to_string()
}

fn default_daily_at() -> String {
    "08:00:00".to_string()
}

fn default_utc_offset_hours() -> i32 {
    8
}

fn default_provider_timeout_secs() -> u64 {
    30
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            daily_at: default_daily_at(),
            utc_offset_hours: default_utc_offset_hours(),
            provider_timeout_secs: default_provider_timeout_secs(),
            run_on_startup: false,
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
            port: 8080,
        }
    }
}

impl SchedulerConfig {
    pub fn settings(&self) -> Result<SchedulerSettings> {
        let daily_at = NaiveTime::parse_from_str(&self.daily_at, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(&self.daily_at, "%H:%M"))
            .with_context(|| format!("Invalid scheduler.daily_at: {}", self.daily_at))?;
        let utc_offset = FixedOffset::east_opt(self.utc_offset_hours * 3600).with_context(|| {
            format!("Invalid scheduler.utc_offset_hours: {}", self.utc_offset_hours)
        })?;
        if self.provider_timeout_secs == 0 {
            anyhow::bail!("scheduler.provider_timeout_secs must be positive");
        }
        Ok(SchedulerSettings {
            daily_at,
            utc_offset,
            provider_timeout: Duration::from_secs(self.provider_timeout_secs),
        })
    }
}

impl PoolConfig {
    /// Resolve credentials through `lookup` (env-var name → value).
    /// Unset variables leave the field empty.
    pub fn credentials_with<F>(&self, lookup: F) -> Credentials
    where
        F: Fn(&str) -> Option<String>,
    {
        let resolve = |env: &Option<String>| -> Option<String> {
            let name = env.as_deref()?;
            let value = lookup(name).filter(|v| !v.trim().is_empty());
            if value.is_none() {
                warn!(pool = %self.name, env = name, "Credential env var not set");
            }
            value
        };

        Credentials {
            api_key: resolve(&self.api_key_env),
            api_secret: resolve(&self.api_secret_env).map(SecretString::new),
            passphrase: resolve(&self.passphrase_env).map(SecretString::new),
            explorer_api_key: resolve(&self.explorer_api_key_env).map(SecretString::new),
            wallet_address: self
                .wallet_address
                .clone()
                .filter(|w| !w.trim().is_empty()),
        }
    }

    /// Bootstrap pool with credentials from the process environment.
    pub fn to_pool(&self) -> Pool {
        let mut pool = Pool::new(self.id, &self.name, self.kind);
        pool.credentials = self.credentials_with(|name| std::env::var(name).ok());
        pool
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.scheduler.settings()?;
        let mut seen = HashSet::new();
        for pool in &self.pools {
            if !seen.insert(pool.id) {
                anyhow::bail!("Duplicate pool id in config: {}", pool.id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    const SAMPLE: &str = r#"
        [service]
        db_path = "data/navpool.db"

        [scheduler]
        daily_at = "08:00:00"
        utc_offset_hours = 8
        run_on_startup = true

        [dashboard]
        enabled = true
        port = 8088

        [[pools]]
        id = 1
        name = "Binance"
        kind = "exchange_derivative_aggregate"
        api_key_env = "BINANCE_API_KEY"
        api_secret_env = "BINANCE_API_SECRET"

        [[pools]]
        id = 3
        name = "Wallet"
        kind = "on_chain_wallet"
        wallet_address = "0xabc"
        explorer_api_key_env = "ETHERSCAN_API_KEY"
    "#;

    #[test]
    fn test_parse_sample() {
        let cfg = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(cfg.service.name, "navpool");
        assert!(!cfg.service.log_json);
        assert_eq!(cfg.dashboard.bind, "127.0.0.1");
        assert_eq!(cfg.dashboard.port, 8088);
        assert!(cfg.scheduler.run_on_startup);
        assert_eq!(cfg.scheduler.provider_timeout_secs, 30);
        assert_eq!(cfg.pools.len(), 2);
        assert_eq!(cfg.pools[1].kind, VenueKind::OnChainWallet);

        let settings = cfg.scheduler.settings().unwrap();
        assert_eq!(settings.daily_at, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert_eq!(settings.utc_offset.local_minus_utc(), 8 * 3600);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = AppConfig::from_toml("[service]\ndb_path = \":memory:\"\nlog_json = true\n").unwrap();
        assert!(cfg.service.log_json);
        assert!(cfg.pools.is_empty());
        assert!(cfg.dashboard.enabled);
        assert_eq!(cfg.scheduler.utc_offset_hours, 8);
    }

    #[test]
    fn test_rejects_bad_time_and_duplicate_ids() {
        let bad_time = "[service]\ndb_path = \"x\"\n[scheduler]\ndaily_at = \"25:00\"\n";
        assert!(AppConfig::from_toml(bad_time).is_err());

        let dup = r#"
            [service]
            db_path = "x"
            [[pools]]
            id = 1
            name = "A"
            kind = "exchange_spot"
            [[pools]]
            id = 1
            name = "B"
            kind = "on_chain_wallet"
        "#;
        assert!(AppConfig::from_toml(dup).is_err());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let cfg = "[service]\ndb_path = \"x\"\n[[pools]]\nid = 1\nname = \"A\"\nkind = \"bank\"\n";
        assert!(AppConfig::from_toml(cfg).is_err());
    }

    #[test]
    fn test_credentials_resolution() {
        let cfg = AppConfig::from_toml(SAMPLE).unwrap();
        let binance = &cfg.pools[0];
        let creds = binance.credentials_with(|name| match name {
            "BINANCE_API_KEY" => Some("key-1234567890".into()),
            "BINANCE_API_SECRET" => Some("secret".into()),
            _ => None,
        });
        assert!(creds.is_configured(VenueKind::ExchangeDerivativeAggregate));
        assert_eq!(creds.api_secret.unwrap().expose_secret(), "secret");

        let unset = binance.credentials_with(|_| None);
        assert!(!unset.is_configured(VenueKind::ExchangeDerivativeAggregate));

        let wallet = cfg.pools[1].credentials_with(|_| None);
        assert!(wallet.is_configured(VenueKind::OnChainWallet));
        assert!(wallet.explorer_api_key.is_none());
    }
}
