//! SQLite `Store` backed by sqlx.
//!
//! Money is stored as exact decimal text, dates as `YYYY-MM-DD` and
//! timestamps as RFC 3339. The schema is created on open.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

use super::Store;
use crate::types::{
    Credentials, Deposit, DepositId, DepositProfit, Depositor, DepositorId, LedgerError,
    LedgerResult, NewDeposit, Pool, PoolId, PoolSnapshot, Stablecoin, VenueKind,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS depositors (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT UNIQUE NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS pools (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        api_key TEXT,
        api_secret TEXT,
        passphrase TEXT,
        wallet_address TEXT,
        explorer_api_key TEXT,
        current_balance TEXT NOT NULL DEFAULT '0',
        total_shares TEXT NOT NULL DEFAULT '0',
        is_active INTEGER NOT NULL DEFAULT 1,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS deposits (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        depositor_id INTEGER NOT NULL REFERENCES depositors(id),
        pool_id INTEGER NOT NULL REFERENCES pools(id),
        principal TEXT NOT NULL,
        currency TEXT NOT NULL,
        shares_issued TEXT NOT NULL,
        issuance_balance TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS pool_snapshots (
        pool_id INTEGER NOT NULL REFERENCES pools(id),
        record_date TEXT NOT NULL,
        balance TEXT NOT NULL,
        change TEXT NOT NULL,
        change_rate TEXT NOT NULL,
        UNIQUE(pool_id, record_date)
    )",
    "CREATE TABLE IF NOT EXISTS deposit_profits (
        deposit_id INTEGER NOT NULL REFERENCES deposits(id),
        record_date TEXT NOT NULL,
        pool_balance TEXT NOT NULL,
        profit TEXT NOT NULL,
        profit_rate TEXT NOT NULL,
        UNIQUE(deposit_id, record_date)
    )",
    "CREATE INDEX IF NOT EXISTS idx_deposits_pool ON deposits(pool_id, is_active)",
    "CREATE INDEX IF NOT EXISTS idx_deposits_depositor ON deposits(depositor_id)",
];

const POOL_COLUMNS: &str = "id, name, kind, api_key, api_secret, passphrase, wallet_address, \
     explorer_api_key, current_balance, total_shares, is_active, updated_at";

const DEPOSIT_COLUMNS: &str = "id, depositor_id, pool_id, principal, currency, shares_issued, \
     issuance_balance, is_active, created_at";

// ---------------------------------------------------------------------------
// Column codecs
// ---------------------------------------------------------------------------

fn parse_decimal(raw: &str, column: &str) -> LedgerResult<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| LedgerError::DataAnomaly(format!("bad decimal in {column}: {raw} ({e})")))
}

fn parse_date(raw: &str) -> LedgerResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| LedgerError::DataAnomaly(format!("bad date {raw}: {e}")))
}

fn parse_timestamp(raw: &str) -> LedgerResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LedgerError::DataAnomaly(format!("bad timestamp {raw}: {e}")))
}

fn date_text(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn secret_text(secret: &Option<SecretString>) -> Option<String> {
    secret.as_ref().map(|s| s.expose_secret().clone())
}

fn row_decimal(row: &SqliteRow, column: &str) -> LedgerResult<Decimal> {
    let raw: String = row.try_get(column)?;
    parse_decimal(&raw, column)
}

fn pool_from_row(row: &SqliteRow) -> LedgerResult<Pool> {
    let kind: String = row.try_get("kind")?;
    let updated_at: String = row.try_get("updated_at")?;
    let api_secret: Option<String> = row.try_get("api_secret")?;
    let passphrase: Option<String> = row.try_get("passphrase")?;
    let explorer_api_key: Option<String> = row.try_get("explorer_api_key")?;

    Ok(Pool {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        kind: kind.parse::<VenueKind>()?,
        credentials: Credentials {
            api_key: row.try_get("api_key")?,
            api_secret: api_secret.map(SecretString::new),
            passphrase: passphrase.map(SecretString::new),
            wallet_address: row.try_get("wallet_address")?,
            explorer_api_key: explorer_api_key.map(SecretString::new),
        },
        current_balance: row_decimal(row, "current_balance")?,
        total_shares: row_decimal(row, "total_shares")?,
        is_active: row.try_get("is_active")?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn deposit_from_row(row: &SqliteRow) -> LedgerResult<Deposit> {
    let currency: String = row.try_get("currency")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(Deposit {
        id: row.try_get("id")?,
        depositor_id: row.try_get("depositor_id")?,
        pool_id: row.try_get("pool_id")?,
        principal: row_decimal(row, "principal")?,
        currency: currency.parse::<Stablecoin>()?,
        shares_issued: row_decimal(row, "shares_issued")?,
        issuance_balance: row_decimal(row, "issuance_balance")?,
        is_active: row.try_get("is_active")?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn depositor_from_row(row: &SqliteRow) -> LedgerResult<Depositor> {
    let created_at: String = row.try_get("created_at")?;
    Ok(Depositor {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        is_active: row.try_get("is_active")?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn pool_snapshot_from_row(row: &SqliteRow) -> LedgerResult<PoolSnapshot> {
    let record_date: String = row.try_get("record_date")?;
    Ok(PoolSnapshot {
        pool_id: row.try_get("pool_id")?,
        record_date: parse_date(&record_date)?,
        balance: row_decimal(row, "balance")?,
        change: row_decimal(row, "change")?,
        change_rate: row_decimal(row, "change_rate")?,
    })
}

fn deposit_profit_from_row(row: &SqliteRow) -> LedgerResult<DepositProfit> {
    let record_date: String = row.try_get("record_date")?;
    Ok(DepositProfit {
        deposit_id: row.try_get("deposit_id")?,
        record_date: parse_date(&record_date)?,
        pool_balance: row_decimal(row, "pool_balance")?,
        profit: row_decimal(row, "profit")?,
        profit_rate: row_decimal(row, "profit_rate")?,
    })
}

fn require_affected(rows: u64, what: &str, id: i64) -> LedgerResult<()> {
    if rows == 0 {
        Err(LedgerError::NotFound(format!("{what} {id}")))
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct SqliteStore {
    db: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and apply the
    /// schema. `":memory:"` opens a private in-memory database.
    pub async fn open(path: &str) -> LedgerResult<Self> {
        let in_memory = path == ":memory:";
        let options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new().filename(path).create_if_missing(true)
        }
        .foreign_keys(true);

        // An in-memory database lives only as long as its connection.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let db = pool_options.connect_with(options).await?;
        let store = Self { db };
        store.migrate().await?;
        info!(path, "SQLite store ready");
        Ok(store)
    }

    async fn migrate(&self) -> LedgerResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.db).await?;
        }
        debug!(tables = SCHEMA.len(), "Schema applied");
        Ok(())
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_depositor(
        &self,
        name: &str,
        created_at: DateTime<Utc>,
    ) -> LedgerResult<Depositor> {
        let exists = sqlx::query("SELECT id FROM depositors WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.db)
            .await?;
        if exists.is_some() {
            return Err(LedgerError::InvalidArgument(format!(
                "depositor already exists: {name}"
            )));
        }

        let id = sqlx::query("INSERT INTO depositors (name, is_active, created_at) VALUES (?, 1, ?)")
            .bind(name)
            .bind(created_at.to_rfc3339())
            .execute(&self.db)
            .await?
            .last_insert_rowid();

        Ok(Depositor {
            id,
            name: name.to_string(),
            is_active: true,
            created_at,
        })
    }

    async fn get_depositor(&self, id: DepositorId) -> LedgerResult<Option<Depositor>> {
        sqlx::query("SELECT id, name, is_active, created_at FROM depositors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .as_ref()
            .map(depositor_from_row)
            .transpose()
    }

    async fn list_depositors(&self) -> LedgerResult<Vec<Depositor>> {
        sqlx::query(
            "SELECT id, name, is_active, created_at FROM depositors \
             ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.db)
        .await?
        .iter()
        .map(depositor_from_row)
        .collect()
    }

    async fn set_depositor_active(&self, id: DepositorId, active: bool) -> LedgerResult<()> {
        let result = sqlx::query("UPDATE depositors SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(&self.db)
            .await?;
        require_affected(result.rows_affected(), "depositor", id)
    }

    async fn ensure_pool(&self, pool: &Pool) -> LedgerResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO pools (id, name, kind, current_balance, total_shares, is_active, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(pool.id)
        .bind(&pool.name)
        .bind(pool.kind.as_str())
        .bind(pool.current_balance.to_string())
        .bind(pool.total_shares.to_string())
        .bind(pool.is_active)
        .bind(pool.updated_at.to_rfc3339())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn load_pool(&self, id: PoolId) -> LedgerResult<Option<Pool>> {
        sqlx::query(&format!("SELECT {POOL_COLUMNS} FROM pools WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .as_ref()
            .map(pool_from_row)
            .transpose()
    }

    async fn list_pools(&self) -> LedgerResult<Vec<Pool>> {
        sqlx::query(&format!("SELECT {POOL_COLUMNS} FROM pools ORDER BY id"))
            .fetch_all(&self.db)
            .await?
            .iter()
            .map(pool_from_row)
            .collect()
    }

    async fn save_pool(&self, pool: &Pool) -> LedgerResult<()> {
        let creds = &pool.credentials;
        let result = sqlx::query(
            "UPDATE pools SET name = ?, kind = ?, api_key = ?, api_secret = ?, passphrase = ?, \
             wallet_address = ?, explorer_api_key = ?, current_balance = ?, total_shares = ?, \
             is_active = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&pool.name)
        .bind(pool.kind.as_str())
        .bind(&creds.api_key)
        .bind(secret_text(&creds.api_secret))
        .bind(secret_text(&creds.passphrase))
        .bind(&creds.wallet_address)
        .bind(secret_text(&creds.explorer_api_key))
        .bind(pool.current_balance.to_string())
        .bind(pool.total_shares.to_string())
        .bind(pool.is_active)
        .bind(Utc::now().to_rfc3339())
        .bind(pool.id)
        .execute(&self.db)
        .await?;
        require_affected(result.rows_affected(), "pool", pool.id)
    }

    async fn update_pool_balance(&self, id: PoolId, balance: Decimal) -> LedgerResult<()> {
        let result = sqlx::query("UPDATE pools SET current_balance = ?, updated_at = ? WHERE id = ?")
            .bind(balance.to_string())
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.db)
            .await?;
        require_affected(result.rows_affected(), "pool", id)
    }

    async fn update_pool_shares(&self, id: PoolId, total_shares: Decimal) -> LedgerResult<()> {
        let result = sqlx::query("UPDATE pools SET total_shares = ?, updated_at = ? WHERE id = ?")
            .bind(total_shares.to_string())
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.db)
            .await?;
        require_affected(result.rows_affected(), "pool", id)
    }

    async fn create_deposit(&self, deposit: NewDeposit) -> LedgerResult<Deposit> {
        let id = sqlx::query(
            "INSERT INTO deposits (depositor_id, pool_id, principal, currency, shares_issued, \
             issuance_balance, is_active, created_at) VALUES (?, ?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(deposit.depositor_id)
        .bind(deposit.pool_id)
        .bind(deposit.principal.to_string())
        .bind(deposit.currency.as_str())
        .bind(deposit.shares_issued.to_string())
        .bind(deposit.issuance_balance.to_string())
        .bind(deposit.created_at.to_rfc3339())
        .execute(&self.db)
        .await?
        .last_insert_rowid();
        Ok(deposit.into_deposit(id))
    }

    async fn get_deposit(&self, id: DepositId) -> LedgerResult<Option<Deposit>> {
        sqlx::query(&format!("SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .as_ref()
            .map(deposit_from_row)
            .transpose()
    }

    async fn list_active_deposits(&self, pool_id: PoolId) -> LedgerResult<Vec<Deposit>> {
        sqlx::query(&format!(
            "SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE pool_id = ? AND is_active = 1 ORDER BY id"
        ))
        .bind(pool_id)
        .fetch_all(&self.db)
        .await?
        .iter()
        .map(deposit_from_row)
        .collect()
    }

    async fn list_deposits_by_depositor(
        &self,
        depositor_id: DepositorId,
    ) -> LedgerResult<Vec<Deposit>> {
        sqlx::query(&format!(
            "SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE depositor_id = ? \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(depositor_id)
        .fetch_all(&self.db)
        .await?
        .iter()
        .map(deposit_from_row)
        .collect()
    }

    async fn set_deposit_active(&self, id: DepositId, active: bool) -> LedgerResult<()> {
        let result = sqlx::query("UPDATE deposits SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(&self.db)
            .await?;
        require_affected(result.rows_affected(), "deposit", id)
    }

    async fn delete_deposit(&self, id: DepositId) -> LedgerResult<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM deposit_profits WHERE deposit_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM deposits WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        require_affected(result.rows_affected(), "deposit", id)?;
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_pool_snapshot(&self, snapshot: &PoolSnapshot) -> LedgerResult<()> {
        sqlx::query(
            "INSERT INTO pool_snapshots (pool_id, record_date, balance, change, change_rate) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(pool_id, record_date) DO UPDATE SET \
             balance = excluded.balance, change = excluded.change, change_rate = excluded.change_rate",
        )
        .bind(snapshot.pool_id)
        .bind(date_text(snapshot.record_date))
        .bind(snapshot.balance.to_string())
        .bind(snapshot.change.to_string())
        .bind(snapshot.change_rate.to_string())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn latest_pool_snapshot(
        &self,
        pool_id: PoolId,
        before: NaiveDate,
    ) -> LedgerResult<Option<PoolSnapshot>> {
        sqlx::query(
            "SELECT pool_id, record_date, balance, change, change_rate FROM pool_snapshots \
             WHERE pool_id = ? AND record_date < ? ORDER BY record_date DESC LIMIT 1",
        )
        .bind(pool_id)
        .bind(date_text(before))
        .fetch_optional(&self.db)
        .await?
        .as_ref()
        .map(pool_snapshot_from_row)
        .transpose()
    }

    async fn pool_snapshot_on(
        &self,
        pool_id: PoolId,
        date: NaiveDate,
    ) -> LedgerResult<Option<PoolSnapshot>> {
        sqlx::query(
            "SELECT pool_id, record_date, balance, change, change_rate FROM pool_snapshots \
             WHERE pool_id = ? AND record_date = ?",
        )
        .bind(pool_id)
        .bind(date_text(date))
        .fetch_optional(&self.db)
        .await?
        .as_ref()
        .map(pool_snapshot_from_row)
        .transpose()
    }

    async fn upsert_deposit_profit(&self, profit: &DepositProfit) -> LedgerResult<()> {
        sqlx::query(
            "INSERT INTO deposit_profits (deposit_id, record_date, pool_balance, profit, profit_rate) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(deposit_id, record_date) DO UPDATE SET \
             pool_balance = excluded.pool_balance, profit = excluded.profit, \
             profit_rate = excluded.profit_rate",
        )
        .bind(profit.deposit_id)
        .bind(date_text(profit.record_date))
        .bind(profit.pool_balance.to_string())
        .bind(profit.profit.to_string())
        .bind(profit.profit_rate.to_string())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn latest_deposit_profit(
        &self,
        deposit_id: DepositId,
    ) -> LedgerResult<Option<DepositProfit>> {
        sqlx::query(
            "SELECT deposit_id, record_date, pool_balance, profit, profit_rate FROM deposit_profits \
             WHERE deposit_id = ? ORDER BY record_date DESC LIMIT 1",
        )
        .bind(deposit_id)
        .fetch_optional(&self.db)
        .await?
        .as_ref()
        .map(deposit_profit_from_row)
        .transpose()
    }

    async fn deposit_profit_history(
        &self,
        deposit_id: DepositId,
    ) -> LedgerResult<Vec<DepositProfit>> {
        sqlx::query(
            "SELECT deposit_id, record_date, pool_balance, profit, profit_rate FROM deposit_profits \
             WHERE deposit_id = ? ORDER BY record_date DESC",
        )
        .bind(deposit_id)
        .fetch_all(&self.db)
        .await?
        .iter()
        .map(deposit_profit_from_row)
        .collect()
    }

    /// Share increment and deposit insert in one transaction.
    async fn commit_issuance(
        &self,
        pool: &Pool,
        new_total_shares: Decimal,
        deposit: NewDeposit,
    ) -> LedgerResult<Deposit> {
        let mut tx = self.db.begin().await?;

        let updated = sqlx::query("UPDATE pools SET total_shares = ?, updated_at = ? WHERE id = ?")
            .bind(new_total_shares.to_string())
            .bind(Utc::now().to_rfc3339())
            .bind(pool.id)
            .execute(&mut *tx)
            .await?;
        require_affected(updated.rows_affected(), "pool", pool.id)?;

        let id = sqlx::query(
            "INSERT INTO deposits (depositor_id, pool_id, principal, currency, shares_issued, \
             issuance_balance, is_active, created_at) VALUES (?, ?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(deposit.depositor_id)
        .bind(deposit.pool_id)
        .bind(deposit.principal.to_string())
        .bind(deposit.currency.as_str())
        .bind(deposit.shares_issued.to_string())
        .bind(deposit.issuance_balance.to_string())
        .bind(deposit.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;
        Ok(deposit.into_deposit(id))
    }

    async fn commit_revaluation(
        &self,
        _previous_balance: Decimal,
        snapshot: &PoolSnapshot,
    ) -> LedgerResult<()> {
        let mut tx = self.db.begin().await?;

        let updated = sqlx::query("UPDATE pools SET current_balance = ?, updated_at = ? WHERE id = ?")
            .bind(snapshot.balance.to_string())
            .bind(Utc::now().to_rfc3339())
            .bind(snapshot.pool_id)
            .execute(&mut *tx)
            .await?;
        require_affected(updated.rows_affected(), "pool", snapshot.pool_id)?;

        sqlx::query(
            "INSERT INTO pool_snapshots (pool_id, record_date, balance, change, change_rate) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(pool_id, record_date) DO UPDATE SET \
             balance = excluded.balance, change = excluded.change, change_rate = excluded.change_rate",
        )
        .bind(snapshot.pool_id)
        .bind(date_text(snapshot.record_date))
        .bind(snapshot.balance.to_string())
        .bind(snapshot.change.to_string())
        .bind(snapshot.change_rate.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
