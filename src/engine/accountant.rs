//! Accountant: pooled NAV arithmetic.
//!
//! Pure functions behind the ledger: share pricing at deposit time,
//! day-over-day pool balance changes, per-deposit profit and the
//! linear annualisation used by depositor summaries. Nothing here
//! touches storage, so every result is a function of its inputs.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::types::{LedgerError, LedgerResult};

const HUNDRED: Decimal = dec!(100);

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Shares bought by a deposit and the NAV they were priced at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShareIssue {
    pub shares: Decimal,
    pub nav: Decimal,
}

/// Day-over-day movement of a pool balance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceChange {
    pub prior: Decimal,
    pub change: Decimal,
    /// Percent of the prior balance.
    pub change_rate: Decimal,
}

/// Valuation of one deposit against its pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfitValuation {
    pub nav: Decimal,
    pub current_value: Decimal,
    pub profit: Decimal,
    /// Percent of principal.
    pub profit_rate: Decimal,
}

/// Linear scale-ups of an average daily rate (all in percent).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct AnnualizedRates {
    pub daily: Decimal,
    pub monthly: Decimal,
    pub quarterly: Decimal,
    pub annual: Decimal,
}

// ---------------------------------------------------------------------------
// Accountant
// ---------------------------------------------------------------------------

pub struct Accountant;

impl Accountant {
    /// Price a new deposit in pool shares.
    ///
    /// An empty pool (no shares, or a zero balance) issues at NAV 1.0.
    /// Otherwise the deposit buys in at `balance / total_shares`, so
    /// earlier depositors keep their accrued gains and losses.
    pub fn issue_shares(
        current_balance: Decimal,
        total_shares: Decimal,
        principal: Decimal,
    ) -> LedgerResult<ShareIssue> {
        if principal <= Decimal::ZERO {
            return Err(LedgerError::InvalidArgument(format!(
                "principal must be positive, got {principal}"
            )));
        }
        if total_shares < Decimal::ZERO || current_balance < Decimal::ZERO {
            return Err(LedgerError::DataAnomaly(format!(
                "pool state is negative (balance={current_balance}, shares={total_shares})"
            )));
        }

        if total_shares.is_zero() || current_balance.is_zero() {
            return Ok(ShareIssue {
                shares: principal,
                nav: Decimal::ONE,
            });
        }

        let nav = current_balance / total_shares;
        Ok(ShareIssue {
            shares: principal / nav,
            nav,
        })
    }

    /// Change of `observed` against the prior snapshot. With no prior
    /// snapshot the change is zero.
    pub fn balance_change(prior: Option<Decimal>, observed: Decimal) -> BalanceChange {
        let prior = prior.unwrap_or(observed);
        let change = observed - prior;
        let change_rate = if prior > Decimal::ZERO {
            change / prior * HUNDRED
        } else {
            Decimal::ZERO
        };
        BalanceChange {
            prior,
            change,
            change_rate,
        }
    }

    /// Value a deposit at the pool's current NAV.
    ///
    /// Returns `DataAnomaly` when the pool has no shares or the deposit
    /// holds none; such a deposit cannot be valued and is skipped.
    pub fn deposit_profit(
        shares_issued: Decimal,
        principal: Decimal,
        pool_balance: Decimal,
        total_shares: Decimal,
    ) -> LedgerResult<ProfitValuation> {
        if total_shares <= Decimal::ZERO {
            return Err(LedgerError::DataAnomaly(format!(
                "pool total shares is {total_shares}"
            )));
        }
        if shares_issued <= Decimal::ZERO {
            return Err(LedgerError::DataAnomaly(format!(
                "deposit holds {shares_issued} shares"
            )));
        }

        let nav = pool_balance / total_shares;
        let current_value = shares_issued * nav;
        let profit = current_value - principal;
        let profit_rate = if principal > Decimal::ZERO {
            profit / principal * HUNDRED
        } else {
            Decimal::ZERO
        };

        Ok(ProfitValuation {
            nav,
            current_value,
            profit,
            profit_rate,
        })
    }

    /// Whole days a deposit has been held, at least one.
    pub fn hold_days(created_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
        (now - created_at).num_days().max(1)
    }

    /// Scale a cumulative profit rate to monthly/quarterly/annual figures.
    ///
    /// Linear, not compounding: `daily = rate / avg_hold_days`, then
    /// ×30, ×90, ×365.
    // TODO: switch to compounding once depositor reports stop needing
    // parity with the historical linear figures.
    pub fn annualize(total_profit_rate: Decimal, avg_hold_days: i64) -> AnnualizedRates {
        if avg_hold_days <= 0 || total_profit_rate.is_zero() {
            return AnnualizedRates::default();
        }
        let daily = total_profit_rate / Decimal::from(avg_hold_days);
        AnnualizedRates {
            daily,
            monthly: daily * dec!(30),
            quarterly: daily * dec!(90),
            annual: daily * dec!(365),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
