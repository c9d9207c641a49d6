//! Core engine: share issuance, daily revaluation and the projections
//! built on top of them.

pub mod accountant;
pub mod ledger;
pub mod scheduler;
pub mod reports;
