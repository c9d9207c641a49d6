//! Integration tests: the ledger and the revaluation cycle driven end to
//! end against both store implementations.

mod scripted_venue;
mod ledger_flow;
mod revaluation_cycle;
