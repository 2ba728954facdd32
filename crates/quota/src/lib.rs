//! Request quotas and credit accounting for Conclave.
//!
//! The rate limiter and credit ledger hold no counters of their own; every
//! decision is made by an atomic operation on the shared store, so limits
//! hold across any number of orchestrator processes.

pub mod billing;
pub mod client;
pub mod ledger;
pub mod limiter;

pub use billing::{BillingFormula, Workload};
pub use client::client_identifier;
pub use ledger::{Charge, CreditLedger};
pub use limiter::RateLimiter;
