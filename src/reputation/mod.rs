//! Reputation ledger
//!
//! Per-(community, user) counters accumulated from completed loans. Applied
//! inside the return-confirmation transaction; the loan status precondition
//! guarantees it never runs twice for the same loan.

mod model;
mod service;

pub use model::{weights, ReputationProfile};
pub use service::{apply_return, ReputationService};
