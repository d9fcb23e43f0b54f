//! Relational persistence
//!
//! SQL is the source of truth for approvals, submissions, trades, risk
//! state and alert rows. Every cross-agent invariant is enforced with a
//! conditional write; the stores expose `bool` results that surface
//! `rows_affected() > 0`.

pub mod activity;
pub mod alerts_store;
pub mod approvals;
pub mod gateway;
pub mod policy_store;
pub mod raw_events;
pub mod risk_state;
pub mod submissions;
pub mod trades;

pub use activity::{ActivityLog, TraceWriter};
pub use alerts_store::AlertStore;
pub use approvals::{ApprovalRow, ApprovalState, ApprovalStore};
pub use gateway::SqlGateway;
pub use policy_store::PolicyStore;
pub use raw_events::RawEventStore;
pub use risk_state::{RiskState, RiskStateStore};
pub use submissions::{SubmissionRow, SubmissionState, SubmissionStore};
pub use trades::{TradeRow, TradeStore};

use rust_decimal::Decimal;
use std::str::FromStr;

/// Money columns are stored as TEXT; SQLite has no decimal affinity.
pub(crate) fn decimal_to_text(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.to_string())
}

pub(crate) fn decimal_from_text(value: Option<String>) -> Option<Decimal> {
    value.and_then(|s| Decimal::from_str(&s).ok())
}
