//! Policy engine
//!
//! A pure evaluator over the order, account, positions, market clock,
//! risk state and configuration. Deterministic: fixed inputs always
//! produce the same ordered violation list.

pub mod engine;
pub mod types;

pub use engine::evaluate;
pub use types::{
    OptionOrderContext, OptionsPolicy, PolicyConfig, PolicyInput, PolicyResult, SymbolStats,
    Violation,
};
