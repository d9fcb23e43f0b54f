//! Order execution pipeline

pub mod pipeline;

pub use pipeline::{execute_order, sanitize_error, ExecutionDeps};
