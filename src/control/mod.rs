//! Time-based control loops

pub mod cron;

pub use cron::{Cadence, ControlLoops, HourlyReport, LlmHealthProbe};
