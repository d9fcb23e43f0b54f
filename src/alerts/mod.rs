//! Alert rule engine and notifier
//!
//! Rule evaluation is a pure function over observed state; the notifier
//! owns dedupe, per-channel rate limiting and fan-out. The two halves
//! meet only at `AlertEvent`.

pub mod notifier;
pub mod rules;
pub mod types;

pub use notifier::{
    AlertChannel, AlertDispatchSummary, AlertNotifier, ConsoleChannel, DiscordChannel,
    NotifierConfig, WebhookChannel,
};
pub use rules::{evaluate_alert_rules, AlertRuleInput, SwarmHealth};
pub use types::{normalize_slug, AlertEvent, AlertRule, AlertSeverity, AlertThresholds};
