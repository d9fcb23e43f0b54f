//! Alert domain types

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(AlertSeverity::Info),
            "warning" => Some(AlertSeverity::Warning),
            "critical" => Some(AlertSeverity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One alert occurrence. The fingerprint groups equivalent occurrences
/// for dedupe; the id is unique per occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: String,
    pub rule_id: String,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub fingerprint: String,
    pub occurred_at: i64,
    pub details: serde_json::Value,
    #[serde(default)]
    pub acknowledged_at: Option<i64>,
    #[serde(default)]
    pub acknowledged_by: Option<String>,
}

impl AlertEvent {
    pub fn new(
        rule_id: &str,
        severity: AlertSeverity,
        title: &str,
        message: &str,
        fingerprint: &str,
        occurred_at: i64,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: format!("{rule_id}:{occurred_at}:{severity}"),
            rule_id: rule_id.to_string(),
            severity,
            title: title.to_string(),
            message: message.to_string(),
            fingerprint: fingerprint.to_string(),
            occurred_at,
            details,
            acknowledged_at: None,
            acknowledged_by: None,
        }
    }
}

/// Configurable rule row. `id` is a normalized slug.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub title: String,
    pub description: String,
    pub enabled: bool,
    pub default_severity: AlertSeverity,
    pub config: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Lowercase slug of `input`: alphanumerics kept, runs of anything else
/// collapsed to a single `-`, trimmed, truncated to `max_len`.
pub fn normalize_slug(input: &str, max_len: usize) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut last_dash = true;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug.truncate(max_len);
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Rule thresholds, clamped to sane ranges at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// Fraction of the drawdown limit that triggers the warning tier.
    pub drawdown_warn_ratio: f64,
    pub dlq_warn_threshold: u64,
    pub dlq_critical_threshold: u64,
    pub llm_auth_window_ms: i64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            drawdown_warn_ratio: 0.7,
            dlq_warn_threshold: 5,
            dlq_critical_threshold: 25,
            llm_auth_window_ms: 15 * 60 * 1000,
        }
    }
}

impl AlertThresholds {
    /// `warn_ratio` clamps to [0.1, 1]; the auth window has a 60 s floor.
    pub fn clamped(mut self) -> Self {
        self.drawdown_warn_ratio = self.drawdown_warn_ratio.clamp(0.1, 1.0);
        self.llm_auth_window_ms = self.llm_auth_window_ms.max(60_000);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_id_shape() {
        let event = AlertEvent::new(
            "kill_switch_active",
            AlertSeverity::Critical,
            "Kill switch",
            "halted",
            "kill_switch_active:halt",
            1234,
            json!({}),
        );
        assert_eq!(event.id, "kill_switch_active:1234:critical");
    }

    #[test]
    fn test_normalize_slug() {
        assert_eq!(normalize_slug("Manual HALT: risk breach!", 96), "manual-halt-risk-breach");
        assert_eq!(normalize_slug("  --  ", 96), "");
        let long = "x".repeat(200);
        assert_eq!(normalize_slug(&long, 96).len(), 96);
    }

    #[test]
    fn test_thresholds_clamped() {
        let thresholds = AlertThresholds {
            drawdown_warn_ratio: 7.5,
            dlq_warn_threshold: 1,
            dlq_critical_threshold: 2,
            llm_auth_window_ms: 5,
        }
        .clamped();
        assert_eq!(thresholds.drawdown_warn_ratio, 1.0);
        assert_eq!(thresholds.llm_auth_window_ms, 60_000);

        let low = AlertThresholds {
            drawdown_warn_ratio: 0.0,
            ..Default::default()
        }
        .clamped();
        assert_eq!(low.drawdown_warn_ratio, 0.1);
    }
}
