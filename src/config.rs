//! Application configuration
//!
//! Layered loading: optional TOML file, then `SWARMTRADE__*` environment
//! overrides. Every section carries serde defaults so a bare config
//! boots the dry-run stack.

use crate::agents::ScoutConfig as ScoutAgentConfig;
use crate::agents::TraderConfig as TraderAgentConfig;
use crate::alerts::{AlertThresholds, NotifierConfig};
use config::{Config, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub environment: String,
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    pub swarm: SwarmSettings,
    pub scout: ScoutSettings,
    pub trader: TraderSettings,
    pub risk: RiskSettings,
    pub approval: ApprovalSettings,
    pub alerts: AlertsSettings,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: "dev".to_string(),
            database: DatabaseConfig::default(),
            broker: BrokerConfig::default(),
            swarm: SwarmSettings::default(),
            scout: ScoutSettings::default(),
            trader: TraderSettings::default(),
            risk: RiskSettings::default(),
            approval: ApprovalSettings::default(),
            alerts: AlertsSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Only the paper broker ships in-process; real adapters plug in at
    /// the edge.
    pub provider: String,
    pub asset_class: String,
    pub starting_cash: Decimal,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            provider: "paper".to_string(),
            asset_class: "us_equity".to_string(),
            starting_cash: dec!(100000),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SwarmSettings {
    pub heartbeat_secs: u64,
    pub dispatch_interval_secs: u64,
    pub dispatch_limit: usize,
}

impl Default for SwarmSettings {
    fn default() -> Self {
        Self {
            heartbeat_secs: 60,
            dispatch_interval_secs: 60,
            dispatch_limit: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoutSettings {
    pub refresh_interval_secs: u64,
    pub enabled_sources: Vec<String>,
    pub watchlist: Vec<String>,
}

impl Default for ScoutSettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 300,
            enabled_sources: Vec::new(),
            watchlist: Vec::new(),
        }
    }
}

impl ScoutSettings {
    pub fn to_agent_config(&self) -> ScoutAgentConfig {
        ScoutAgentConfig {
            refresh_interval_ms: (self.refresh_interval_secs as i64) * 1000,
            enabled_sources: self.enabled_sources.clone(),
            watchlist: self.watchlist.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TraderSettings {
    pub position_pct: Decimal,
    pub max_notional: Decimal,
}

impl Default for TraderSettings {
    fn default() -> Self {
        Self {
            position_pct: dec!(0.10),
            max_notional: dec!(5000),
        }
    }
}

impl TraderSettings {
    pub fn to_agent_config(&self) -> TraderAgentConfig {
        TraderAgentConfig {
            position_pct: self.position_pct,
            max_notional: self.max_notional,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    pub cooldown_minutes: i64,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            cooldown_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApprovalSettings {
    pub secret: String,
    pub ttl_s: u64,
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            secret: String::new(),
            ttl_s: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertsSettings {
    pub discord_webhook_url: Option<String>,
    pub webhook_url: Option<String>,
    pub dedupe_window_s: u64,
    pub rate_limit_window_s: u64,
    pub max_per_window: u32,
    pub drawdown_warn_ratio: f64,
    pub dlq_warn_threshold: u64,
    pub dlq_critical_threshold: u64,
    pub llm_auth_window_ms: i64,
}

impl Default for AlertsSettings {
    fn default() -> Self {
        let thresholds = AlertThresholds::default();
        let notifier = NotifierConfig::default();
        Self {
            discord_webhook_url: None,
            webhook_url: None,
            dedupe_window_s: notifier.dedupe_window_s,
            rate_limit_window_s: notifier.rate_limit_window_s,
            max_per_window: notifier.max_per_window,
            drawdown_warn_ratio: thresholds.drawdown_warn_ratio,
            dlq_warn_threshold: thresholds.dlq_warn_threshold,
            dlq_critical_threshold: thresholds.dlq_critical_threshold,
            llm_auth_window_ms: thresholds.llm_auth_window_ms,
        }
    }
}

impl AlertsSettings {
    pub fn notifier_config(&self) -> NotifierConfig {
        NotifierConfig {
            dedupe_window_s: self.dedupe_window_s,
            rate_limit_window_s: self.rate_limit_window_s,
            max_per_window: self.max_per_window,
        }
    }

    pub fn thresholds(&self) -> AlertThresholds {
        AlertThresholds {
            drawdown_warn_ratio: self.drawdown_warn_ratio,
            dlq_warn_threshold: self.dlq_warn_threshold,
            dlq_critical_threshold: self.dlq_critical_threshold,
            llm_auth_window_ms: self.llm_auth_window_ms,
        }
        .clamped()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from an optional TOML file plus `SWARMTRADE__*` env vars.
    pub fn load(path: Option<&Path>) -> crate::error::Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        } else {
            builder = builder.add_source(File::with_name("swarmtrade").required(false));
        }
        let settings = builder
            .add_source(Environment::with_prefix("SWARMTRADE").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Config invariants. Returns list of problems (empty = valid).
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.trader.position_pct <= Decimal::ZERO || self.trader.position_pct > Decimal::ONE {
            errors.push(format!(
                "trader.position_pct must be in (0, 1], got {}",
                self.trader.position_pct
            ));
        }
        if self.trader.max_notional <= Decimal::ZERO {
            errors.push("trader.max_notional must be > 0".to_string());
        }
        if self.broker.starting_cash <= Decimal::ZERO {
            errors.push("broker.starting_cash must be > 0".to_string());
        }
        if self.risk.cooldown_minutes < 0 {
            errors.push("risk.cooldown_minutes must be >= 0".to_string());
        }
        if !["us_equity", "crypto"].contains(&self.broker.asset_class.as_str()) {
            errors.push(format!(
                "broker.asset_class must be us_equity or crypto, got \"{}\"",
                self.broker.asset_class
            ));
        }
        if self.approval.secret.is_empty() {
            errors.push("approval.secret must be set".to_string());
        }
        errors
    }
}
