//! Alert notifier
//!
//! Fans alerts out to the configured channels with KV-backed dedupe and
//! per-channel rate-limit counters. `notify` never errors; delivery
//! problems only count toward `failed`. Counter semantics are
//! asymmetric on purpose: `deduped` is per alert, while `sent`,
//! `rate_limited` and `failed` are per channel attempt.

use super::types::{AlertEvent, AlertSeverity};
use crate::capabilities::KvStore;
use crate::error::{Result, SwarmError};
use crate::util::Clock;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn deliver(&self, alert: &AlertEvent) -> Result<()>;
}

/// Log-only channel, always configured.
pub struct ConsoleChannel;

#[async_trait]
impl AlertChannel for ConsoleChannel {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn deliver(&self, alert: &AlertEvent) -> Result<()> {
        match alert.severity {
            AlertSeverity::Info => info!("[alert:{}] {}: {}", alert.rule_id, alert.title, alert.message),
            AlertSeverity::Warning => warn!("[alert:{}] {}: {}", alert.rule_id, alert.title, alert.message),
            AlertSeverity::Critical => error!("[alert:{}] {}: {}", alert.rule_id, alert.title, alert.message),
        }
        Ok(())
    }
}

/// Discord webhook channel.
pub struct DiscordChannel {
    webhook_url: String,
    client: reqwest::Client,
}

impl DiscordChannel {
    pub fn new(webhook_url: &str) -> Self {
        Self {
            webhook_url: webhook_url.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AlertChannel for DiscordChannel {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn deliver(&self, alert: &AlertEvent) -> Result<()> {
        let content = format!(
            "**[{}] {}**\n{}\n`{}`",
            alert.severity, alert.title, alert.message, alert.fingerprint
        );
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&json!({"content": content}))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SwarmError::Provider(format!(
                "discord webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Generic webhook channel posting the alert as JSON.
pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, alert: &AlertEvent) -> Result<()> {
        let response = self.client.post(&self.url).json(alert).send().await?;
        if !response.status().is_success() {
            return Err(SwarmError::Provider(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub dedupe_window_s: u64,
    pub rate_limit_window_s: u64,
    pub max_per_window: u32,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            dedupe_window_s: 600,
            rate_limit_window_s: 300,
            max_per_window: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AlertDispatchSummary {
    /// Alerts passed in.
    pub attempted: usize,
    /// Channel-level successful sends.
    pub sent: usize,
    /// Alert-level dedupe skips.
    pub deduped: usize,
    /// Channel-level rate-limit skips.
    pub rate_limited: usize,
    /// Channel-level delivery failures.
    pub failed: usize,
}

pub struct AlertNotifier {
    clock: Arc<dyn Clock>,
    kv: Arc<dyn KvStore>,
    channels: Vec<Arc<dyn AlertChannel>>,
    config: NotifierConfig,
}

impl AlertNotifier {
    pub fn new(
        clock: Arc<dyn Clock>,
        kv: Arc<dyn KvStore>,
        channels: Vec<Arc<dyn AlertChannel>>,
        config: NotifierConfig,
    ) -> Self {
        Self {
            clock,
            kv,
            channels,
            config,
        }
    }

    /// Console plus whichever webhook channels have a URL configured.
    pub fn with_default_channels(
        clock: Arc<dyn Clock>,
        kv: Arc<dyn KvStore>,
        config: NotifierConfig,
        discord_webhook_url: Option<&str>,
        webhook_url: Option<&str>,
    ) -> Self {
        let mut channels: Vec<Arc<dyn AlertChannel>> = vec![Arc::new(ConsoleChannel)];
        if let Some(url) = discord_webhook_url.filter(|u| !u.trim().is_empty()) {
            channels.push(Arc::new(DiscordChannel::new(url)));
        }
        if let Some(url) = webhook_url.filter(|u| !u.trim().is_empty()) {
            channels.push(Arc::new(WebhookChannel::new(url)));
        }
        Self::new(clock, kv, channels, config)
    }

    fn rate_limit_key(&self, channel: &str, now_ms: i64) -> String {
        let window = now_ms / (self.config.rate_limit_window_s.max(1) as i64 * 1000);
        format!("ratelimit:{channel}:{window}")
    }

    /// Deliver a batch. Dedupe is marked only after at least one channel
    /// accepted the alert, so a fully-failed send retries next round.
    pub async fn notify(&self, alerts: &[AlertEvent]) -> AlertDispatchSummary {
        let mut summary = AlertDispatchSummary {
            attempted: alerts.len(),
            ..Default::default()
        };

        for alert in alerts {
            let dedupe_key = format!("dedupe:{}", alert.fingerprint);
            if self.kv.get(&dedupe_key).await.is_some() {
                summary.deduped += 1;
                continue;
            }

            let now_ms = self.clock.now_ms();
            let mut accepted = false;
            for channel in &self.channels {
                let rl_key = self.rate_limit_key(channel.name(), now_ms);
                let sends_this_window: u32 = match self.kv.get(&rl_key).await {
                    Some(raw) => raw.parse().unwrap_or(0),
                    None => 0,
                };
                if sends_this_window >= self.config.max_per_window {
                    summary.rate_limited += 1;
                    continue;
                }

                match channel.deliver(alert).await {
                    Ok(()) => {
                        summary.sent += 1;
                        accepted = true;
                        self.kv
                            .put(
                                &rl_key,
                                &(sends_this_window + 1).to_string(),
                                Some(self.config.rate_limit_window_s * 2),
                            )
                            .await;
                    }
                    Err(e) => {
                        summary.failed += 1;
                        warn!("alert delivery via {} failed: {e}", channel.name());
                    }
                }
            }

            if accepted {
                self.kv
                    .put(&dedupe_key, "1", Some(self.config.dedupe_window_s))
                    .await;
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::types::AlertSeverity;
    use crate::capabilities::MemoryKv;
    use crate::util::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingChannel {
        delivered: AtomicUsize,
        fail: bool,
    }

    impl CountingChannel {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                delivered: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl AlertChannel for CountingChannel {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn deliver(&self, _alert: &AlertEvent) -> Result<()> {
            if self.fail {
                return Err(SwarmError::Provider("channel down".into()));
            }
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn alert(fingerprint: &str, occurred_at: i64) -> AlertEvent {
        AlertEvent::new(
            "swarm_dead_letter_queue",
            AlertSeverity::Warning,
            "DLQ depth",
            "messages dead-lettered",
            fingerprint,
            occurred_at,
            json!({}),
        )
    }

    fn notifier(
        clock: Arc<ManualClock>,
        channel: Arc<CountingChannel>,
        config: NotifierConfig,
    ) -> AlertNotifier {
        let kv = Arc::new(MemoryKv::new(clock.clone()));
        AlertNotifier::new(clock, kv, vec![channel], config)
    }

    #[tokio::test]
    async fn test_dedupe_within_window() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let channel = CountingChannel::new(false);
        let notifier = notifier(
            clock.clone(),
            channel.clone(),
            NotifierConfig {
                dedupe_window_s: 600,
                ..Default::default()
            },
        );

        let first = notifier.notify(&[alert("dlq-1", 1)]).await;
        assert_eq!((first.sent, first.deduped), (1, 0));

        let second = notifier.notify(&[alert("dlq-1", 2)]).await;
        assert_eq!((second.sent, second.deduped), (0, 1));
        assert_eq!(channel.delivered.load(Ordering::SeqCst), 1);

        // Past the window the fingerprint fires again.
        clock.advance(600_001);
        let third = notifier.notify(&[alert("dlq-1", 3)]).await;
        assert_eq!((third.sent, third.deduped), (1, 0));
    }

    #[tokio::test]
    async fn test_rate_limit_per_window() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let channel = CountingChannel::new(false);
        let notifier = notifier(
            clock.clone(),
            channel.clone(),
            NotifierConfig {
                max_per_window: 2,
                rate_limit_window_s: 300,
                ..Default::default()
            },
        );

        let alerts = vec![alert("fp-1", 1), alert("fp-2", 2), alert("fp-3", 3)];
        let summary = notifier.notify(&alerts).await;
        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.rate_limited, 1);
        assert_eq!(channel.delivered.load(Ordering::SeqCst), 2);

        // A fresh window resets the counter.
        clock.advance(301_000);
        let summary = notifier.notify(&[alert("fp-4", 4)]).await;
        assert_eq!(summary.sent, 1);
    }

    #[tokio::test]
    async fn test_failed_send_does_not_mark_dedupe() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let channel = CountingChannel::new(true);
        let notifier = notifier(clock.clone(), channel, NotifierConfig::default());

        let summary = notifier.notify(&[alert("fp-x", 1)]).await;
        assert_eq!((summary.sent, summary.failed, summary.deduped), (0, 1, 0));

        // Because nothing accepted it, the same fingerprint retries.
        let retry = notifier.notify(&[alert("fp-x", 2)]).await;
        assert_eq!(retry.deduped, 0);
        assert_eq!(retry.failed, 1);
    }

    #[tokio::test]
    async fn test_rate_limited_alert_is_not_marked_deduped() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let channel = CountingChannel::new(false);
        let notifier = notifier(
            clock.clone(),
            channel.clone(),
            NotifierConfig {
                max_per_window: 1,
                ..Default::default()
            },
        );

        let summary = notifier.notify(&[alert("fp-a", 1), alert("fp-b", 2)]).await;
        assert_eq!((summary.sent, summary.rate_limited), (1, 1));

        // fp-b never went out, so it is not deduped later; fp-a is.
        clock.advance(601_000); // new rate window, fp-a dedupe expired too
        let summary = notifier.notify(&[alert("fp-a", 3), alert("fp-b", 4)]).await;
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.rate_limited, 1);
    }
}
