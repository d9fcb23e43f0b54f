//! Swarm registry
//!
//! Singleton service owning the agent directory, topic subscriptions,
//! the delayed message queue and its dead-letter set. Registry state is
//! mutated only behind the registry's own lock, and the dispatch loop
//! never holds that lock across a delivery await, so agent handlers may
//! call back into the registry freely.

use super::message::{
    AgentId, AgentState, AgentStatus, Message, MessagePriority, MessageTarget, QueueStatus,
    QueuedMessage,
};
use crate::error::{Result, SwarmError};
use crate::util::{prefixed_id, Clock};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Delivery seam between the registry and the agent runtime. Tests plug
/// in scripted implementations to drive retry and DLQ paths.
#[async_trait]
pub trait MessageDelivery: Send + Sync {
    async fn deliver(&self, target: &AgentId, message: &Message) -> Result<serde_json::Value>;
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub default_max_attempts: u32,
    /// Heartbeats older than this mark a target stale; stale targets are
    /// skipped without consuming a delivery attempt.
    pub stale_heartbeat_ms: i64,
    pub backoff_base_ms: i64,
    pub backoff_cap_ms: i64,
    pub dispatch_limit_cap: usize,
    pub poll_limit_cap: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: 3,
            stale_heartbeat_ms: 5 * 60 * 1000,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 30_000,
            dispatch_limit_cap: 200,
            poll_limit_cap: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    pub enqueued: u64,
    pub published: u64,
    pub delivered: u64,
    pub retried: u64,
    pub expired: u64,
    pub dead_lettered: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStateSnapshot {
    pub queued: usize,
    pub dead_lettered: usize,
    pub stats: RegistryStats,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchReport {
    pub examined: usize,
    pub delivered: usize,
    pub retried: usize,
    pub expired: usize,
    pub dead_lettered: usize,
    pub skipped_stale: usize,
}

#[derive(Default)]
struct RegistryInner {
    agents: HashMap<String, AgentStatus>,
    subscriptions: BTreeMap<String, Vec<AgentId>>,
    queue: VecDeque<QueuedMessage>,
    dlq: VecDeque<QueuedMessage>,
    stats: RegistryStats,
}

impl RegistryInner {
    /// Increment attempts and either reschedule with backoff or move the
    /// entry to the DLQ. Returns true when dead-lettered.
    fn bump_retry(
        &mut self,
        mut entry: QueuedMessage,
        error: &str,
        now_ms: i64,
        config: &RegistryConfig,
    ) -> bool {
        entry.attempts += 1;
        entry.status = QueueStatus::Failed;
        entry.last_error = Some(error.to_string());

        if entry.attempts >= entry.max_attempts {
            debug!(
                "dead-lettering {} after {} attempts: {error}",
                entry.queue_id, entry.attempts
            );
            self.stats.dead_lettered += 1;
            self.dlq.push_back(entry);
            return true;
        }

        let exponent = entry.attempts.saturating_sub(1).min(31);
        let backoff = config
            .backoff_cap_ms
            .min(config.backoff_base_ms.saturating_mul(1i64 << exponent));
        entry.available_at_ms = now_ms + backoff;
        self.stats.retried += 1;
        self.queue.push_back(entry);
        false
    }

    fn expire(&mut self, mut entry: QueuedMessage) {
        entry.status = QueueStatus::Failed;
        entry.last_error = Some("Message expired".to_string());
        self.stats.expired += 1;
        self.stats.dead_lettered += 1;
        self.dlq.push_back(entry);
    }
}

pub struct SwarmRegistry {
    clock: Arc<dyn Clock>,
    config: RegistryConfig,
    inner: RwLock<RegistryInner>,
    delivery: RwLock<Option<Arc<dyn MessageDelivery>>>,
}

impl SwarmRegistry {
    pub fn new(clock: Arc<dyn Clock>, config: RegistryConfig) -> Self {
        Self {
            clock,
            config,
            inner: RwLock::new(RegistryInner::default()),
            delivery: RwLock::new(None),
        }
    }

    pub fn with_defaults(clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, RegistryConfig::default())
    }

    /// Wire in the delivery seam (the runtime's agent directory).
    pub async fn set_delivery(&self, delivery: Arc<dyn MessageDelivery>) {
        *self.delivery.write().await = Some(delivery);
    }

    /// Upsert an agent record. An agent is discoverable only after its
    /// first register.
    pub async fn register(&self, mut status: AgentStatus) {
        status.last_heartbeat_ms = self.clock.now_ms();
        let mut inner = self.inner.write().await;
        info!("registered agent {}", status.id);
        inner.agents.insert(status.id.to_string(), status);
    }

    /// Touch the heartbeat, optionally updating the lifecycle state.
    pub async fn heartbeat(&self, agent_id: &AgentId, state: Option<AgentState>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let record = inner
            .agents
            .get_mut(&agent_id.to_string())
            .ok_or_else(|| SwarmError::NotFound(format!("agent {agent_id} is not registered")))?;
        record.last_heartbeat_ms = self.clock.now_ms();
        if let Some(state) = state {
            record.state = state;
        }
        Ok(())
    }

    pub async fn agents(&self) -> Vec<AgentStatus> {
        let inner = self.inner.read().await;
        let mut agents: Vec<AgentStatus> = inner.agents.values().cloned().collect();
        agents.sort_by_key(|a| a.id.to_string());
        agents
    }

    /// Idempotent topic membership; insertion order is preserved.
    pub async fn subscribe(&self, agent_id: &AgentId, topic: &str) -> Result<()> {
        if topic.trim().is_empty() {
            return Err(SwarmError::InvalidInput("topic is empty".into()));
        }
        let mut inner = self.inner.write().await;
        let subscribers = inner.subscriptions.entry(topic.to_string()).or_default();
        if !subscribers.contains(agent_id) {
            subscribers.push(agent_id.clone());
        }
        Ok(())
    }

    /// Removing the last subscriber deletes the topic key.
    pub async fn unsubscribe(&self, agent_id: &AgentId, topic: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(subscribers) = inner.subscriptions.get_mut(topic) {
            subscribers.retain(|id| id != agent_id);
            if subscribers.is_empty() {
                inner.subscriptions.remove(topic);
            }
        }
        Ok(())
    }

    pub async fn subscriptions(&self) -> BTreeMap<String, Vec<AgentId>> {
        self.inner.read().await.subscriptions.clone()
    }

    /// Append a message to the delayed queue. State is recorded before
    /// the queue id is returned, so an acknowledged enqueue is never lost.
    pub async fn enqueue(
        &self,
        message: Message,
        delay_ms: i64,
        max_attempts: Option<u32>,
    ) -> Result<String> {
        message.validate()?;
        if matches!(message.target, MessageTarget::Topic(_)) {
            return Err(SwarmError::InvalidInput(
                "topic targets go through publish".into(),
            ));
        }
        let now_ms = self.clock.now_ms();
        let queue_id = prefixed_id("queue");
        let entry = QueuedMessage {
            queue_id: queue_id.clone(),
            message,
            enqueued_at_ms: now_ms,
            available_at_ms: now_ms + delay_ms.max(0),
            attempts: 0,
            max_attempts: max_attempts
                .unwrap_or(self.config.default_max_attempts)
                .max(1),
            status: QueueStatus::Pending,
            last_error: None,
        };
        let mut inner = self.inner.write().await;
        inner.queue.push_back(entry);
        inner.stats.enqueued += 1;
        Ok(queue_id)
    }

    /// Fan-out enqueue to every current subscriber of `topic`. Returns
    /// the number of queue entries created.
    pub async fn publish(
        &self,
        source: &AgentId,
        topic: &str,
        payload: serde_json::Value,
    ) -> Result<usize> {
        let subscribers = {
            let inner = self.inner.read().await;
            inner.subscriptions.get(topic).cloned().unwrap_or_default()
        };
        let now_ms = self.clock.now_ms();
        let template = Message::event(
            source.clone(),
            MessageTarget::Topic(topic.to_string()),
            topic,
            payload,
            now_ms,
        )
        .with_priority(MessagePriority::Normal);

        let mut enqueued = 0;
        for subscriber in subscribers {
            let mut message = template.clone();
            message.target = MessageTarget::Agent(subscriber);
            self.enqueue(message, 0, None).await?;
            enqueued += 1;
        }
        let mut inner = self.inner.write().await;
        inner.stats.published += 1;
        debug!("published {topic} to {enqueued} subscribers");
        Ok(enqueued)
    }

    /// Drain up to `limit` ready messages addressed to `agent_id`.
    /// Returned messages are counted delivered and leave the queue.
    pub async fn poll(&self, agent_id: &AgentId, limit: usize) -> Result<Vec<Message>> {
        let limit = limit.clamp(1, self.config.poll_limit_cap);
        let now_ms = self.clock.now_ms();
        let mut inner = self.inner.write().await;

        let mut drained = Vec::new();
        let mut remaining = VecDeque::with_capacity(inner.queue.len());
        let mut queue = std::mem::take(&mut inner.queue);
        for entry in queue.drain(..) {
            let targeted = matches!(&entry.message.target, MessageTarget::Agent(id) if id == agent_id);
            if drained.len() >= limit || !targeted || entry.available_at_ms > now_ms {
                remaining.push_back(entry);
                continue;
            }
            if entry.message.is_expired(now_ms) {
                inner.expire(entry);
                continue;
            }
            drained.push(entry.message);
        }
        inner.queue = remaining;
        inner.stats.delivered += drained.len() as u64;
        Ok(drained)
    }

    /// Server-side push: walk the queue FIFO and deliver up to `limit`
    /// due messages through the delivery seam.
    pub async fn dispatch(&self, limit: usize) -> Result<DispatchReport> {
        let limit = limit.clamp(1, self.config.dispatch_limit_cap);
        let delivery = self
            .delivery
            .read()
            .await
            .clone()
            .ok_or_else(|| SwarmError::Internal("registry has no delivery wired".into()))?;

        let now_ms = self.clock.now_ms();
        let mut report = DispatchReport::default();
        let mut to_deliver: Vec<QueuedMessage> = Vec::new();

        {
            let mut inner = self.inner.write().await;
            let mut remaining = VecDeque::with_capacity(inner.queue.len());
            let mut queue = std::mem::take(&mut inner.queue);
            for entry in queue.drain(..) {
                if report.examined >= limit || entry.available_at_ms > now_ms {
                    remaining.push_back(entry);
                    continue;
                }
                report.examined += 1;

                if entry.message.is_expired(now_ms) {
                    report.expired += 1;
                    report.dead_lettered += 1;
                    inner.expire(entry);
                    continue;
                }

                let target = match &entry.message.target {
                    MessageTarget::Agent(id) => id.clone(),
                    MessageTarget::Topic(_) => {
                        // Unresolved topic targets cannot be delivered.
                        report.dead_lettered += 1;
                        inner.stats.dead_lettered += 1;
                        let mut entry = entry;
                        entry.status = QueueStatus::Failed;
                        entry.last_error = Some("Unresolved topic target".to_string());
                        inner.dlq.push_back(entry);
                        continue;
                    }
                };

                match inner.agents.get(&target.to_string()).cloned() {
                    None => {
                        if inner.bump_retry(entry, "Target not registered", now_ms, &self.config)
                        {
                            report.dead_lettered += 1;
                        } else {
                            report.retried += 1;
                        }
                    }
                    Some(status)
                        if now_ms - status.last_heartbeat_ms >= self.config.stale_heartbeat_ms =>
                    {
                        // Transient: leave queued without consuming an attempt.
                        report.skipped_stale += 1;
                        remaining.push_back(entry);
                    }
                    Some(_) => to_deliver.push(entry),
                }
            }
            // bump_retry rescheduled entries onto the (taken) live queue;
            // fold them back behind the untouched ones.
            while let Some(entry) = inner.queue.pop_front() {
                remaining.push_back(entry);
            }
            inner.queue = remaining;
        }

        // Deliveries happen outside the lock, in FIFO order.
        for entry in to_deliver {
            let target = match &entry.message.target {
                MessageTarget::Agent(id) => id.clone(),
                MessageTarget::Topic(_) => continue,
            };
            match delivery.deliver(&target, &entry.message).await {
                Ok(_) => {
                    report.delivered += 1;
                    self.inner.write().await.stats.delivered += 1;
                }
                Err(e) => {
                    warn!("delivery to {target} failed: {e}");
                    let mut inner = self.inner.write().await;
                    if inner.bump_retry(entry, &e.to_string(), now_ms, &self.config) {
                        report.dead_lettered += 1;
                    } else {
                        report.retried += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    pub async fn queue_state(&self) -> QueueStateSnapshot {
        let inner = self.inner.read().await;
        QueueStateSnapshot {
            queued: inner.queue.len(),
            dead_lettered: inner.dlq.len(),
            stats: inner.stats,
        }
    }

    pub async fn dead_letters(&self) -> Vec<QueuedMessage> {
        self.inner.read().await.dlq.iter().cloned().collect()
    }

    /// Move up to `limit` DLQ entries back to the head of the queue with
    /// a fresh attempt budget.
    pub async fn requeue_dead_letter(&self, limit: usize) -> Result<usize> {
        let now_ms = self.clock.now_ms();
        let mut inner = self.inner.write().await;

        let take = limit.min(inner.dlq.len());
        let mut restored: Vec<QueuedMessage> = inner.dlq.drain(..take).collect();
        let count = restored.len();
        for entry in restored.iter_mut() {
            entry.attempts = 0;
            entry.status = QueueStatus::Pending;
            entry.available_at_ms = now_ms;
        }
        for entry in restored.into_iter().rev() {
            inner.queue.push_front(entry);
        }
        if count > 0 {
            info!("requeued {count} dead-lettered messages");
        }
        Ok(count)
    }
}
