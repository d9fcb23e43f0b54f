//! Messaging protocol
//!
//! Typed message, subscription and queued-message records shared by the
//! registry and every agent. Dispatch is FIFO per target; the priority
//! field is carried but advisory.

use crate::error::{Result, SwarmError};
use crate::util::prefixed_id;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Scout,
    Analyst,
    Trader,
    RiskManager,
    Learning,
    Registry,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Scout => "scout",
            AgentKind::Analyst => "analyst",
            AgentKind::Trader => "trader",
            AgentKind::RiskManager => "risk_manager",
            AgentKind::Learning => "learning",
            AgentKind::Registry => "registry",
        }
    }
}

/// Immutable agent identity: kind plus a routing key ("default" in
/// single-shard mode).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId {
    pub kind: AgentKind,
    pub name: String,
}

impl AgentId {
    pub fn new(kind: AgentKind, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
        }
    }

    pub fn default_shard(kind: AgentKind) -> Self {
        Self::new(kind, "default")
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Active,
    Busy,
    Idle,
    Failed,
}

/// Registry-side view of an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub id: AgentId,
    pub state: AgentState,
    pub last_heartbeat_ms: i64,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Command,
    Event,
    Reply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageTarget {
    Agent(AgentId),
    Topic(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub source: AgentId,
    pub target: MessageTarget,
    pub message_type: MessageType,
    pub topic: String,
    pub payload: serde_json::Value,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
    pub priority: MessagePriority,
    /// Zero disables expiry.
    #[serde(default)]
    pub ttl_ms: i64,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Message {
    pub fn command(
        source: AgentId,
        target: AgentId,
        topic: &str,
        payload: serde_json::Value,
        now_ms: i64,
    ) -> Self {
        Self::build(source, MessageTarget::Agent(target), MessageType::Command, topic, payload, now_ms, "swarm")
    }

    pub fn event(
        source: AgentId,
        target: MessageTarget,
        topic: &str,
        payload: serde_json::Value,
        now_ms: i64,
    ) -> Self {
        Self::build(source, target, MessageType::Event, topic, payload, now_ms, "event")
    }

    pub fn reply(
        source: AgentId,
        target: AgentId,
        topic: &str,
        payload: serde_json::Value,
        correlation_id: &str,
        now_ms: i64,
    ) -> Self {
        let mut message = Self::build(
            source,
            MessageTarget::Agent(target),
            MessageType::Reply,
            topic,
            payload,
            now_ms,
            "swarm",
        );
        message.correlation_id = Some(correlation_id.to_string());
        message
    }

    fn build(
        source: AgentId,
        target: MessageTarget,
        message_type: MessageType,
        topic: &str,
        payload: serde_json::Value,
        now_ms: i64,
        id_prefix: &str,
    ) -> Self {
        Self {
            id: prefixed_id(id_prefix),
            source,
            target,
            message_type,
            topic: topic.to_string(),
            payload,
            timestamp_ms: now_ms,
            correlation_id: None,
            reply_to: None,
            priority: MessagePriority::Normal,
            ttl_ms: 0,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    /// A message is expired iff it carries a positive TTL that has lapsed.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.ttl_ms > 0 && now_ms > self.timestamp_ms + self.ttl_ms
    }

    /// Validation applied before enqueue.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(SwarmError::InvalidInput("message id is empty".into()));
        }
        if self.topic.trim().is_empty() {
            return Err(SwarmError::InvalidInput("message topic is empty".into()));
        }
        if let MessageTarget::Topic(topic) = &self.target {
            if topic.trim().is_empty() {
                return Err(SwarmError::InvalidInput("target topic is empty".into()));
            }
        }
        if self.timestamp_ms <= 0 {
            return Err(SwarmError::InvalidInput(format!(
                "message timestamp {} is not a valid instant",
                self.timestamp_ms
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Failed,
}

/// A message sitting in the registry's delayed queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub queue_id: String,
    pub message: Message,
    pub enqueued_at_ms: i64,
    pub available_at_ms: i64,
    pub attempts: u32,
    pub max_attempts: u32,
    pub status: QueueStatus,
    #[serde(default)]
    pub last_error: Option<String>,
}
