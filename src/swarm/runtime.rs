//! Agent runtime
//!
//! Hosts one durable actor per `AgentId`. The mpsc inbox is the
//! single-writer guarantee: requests for one agent are handled strictly
//! serially, so agents mutate their state freely inside handlers.
//! `on_start` completes before the first request (initialization
//! barrier). The alarm tick drives heartbeat, inbox draining and
//! subclass maintenance.

use super::message::{AgentId, AgentState, AgentStatus, Message};
use super::registry::{MessageDelivery, SwarmRegistry};
use crate::error::{Result, SwarmError};
use crate::util::Clock;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The uniform agent surface. Every agent is a value implementing
/// `handle_message`, with optional lifecycle hooks.
#[async_trait]
pub trait SwarmAgent: Send + 'static {
    fn id(&self) -> AgentId;

    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// Runs once before the first request is admitted.
    async fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Periodic maintenance, after heartbeat and inbox drain.
    async fn on_alarm(&mut self) -> Result<()> {
        Ok(())
    }

    async fn handle_message(&mut self, message: Message) -> Result<serde_json::Value>;

    /// Subclass routes beyond the uniform surface.
    async fn handle_request(
        &mut self,
        route: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let _ = body;
        Err(SwarmError::NotFound(format!("no route {route}")))
    }

    /// Opaque snapshot served by the state endpoint.
    fn state_snapshot(&self) -> serde_json::Value {
        json!({})
    }

    /// Flush mutated state; called at the end of each alarm tick.
    async fn save_state(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub alarm_interval: Duration,
    pub inbox_capacity: usize,
    /// Max inbox messages drained from the registry per alarm tick.
    pub drain_limit: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            alarm_interval: Duration::from_secs(60),
            inbox_capacity: 64,
            drain_limit: 50,
        }
    }
}

enum AgentRequest {
    Health,
    Message(Message),
    State,
    Poll { limit: usize },
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Route { route: String, body: serde_json::Value },
    Shutdown,
}

struct Envelope {
    request: AgentRequest,
    reply: oneshot::Sender<Result<serde_json::Value>>,
}

/// Cheap cloneable address of a hosted agent.
#[derive(Clone)]
pub struct AgentHandle {
    id: AgentId,
    tx: mpsc::Sender<Envelope>,
}

impl AgentHandle {
    pub fn id(&self) -> &AgentId {
        &self.id
    }

    async fn call(&self, request: AgentRequest) -> Result<serde_json::Value> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { request, reply })
            .await
            .map_err(|_| SwarmError::Internal(format!("agent {} inbox closed", self.id)))?;
        rx.await
            .map_err(|_| SwarmError::Internal(format!("agent {} dropped the request", self.id)))?
    }

    pub async fn health(&self) -> Result<serde_json::Value> {
        self.call(AgentRequest::Health).await
    }

    pub async fn send_message(&self, message: Message) -> Result<serde_json::Value> {
        self.call(AgentRequest::Message(message)).await
    }

    pub async fn state(&self) -> Result<serde_json::Value> {
        self.call(AgentRequest::State).await
    }

    pub async fn poll(&self, limit: usize) -> Result<serde_json::Value> {
        self.call(AgentRequest::Poll { limit }).await
    }

    pub async fn subscribe(&self, topic: &str) -> Result<serde_json::Value> {
        self.call(AgentRequest::Subscribe {
            topic: topic.to_string(),
        })
        .await
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<serde_json::Value> {
        self.call(AgentRequest::Unsubscribe {
            topic: topic.to_string(),
        })
        .await
    }

    pub async fn request(&self, route: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        self.call(AgentRequest::Route {
            route: route.to_string(),
            body,
        })
        .await
    }

    pub async fn shutdown(&self) -> Result<serde_json::Value> {
        self.call(AgentRequest::Shutdown).await
    }
}

/// Lookup table from agent id to live handle; the registry's delivery
/// seam in production.
#[derive(Default)]
pub struct AgentDirectory {
    handles: RwLock<HashMap<String, AgentHandle>>,
}

impl AgentDirectory {
    pub async fn insert(&self, handle: AgentHandle) {
        self.handles
            .write()
            .await
            .insert(handle.id.to_string(), handle);
    }

    pub async fn get(&self, id: &AgentId) -> Option<AgentHandle> {
        self.handles.read().await.get(&id.to_string()).cloned()
    }

    pub async fn remove(&self, id: &AgentId) {
        self.handles.write().await.remove(&id.to_string());
    }
}

#[async_trait]
impl MessageDelivery for AgentDirectory {
    async fn deliver(&self, target: &AgentId, message: &Message) -> Result<serde_json::Value> {
        let handle = self
            .get(target)
            .await
            .ok_or_else(|| SwarmError::NotFound(format!("no live handle for {target}")))?;
        handle.send_message(message.clone()).await
    }
}

pub struct AgentRuntime {
    registry: Arc<SwarmRegistry>,
    clock: Arc<dyn Clock>,
    config: RuntimeConfig,
    directory: Arc<AgentDirectory>,
}

impl AgentRuntime {
    pub fn new(registry: Arc<SwarmRegistry>, clock: Arc<dyn Clock>, config: RuntimeConfig) -> Self {
        Self {
            registry,
            clock,
            config,
            directory: Arc::new(AgentDirectory::default()),
        }
    }

    pub fn directory(&self) -> Arc<AgentDirectory> {
        self.directory.clone()
    }

    /// Point the registry's dispatcher at this runtime's agents.
    pub async fn wire_delivery(&self) {
        self.registry.set_delivery(self.directory.clone()).await;
    }

    /// Host an agent: insert its handle, then run its actor loop.
    pub async fn spawn(&self, agent: Box<dyn SwarmAgent>) -> AgentHandle {
        let id = agent.id();
        let (tx, rx) = mpsc::channel(self.config.inbox_capacity);
        let handle = AgentHandle { id: id.clone(), tx };
        self.directory.insert(handle.clone()).await;

        let registry = self.registry.clone();
        let clock = self.clock.clone();
        let config = self.config.clone();
        tokio::spawn(actor_loop(agent, rx, registry, clock, config));
        handle
    }

    /// Periodic server-side push; the registry alarm of the source design.
    pub fn start_dispatcher(&self, interval: Duration, limit: usize) -> JoinHandle<()> {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = registry.dispatch(limit).await {
                    warn!("dispatch tick failed: {e}");
                }
            }
        })
    }
}

async fn actor_loop(
    mut agent: Box<dyn SwarmAgent>,
    mut rx: mpsc::Receiver<Envelope>,
    registry: Arc<SwarmRegistry>,
    clock: Arc<dyn Clock>,
    config: RuntimeConfig,
) {
    let id = agent.id();

    // Initialization barrier: requests queue in the inbox until this
    // completes.
    let start_state = match agent.on_start().await {
        Ok(()) => AgentState::Active,
        Err(e) => {
            error!("agent {id} failed to start: {e}");
            AgentState::Failed
        }
    };
    registry
        .register(AgentStatus {
            id: id.clone(),
            state: start_state,
            last_heartbeat_ms: clock.now_ms(),
            capabilities: agent.capabilities(),
        })
        .await;
    let mut last_heartbeat_ms = clock.now_ms();

    let mut alarm = tokio::time::interval(config.alarm_interval);
    alarm.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    alarm.tick().await; // the zeroth tick fires immediately

    loop {
        tokio::select! {
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                if matches!(envelope.request, AgentRequest::Shutdown) {
                    let _ = envelope.reply.send(Ok(json!({"stopped": true})));
                    break;
                }
                let response =
                    handle_request(&mut agent, envelope.request, &registry, last_heartbeat_ms)
                        .await;
                if let Err(e) = &response {
                    debug!("agent {id} handler error: {e}");
                }
                let _ = envelope.reply.send(response);
            }
            _ = alarm.tick() => {
                alarm_tick(&mut agent, &registry, &clock, &config).await;
                last_heartbeat_ms = clock.now_ms();
            }
        }
    }
    info!("agent {id} stopped");
}

async fn handle_request(
    agent: &mut Box<dyn SwarmAgent>,
    request: AgentRequest,
    registry: &Arc<SwarmRegistry>,
    last_heartbeat_ms: i64,
) -> Result<serde_json::Value> {
    let id = agent.id();
    match request {
        AgentRequest::Health => Ok(json!({
            "status": "ok",
            "type": id.kind.as_str(),
            "agent_id": id.to_string(),
            "last_heartbeat_ms": last_heartbeat_ms,
        })),
        AgentRequest::Message(message) => agent.handle_message(message).await,
        AgentRequest::State => Ok(agent.state_snapshot()),
        AgentRequest::Poll { limit } => {
            let limit = limit.clamp(1, 100);
            let messages = registry.poll(&id, limit).await?;
            let mut handled = 0;
            for message in messages {
                match agent.handle_message(message).await {
                    Ok(_) => handled += 1,
                    Err(e) => warn!("agent {id} failed polled message: {e}"),
                }
            }
            Ok(json!({"drained": handled}))
        }
        AgentRequest::Subscribe { topic } => {
            registry.subscribe(&id, &topic).await?;
            Ok(json!({"subscribed": topic}))
        }
        AgentRequest::Unsubscribe { topic } => {
            registry.unsubscribe(&id, &topic).await?;
            Ok(json!({"unsubscribed": topic}))
        }
        AgentRequest::Route { route, body } => agent.handle_request(&route, body).await,
        AgentRequest::Shutdown => Ok(json!({"stopped": true})),
    }
}

async fn alarm_tick(
    agent: &mut Box<dyn SwarmAgent>,
    registry: &Arc<SwarmRegistry>,
    clock: &Arc<dyn Clock>,
    config: &RuntimeConfig,
) {
    let id = agent.id();

    match registry.heartbeat(&id, None).await {
        Ok(()) => {}
        Err(SwarmError::NotFound(_)) => {
            // Registry lost us (restart); re-register.
            registry
                .register(AgentStatus {
                    id: id.clone(),
                    state: AgentState::Active,
                    last_heartbeat_ms: clock.now_ms(),
                    capabilities: agent.capabilities(),
                })
                .await;
        }
        Err(e) => warn!("agent {id} heartbeat failed: {e}"),
    }

    match registry.poll(&id, config.drain_limit).await {
        Ok(messages) => {
            for message in messages {
                if let Err(e) = agent.handle_message(message).await {
                    warn!("agent {id} failed inbox message: {e}");
                }
            }
        }
        Err(e) => warn!("agent {id} inbox drain failed: {e}"),
    }

    if let Err(e) = agent.on_alarm().await {
        warn!("agent {id} alarm hook failed: {e}");
    }
    if let Err(e) = agent.save_state().await {
        warn!("agent {id} state flush failed: {e}");
    }
}
