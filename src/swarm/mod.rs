//! Swarm coordination core
//!
//! The registry owns discovery, pub/sub and the delayed queue; the
//! runtime hosts one single-writer actor per agent. Agents never hold
//! references to each other's state — everything crosses the registry
//! as messages.

pub mod message;
pub mod registry;
pub mod runtime;

pub use message::{
    AgentId, AgentKind, AgentState, AgentStatus, Message, MessagePriority, MessageTarget,
    MessageType, QueueStatus, QueuedMessage,
};
pub use registry::{
    DispatchReport, MessageDelivery, QueueStateSnapshot, RegistryConfig, RegistryStats,
    SwarmRegistry,
};
pub use runtime::{AgentDirectory, AgentHandle, AgentRuntime, RuntimeConfig, SwarmAgent};
