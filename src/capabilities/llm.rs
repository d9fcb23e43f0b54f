//! LLM completion capability
//!
//! The analyst is the only consumer. `ScriptedLlm` replays canned
//! responses (or failures, or delays) so resilience behavior is
//! testable without a provider; `NullLlm` is the unconfigured
//! fallback used by dry runs.

use crate::error::{Result, SwarmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub messages: Vec<LlmMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
    /// "json" requests a strict-JSON response where the provider supports it.
    #[serde(default)]
    pub response_format: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub usage: LlmUsage,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn is_configured(&self) -> bool {
        true
    }

    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse>;
}

/// Unconfigured LLM: the analyst falls back to empty recommendations.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLlm;

#[async_trait]
impl LlmClient for NullLlm {
    fn is_configured(&self) -> bool {
        false
    }

    async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
        Err(SwarmError::NotSupported("no LLM provider configured".into()))
    }
}

/// One scripted turn for `ScriptedLlm`.
pub enum ScriptedTurn {
    Reply(String),
    Fail(String),
    /// Sleeps before replying; used to exercise the 18 s deadline.
    Delay(Duration, String),
}

/// Test double replaying scripted turns in order.
pub struct ScriptedLlm {
    turns: Mutex<VecDeque<ScriptedTurn>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn push_reply(&self, content: &str) {
        self.turns
            .lock()
            .await
            .push_back(ScriptedTurn::Reply(content.to_string()));
    }

    pub async fn push_failure(&self, error: &str) {
        self.turns
            .lock()
            .await
            .push_back(ScriptedTurn::Fail(error.to_string()));
    }

    pub async fn push_delayed_reply(&self, delay: Duration, content: &str) {
        self.turns
            .lock()
            .await
            .push_back(ScriptedTurn::Delay(delay, content.to_string()));
    }

    pub async fn remaining(&self) -> usize {
        self.turns.lock().await.len()
    }
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
        let turn = self.turns.lock().await.pop_front();
        match turn {
            Some(ScriptedTurn::Reply(content)) => Ok(LlmResponse {
                content,
                usage: LlmUsage::default(),
            }),
            Some(ScriptedTurn::Fail(error)) => Err(SwarmError::Provider(error)),
            Some(ScriptedTurn::Delay(delay, content)) => {
                tokio::time::sleep(delay).await;
                Ok(LlmResponse {
                    content,
                    usage: LlmUsage::default(),
                })
            }
            None => Err(SwarmError::Provider("scripted LLM exhausted".into())),
        }
    }
}
