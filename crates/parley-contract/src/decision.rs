use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::action::Action;
use crate::message::Message;
use crate::state::ChatState;

/// Options handed to whichever backend produces decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionEngineConfig {
    pub model: String,
    pub timeout_seconds: u64,
    /// Upper bound on `DecisionRequest::history` length.
    pub max_messages_in_context: usize,
}

impl Default for DecisionEngineConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            timeout_seconds: 60,
            max_messages_in_context: 50,
        }
    }
}

/// Input for one `decide` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub chat: String,
    pub state: ChatState,
    /// Messages not seen before this cycle, oldest first.
    pub new_messages: Vec<Message>,
    /// Recent log tail ending with `new_messages`, truncated to the context budget.
    pub history: Vec<Message>,
    /// True when `state` was derived from a different message sequence than
    /// the history preceding `new_messages` (restart, gap, or messages logged
    /// without a decision).
    pub stale: bool,
    /// True when the visible window did not overlap the known log.
    pub possible_gap: bool,
}

impl DecisionRequest {
    pub fn incoming(&self) -> impl Iterator<Item = &Message> {
        self.new_messages
            .iter()
            .filter(|message| !message.is_outgoing)
    }
}

/// Output of one `decide` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub actions: Vec<Action>,
    /// Replacement context blob; `None` keeps the cached one.
    #[serde(default)]
    pub context: Option<Value>,
}

impl Decision {
    pub fn actions(actions: Vec<Action>) -> Self {
        Self {
            actions,
            context: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Enumerates supported `DecisionError` values.
pub enum DecisionError {
    #[error("decision output was malformed: {0}")]
    Malformed(String),
    #[error("decision backend rate limited: {0}")]
    RateLimited(String),
    #[error("decision failed: {0}")]
    Failed(String),
}

#[async_trait]
/// Trait contract for `DecisionEngine` behavior.
///
/// Implementations are called concurrently for different chats and must not
/// produce side effects; the runtime may drop an in-flight call.
pub trait DecisionEngine: Send + Sync {
    async fn decide(&self, request: DecisionRequest) -> Result<Decision, DecisionError>;
}
