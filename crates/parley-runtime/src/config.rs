use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use parley_contract::DecisionEngineConfig;
use serde::{Deserialize, Serialize};

/// Enumerates supported `SupersedeMode` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupersedeMode {
    /// Let an in-flight decision finish; newer messages wait for the next tick.
    Queue,
    /// Drop an in-flight decision when newer incoming messages show up.
    Supersede,
}

impl SupersedeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Supersede => "supersede",
        }
    }
}

/// Bounded exponential backoff for transient transport failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            jitter_ms: 100,
        }
    }
}

/// Pause before each outbound text, proportional to its length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypingDelayConfig {
    /// Zero disables the delay.
    pub ms_per_char: u64,
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Default for TypingDelayConfig {
    fn default() -> Self {
        Self {
            ms_per_char: 0,
            min_ms: 400,
            max_ms: 4_000,
        }
    }
}

impl TypingDelayConfig {
    pub fn delay_for(&self, text: &str) -> Duration {
        if self.ms_per_char == 0 {
            return Duration::ZERO;
        }
        let chars = u64::try_from(text.chars().count()).unwrap_or(u64::MAX);
        let raw = chars.saturating_mul(self.ms_per_char);
        let upper = self.max_ms.max(self.min_ms);
        Duration::from_millis(raw.clamp(self.min_ms, upper))
    }
}

/// Runtime settings for the event loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub chats: Vec<String>,
    pub poll_interval_ms: u64,
    /// Display name of the watched account.
    pub self_identity: String,
    pub state_dir: PathBuf,
    pub decision: DecisionEngineConfig,
    pub retry: RetryConfig,
    pub typing: TypingDelayConfig,
    pub message_log_cap: usize,
    pub supersede: SupersedeMode,
    pub supersede_check_ms: u64,
    pub max_supersedes: usize,
    /// Treat everything visible on a chat's first poll as already handled.
    pub baseline_on_first_poll: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            chats: Vec::new(),
            poll_interval_ms: 5_000,
            self_identity: "me".to_string(),
            state_dir: PathBuf::from(".parley"),
            decision: DecisionEngineConfig::default(),
            retry: RetryConfig::default(),
            typing: TypingDelayConfig::default(),
            message_log_cap: 500,
            supersede: SupersedeMode::Queue,
            supersede_check_ms: 500,
            max_supersedes: 3,
            baseline_on_first_poll: true,
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chats.iter().all(|chat| chat.trim().is_empty()) {
            bail!("at least one chat must be configured");
        }
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be greater than 0");
        }
        if self.decision.timeout_seconds == 0 {
            bail!("decision.timeout_seconds must be greater than 0");
        }
        if self.decision.max_messages_in_context == 0 {
            bail!("decision.max_messages_in_context must be greater than 0");
        }
        if self.supersede == SupersedeMode::Supersede && self.supersede_check_ms == 0 {
            bail!("supersede_check_ms must be greater than 0 in supersede mode");
        }
        Ok(())
    }

    /// Configured chats, trimmed, without blanks or repeats.
    pub fn watched_chats(&self) -> Vec<String> {
        let mut chats: Vec<String> = Vec::new();
        for chat in &self.chats {
            let chat = chat.trim();
            if !chat.is_empty() && !chats.iter().any(|known| known == chat) {
                chats.push(chat.to_string());
            }
        }
        chats
    }

    pub fn events_log_path(&self) -> PathBuf {
        self.state_dir.join("runtime-events.jsonl")
    }

    pub fn decision_timeout(&self) -> Duration {
        Duration::from_secs(self.decision.timeout_seconds)
    }
}
