use std::path::Path;

use anyhow::{Context, Result};
use parley_core::{append_line_with_rotation, current_unix_timestamp_ms, LogRotationPolicy};
use serde::Serialize;

use crate::phase::ChatPhase;

/// Counters for one chat's pass through a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChatCycleReport {
    pub chat: String,
    pub polled: bool,
    pub baselined: usize,
    pub new_messages: usize,
    pub backfilled: usize,
    pub possible_gap: bool,
    pub decisions: usize,
    pub decision_failures: usize,
    pub supersedes: usize,
    pub proposed: usize,
    pub accepted: usize,
    pub dedup_drops: usize,
    pub applied: usize,
    pub failed: usize,
    pub deliveries: usize,
    pub transport_errors: usize,
    pub persisted: bool,
    pub persistence_failures: usize,
    pub cancelled: bool,
    pub error: Option<String>,
    pub final_phase: Option<ChatPhase>,
}

impl ChatCycleReport {
    pub fn new(chat: &str) -> Self {
        Self {
            chat: chat.to_string(),
            ..Self::default()
        }
    }
}

/// Aggregate of one poll cycle across all chats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollCycleReport {
    pub cycle: u64,
    pub chats_started: usize,
    pub chats_busy: usize,
    pub chats_paused: usize,
    pub new_messages: usize,
    pub decisions: usize,
    pub decision_failures: usize,
    pub dedup_drops: usize,
    pub applied: usize,
    pub failed: usize,
    pub deliveries: usize,
    pub transport_errors: usize,
    pub persistence_failures: usize,
    pub chats: Vec<ChatCycleReport>,
}

impl PollCycleReport {
    pub fn absorb(&mut self, chat: ChatCycleReport) {
        self.new_messages = self.new_messages.saturating_add(chat.new_messages);
        self.decisions = self.decisions.saturating_add(chat.decisions);
        self.decision_failures = self
            .decision_failures
            .saturating_add(chat.decision_failures);
        self.dedup_drops = self.dedup_drops.saturating_add(chat.dedup_drops);
        self.applied = self.applied.saturating_add(chat.applied);
        self.failed = self.failed.saturating_add(chat.failed);
        self.deliveries = self.deliveries.saturating_add(chat.deliveries);
        self.transport_errors = self.transport_errors.saturating_add(chat.transport_errors);
        self.persistence_failures = self
            .persistence_failures
            .saturating_add(chat.persistence_failures);
        self.chats.push(chat);
    }

    pub fn chat(&self, chat: &str) -> Option<&ChatCycleReport> {
        self.chats.iter().find(|report| report.chat == chat)
    }
}

/// Appends the cycle counters as one NDJSON line.
pub fn append_cycle_report(path: &Path, report: &PollCycleReport, policy: LogRotationPolicy) -> Result<()> {
    let line = serde_json::to_string(&serde_json::json!({
        "timestamp_unix_ms": current_unix_timestamp_ms(),
        "event": "poll_cycle",
        "report": report,
    }))
    .context("failed to encode cycle report")?;
    append_line_with_rotation(path, &line, policy)
}
