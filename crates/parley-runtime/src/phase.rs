//! Per-chat lifecycle as an explicit transition table.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Enumerates supported `ChatPhase` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatPhase {
    Idle,
    Polling,
    Deciding,
    Executing,
    Persisting,
    /// Session lost; waits for an operator resume.
    Paused,
}

impl ChatPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Polling => "polling",
            Self::Deciding => "deciding",
            Self::Executing => "executing",
            Self::Persisting => "persisting",
            Self::Paused => "paused",
        }
    }

    /// True while a cycle owns the chat.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            Self::Polling | Self::Deciding | Self::Executing | Self::Persisting
        )
    }
}

/// Enumerates supported `PhaseEvent` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseEvent {
    Tick,
    Wake,
    NoNewMessages,
    TransportAbandoned,
    NewMessages,
    Superseded,
    DecisionReady,
    DecisionFailed,
    ActionsFinished,
    Persisted,
    FatalTransport,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid chat transition from {from:?} on {event:?}")]
pub struct TransitionError {
    pub from: ChatPhase,
    pub event: PhaseEvent,
}

pub fn transition(current: ChatPhase, event: PhaseEvent) -> Result<ChatPhase, TransitionError> {
    use ChatPhase::*;
    use PhaseEvent::*;

    let next = match (current, event) {
        (Idle, Tick | Wake) => Polling,
        (Polling, NoNewMessages | TransportAbandoned) => Idle,
        (Polling, NewMessages) => Deciding,
        (Deciding, Superseded) => Deciding,
        (Deciding, DecisionReady) => Executing,
        (Deciding, DecisionFailed) => Idle,
        (Executing, ActionsFinished) => Persisting,
        (Persisting, Persisted) => Idle,
        (Polling | Deciding | Executing | Persisting, FatalTransport) => Paused,
        (Paused, Resume) => Idle,
        _ => return Err(TransitionError { from: current, event }),
    };
    Ok(next)
}
