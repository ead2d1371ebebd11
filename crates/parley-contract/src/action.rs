use serde::{Deserialize, Serialize};

use crate::message::{MediaPayload, MessageId};

/// Enumerates supported `ActionKind` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Skip,
    React,
    Reply,
    Media,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::React => "react",
            Self::Reply => "reply",
            Self::Media => "media",
        }
    }

    /// True for kinds that touch the messaging client.
    pub fn has_side_effect(self) -> bool {
        !matches!(self, Self::Skip)
    }
}

/// One proposed response to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Skip {
        message_id: MessageId,
    },
    React {
        message_id: MessageId,
        emoji: String,
    },
    /// A reply; `parts`, when present, are sent verbatim instead of splitting
    /// `text` on line breaks.
    Reply {
        message_id: MessageId,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parts: Option<Vec<String>>,
    },
    SendMedia {
        message_id: MessageId,
        media: MediaPayload,
    },
}

impl Action {
    pub fn skip(message_id: impl Into<MessageId>) -> Self {
        Self::Skip {
            message_id: message_id.into(),
        }
    }

    pub fn react(message_id: impl Into<MessageId>, emoji: impl Into<String>) -> Self {
        Self::React {
            message_id: message_id.into(),
            emoji: emoji.into(),
        }
    }

    pub fn reply(message_id: impl Into<MessageId>, text: impl Into<String>) -> Self {
        Self::Reply {
            message_id: message_id.into(),
            text: text.into(),
            parts: None,
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Skip { .. } => ActionKind::Skip,
            Self::React { .. } => ActionKind::React,
            Self::Reply { .. } => ActionKind::Reply,
            Self::SendMedia { .. } => ActionKind::Media,
        }
    }

    pub fn message_id(&self) -> &MessageId {
        match self {
            Self::Skip { message_id }
            | Self::React { message_id, .. }
            | Self::Reply { message_id, .. }
            | Self::SendMedia { message_id, .. } => message_id,
        }
    }
}

/// Enumerates supported `ActionResult` values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionResult {
    Applied,
    Failed { reason: String, retryable: bool },
}

impl ActionResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// An executed action paired with its result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action: Action,
    pub result: ActionResult,
}
