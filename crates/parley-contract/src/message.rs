use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of a message, unique within its chat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Enumerates supported `MessageBody` values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    Text {
        text: String,
    },
    Media {
        reference: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Voice {
        reference: String,
    },
}

impl MessageBody {
    /// Readable text of the body: the text itself or a media caption.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text.as_str()),
            Self::Media { caption, .. } => caption.as_deref(),
            Self::Voice { .. } => None,
        }
    }
}

/// One observed chat message. Immutable once logged by the message store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub chat: String,
    pub sender: String,
    pub body: MessageBody,
    #[serde(default)]
    pub timestamp_unix_ms: u64,
    /// Position in the chat log; assigned when the store first logs the message.
    #[serde(default)]
    pub ordinal: u64,
    /// True when the watched identity sent this message.
    #[serde(default)]
    pub is_outgoing: bool,
}

impl Message {
    /// Builds an incoming text message with no timestamp or ordinal yet.
    pub fn text(
        chat: impl Into<String>,
        id: impl Into<MessageId>,
        sender: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            chat: chat.into(),
            sender: sender.into(),
            body: MessageBody::Text { text: text.into() },
            timestamp_unix_ms: 0,
            ordinal: 0,
            is_outgoing: false,
        }
    }

    pub fn outgoing(mut self) -> Self {
        self.is_outgoing = true;
        self
    }

    pub fn at(mut self, timestamp_unix_ms: u64) -> Self {
        self.timestamp_unix_ms = timestamp_unix_ms;
        self
    }

    pub fn body_text(&self) -> Option<&str> {
        self.body.text()
    }
}

/// Enumerates supported `MediaKind` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Voice,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Voice => "voice",
        }
    }
}

/// Outbound media attachment: a file path or URL understood by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPayload {
    pub kind: MediaKind,
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// A reaction currently attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: String,
    #[serde(default)]
    pub from_self: bool,
}
