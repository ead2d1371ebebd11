use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::{MediaPayload, Message, MessageId, Reaction};

/// Explicit reference to one selected conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatHandle {
    pub chat: String,
    /// Transport-specific locator (DOM id, file path, channel id).
    #[serde(default)]
    pub locator: String,
}

impl ChatHandle {
    pub fn new(chat: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            chat: chat.into(),
            locator: locator.into(),
        }
    }

    pub fn is_for(&self, chat: &str) -> bool {
        self.chat == chat
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Enumerates supported `TransportError` values.
pub enum TransportError {
    #[error("chat '{0}' not found")]
    NotFound(String),
    #[error("transient transport failure: {0}")]
    Transient(String),
    #[error("transport session lost: {0}")]
    Fatal(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

#[async_trait]
/// Trait contract for `ChatTransport` behavior.
pub trait ChatTransport: Send + Sync {
    async fn navigate_to_chat(&self, name: &str) -> Result<ChatHandle, TransportError>;

    async fn read_visible_messages(
        &self,
        handle: &ChatHandle,
    ) -> Result<Vec<Message>, TransportError>;

    async fn send_text(&self, handle: &ChatHandle, text: &str) -> Result<(), TransportError>;

    async fn send_media(
        &self,
        handle: &ChatHandle,
        media: &MediaPayload,
    ) -> Result<(), TransportError>;

    async fn react(
        &self,
        handle: &ChatHandle,
        message_id: &MessageId,
        emoji: &str,
    ) -> Result<(), TransportError>;

    async fn read_reactions(
        &self,
        handle: &ChatHandle,
        message_id: &MessageId,
    ) -> Result<Vec<Reaction>, TransportError>;
}
