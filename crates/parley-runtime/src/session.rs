//! Serialized access to the shared transport session.
//!
//! Decisions run concurrently, but the messaging client has one selected
//! conversation at a time. Every physical operation takes the session lock,
//! selects its chat, checks the handle names that chat, and only then acts.

use std::sync::Arc;

use parley_contract::{ChatHandle, ChatTransport, MediaPayload, Message, MessageId, Reaction, TransportError};
use tokio::sync::Mutex as AsyncMutex;

pub struct TransportSession {
    transport: Arc<dyn ChatTransport>,
    gate: AsyncMutex<()>,
}

impl TransportSession {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            transport,
            gate: AsyncMutex::new(()),
        }
    }

    async fn select(&self, chat: &str) -> Result<ChatHandle, TransportError> {
        let handle = self.transport.navigate_to_chat(chat).await?;
        if !handle.is_for(chat) {
            return Err(TransportError::Transient(format!(
                "navigation selected '{}' instead of '{chat}'",
                handle.chat
            )));
        }
        Ok(handle)
    }

    /// Visible messages of `chat`. Messages tagged with another chat are
    /// discarded.
    pub async fn read_visible(&self, chat: &str) -> Result<Vec<Message>, TransportError> {
        let _guard = self.gate.lock().await;
        let handle = self.select(chat).await?;
        let mut messages = self.transport.read_visible_messages(&handle).await?;
        let before = messages.len();
        messages.retain(|message| message.chat == chat);
        if messages.len() != before {
            tracing::warn!(
                chat,
                discarded = before - messages.len(),
                "transport returned messages from another chat"
            );
        }
        Ok(messages)
    }

    pub async fn send_text(&self, chat: &str, text: &str) -> Result<(), TransportError> {
        let _guard = self.gate.lock().await;
        let handle = self.select(chat).await?;
        self.transport.send_text(&handle, text).await
    }

    pub async fn send_media(&self, chat: &str, media: &MediaPayload) -> Result<(), TransportError> {
        let _guard = self.gate.lock().await;
        let handle = self.select(chat).await?;
        self.transport.send_media(&handle, media).await
    }

    pub async fn react(
        &self,
        chat: &str,
        message_id: &MessageId,
        emoji: &str,
    ) -> Result<(), TransportError> {
        let _guard = self.gate.lock().await;
        let handle = self.select(chat).await?;
        self.transport.react(&handle, message_id, emoji).await
    }

    pub async fn reactions(
        &self,
        chat: &str,
        message_id: &MessageId,
    ) -> Result<Vec<Reaction>, TransportError> {
        let _guard = self.gate.lock().await;
        let handle = self.select(chat).await?;
        self.transport.read_reactions(&handle, message_id).await
    }
}
