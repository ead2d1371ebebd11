//! File-backed transport for driving the runtime from an external bridge.
//!
//! The bridge keeps `<ingress>/<chat>.ndjson` holding the chat's currently
//! visible messages, oldest first, one JSON object per line. Everything the
//! runtime sends or reacts with is appended to `<outbox>/<chat>.jsonl`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parley_contract::{
    ChatHandle, ChatTransport, MediaKind, MediaPayload, Message, MessageBody, MessageId, Reaction,
    TransportError,
};
use parley_core::current_unix_timestamp_ms;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

const INGRESS_EXTENSION: &str = "ndjson";
const OUTBOX_EXTENSION: &str = "jsonl";

/// File stem used for a chat in both directories.
pub fn chat_file_stem(chat: &str) -> String {
    let stem = chat
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || matches!(ch, ' ' | '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>();
    let stem = stem.trim_matches('.');
    if stem.is_empty() {
        "chat".to_string()
    } else {
        stem.to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct IngressMedia {
    kind: MediaKind,
    reference: String,
    #[serde(default)]
    caption: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct IngressLine {
    id: String,
    #[serde(default)]
    sender: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    media: Option<IngressMedia>,
    #[serde(default)]
    timestamp_unix_ms: u64,
    #[serde(default)]
    outgoing: Option<bool>,
    #[serde(default)]
    reactions: Vec<Reaction>,
}

impl IngressLine {
    fn into_message(self, chat: &str, self_name: &str) -> Message {
        let body = match self.media {
            Some(IngressMedia {
                kind: MediaKind::Voice,
                reference,
                ..
            }) => MessageBody::Voice { reference },
            Some(IngressMedia {
                kind: MediaKind::Image,
                reference,
                caption,
            }) => MessageBody::Media {
                reference,
                caption: caption.or(self.text),
            },
            None => MessageBody::Text {
                text: self.text.unwrap_or_default(),
            },
        };
        let is_outgoing = self
            .outgoing
            .unwrap_or_else(|| !self_name.is_empty() && self.sender == self_name);
        Message {
            id: MessageId::new(self.id),
            chat: chat.to_string(),
            sender: self.sender,
            body,
            timestamp_unix_ms: self.timestamp_unix_ms,
            ordinal: 0,
            is_outgoing,
        }
    }
}

/// One line of a chat's outbox file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub timestamp_unix_ms: u64,
    pub chat: String,
    #[serde(flatten)]
    pub entry: OutboxEntry,
}

/// Enumerates supported `OutboxEntry` values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OutboxEntry {
    Text { text: String },
    Media { media: MediaPayload },
    React { message_id: MessageId, emoji: String },
}

#[derive(Debug, Clone)]
pub struct FileTransport {
    ingress_dir: PathBuf,
    outbox_dir: PathBuf,
    self_name: String,
}

impl FileTransport {
    pub fn new(
        ingress_dir: impl Into<PathBuf>,
        outbox_dir: impl Into<PathBuf>,
        self_name: impl Into<String>,
    ) -> Self {
        Self {
            ingress_dir: ingress_dir.into(),
            outbox_dir: outbox_dir.into(),
            self_name: self_name.into(),
        }
    }

    pub fn ingress_path(&self, chat: &str) -> PathBuf {
        self.ingress_dir
            .join(format!("{}.{INGRESS_EXTENSION}", chat_file_stem(chat)))
    }

    pub fn outbox_path(&self, chat: &str) -> PathBuf {
        self.outbox_dir
            .join(format!("{}.{OUTBOX_EXTENSION}", chat_file_stem(chat)))
    }

    async fn read_ingress(&self, chat: &str) -> Result<Vec<IngressLine>, TransportError> {
        let path = self.ingress_path(chat);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(TransportError::NotFound(chat.to_string()));
            }
            Err(error) => {
                return Err(TransportError::Transient(format!(
                    "failed to read {}: {error}",
                    path.display()
                )));
            }
        };
        let mut lines = Vec::new();
        for (index, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<IngressLine>(line) {
                Ok(parsed) => lines.push(parsed),
                Err(error) => tracing::warn!(
                    chat,
                    path = %path.display(),
                    line = index + 1,
                    %error,
                    "skipping unreadable ingress line"
                ),
            }
        }
        Ok(lines)
    }

    async fn read_outbox(&self, chat: &str) -> Result<Vec<OutboxRecord>, TransportError> {
        let path = self.outbox_path(chat);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(TransportError::Transient(format!(
                    "failed to read {}: {error}",
                    path.display()
                )));
            }
        };
        Ok(raw
            .lines()
            .filter_map(|line| serde_json::from_str::<OutboxRecord>(line).ok())
            .collect())
    }

    async fn append_outbox(&self, chat: &str, entry: OutboxEntry) -> Result<(), TransportError> {
        let record = OutboxRecord {
            timestamp_unix_ms: current_unix_timestamp_ms(),
            chat: chat.to_string(),
            entry,
        };
        let mut line = serde_json::to_string(&record)
            .map_err(|error| TransportError::Fatal(format!("failed to encode outbox record: {error}")))?;
        line.push('\n');
        let path = self.outbox_path(chat);
        append_bytes(&path, line.as_bytes()).await.map_err(|error| {
            TransportError::Transient(format!("failed to append {}: {error}", path.display()))
        })
    }
}

async fn append_bytes(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await
}

#[async_trait]
impl ChatTransport for FileTransport {
    async fn navigate_to_chat(&self, name: &str) -> Result<ChatHandle, TransportError> {
        let path = self.ingress_path(name);
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => {
                Ok(ChatHandle::new(name, path.display().to_string()))
            }
            Ok(_) => Err(TransportError::NotFound(name.to_string())),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                Err(TransportError::NotFound(name.to_string()))
            }
            Err(error) => Err(TransportError::Transient(format!(
                "failed to stat {}: {error}",
                path.display()
            ))),
        }
    }

    async fn read_visible_messages(
        &self,
        handle: &ChatHandle,
    ) -> Result<Vec<Message>, TransportError> {
        Ok(self
            .read_ingress(&handle.chat)
            .await?
            .into_iter()
            .map(|line| line.into_message(&handle.chat, &self.self_name))
            .collect())
    }

    async fn send_text(&self, handle: &ChatHandle, text: &str) -> Result<(), TransportError> {
        self.append_outbox(
            &handle.chat,
            OutboxEntry::Text {
                text: text.to_string(),
            },
        )
        .await
    }

    async fn send_media(
        &self,
        handle: &ChatHandle,
        media: &MediaPayload,
    ) -> Result<(), TransportError> {
        self.append_outbox(
            &handle.chat,
            OutboxEntry::Media {
                media: media.clone(),
            },
        )
        .await
    }

    async fn react(
        &self,
        handle: &ChatHandle,
        message_id: &MessageId,
        emoji: &str,
    ) -> Result<(), TransportError> {
        self.append_outbox(
            &handle.chat,
            OutboxEntry::React {
                message_id: message_id.clone(),
                emoji: emoji.to_string(),
            },
        )
        .await
    }

    /// Reactions listed on the ingress line plus the ones this transport
    /// already wrote to the outbox.
    async fn read_reactions(
        &self,
        handle: &ChatHandle,
        message_id: &MessageId,
    ) -> Result<Vec<Reaction>, TransportError> {
        let mut reactions = match self.read_ingress(&handle.chat).await {
            Ok(lines) => lines
                .into_iter()
                .find(|line| line.id == message_id.as_str())
                .map(|line| line.reactions)
                .unwrap_or_default(),
            Err(TransportError::NotFound(_)) => Vec::new(),
            Err(error) => return Err(error),
        };
        for record in self.read_outbox(&handle.chat).await? {
            if let OutboxEntry::React {
                message_id: reacted,
                emoji,
            } = record.entry
            {
                if &reacted == message_id {
                    reactions.push(Reaction {
                        emoji,
                        from_self: true,
                    });
                }
            }
        }
        Ok(reactions)
    }
}
