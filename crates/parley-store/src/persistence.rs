//! One JSON record per chat under `<state_dir>/chats/`.
//!
//! Records are replaced atomically, so an interrupted save leaves the previous
//! record intact. A missing or unreadable record only resets its own chat.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parley_contract::{Action, ActionKind, ChatState, MessageId};
use parley_core::{current_unix_timestamp_ms, read_text_if_exists, write_text_atomic};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::message_store::ChatLog;

pub const CHAT_RECORD_SCHEMA_VERSION: u32 = 1;
const CHATS_DIR: &str = "chats";

fn chat_record_schema_version() -> u32 {
    CHAT_RECORD_SCHEMA_VERSION
}

/// Durable form of one chat's log and state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    #[serde(default = "chat_record_schema_version")]
    pub schema_version: u32,
    pub chat_id: String,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub chat_state_blob: Value,
    #[serde(default)]
    pub dispatched_actions: BTreeMap<MessageId, BTreeSet<ActionKind>>,
    /// Logged ids, oldest first, bounded by the retention cap.
    #[serde(default)]
    pub message_log: Vec<MessageId>,
    #[serde(default)]
    pub next_ordinal: u64,
    #[serde(default)]
    pub last_polled_unix_ms: Option<u64>,
    #[serde(default)]
    pub last_outgoing: Option<MessageId>,
    #[serde(default)]
    pub last_reply_to: Option<MessageId>,
    #[serde(default)]
    pub pending: Vec<Action>,
}

impl ChatRecord {
    pub fn from_parts(log: &ChatLog, state: &ChatState, retention: usize) -> Self {
        let mut message_log = log.message_ids();
        if message_log.len() > retention {
            let keep_from = message_log.len() - retention;
            message_log.drain(..keep_from);
        }
        Self {
            schema_version: CHAT_RECORD_SCHEMA_VERSION,
            chat_id: log.chat().to_string(),
            fingerprint: state.fingerprint.clone(),
            chat_state_blob: state.context.clone(),
            dispatched_actions: state.dispatched.clone(),
            message_log,
            next_ordinal: log.next_ordinal(),
            last_polled_unix_ms: log.last_polled_unix_ms(),
            last_outgoing: log.last_outgoing().cloned(),
            last_reply_to: state.last_reply_to.clone(),
            pending: state.pending.clone(),
        }
    }

    pub fn into_parts(self) -> (ChatLog, ChatState) {
        let log = ChatLog::restore(
            self.chat_id,
            self.message_log,
            self.next_ordinal,
            self.last_polled_unix_ms,
            self.last_outgoing,
        );
        let state = ChatState {
            context: self.chat_state_blob,
            fingerprint: self.fingerprint,
            dispatched: self.dispatched_actions,
            last_reply_to: self.last_reply_to,
            pending: self.pending,
        };
        (log, state)
    }
}

/// File name for a chat: a readable slug plus a short hash of the exact name,
/// so names differing only in punctuation never share a file.
fn chat_file_name(chat: &str) -> String {
    let slug = chat
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .take(48)
        .collect::<String>();
    let digest = Sha256::digest(chat.as_bytes());
    let suffix = digest[..4]
        .iter()
        .map(|value| format!("{value:02x}"))
        .collect::<String>();
    format!("{slug}-{suffix}.json")
}

#[derive(Debug, Clone)]
pub struct PersistenceLayer {
    root: PathBuf,
    retention: usize,
}

impl PersistenceLayer {
    pub fn new(state_dir: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            root: state_dir.into(),
            retention: retention.max(1),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.root
    }

    pub fn chat_path(&self, chat: &str) -> PathBuf {
        self.root.join(CHATS_DIR).join(chat_file_name(chat))
    }

    pub fn record_for(&self, log: &ChatLog, state: &ChatState) -> ChatRecord {
        ChatRecord::from_parts(log, state, self.retention)
    }

    /// Loads a chat's record. Missing files yield `None`; unparsable files are
    /// moved aside and also yield `None`. Only I/O failures are errors.
    pub fn load_chat(&self, chat: &str) -> Result<Option<ChatRecord>> {
        let path = self.chat_path(chat);
        let Some(raw) = read_text_if_exists(&path)? else {
            return Ok(None);
        };
        let record = match serde_json::from_str::<ChatRecord>(&raw) {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(
                    chat,
                    path = %path.display(),
                    %error,
                    "chat record is unreadable; starting this chat from empty state"
                );
                self.quarantine(&path);
                return Ok(None);
            }
        };
        if record.schema_version != CHAT_RECORD_SCHEMA_VERSION {
            tracing::warn!(
                chat,
                found = record.schema_version,
                expected = CHAT_RECORD_SCHEMA_VERSION,
                "chat record schema mismatch; starting this chat from empty state"
            );
            self.quarantine(&path);
            return Ok(None);
        }
        if record.chat_id != chat {
            tracing::warn!(
                chat,
                stored = %record.chat_id,
                "chat record belongs to another chat; ignoring it"
            );
            return Ok(None);
        }
        Ok(Some(record))
    }

    pub fn save_chat(&self, record: &ChatRecord) -> Result<()> {
        let path = self.chat_path(&record.chat_id);
        let mut payload =
            serde_json::to_string_pretty(record).context("failed to serialize chat record")?;
        payload.push('\n');
        write_text_atomic(&path, &payload)
            .with_context(|| format!("failed to write chat record {}", path.display()))
    }

    /// Saves with one retry; the second failure is returned to the caller.
    pub fn save_chat_with_retry(&self, record: &ChatRecord) -> Result<()> {
        match self.save_chat(record) {
            Ok(()) => Ok(()),
            Err(error) => {
                tracing::warn!(chat = %record.chat_id, error = %format!("{error:#}"), "retrying chat record save");
                self.save_chat(record)
            }
        }
    }

    fn quarantine(&self, path: &Path) {
        let target = PathBuf::from(format!(
            "{}.corrupt-{}",
            path.display(),
            current_unix_timestamp_ms()
        ));
        if let Err(error) = std::fs::rename(path, &target) {
            tracing::warn!(path = %path.display(), %error, "failed to move unreadable chat record aside");
        }
    }
}

#[cfg(test)]
mod tests {
    use parley_contract::{Action, ActionKind, ChatState, Message, MessageId};
    use serde_json::json;

    use super::{chat_file_name, PersistenceLayer};
    use crate::message_store::MessageStore;

    fn sample_parts(chat: &str) -> (crate::ChatLog, ChatState) {
        let mut store = MessageStore::new(100);
        store.ingest(
            chat,
            &[
                Message::text(chat, "m1", "Bob", "1) Bob"),
                Message::text(chat, "m2", "Me", "hi").outgoing(),
            ],
            10,
        );
        store.mark_polled(chat, 11);
        let mut state = ChatState {
            context: json!({"facts": ["plays tennis"]}),
            fingerprint: Some("abc".to_string()),
            ..ChatState::default()
        };
        state.record_dispatched(&MessageId::new("m1"), ActionKind::Reply);
        state.last_reply_to = Some(MessageId::new("m1"));
        (store.log(chat).expect("log").clone(), state)
    }

    #[test]
    fn unit_chat_file_name_is_filesystem_safe_and_collision_resistant() {
        let spaced = chat_file_name("Tennis A");
        let underscored = chat_file_name("Tennis_A");
        assert!(spaced.starts_with("tennis_a-"));
        assert!(spaced.ends_with(".json"));
        assert_ne!(spaced, underscored);
        assert!(!chat_file_name("../../etc/passwd").contains('/'));
    }

    #[test]
    fn functional_save_then_load_restores_log_and_state() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let layer = PersistenceLayer::new(tempdir.path(), 100);
        let (log, state) = sample_parts("Tennis A");
        layer
            .save_chat(&layer.record_for(&log, &state))
            .expect("save");

        let record = layer
            .load_chat("Tennis A")
            .expect("load")
            .expect("record present");
        assert_eq!(record.message_log, vec![MessageId::new("m1"), MessageId::new("m2")]);
        assert_eq!(record.next_ordinal, 2);
        let (restored_log, restored_state) = record.into_parts();
        assert_eq!(restored_log.last_polled_unix_ms(), Some(11));
        assert_eq!(restored_log.last_outgoing().map(MessageId::as_str), Some("m2"));
        assert_eq!(restored_state, state);
    }

    #[test]
    fn unit_load_missing_chat_returns_none() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let layer = PersistenceLayer::new(tempdir.path(), 100);
        assert!(layer.load_chat("Nobody").expect("load").is_none());
    }

    #[test]
    fn regression_truncated_record_resets_only_its_own_chat() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let layer = PersistenceLayer::new(tempdir.path(), 100);
        for chat in ["Tennis A", "Family"] {
            let (log, state) = sample_parts(chat);
            layer
                .save_chat(&layer.record_for(&log, &state))
                .expect("save");
        }

        let broken_path = layer.chat_path("Tennis A");
        let raw = std::fs::read_to_string(&broken_path).expect("read");
        std::fs::write(&broken_path, &raw[..raw.len() / 2]).expect("truncate");

        assert!(layer.load_chat("Tennis A").expect("load").is_none());
        assert!(!broken_path.exists(), "unreadable record should be moved aside");
        let family = layer.load_chat("Family").expect("load").expect("record");
        assert_eq!(family.chat_id, "Family");
        assert_eq!(family.dispatched_actions.len(), 1);
    }

    #[test]
    fn unit_record_message_log_respects_retention() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let layer = PersistenceLayer::new(tempdir.path(), 1);
        let (log, state) = sample_parts("Tennis A");
        let record = layer.record_for(&log, &state);
        assert_eq!(record.message_log, vec![MessageId::new("m2")]);
        assert_eq!(record.next_ordinal, 2);
    }

    #[test]
    fn unit_pending_actions_survive_round_trip() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let layer = PersistenceLayer::new(tempdir.path(), 100);
        let (log, mut state) = sample_parts("Tennis A");
        state.pending = vec![Action::react("m1", "🤡")];
        layer
            .save_chat(&layer.record_for(&log, &state))
            .expect("save");
        let record = layer.load_chat("Tennis A").expect("load").expect("record");
        assert_eq!(record.pending, vec![Action::react("m1", "🤡")]);
    }
}
