//! In-memory `ChatState` per chat, with identity fingerprints for staleness.

use std::collections::HashMap;

use parley_contract::{ChatState, MessageId};
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 over the ordered ids, one per line.
pub fn fingerprint_message_ids<'a>(ids: impl IntoIterator<Item = &'a MessageId>) -> String {
    let mut hasher = Sha256::new();
    for id in ids {
        hasher.update(id.as_str().as_bytes());
        hasher.update(b"\n");
    }
    hasher
        .finalize()
        .iter()
        .map(|value| format!("{value:02x}"))
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct StateCache {
    states: HashMap<String, ChatState>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the chat's state, or an empty one with no fingerprint.
    pub fn get(&self, chat: &str) -> ChatState {
        self.states.get(chat).cloned().unwrap_or_default()
    }

    pub fn put(&mut self, chat: &str, state: ChatState) {
        self.states.insert(chat.to_string(), state);
    }

    /// True iff the fingerprint of `current` differs from the cached one.
    pub fn is_stale(&self, chat: &str, current: &[MessageId]) -> bool {
        let current = fingerprint_message_ids(current);
        self.states
            .get(chat)
            .and_then(|state| state.fingerprint.as_deref())
            != Some(current.as_str())
    }
}
