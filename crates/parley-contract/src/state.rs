use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::{Action, ActionKind};
use crate::message::MessageId;

/// Per-chat conversational state carried between polling cycles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatState {
    /// Opaque context owned by the decision engine.
    #[serde(default)]
    pub context: Value,
    /// Hash of the ordered message ids this state was derived from.
    #[serde(default)]
    pub fingerprint: Option<String>,
    /// Kinds already dispatched per message. Pruned to the messages still in
    /// the chat log.
    #[serde(default)]
    pub dispatched: BTreeMap<MessageId, BTreeSet<ActionKind>>,
    #[serde(default)]
    pub last_reply_to: Option<MessageId>,
    /// Accepted actions whose side effect may be in flight.
    #[serde(default)]
    pub pending: Vec<Action>,
}

impl ChatState {
    pub fn is_dispatched(&self, message_id: &MessageId, kind: ActionKind) -> bool {
        self.dispatched
            .get(message_id)
            .is_some_and(|kinds| kinds.contains(&kind))
    }

    pub fn is_pending(&self, message_id: &MessageId, kind: ActionKind) -> bool {
        self.pending
            .iter()
            .any(|action| action.kind() == kind && action.message_id() == message_id)
    }

    /// Records `(message_id, kind)`; returns false when it was already present.
    pub fn record_dispatched(&mut self, message_id: &MessageId, kind: ActionKind) -> bool {
        self.dispatched
            .entry(message_id.clone())
            .or_default()
            .insert(kind)
    }

    /// Drops dispatch records for messages `keep` rejects; returns how many
    /// message entries were removed.
    pub fn prune_dispatched(&mut self, keep: impl Fn(&MessageId) -> bool) -> usize {
        let before = self.dispatched.len();
        self.dispatched.retain(|message_id, _| keep(message_id));
        before - self.dispatched.len()
    }

    pub fn dispatched_count(&self) -> usize {
        self.dispatched.values().map(BTreeSet::len).sum()
    }
}
