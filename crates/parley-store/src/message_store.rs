//! Append-only per-chat message log with identity dedup.
//!
//! The transport hands over whatever is currently visible; the store works out
//! which of those messages are new. New messages are always appended after
//! everything already logged, so the diff is a suffix of the log.

use std::collections::{HashMap, HashSet, VecDeque};

use parley_contract::{Message, MessageId};

const MAX_GAP_MARKERS: usize = 16;

/// A logged message id with its ordinal. `message` is `None` for entries
/// restored from disk, where only identities are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedMessage {
    pub id: MessageId,
    pub ordinal: u64,
    pub message: Option<Message>,
}

/// Recorded when a visible window shared nothing with a non-empty log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapMarker {
    pub after_ordinal: Option<u64>,
    pub observed_unix_ms: u64,
    pub new_count: usize,
}

/// Observed history of one chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLog {
    chat: String,
    entries: VecDeque<LoggedMessage>,
    known: HashSet<MessageId>,
    next_ordinal: u64,
    last_polled_unix_ms: Option<u64>,
    last_outgoing: Option<MessageId>,
    gaps: Vec<GapMarker>,
}

impl ChatLog {
    pub fn new(chat: impl Into<String>) -> Self {
        Self {
            chat: chat.into(),
            entries: VecDeque::new(),
            known: HashSet::new(),
            next_ordinal: 0,
            last_polled_unix_ms: None,
            last_outgoing: None,
            gaps: Vec::new(),
        }
    }

    /// Rebuilds a log from persisted ids, oldest first. Ordinals are laid out
    /// so the last id sits just below `next_ordinal`.
    pub fn restore(
        chat: impl Into<String>,
        ids: Vec<MessageId>,
        next_ordinal: u64,
        last_polled_unix_ms: Option<u64>,
        last_outgoing: Option<MessageId>,
    ) -> Self {
        let mut known = HashSet::new();
        let ids = ids
            .into_iter()
            .filter(|id| known.insert(id.clone()))
            .collect::<Vec<_>>();
        let count = u64::try_from(ids.len()).unwrap_or(u64::MAX);
        let next_ordinal = next_ordinal.max(count);
        let first_ordinal = next_ordinal - count;
        let entries = ids
            .into_iter()
            .zip(first_ordinal..)
            .map(|(id, ordinal)| LoggedMessage {
                id,
                ordinal,
                message: None,
            })
            .collect();
        Self {
            chat: chat.into(),
            entries,
            known,
            next_ordinal,
            last_polled_unix_ms,
            last_outgoing,
            gaps: Vec::new(),
        }
    }

    pub fn chat(&self) -> &str {
        &self.chat
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.known.contains(id)
    }

    pub fn next_ordinal(&self) -> u64 {
        self.next_ordinal
    }

    pub fn tail_ordinal(&self) -> Option<u64> {
        self.entries.back().map(|entry| entry.ordinal)
    }

    pub fn last_polled_unix_ms(&self) -> Option<u64> {
        self.last_polled_unix_ms
    }

    pub fn last_outgoing(&self) -> Option<&MessageId> {
        self.last_outgoing.as_ref()
    }

    pub fn gaps(&self) -> &[GapMarker] {
        &self.gaps
    }

    pub fn entries(&self) -> impl Iterator<Item = &LoggedMessage> {
        self.entries.iter()
    }

    pub fn message_ids(&self) -> Vec<MessageId> {
        self.entries.iter().map(|entry| entry.id.clone()).collect()
    }

    /// Most recent messages with known content, oldest first.
    pub fn recent_messages(&self, limit: usize) -> Vec<Message> {
        let mut recent = self
            .entries
            .iter()
            .rev()
            .filter_map(|entry| entry.message.clone())
            .take(limit)
            .collect::<Vec<_>>();
        recent.reverse();
        recent
    }

    fn push(&mut self, mut message: Message) -> Message {
        message.ordinal = self.next_ordinal;
        self.next_ordinal = self.next_ordinal.saturating_add(1);
        if message.is_outgoing {
            self.last_outgoing = Some(message.id.clone());
        }
        self.known.insert(message.id.clone());
        self.entries.push_back(LoggedMessage {
            id: message.id.clone(),
            ordinal: message.ordinal,
            message: Some(message.clone()),
        });
        message
    }

    fn enforce_retention(&mut self, cap: usize) {
        while self.entries.len() > cap {
            if let Some(evicted) = self.entries.pop_front() {
                self.known.remove(&evicted.id);
            }
        }
    }
}

/// Result of diffing a visible window against the log, before committing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestPreview {
    /// Unseen messages after the newest already-logged visible message.
    pub new_messages: Vec<Message>,
    /// Unseen messages above the newest already-logged visible message.
    pub backfill: Vec<Message>,
    pub possible_gap: bool,
    visible_len: usize,
}

impl IngestPreview {
    pub fn is_empty(&self) -> bool {
        self.new_messages.is_empty() && self.backfill.is_empty()
    }

    pub fn has_incoming(&self) -> bool {
        self.new_messages.iter().any(|message| !message.is_outgoing)
    }

    pub fn new_ids(&self) -> HashSet<MessageId> {
        self.new_messages
            .iter()
            .map(|message| message.id.clone())
            .collect()
    }
}

/// Messages appended by one ingest, with their ordinals assigned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub new_messages: Vec<Message>,
    pub backfilled: usize,
    pub possible_gap: bool,
}

/// Logs for every watched chat.
#[derive(Debug, Clone)]
pub struct MessageStore {
    logs: HashMap<String, ChatLog>,
    retention: usize,
}

impl MessageStore {
    pub fn new(retention: usize) -> Self {
        Self {
            logs: HashMap::new(),
            retention: retention.max(1),
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    pub fn insert_log(&mut self, log: ChatLog) {
        self.logs.insert(log.chat.clone(), log);
    }

    pub fn log(&self, chat: &str) -> Option<&ChatLog> {
        self.logs.get(chat)
    }

    /// Diffs `visible` against the chat's log without changing anything.
    /// Ordinals in the preview are the ones a commit would assign.
    pub fn preview(&self, chat: &str, visible: &[Message]) -> IngestPreview {
        let log = self.logs.get(chat);
        let mut in_window = HashSet::new();
        let mut unseen = Vec::new();
        let mut anchor = None;
        for (position, message) in visible.iter().enumerate() {
            if !in_window.insert(&message.id) {
                continue;
            }
            if log.is_some_and(|log| log.contains(&message.id)) {
                anchor = Some(position);
            } else {
                unseen.push((position, message));
            }
        }

        let mut preview = IngestPreview {
            visible_len: visible.len(),
            ..IngestPreview::default()
        };
        match anchor {
            Some(anchor) => {
                for (position, message) in unseen {
                    if position < anchor {
                        preview.backfill.push(message.clone());
                    } else {
                        preview.new_messages.push(message.clone());
                    }
                }
            }
            None => {
                preview.possible_gap =
                    log.is_some_and(|log| !log.is_empty()) && !unseen.is_empty();
                preview.new_messages = unseen
                    .into_iter()
                    .map(|(_, message)| message.clone())
                    .collect();
            }
        }

        let mut ordinal = log.map_or(0, ChatLog::next_ordinal);
        for message in preview
            .backfill
            .iter_mut()
            .chain(preview.new_messages.iter_mut())
        {
            message.ordinal = ordinal;
            ordinal = ordinal.saturating_add(1);
        }
        preview
    }

    /// Appends a preview's messages to the log, backfill first.
    pub fn commit(&mut self, chat: &str, preview: IngestPreview, now_unix_ms: u64) -> IngestOutcome {
        let cap = self.retention.max(preview.visible_len);
        let log = self
            .logs
            .entry(chat.to_string())
            .or_insert_with(|| ChatLog::new(chat));

        let mut backfilled = 0_usize;
        for message in preview.backfill {
            if !log.contains(&message.id) {
                log.push(message);
                backfilled = backfilled.saturating_add(1);
            }
        }

        let after_ordinal = log.tail_ordinal();
        let mut new_messages = Vec::with_capacity(preview.new_messages.len());
        for message in preview.new_messages {
            if !log.contains(&message.id) {
                new_messages.push(log.push(message));
            }
        }

        if preview.possible_gap && !new_messages.is_empty() {
            log.gaps.push(GapMarker {
                after_ordinal,
                observed_unix_ms: now_unix_ms,
                new_count: new_messages.len(),
            });
            if log.gaps.len() > MAX_GAP_MARKERS {
                let excess = log.gaps.len() - MAX_GAP_MARKERS;
                log.gaps.drain(..excess);
            }
        }
        log.enforce_retention(cap);

        IngestOutcome {
            new_messages,
            backfilled,
            possible_gap: preview.possible_gap,
        }
    }

    /// Diffs and commits in one step.
    pub fn ingest(&mut self, chat: &str, visible: &[Message], now_unix_ms: u64) -> IngestOutcome {
        let preview = self.preview(chat, visible);
        self.commit(chat, preview, now_unix_ms)
    }

    /// Logs every visible message as already seen; returns how many were added.
    pub fn baseline(&mut self, chat: &str, visible: &[Message], now_unix_ms: u64) -> usize {
        let mut preview = self.preview(chat, visible);
        preview.possible_gap = false;
        let outcome = self.commit(chat, preview, now_unix_ms);
        outcome.new_messages.len().saturating_add(outcome.backfilled)
    }

    pub fn mark_polled(&mut self, chat: &str, now_unix_ms: u64) {
        self.logs
            .entry(chat.to_string())
            .or_insert_with(|| ChatLog::new(chat))
            .last_polled_unix_ms = Some(now_unix_ms);
    }
}

#[cfg(test)]
mod tests {
    use parley_contract::{Message, MessageId};

    use super::{ChatLog, MessageStore};

    fn window(ids: &[&str]) -> Vec<Message> {
        ids.iter()
            .map(|id| Message::text("Tennis A", *id, "Bob", format!("body {id}")))
            .collect()
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|message| message.id.as_str()).collect()
    }

    #[test]
    fn functional_ingest_returns_unseen_suffix_in_order() {
        let mut store = MessageStore::new(100);
        let first = store.ingest("Tennis A", &window(&["m1", "m2"]), 10);
        assert_eq!(ids(&first.new_messages), vec!["m1", "m2"]);
        assert!(!first.possible_gap);

        let second = store.ingest("Tennis A", &window(&["m1", "m2", "m3", "m4"]), 20);
        assert_eq!(ids(&second.new_messages), vec!["m3", "m4"]);
        assert_eq!(second.new_messages[0].ordinal, 2);
        assert_eq!(second.new_messages[1].ordinal, 3);
    }

    #[test]
    fn unit_ingest_of_unchanged_window_is_empty() {
        let mut store = MessageStore::new(100);
        store.ingest("Tennis A", &window(&["m1", "m2"]), 10);
        let again = store.ingest("Tennis A", &window(&["m1", "m2"]), 20);
        assert!(again.new_messages.is_empty());
        assert_eq!(again.backfilled, 0);
    }

    #[test]
    fn unit_ingest_ignores_duplicate_ids_inside_one_window() {
        let mut store = MessageStore::new(100);
        let outcome = store.ingest("Tennis A", &window(&["m1", "m1", "m2"]), 10);
        assert_eq!(ids(&outcome.new_messages), vec!["m1", "m2"]);
    }

    #[test]
    fn regression_shifted_window_without_overlap_is_new_and_flags_gap() {
        let mut store = MessageStore::new(100);
        store.ingest("Tennis A", &window(&["m1", "m2", "m3", "m4"]), 10);
        let outcome = store.ingest("Tennis A", &window(&["m5", "m6"]), 20);
        assert_eq!(ids(&outcome.new_messages), vec!["m5", "m6"]);
        assert!(outcome.possible_gap);

        let log = store.log("Tennis A").expect("log");
        assert_eq!(log.gaps().len(), 1);
        assert_eq!(log.gaps()[0].after_ordinal, Some(3));
        assert_eq!(log.gaps()[0].new_count, 2);
    }

    #[test]
    fn unit_history_scrolled_into_view_is_backfilled_not_new() {
        let mut store = MessageStore::new(100);
        store.ingest("Tennis A", &window(&["m3", "m4"]), 10);
        let outcome = store.ingest("Tennis A", &window(&["m1", "m2", "m3", "m4", "m5"]), 20);
        assert_eq!(ids(&outcome.new_messages), vec!["m5"]);
        assert_eq!(outcome.backfilled, 2);
        assert!(!outcome.possible_gap);
        let log = store.log("Tennis A").expect("log");
        assert_eq!(
            log.message_ids().last().map(MessageId::as_str),
            Some("m5"),
            "new messages must stay at the tail"
        );
    }

    #[test]
    fn unit_preview_leaves_store_untouched() {
        let mut store = MessageStore::new(100);
        store.ingest("Tennis A", &window(&["m1"]), 10);
        let visible = window(&["m1", "m2"]);
        let first = store.preview("Tennis A", &visible);
        let second = store.preview("Tennis A", &visible);
        assert_eq!(first, second);
        assert_eq!(store.log("Tennis A").expect("log").len(), 1);
    }

    #[test]
    fn unit_retention_evicts_oldest_but_never_below_window_size() {
        let mut store = MessageStore::new(3);
        store.ingest("Tennis A", &window(&["m1", "m2", "m3", "m4"]), 10);
        assert_eq!(store.log("Tennis A").expect("log").len(), 4);

        store.ingest("Tennis A", &window(&["m4", "m5"]), 20);
        let log = store.log("Tennis A").expect("log");
        assert_eq!(log.len(), 3);
        assert!(!log.contains(&MessageId::new("m1")));
        assert!(log.contains(&MessageId::new("m5")));
    }

    #[test]
    fn unit_baseline_marks_visible_messages_seen() {
        let mut store = MessageStore::new(100);
        assert_eq!(store.baseline("Tennis A", &window(&["m1", "m2"]), 10), 2);
        let outcome = store.ingest("Tennis A", &window(&["m1", "m2", "m3"]), 20);
        assert_eq!(ids(&outcome.new_messages), vec!["m3"]);
    }

    #[test]
    fn unit_outgoing_messages_move_last_outgoing_pointer() {
        let mut store = MessageStore::new(100);
        let mut visible = window(&["m1"]);
        visible.push(Message::text("Tennis A", "m2", "Me", "on my way").outgoing());
        store.ingest("Tennis A", &visible, 10);
        let log = store.log("Tennis A").expect("log");
        assert_eq!(log.last_outgoing().map(MessageId::as_str), Some("m2"));
    }

    #[test]
    fn unit_restore_keeps_ordinals_below_next_ordinal() {
        let log = ChatLog::restore(
            "Tennis A",
            vec![MessageId::new("m8"), MessageId::new("m9")],
            10,
            Some(5),
            None,
        );
        let ordinals = log.entries().map(|entry| entry.ordinal).collect::<Vec<_>>();
        assert_eq!(ordinals, vec![8, 9]);
        assert!(log.recent_messages(10).is_empty());

        let mut store = MessageStore::new(100);
        store.insert_log(log);
        let outcome = store.ingest("Tennis A", &window(&["m9", "m10"]), 20);
        assert_eq!(ids(&outcome.new_messages), vec!["m10"]);
        assert_eq!(outcome.new_messages[0].ordinal, 10);
    }
}
