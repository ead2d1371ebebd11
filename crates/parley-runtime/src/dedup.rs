//! Filters a proposed batch down to actions that are safe to execute.
//!
//! Rules, applied in proposal order:
//! - an action whose `(message, kind)` was already dispatched or is still
//!   pending from an interrupted batch is dropped;
//! - a `Skip` loses to any surviving non-skip action on the same message;
//! - a message gets at most one reaction from this process;
//! - a repeated reply or media send for the same message keeps the first.
//!
//! A react and a reply on the same message are distinct kinds and both stay.

use std::collections::HashSet;

use parley_contract::{Action, ActionKind, ChatState, MessageId};

/// Enumerates supported `DropReason` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    AlreadyDispatched,
    AlreadyPending,
    SkipSuperseded,
    DuplicateInBatch,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyDispatched => "already_dispatched",
            Self::AlreadyPending => "already_pending",
            Self::SkipSuperseded => "skip_superseded",
            Self::DuplicateInBatch => "duplicate_in_batch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedAction {
    pub action: Action,
    pub reason: DropReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupOutcome {
    pub accepted: Vec<Action>,
    pub dropped: Vec<DroppedAction>,
}

fn prior_conflict(state: &ChatState, action: &Action) -> Option<DropReason> {
    let (message_id, kind) = (action.message_id(), action.kind());
    if state.is_dispatched(message_id, kind) {
        Some(DropReason::AlreadyDispatched)
    } else if state.is_pending(message_id, kind) {
        Some(DropReason::AlreadyPending)
    } else {
        None
    }
}

/// Splits `actions` into the ones to execute and the ones to drop.
pub fn filter_actions(state: &ChatState, actions: Vec<Action>) -> DedupOutcome {
    let answered = actions
        .iter()
        .filter(|action| action.kind().has_side_effect())
        .filter(|action| prior_conflict(state, action).is_none())
        .map(|action| action.message_id().clone())
        .collect::<HashSet<MessageId>>();

    let mut outcome = DedupOutcome::default();
    let mut taken = HashSet::<(MessageId, ActionKind)>::new();
    for action in actions {
        let reason = prior_conflict(state, &action).or_else(|| {
            if action.kind() == ActionKind::Skip && answered.contains(action.message_id()) {
                Some(DropReason::SkipSuperseded)
            } else if !taken.insert((action.message_id().clone(), action.kind())) {
                Some(DropReason::DuplicateInBatch)
            } else {
                None
            }
        });
        match reason {
            Some(reason) => outcome.dropped.push(DroppedAction { action, reason }),
            None => outcome.accepted.push(action),
        }
    }
    outcome
}
