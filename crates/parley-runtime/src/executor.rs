//! Executes accepted actions for one chat, in order, through the shared session.

use std::sync::Arc;

use parley_contract::{Action, ActionKind, ActionOutcome, ActionResult, ChatState, TransportError};

use crate::config::{RetryConfig, TypingDelayConfig};
use crate::retry::with_transport_retry;
use crate::session::TransportSession;

/// Splits reply text into one send per line. Lines are kept verbatim
/// (a trailing `\r` aside); lines with nothing but whitespace are dropped.
pub fn split_reply_text(text: &str) -> Vec<String> {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

fn reply_parts(text: &str, parts: Option<&Vec<String>>) -> Vec<String> {
    match parts {
        Some(parts) => parts
            .iter()
            .filter(|part| !part.trim().is_empty())
            .cloned()
            .collect(),
        None => split_reply_text(text),
    }
}

/// Result of one executed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub outcomes: Vec<ActionOutcome>,
    /// Physical sends and reactions that reached the transport.
    pub deliveries: usize,
    /// Set when the session was lost; remaining actions were not attempted.
    pub fatal: Option<TransportError>,
}

impl ExecutionReport {
    pub fn applied(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.result.is_applied())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.applied()
    }
}

fn failure(error: &TransportError) -> ActionResult {
    ActionResult::Failed {
        reason: error.to_string(),
        retryable: error.is_retryable(),
    }
}

pub struct ActionExecutor {
    session: Arc<TransportSession>,
    retry: RetryConfig,
    typing: TypingDelayConfig,
}

impl ActionExecutor {
    pub fn new(session: Arc<TransportSession>, retry: RetryConfig, typing: TypingDelayConfig) -> Self {
        Self {
            session,
            retry,
            typing,
        }
    }

    /// Runs `actions` strictly in order and records each success in
    /// `state.dispatched`. A fatal transport error stops the batch.
    pub async fn execute(
        &self,
        chat: &str,
        state: &mut ChatState,
        actions: &[Action],
    ) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        for action in actions {
            let result = match report.fatal.as_ref() {
                Some(fatal) => ActionResult::Failed {
                    reason: format!("not attempted: {fatal}"),
                    retryable: true,
                },
                None => self.execute_one(chat, state, action, &mut report).await,
            };
            if let ActionResult::Failed { reason, .. } = &result {
                tracing::warn!(
                    chat,
                    message_id = %action.message_id(),
                    kind = action.kind().as_str(),
                    reason = reason.as_str(),
                    "action failed"
                );
            }
            report.outcomes.push(ActionOutcome {
                action: action.clone(),
                result,
            });
        }
        report
    }

    async fn execute_one(
        &self,
        chat: &str,
        state: &mut ChatState,
        action: &Action,
        report: &mut ExecutionReport,
    ) -> ActionResult {
        let session = self.session.as_ref();
        let seed = format!("{chat}:{}:{}", action.message_id(), action.kind().as_str());
        let outcome = match action {
            Action::Skip { .. } => Ok(()),
            Action::React { message_id, emoji } => {
                with_transport_retry(&self.retry, &seed, move || {
                    session.react(chat, message_id, emoji)
                })
                .await
            }
            Action::SendMedia { media, .. } => {
                let delay = self
                    .typing
                    .delay_for(media.caption.as_deref().unwrap_or_default());
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                with_transport_retry(&self.retry, &seed, move || session.send_media(chat, media))
                    .await
            }
            Action::Reply { text, parts, .. } => {
                return self
                    .deliver_reply(chat, state, action, reply_parts(text, parts.as_ref()), report)
                    .await;
            }
        };
        match outcome {
            Ok(()) => {
                if action.kind().has_side_effect() {
                    report.deliveries = report.deliveries.saturating_add(1);
                }
                state.record_dispatched(action.message_id(), action.kind());
                tracing::debug!(chat, message_id = %action.message_id(), kind = action.kind().as_str(), "action applied");
                ActionResult::Applied
            }
            Err(error) => {
                let result = failure(&error);
                if error.is_fatal() {
                    report.fatal = Some(error);
                }
                result
            }
        }
    }

    async fn deliver_reply(
        &self,
        chat: &str,
        state: &mut ChatState,
        action: &Action,
        parts: Vec<String>,
        report: &mut ExecutionReport,
    ) -> ActionResult {
        if parts.is_empty() {
            return ActionResult::Failed {
                reason: "reply has no sendable text".to_string(),
                retryable: false,
            };
        }

        let session = self.session.as_ref();
        let total = parts.len();
        let mut delivered = 0_usize;
        let mut error = None;
        for (index, part) in parts.iter().enumerate() {
            let delay = self.typing.delay_for(part);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let seed = format!("{chat}:{}:reply:{index}", action.message_id());
            let part = part.as_str();
            match with_transport_retry(&self.retry, &seed, move || session.send_text(chat, part))
                .await
            {
                Ok(()) => delivered += 1,
                Err(send_error) => {
                    error = Some(send_error);
                    break;
                }
            }
        }
        report.deliveries = report.deliveries.saturating_add(delivered);

        // Partially delivered replies count as dispatched; resending would
        // duplicate the parts already in the chat.
        if delivered > 0 {
            state.record_dispatched(action.message_id(), ActionKind::Reply);
            state.last_reply_to = Some(action.message_id().clone());
        }
        match error {
            None => ActionResult::Applied,
            Some(error) => {
                let result = ActionResult::Failed {
                    reason: format!("delivered {delivered} of {total} parts: {error}"),
                    retryable: delivered == 0 && error.is_retryable(),
                };
                if error.is_fatal() {
                    report.fatal = Some(error);
                }
                result
            }
        }
    }
}
