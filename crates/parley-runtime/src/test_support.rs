use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use parley_contract::{
    ChatHandle, ChatTransport, Decision, DecisionEngine, DecisionError, DecisionRequest,
    MediaPayload, Message, MessageId, Reaction, TransportError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TransportOp {
    Text {
        chat: String,
        text: String,
    },
    Media {
        chat: String,
        reference: String,
    },
    React {
        chat: String,
        message_id: String,
        emoji: String,
    },
}

#[derive(Default)]
struct TransportScript {
    visible: HashMap<String, Vec<Message>>,
    misroutes: HashMap<String, String>,
    read_failures: HashMap<String, VecDeque<TransportError>>,
    op_failures: VecDeque<TransportError>,
    op_failures_at: HashMap<usize, TransportError>,
    attempts: usize,
    ops: Vec<TransportOp>,
    reactions: HashMap<(String, String), Vec<Reaction>>,
    reads: usize,
}

/// In-memory transport whose visible windows and failures are set by tests.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    script: Mutex<TransportScript>,
}

impl ScriptedTransport {
    fn script(&self) -> std::sync::MutexGuard<'_, TransportScript> {
        self.script.lock().expect("transport script lock")
    }

    pub(crate) fn set_visible(&self, chat: &str, messages: Vec<Message>) {
        self.script().visible.insert(chat.to_string(), messages);
    }

    pub(crate) fn push_visible(&self, chat: &str, message: Message) {
        self.script()
            .visible
            .entry(chat.to_string())
            .or_default()
            .push(message);
    }

    pub(crate) fn misroute(&self, from: &str, to: &str) {
        self.script()
            .misroutes
            .insert(from.to_string(), to.to_string());
    }

    pub(crate) fn fail_reads(&self, chat: &str, errors: Vec<TransportError>) {
        self.script()
            .read_failures
            .insert(chat.to_string(), errors.into());
    }

    pub(crate) fn fail_next_ops(&self, errors: Vec<TransportError>) {
        self.script().op_failures.extend(errors);
    }

    /// Fails the `index`-th (0-based) send/react attempt.
    pub(crate) fn fail_op_at(&self, index: usize, error: TransportError) {
        self.script().op_failures_at.insert(index, error);
    }

    pub(crate) fn set_reactions(&self, chat: &str, message_id: &str, reactions: Vec<Reaction>) {
        self.script()
            .reactions
            .insert((chat.to_string(), message_id.to_string()), reactions);
    }

    pub(crate) fn ops(&self) -> Vec<TransportOp> {
        self.script().ops.clone()
    }

    pub(crate) fn reads(&self) -> usize {
        self.script().reads
    }

    pub(crate) fn texts(&self, chat: &str) -> Vec<String> {
        self.script()
            .ops
            .iter()
            .filter_map(|op| match op {
                TransportOp::Text { chat: target, text } if target == chat => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, op: TransportOp) -> Result<(), TransportError> {
        let mut script = self.script();
        let attempt = script.attempts;
        script.attempts += 1;
        if let Some(error) = script.op_failures_at.remove(&attempt) {
            return Err(error);
        }
        if let Some(error) = script.op_failures.pop_front() {
            return Err(error);
        }
        script.ops.push(op);
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn navigate_to_chat(&self, name: &str) -> Result<ChatHandle, TransportError> {
        let script = self.script();
        let target = script
            .misroutes
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string());
        if !script.visible.contains_key(&target) {
            return Err(TransportError::NotFound(name.to_string()));
        }
        Ok(ChatHandle::new(target.clone(), target))
    }

    async fn read_visible_messages(
        &self,
        handle: &ChatHandle,
    ) -> Result<Vec<Message>, TransportError> {
        let mut script = self.script();
        script.reads += 1;
        if let Some(error) = script
            .read_failures
            .get_mut(&handle.chat)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        Ok(script
            .visible
            .get(&handle.chat)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_text(&self, handle: &ChatHandle, text: &str) -> Result<(), TransportError> {
        self.record(TransportOp::Text {
            chat: handle.chat.clone(),
            text: text.to_string(),
        })
    }

    async fn send_media(
        &self,
        handle: &ChatHandle,
        media: &MediaPayload,
    ) -> Result<(), TransportError> {
        self.record(TransportOp::Media {
            chat: handle.chat.clone(),
            reference: media.reference.clone(),
        })
    }

    async fn react(
        &self,
        handle: &ChatHandle,
        message_id: &MessageId,
        emoji: &str,
    ) -> Result<(), TransportError> {
        self.record(TransportOp::React {
            chat: handle.chat.clone(),
            message_id: message_id.to_string(),
            emoji: emoji.to_string(),
        })
    }

    async fn read_reactions(
        &self,
        handle: &ChatHandle,
        message_id: &MessageId,
    ) -> Result<Vec<Reaction>, TransportError> {
        Ok(self
            .script()
            .reactions
            .get(&(handle.chat.clone(), message_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

type DecideFn = dyn Fn(&DecisionRequest) -> Result<Decision, DecisionError> + Send + Sync;

/// Engine that answers with a closure, optionally after a delay.
pub(crate) struct ScriptedEngine {
    respond: Box<DecideFn>,
    delay: Duration,
    requests: Mutex<Vec<DecisionRequest>>,
}

impl ScriptedEngine {
    pub(crate) fn new(
        respond: impl Fn(&DecisionRequest) -> Result<Decision, DecisionError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn requests(&self) -> Vec<DecisionRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl DecisionEngine for ScriptedEngine {
    async fn decide(&self, request: DecisionRequest) -> Result<Decision, DecisionError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.respond)(&request)
    }
}
