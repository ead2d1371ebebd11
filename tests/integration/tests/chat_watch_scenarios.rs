use std::{
    collections::HashSet,
    fs,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use parley_cli::{FileTransport, OutboxEntry, OutboxRecord, SignupDecisionEngine};
use parley_contract::{
    Action, ActionKind, ChatHandle, ChatTransport, Decision, DecisionEngine, DecisionError,
    DecisionRequest, MediaPayload, Message, MessageId, Reaction, TransportError,
};
use parley_runtime::{ChatPhase, EventLoop, RuntimeConfig};
use parley_store::PersistenceLayer;
use serde_json::json;

static WORKSPACE_COUNTER: AtomicU64 = AtomicU64::new(1);

const SELF_NAME: &str = "MyName";

struct IsolatedWorkspace {
    root: PathBuf,
}

impl IsolatedWorkspace {
    fn new(label: &str) -> Self {
        let tick = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        let count = WORKSPACE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!(
            "parley-{label}-{}-{tick}-{count}",
            std::process::id()
        ));
        fs::create_dir_all(root.join("ingress")).expect("must create ingress dir");
        Self { root }
    }

    fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    fn transport(&self) -> FileTransport {
        FileTransport::new(self.root.join("ingress"), self.root.join("outbox"), SELF_NAME)
    }

    fn config(&self, chats: &[&str]) -> RuntimeConfig {
        RuntimeConfig {
            chats: chats.iter().map(|chat| chat.to_string()).collect(),
            self_identity: SELF_NAME.to_string(),
            state_dir: self.state_dir(),
            baseline_on_first_poll: false,
            ..RuntimeConfig::default()
        }
    }

    /// Replaces the chat's visible window with `(id, sender, text)` lines.
    fn show(&self, chat: &str, messages: &[(&str, &str, &str)]) {
        let lines = messages
            .iter()
            .map(|(id, sender, text)| {
                json!({"id": id, "sender": sender, "text": text}).to_string() + "\n"
            })
            .collect::<String>();
        fs::write(self.transport().ingress_path(chat), lines).expect("must write ingress file");
    }

    fn outbox(&self, chat: &str) -> Vec<OutboxEntry> {
        let path = self.transport().outbox_path(chat);
        let Ok(raw) = fs::read_to_string(path) else {
            return Vec::new();
        };
        raw.lines()
            .map(|line| {
                serde_json::from_str::<OutboxRecord>(line)
                    .unwrap_or_else(|error| panic!("outbox line should be valid json: {error}"))
                    .entry
            })
            .collect()
    }

    fn sent_texts(&self, chat: &str) -> Vec<String> {
        self.outbox(chat)
            .into_iter()
            .filter_map(|entry| match entry {
                OutboxEntry::Text { text } => Some(text),
                _ => None,
            })
            .collect()
    }

    fn reacted_ids(&self, chat: &str) -> Vec<String> {
        self.outbox(chat)
            .into_iter()
            .filter_map(|entry| match entry {
                OutboxEntry::React { message_id, .. } => Some(message_id.to_string()),
                _ => None,
            })
            .collect()
    }
}

impl Drop for IsolatedWorkspace {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

type Respond = dyn Fn(&DecisionRequest) -> Vec<Action> + Send + Sync;

struct ClosureEngine {
    respond: Box<Respond>,
}

impl ClosureEngine {
    fn new(respond: impl Fn(&DecisionRequest) -> Vec<Action> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
        })
    }
}

#[async_trait]
impl DecisionEngine for ClosureEngine {
    async fn decide(&self, request: DecisionRequest) -> Result<Decision, DecisionError> {
        Ok(Decision::actions((self.respond)(&request)))
    }
}

fn react_to_every_new_message() -> Arc<ClosureEngine> {
    ClosureEngine::new(|request| {
        request
            .incoming()
            .map(|message| Action::react(message.id.clone(), "👍"))
            .collect()
    })
}

/// File transport whose reads fail fatally for selected chats.
struct SessionLossTransport {
    inner: FileTransport,
    lost: HashSet<String>,
}

#[async_trait]
impl ChatTransport for SessionLossTransport {
    async fn navigate_to_chat(&self, name: &str) -> Result<ChatHandle, TransportError> {
        self.inner.navigate_to_chat(name).await
    }

    async fn read_visible_messages(
        &self,
        handle: &ChatHandle,
    ) -> Result<Vec<Message>, TransportError> {
        if self.lost.contains(&handle.chat) {
            return Err(TransportError::Fatal("browser session expired".to_string()));
        }
        self.inner.read_visible_messages(handle).await
    }

    async fn send_text(&self, handle: &ChatHandle, text: &str) -> Result<(), TransportError> {
        self.inner.send_text(handle, text).await
    }

    async fn send_media(
        &self,
        handle: &ChatHandle,
        media: &MediaPayload,
    ) -> Result<(), TransportError> {
        self.inner.send_media(handle, media).await
    }

    async fn react(
        &self,
        handle: &ChatHandle,
        message_id: &MessageId,
        emoji: &str,
    ) -> Result<(), TransportError> {
        self.inner.react(handle, message_id, emoji).await
    }

    async fn read_reactions(
        &self,
        handle: &ChatHandle,
        message_id: &MessageId,
    ) -> Result<Vec<Reaction>, TransportError> {
        self.inner.read_reactions(handle, message_id).await
    }
}

#[tokio::test]
async fn integration_tennis_signup_reply_is_sent_line_by_line_exactly_once() {
    let workspace = IsolatedWorkspace::new("tennis-signup");
    workspace.show("Tennis A", &[("m1", "Bob", "1) Bob\n2) \n3) ")]);
    let engine = Arc::new(SignupDecisionEngine::new(SELF_NAME));

    let mut event_loop = EventLoop::new(
        workspace.config(&["Tennis A"]),
        Arc::new(workspace.transport()),
        engine.clone(),
    )
    .expect("event loop");
    let report = event_loop.run_once().await.expect("first cycle");
    assert_eq!(report.deliveries, 3);
    assert_eq!(
        workspace.sent_texts("Tennis A"),
        vec!["1) Bob", "2) MyName", "3) "]
    );

    let again = event_loop.run_once().await.expect("second cycle");
    assert_eq!(again.decisions, 0);
    drop(event_loop);

    let mut restarted = EventLoop::new(
        workspace.config(&["Tennis A"]),
        Arc::new(workspace.transport()),
        engine,
    )
    .expect("restarted loop");
    restarted.run_once().await.expect("cycle after restart");
    assert_eq!(workspace.sent_texts("Tennis A").len(), 3);
    assert!(restarted
        .chat_state("Tennis A")
        .is_dispatched(&MessageId::new("m1"), ActionKind::Reply));
}

#[tokio::test]
async fn integration_actions_run_in_proposal_order() {
    let workspace = IsolatedWorkspace::new("ordering");
    workspace.show(
        "Tennis A",
        &[("m1", "Bob", "one"), ("m2", "Ann", "two"), ("m3", "Bob", "three")],
    );
    let engine = ClosureEngine::new(|request| {
        request
            .incoming()
            .map(|message| Action::reply(message.id.clone(), format!("re {}", message.id)))
            .collect()
    });
    let mut event_loop = EventLoop::new(
        workspace.config(&["Tennis A"]),
        Arc::new(workspace.transport()),
        engine,
    )
    .expect("event loop");

    event_loop.run_once().await.expect("cycle");
    assert_eq!(
        workspace.sent_texts("Tennis A"),
        vec!["re m1", "re m2", "re m3"]
    );
    let state = event_loop.chat_state("Tennis A");
    assert_eq!(state.last_reply_to, Some(MessageId::new("m3")));
}

#[tokio::test]
async fn integration_skip_and_reaction_on_same_message_keeps_the_reaction() {
    let workspace = IsolatedWorkspace::new("tie-break");
    workspace.show("Tennis A", &[("m1", "Bob", "nice shot")]);
    let engine = ClosureEngine::new(|_| vec![Action::skip("m1"), Action::react("m1", "👍")]);
    let mut event_loop = EventLoop::new(
        workspace.config(&["Tennis A"]),
        Arc::new(workspace.transport()),
        engine,
    )
    .expect("event loop");

    let report = event_loop.run_once().await.expect("cycle");
    assert_eq!(report.dedup_drops, 1);
    assert_eq!(workspace.reacted_ids("Tennis A"), vec!["m1"]);
    let state = event_loop.chat_state("Tennis A");
    assert!(state.is_dispatched(&MessageId::new("m1"), ActionKind::React));
    assert!(!state.is_dispatched(&MessageId::new("m1"), ActionKind::Skip));
}

#[tokio::test]
async fn integration_window_past_the_log_tail_treats_unseen_messages_as_new() {
    let workspace = IsolatedWorkspace::new("gap");
    workspace.show(
        "Tennis A",
        &[
            ("m1", "Bob", "a"),
            ("m2", "Bob", "b"),
            ("m3", "Bob", "c"),
            ("m4", "Bob", "d"),
        ],
    );
    let mut config = workspace.config(&["Tennis A"]);
    config.baseline_on_first_poll = true;
    let mut event_loop = EventLoop::new(
        config,
        Arc::new(workspace.transport()),
        react_to_every_new_message(),
    )
    .expect("event loop");
    event_loop.run_once().await.expect("baseline cycle");
    assert!(workspace.reacted_ids("Tennis A").is_empty());

    workspace.show("Tennis A", &[("m5", "Ann", "e"), ("m6", "Bob", "f")]);
    let report = event_loop.run_once().await.expect("cycle");
    let chat = report.chat("Tennis A").expect("chat report");
    assert!(chat.possible_gap);
    assert_eq!(chat.new_messages, 2);
    assert_eq!(workspace.reacted_ids("Tennis A"), vec!["m5", "m6"]);
}

#[tokio::test]
async fn integration_lost_session_pauses_one_chat_while_others_continue() {
    let workspace = IsolatedWorkspace::new("fatal-isolation");
    workspace.show("Tennis A", &[("m1", "Bob", "court 3?")]);
    workspace.show("Family", &[("f1", "Mum", "dinner at 7")]);
    let transport = Arc::new(SessionLossTransport {
        inner: workspace.transport(),
        lost: HashSet::from(["Family".to_string()]),
    });
    let mut event_loop = EventLoop::new(
        workspace.config(&["Tennis A", "Family"]),
        transport,
        react_to_every_new_message(),
    )
    .expect("event loop");

    let report = event_loop.run_once().await.expect("cycle");
    assert_eq!(report.transport_errors, 1);
    assert_eq!(event_loop.phase("Family"), Some(ChatPhase::Paused));
    assert_eq!(event_loop.phase("Tennis A"), Some(ChatPhase::Idle));
    assert_eq!(workspace.reacted_ids("Tennis A"), vec!["m1"]);
    assert!(workspace.reacted_ids("Family").is_empty());
}

#[tokio::test]
async fn integration_interrupted_writes_leave_each_chat_record_whole() {
    let workspace = IsolatedWorkspace::new("crash-safety");
    workspace.show("Tennis A", &[("m1", "Bob", "court 3?")]);
    workspace.show("Family", &[("f1", "Mum", "dinner at 7")]);
    let chats = ["Tennis A", "Family"];
    {
        let mut event_loop = EventLoop::new(
            workspace.config(&chats),
            Arc::new(workspace.transport()),
            react_to_every_new_message(),
        )
        .expect("event loop");
        event_loop.run_once().await.expect("cycle");
    }
    assert_eq!(workspace.reacted_ids("Tennis A"), vec!["m1"]);
    assert_eq!(workspace.reacted_ids("Family"), vec!["f1"]);

    let persistence = PersistenceLayer::new(workspace.state_dir(), 500);
    let tennis_path = persistence.chat_path("Tennis A");
    let family_path = persistence.chat_path("Family");
    let chats_dir = tennis_path.parent().expect("chats dir").to_path_buf();
    fs::write(chats_dir.join(".leftover.json.tmp-1-2-3"), "{\"schema_version\":")
        .expect("write temp debris");
    let family_raw = fs::read_to_string(&family_path).expect("family record");
    fs::write(&family_path, &family_raw.as_bytes()[..family_raw.len() / 2])
        .expect("truncate family record");

    let mut config = workspace.config(&chats);
    config.baseline_on_first_poll = true;
    let mut restarted = EventLoop::new(
        config,
        Arc::new(workspace.transport()),
        react_to_every_new_message(),
    )
    .expect("restart with damaged record");
    assert_eq!(
        restarted.logged_message_ids("Tennis A"),
        vec![MessageId::new("m1")]
    );
    assert!(restarted.logged_message_ids("Family").is_empty());
    assert!(!family_path.exists());
    assert!(fs::read_dir(&chats_dir)
        .expect("list chats dir")
        .filter_map(Result::ok)
        .any(|entry| entry.file_name().to_string_lossy().contains(".corrupt-")));

    restarted.run_once().await.expect("cycle after restart");
    assert_eq!(workspace.reacted_ids("Tennis A"), vec!["m1"]);
    assert_eq!(workspace.reacted_ids("Family"), vec!["f1"]);
    assert!(persistence
        .load_chat("Tennis A")
        .expect("load tennis")
        .is_some_and(|record| record.pending.is_empty()));
}
