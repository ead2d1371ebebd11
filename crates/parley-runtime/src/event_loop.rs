//! Poll, decide, execute, persist.
//!
//! Every watched chat gets its own task per cycle; tasks for different chats
//! run concurrently and a chat never has more than one task at a time. A
//! chat's task walks the [`ChatPhase`] table: it reads the visible window,
//! asks the decision engine about new incoming messages (under a timeout),
//! filters the proposed actions, executes them through the serialized
//! transport session and saves the chat record.
//!
//! Messages are committed to the log only once a decision succeeded, so a
//! failed or timed-out decision leaves the chat exactly as it was and the
//! next tick sees the same messages as new.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;
use parley_contract::{
    Action, ChatState, ChatTransport, Decision, DecisionEngine, DecisionError, DecisionRequest,
    Message, MessageId, TransportError,
};
use parley_core::{current_unix_timestamp_ms, duration_to_millis, LogRotationPolicy};
use parley_store::{
    fingerprint_message_ids, ChatLog, IngestPreview, MessageStore, PersistenceLayer, StateCache,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{RuntimeConfig, SupersedeMode};
use crate::dedup::filter_actions;
use crate::executor::ActionExecutor;
use crate::phase::{transition, ChatPhase, PhaseEvent};
use crate::report::{append_cycle_report, ChatCycleReport, PollCycleReport};
use crate::retry::with_transport_retry;
use crate::session::TransportSession;

const HOUSEKEEPING_INTERVAL_MS: u64 = 50;

/// Operator signals accepted by [`EventLoop::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSignal {
    /// Poll this chat now instead of waiting for the next tick.
    Wake(String),
    /// Clear a pause caused by a lost transport session.
    Resume(String),
    Shutdown,
}

/// Why a chat's cycle ended early.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CycleFailure {
    #[error("transport still failing after retries: {0}")]
    TransportTransient(String),
    #[error("transport session lost: {0}")]
    TransportFatal(String),
    #[error("chat not found: {0}")]
    ChatNotFound(String),
    #[error("decision timed out after {}ms", .0.as_millis())]
    DecisionTimeout(Duration),
    #[error("decision output malformed: {0}")]
    DecisionMalformed(String),
    #[error("decision backend failed: {0}")]
    DecisionFailed(String),
}

impl From<TransportError> for CycleFailure {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::NotFound(chat) => Self::ChatNotFound(chat),
            TransportError::Transient(reason) => Self::TransportTransient(reason),
            TransportError::Fatal(reason) => Self::TransportFatal(reason),
        }
    }
}

impl From<DecisionError> for CycleFailure {
    fn from(error: DecisionError) -> Self {
        match error {
            DecisionError::Malformed(reason) => Self::DecisionMalformed(reason),
            DecisionError::RateLimited(_) | DecisionError::Failed(_) => {
                Self::DecisionFailed(error.to_string())
            }
        }
    }
}

enum DecisionWait {
    Decided(Decision),
    Superseded(IngestPreview),
    Failed(CycleFailure),
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
struct ChatControl {
    phase: ChatPhase,
    dirty: bool,
    needs_baseline: bool,
    needs_reconcile: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct LoopShared {
    config: RuntimeConfig,
    session: Arc<TransportSession>,
    engine: Arc<dyn DecisionEngine>,
    executor: ActionExecutor,
    persistence: PersistenceLayer,
    messages: Mutex<MessageStore>,
    states: Mutex<StateCache>,
    controls: Mutex<HashMap<String, ChatControl>>,
}

impl LoopShared {
    fn phase(&self, chat: &str) -> Option<ChatPhase> {
        lock(&self.controls).get(chat).map(|control| control.phase)
    }

    fn advance(&self, chat: &str, event: PhaseEvent) -> Option<ChatPhase> {
        let mut controls = lock(&self.controls);
        let control = controls.get_mut(chat)?;
        match transition(control.phase, event) {
            Ok(next) => {
                tracing::trace!(chat, from = control.phase.as_str(), to = next.as_str(), "chat phase");
                control.phase = next;
            }
            Err(error) => tracing::warn!(chat, %error, "ignored chat transition"),
        }
        Some(control.phase)
    }

    fn force_idle(&self, chat: &str) {
        if let Some(control) = lock(&self.controls).get_mut(chat) {
            if control.phase.is_busy() {
                control.phase = ChatPhase::Idle;
            }
        }
    }

    fn update_control(&self, chat: &str, update: impl FnOnce(&mut ChatControl)) {
        if let Some(control) = lock(&self.controls).get_mut(chat) {
            update(control);
        }
    }

    fn control(&self, chat: &str) -> Option<ChatControl> {
        lock(&self.controls).get(chat).copied()
    }

    /// Writes the chat record; on failure the chat is marked dirty and the
    /// in-memory state stays authoritative.
    fn persist(&self, chat: &str, report: &mut ChatCycleReport) -> bool {
        let record = {
            let messages = lock(&self.messages);
            let state = lock(&self.states).get(chat);
            match messages.log(chat) {
                Some(log) => self.persistence.record_for(log, &state),
                None => self.persistence.record_for(&ChatLog::new(chat), &state),
            }
        };
        match self.persistence.save_chat_with_retry(&record) {
            Ok(()) => {
                self.update_control(chat, |control| control.dirty = false);
                report.persisted = true;
                true
            }
            Err(error) => {
                tracing::warn!(
                    chat,
                    error = %format!("{error:#}"),
                    "chat record not saved; keeping in-memory state until the next write"
                );
                self.update_control(chat, |control| control.dirty = true);
                report.persistence_failures = report.persistence_failures.saturating_add(1);
                false
            }
        }
    }

    async fn read_visible(&self, chat: &str) -> Result<Vec<Message>, TransportError> {
        let session = self.session.as_ref();
        with_transport_retry(&self.config.retry, &format!("{chat}:read"), move || {
            session.read_visible(chat)
        })
        .await
    }

    fn fail_transport(&self, chat: &str, error: TransportError, report: &mut ChatCycleReport) {
        report.transport_errors = report.transport_errors.saturating_add(1);
        let fatal = error.is_fatal();
        let failure = CycleFailure::from(error);
        report.error = Some(failure.to_string());
        if fatal {
            tracing::error!(chat, error = %failure, "pausing chat until resumed");
            self.advance(chat, PhaseEvent::FatalTransport);
        } else {
            tracing::warn!(chat, error = %failure, "abandoning this tick for the chat");
            self.advance(chat, PhaseEvent::TransportAbandoned);
        }
    }

    /// Settles actions left pending by an interrupted batch. Reactions are
    /// checked on the message; replies and media cannot be observed and are
    /// taken as delivered.
    async fn reconcile_pending(&self, chat: &str) -> Result<usize, TransportError> {
        let mut state = lock(&self.states).get(chat);
        if state.pending.is_empty() {
            return Ok(0);
        }
        let session = self.session.as_ref();
        let pending = std::mem::take(&mut state.pending);
        let mut settled = 0_usize;
        for action in &pending {
            let delivered = match action {
                Action::React { message_id, .. } => {
                    let seed = format!("{chat}:{message_id}:reconcile");
                    let reactions = with_transport_retry(&self.config.retry, &seed, move || {
                        session.reactions(chat, message_id)
                    })
                    .await?;
                    reactions.iter().any(|reaction| reaction.from_self)
                }
                Action::Skip { .. } | Action::Reply { .. } | Action::SendMedia { .. } => true,
            };
            if delivered {
                state.record_dispatched(action.message_id(), action.kind());
                settled = settled.saturating_add(1);
            }
            tracing::info!(
                chat,
                message_id = %action.message_id(),
                kind = action.kind().as_str(),
                delivered,
                "settled pending action"
            );
        }
        lock(&self.states).put(chat, state);
        Ok(settled)
    }

    /// Request for `preview` and the fingerprint of the history it carries.
    /// Staleness is judged on the history as it stood before this preview.
    fn build_request(&self, chat: &str, preview: &IngestPreview) -> (DecisionRequest, String) {
        let limit = self.config.decision.max_messages_in_context.max(1);
        let mut history = lock(&self.messages)
            .log(chat)
            .map(|log| log.recent_messages(limit))
            .unwrap_or_default();
        let prior_ids = history
            .iter()
            .map(|message| message.id.clone())
            .collect::<Vec<MessageId>>();
        history.extend(preview.backfill.iter().cloned());
        history.extend(preview.new_messages.iter().cloned());
        if history.len() > limit {
            let excess = history.len() - limit;
            history.drain(..excess);
        }
        let ids = history
            .iter()
            .map(|message| message.id.clone())
            .collect::<Vec<MessageId>>();
        let fingerprint = fingerprint_message_ids(&ids);
        let states = lock(&self.states);
        let request = DecisionRequest {
            chat: chat.to_string(),
            state: states.get(chat),
            new_messages: preview.new_messages.clone(),
            history,
            stale: states.is_stale(chat, &prior_ids),
            possible_gap: preview.possible_gap,
        };
        (request, fingerprint)
    }

    async fn await_decision(
        &self,
        chat: &str,
        request: DecisionRequest,
        preview: &IngestPreview,
        allow_supersede: bool,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> DecisionWait {
        let timeout = self.config.decision_timeout();
        let decide = tokio::time::timeout(timeout, self.engine.decide(request));
        tokio::pin!(decide);

        let mut check =
            tokio::time::interval(Duration::from_millis(self.config.supersede_check_ms.max(1)));
        check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        check.tick().await;
        let in_flight = preview.new_ids();

        loop {
            tokio::select! {
                result = &mut decide => {
                    return match result {
                        Ok(Ok(decision)) => DecisionWait::Decided(decision),
                        Ok(Err(error)) => DecisionWait::Failed(CycleFailure::from(error)),
                        Err(_) => DecisionWait::Failed(CycleFailure::DecisionTimeout(timeout)),
                    };
                }
                changed = cancel_rx.changed() => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        return DecisionWait::Cancelled;
                    }
                }
                _ = check.tick(), if allow_supersede => {
                    let visible = match self.session.read_visible(chat).await {
                        Ok(visible) => visible,
                        Err(error) => {
                            tracing::debug!(chat, %error, "supersede check skipped");
                            continue;
                        }
                    };
                    let next = lock(&self.messages).preview(chat, &visible);
                    let newer = next
                        .new_messages
                        .iter()
                        .any(|message| !message.is_outgoing && !in_flight.contains(&message.id));
                    if newer {
                        return DecisionWait::Superseded(next);
                    }
                }
            }
        }
    }

    async fn run_chat_cycle(
        self: Arc<Self>,
        chat: String,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> ChatCycleReport {
        let mut report = ChatCycleReport::new(&chat);
        self.cycle_chat(&chat, &mut cancel_rx, &mut report).await;
        report.final_phase = self.phase(&chat);
        report
    }

    async fn cycle_chat(
        &self,
        chat: &str,
        cancel_rx: &mut watch::Receiver<bool>,
        report: &mut ChatCycleReport,
    ) {
        let Some(control) = self.control(chat) else {
            return;
        };
        if control.dirty {
            self.persist(chat, report);
        }
        self.advance(chat, PhaseEvent::Tick);
        report.polled = true;

        if control.needs_reconcile {
            match self.reconcile_pending(chat).await {
                Ok(settled) => {
                    self.update_control(chat, |control| control.needs_reconcile = false);
                    tracing::info!(chat, settled, "reconciled interrupted batch");
                    self.persist(chat, report);
                }
                Err(error) => {
                    self.fail_transport(chat, error, report);
                    return;
                }
            }
        }

        let visible = match self.read_visible(chat).await {
            Ok(visible) => visible,
            Err(error) => {
                self.fail_transport(chat, error, report);
                return;
            }
        };
        let now = current_unix_timestamp_ms();
        lock(&self.messages).mark_polled(chat, now);

        if control.needs_baseline {
            let baselined = lock(&self.messages).baseline(chat, &visible, now);
            self.update_control(chat, |control| control.needs_baseline = false);
            report.baselined = baselined;
            tracing::info!(chat, baselined, "first poll; visible messages marked as seen");
            self.advance(chat, PhaseEvent::NoNewMessages);
            self.persist(chat, report);
            return;
        }

        let mut preview = lock(&self.messages).preview(chat, &visible);
        if !preview.has_incoming() {
            if !preview.is_empty() {
                let outcome = lock(&self.messages).commit(chat, preview, now);
                report.new_messages = outcome.new_messages.len();
                report.backfilled = outcome.backfilled;
                self.persist(chat, report);
            }
            self.advance(chat, PhaseEvent::NoNewMessages);
            return;
        }
        self.advance(chat, PhaseEvent::NewMessages);

        let (decision, fingerprint) = loop {
            let (request, fingerprint) = self.build_request(chat, &preview);
            let allow_supersede = self.config.supersede == SupersedeMode::Supersede
                && report.supersedes < self.config.max_supersedes;
            report.decisions = report.decisions.saturating_add(1);
            let started = Instant::now();
            match self
                .await_decision(chat, request, &preview, allow_supersede, cancel_rx)
                .await
            {
                DecisionWait::Decided(decision) => {
                    tracing::debug!(
                        chat,
                        actions = decision.actions.len(),
                        elapsed_ms = duration_to_millis(started.elapsed()),
                        "decision ready"
                    );
                    break (decision, fingerprint);
                }
                DecisionWait::Superseded(next) => {
                    tracing::info!(chat, "newer messages arrived; restarting decision");
                    report.supersedes = report.supersedes.saturating_add(1);
                    preview = next;
                    self.advance(chat, PhaseEvent::Superseded);
                }
                DecisionWait::Failed(failure) => {
                    tracing::warn!(chat, error = %failure, "decision failed; retrying next tick");
                    report.decision_failures = report.decision_failures.saturating_add(1);
                    report.error = Some(failure.to_string());
                    self.advance(chat, PhaseEvent::DecisionFailed);
                    return;
                }
                DecisionWait::Cancelled => {
                    report.cancelled = true;
                    self.advance(chat, PhaseEvent::DecisionFailed);
                    return;
                }
            }
        };

        let committed_before = lock(&self.messages).log(chat).cloned();
        let outcome = lock(&self.messages).commit(chat, preview, now);
        report.new_messages = outcome.new_messages.len();
        report.backfilled = outcome.backfilled;
        report.possible_gap = outcome.possible_gap;

        let mut state = lock(&self.states).get(chat);
        let state_before = state.clone();
        if let Some(context) = decision.context {
            state.context = context;
        }
        report.proposed = decision.actions.len();
        let filtered = filter_actions(&state, decision.actions);
        for dropped in &filtered.dropped {
            tracing::debug!(
                chat,
                message_id = %dropped.action.message_id(),
                kind = dropped.action.kind().as_str(),
                reason = dropped.reason.as_str(),
                "dropped proposed action"
            );
        }
        report.dedup_drops = filtered.dropped.len();
        report.accepted = filtered.accepted.len();

        if filtered
            .accepted
            .iter()
            .any(|action| action.kind().has_side_effect())
        {
            state.pending = filtered.accepted.clone();
            lock(&self.states).put(chat, state.clone());
            if !self.persist(chat, report) {
                // Nothing runs without a durable intent; the next tick decides
                // the same messages again.
                if let Some(log) = committed_before {
                    lock(&self.messages).insert_log(log);
                }
                lock(&self.states).put(chat, state_before);
                tracing::warn!(chat, accepted = report.accepted, "batch deferred until the chat record can be saved");
                report.new_messages = 0;
                report.backfilled = 0;
                report.possible_gap = false;
                report.accepted = 0;
                report.error = Some("write-ahead record not saved; batch deferred".to_string());
                self.advance(chat, PhaseEvent::DecisionFailed);
                return;
            }
        }
        self.advance(chat, PhaseEvent::DecisionReady);

        let execution = self
            .executor
            .execute(chat, &mut state, &filtered.accepted)
            .await;
        report.applied = execution.applied();
        report.failed = execution.failed();
        report.deliveries = execution.deliveries;

        state.pending.clear();
        state.fingerprint = Some(fingerprint);
        if let Some(log) = lock(&self.messages).log(chat) {
            let pruned = state.prune_dispatched(|message_id| log.contains(message_id));
            if pruned > 0 {
                tracing::debug!(chat, pruned, "dropped dispatch records for evicted messages");
            }
        }
        lock(&self.states).put(chat, state);
        self.advance(chat, PhaseEvent::ActionsFinished);
        self.persist(chat, report);

        match execution.fatal {
            Some(error) => self.fail_transport(chat, error, report),
            None => {
                self.advance(chat, PhaseEvent::Persisted);
            }
        }
    }
}

struct ActiveChatRun {
    started: Instant,
    cancel_tx: watch::Sender<bool>,
    handle: JoinHandle<ChatCycleReport>,
}

/// Drives all watched chats.
pub struct EventLoop {
    shared: Arc<LoopShared>,
    chats: Vec<String>,
    active_runs: HashMap<String, ActiveChatRun>,
    woken: BTreeSet<String>,
    cycle: u64,
    rotation: LogRotationPolicy,
}

impl EventLoop {
    /// Validates `config` and restores every watched chat from the state
    /// directory. Chats whose record is missing or unreadable start empty.
    pub fn new(
        config: RuntimeConfig,
        transport: Arc<dyn ChatTransport>,
        engine: Arc<dyn DecisionEngine>,
    ) -> Result<Self> {
        config.validate()?;
        let chats = config.watched_chats();
        let persistence = PersistenceLayer::new(&config.state_dir, config.message_log_cap);
        let mut messages = MessageStore::new(config.message_log_cap);
        let mut states = StateCache::new();
        let mut controls = HashMap::new();

        for chat in &chats {
            let record = match persistence.load_chat(chat) {
                Ok(record) => record,
                Err(error) => {
                    tracing::warn!(chat, error = %format!("{error:#}"), "failed to load chat record; starting empty");
                    None
                }
            };
            let restored = record.is_some();
            let mut needs_reconcile = false;
            if let Some(record) = record {
                needs_reconcile = !record.pending.is_empty();
                let (log, state) = record.into_parts();
                tracing::info!(
                    chat,
                    logged = log.len(),
                    dispatched = state.dispatched_count(),
                    pending = state.pending.len(),
                    "restored chat"
                );
                messages.insert_log(log);
                states.put(chat, state);
            }
            controls.insert(
                chat.clone(),
                ChatControl {
                    phase: ChatPhase::Idle,
                    dirty: false,
                    needs_baseline: !restored && config.baseline_on_first_poll,
                    needs_reconcile,
                },
            );
        }

        let session = Arc::new(TransportSession::new(transport));
        let executor =
            ActionExecutor::new(Arc::clone(&session), config.retry.clone(), config.typing.clone());
        let shared = Arc::new(LoopShared {
            config,
            session,
            engine,
            executor,
            persistence,
            messages: Mutex::new(messages),
            states: Mutex::new(states),
            controls: Mutex::new(controls),
        });
        Ok(Self {
            shared,
            chats,
            active_runs: HashMap::new(),
            woken: BTreeSet::new(),
            cycle: 0,
            rotation: LogRotationPolicy::from_env(),
        })
    }

    pub fn chats(&self) -> &[String] {
        &self.chats
    }

    pub fn phase(&self, chat: &str) -> Option<ChatPhase> {
        self.shared.phase(chat)
    }

    pub fn chat_state(&self, chat: &str) -> ChatState {
        lock(&self.shared.states).get(chat)
    }

    pub fn logged_message_ids(&self, chat: &str) -> Vec<MessageId> {
        lock(&self.shared.messages)
            .log(chat)
            .map(ChatLog::message_ids)
            .unwrap_or_default()
    }

    pub fn is_running(&self, chat: &str) -> bool {
        self.active_runs.contains_key(chat)
    }

    /// Clears a pause. Returns false if the chat was not paused.
    pub fn resume(&mut self, chat: &str) -> bool {
        if self.shared.phase(chat) != Some(ChatPhase::Paused) {
            return false;
        }
        self.shared.advance(chat, PhaseEvent::Resume);
        tracing::info!(chat, "chat resumed");
        true
    }

    /// Starts a cycle for `chat` now, or right after its running cycle ends.
    pub fn wake(&mut self, chat: &str) -> bool {
        if !self.chats.iter().any(|known| known == chat) {
            tracing::warn!(chat, "wake ignored for unwatched chat");
            return false;
        }
        if self.active_runs.contains_key(chat) {
            self.woken.insert(chat.to_string());
            return false;
        }
        self.start_chat(chat)
    }

    fn start_chat(&mut self, chat: &str) -> bool {
        if self.active_runs.contains_key(chat)
            || self.shared.phase(chat) != Some(ChatPhase::Idle)
        {
            return false;
        }
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(
            Arc::clone(&self.shared).run_chat_cycle(chat.to_string(), cancel_rx),
        );
        self.active_runs.insert(
            chat.to_string(),
            ActiveChatRun {
                started: Instant::now(),
                cancel_tx,
                handle,
            },
        );
        true
    }

    fn start_tick(&mut self, report: &mut PollCycleReport) {
        for chat in self.chats.clone() {
            if self.active_runs.contains_key(&chat) {
                tracing::debug!(chat, "chat still busy; polling again next tick");
                report.chats_busy = report.chats_busy.saturating_add(1);
                continue;
            }
            if self.shared.phase(&chat) == Some(ChatPhase::Paused) {
                report.chats_paused = report.chats_paused.saturating_add(1);
                continue;
            }
            if self.start_chat(&chat) {
                report.chats_started = report.chats_started.saturating_add(1);
            }
        }
    }

    async fn drain_finished(&mut self, report: &mut PollCycleReport, wait_all: bool) {
        let finished = self
            .active_runs
            .iter()
            .filter(|(_, run)| wait_all || run.handle.is_finished())
            .map(|(chat, _)| chat.clone())
            .collect::<Vec<_>>();
        for chat in finished {
            let Some(run) = self.active_runs.remove(&chat) else {
                continue;
            };
            match run.handle.await {
                Ok(chat_report) => {
                    tracing::debug!(
                        chat,
                        elapsed_ms = duration_to_millis(run.started.elapsed()),
                        "chat cycle finished"
                    );
                    report.absorb(chat_report);
                }
                Err(error) => {
                    tracing::error!(chat, %error, "chat cycle task failed");
                    self.shared.force_idle(&chat);
                }
            }
        }
    }

    fn start_woken(&mut self) {
        let ready = self
            .woken
            .iter()
            .filter(|chat| !self.active_runs.contains_key(*chat))
            .cloned()
            .collect::<Vec<_>>();
        for chat in ready {
            self.woken.remove(&chat);
            self.start_chat(&chat);
        }
    }

    fn record_cycle(&self, report: &PollCycleReport) {
        if report.new_messages > 0 || report.applied > 0 || report.failed > 0 {
            tracing::info!(
                cycle = report.cycle,
                new_messages = report.new_messages,
                applied = report.applied,
                failed = report.failed,
                dedup_drops = report.dedup_drops,
                "poll cycle"
            );
        }
        let path = self.shared.config.events_log_path();
        if let Err(error) = append_cycle_report(&path, report, self.rotation) {
            tracing::warn!(path = %path.display(), error = %format!("{error:#}"), "failed to append cycle report");
        }
    }

    /// Runs one full cycle over every idle watched chat and waits for all of
    /// them to finish.
    pub async fn run_once(&mut self) -> Result<PollCycleReport> {
        self.cycle = self.cycle.saturating_add(1);
        let mut report = PollCycleReport {
            cycle: self.cycle,
            ..PollCycleReport::default()
        };
        self.start_tick(&mut report);
        self.drain_finished(&mut report, true).await;
        self.record_cycle(&report);
        Ok(report)
    }

    /// Polls on `poll_interval_ms` until shutdown is requested through
    /// `control_rx` or ctrl-c.
    pub async fn run(&mut self, mut control_rx: mpsc::Receiver<ControlSignal>) -> Result<()> {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.shared.config.poll_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut housekeeping =
            tokio::time::interval(Duration::from_millis(HOUSEKEEPING_INTERVAL_MS));
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut current = PollCycleReport::default();
        let mut control_open = true;

        tracing::info!(
            chats = self.chats.len(),
            poll_interval_ms = self.shared.config.poll_interval_ms,
            supersede = self.shared.config.supersede.as_str(),
            "event loop started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.drain_finished(&mut current, false).await;
                    if self.cycle > 0 {
                        self.record_cycle(&current);
                    }
                    self.cycle = self.cycle.saturating_add(1);
                    current = PollCycleReport {
                        cycle: self.cycle,
                        ..PollCycleReport::default()
                    };
                    self.start_tick(&mut current);
                }
                _ = housekeeping.tick() => {
                    self.drain_finished(&mut current, false).await;
                    self.start_woken();
                }
                signal = control_rx.recv(), if control_open => match signal {
                    Some(ControlSignal::Wake(chat)) => {
                        self.wake(&chat);
                    }
                    Some(ControlSignal::Resume(chat)) => {
                        self.resume(&chat);
                    }
                    Some(ControlSignal::Shutdown) => break,
                    None => control_open = false,
                },
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("ctrl-c received; stopping event loop");
                    break;
                }
            }
        }

        self.shutdown(&mut current).await;
        self.record_cycle(&current);
        Ok(())
    }

    /// Cancels in-flight decisions, waits for running batches and retries
    /// any record that failed to save.
    pub async fn shutdown(&mut self, report: &mut PollCycleReport) {
        for run in self.active_runs.values() {
            let _ = run.cancel_tx.send(true);
        }
        self.drain_finished(report, true).await;
        for chat in self.chats.clone() {
            if self.shared.control(&chat).is_some_and(|control| control.dirty) {
                let mut chat_report = ChatCycleReport::new(&chat);
                self.shared.persist(&chat, &mut chat_report);
                report.absorb(chat_report);
            }
        }
        tracing::info!(cycles = self.cycle, "event loop stopped");
    }
}
