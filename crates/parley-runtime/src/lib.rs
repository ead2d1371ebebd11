//! Event loop and action dispatch for watched chats.
//!
//! [`EventLoop`] owns the per-chat message logs and state, fans each poll out
//! to the [`parley_contract::DecisionEngine`], filters proposals through
//! [`filter_actions`] and executes them with [`ActionExecutor`] over a single
//! serialized [`TransportSession`].

pub mod config;
pub mod dedup;
pub mod event_loop;
pub mod executor;
pub mod phase;
pub mod report;
mod retry;
pub mod session;

#[cfg(test)]
mod test_support;

pub use config::{RetryConfig, RuntimeConfig, SupersedeMode, TypingDelayConfig};
pub use dedup::{filter_actions, DedupOutcome, DropReason, DroppedAction};
pub use event_loop::{ControlSignal, CycleFailure, EventLoop};
pub use executor::{split_reply_text, ActionExecutor, ExecutionReport};
pub use phase::{transition, ChatPhase, PhaseEvent, TransitionError};
pub use report::{ChatCycleReport, PollCycleReport};
pub use session::TransportSession;
