//! Shared data model and collaborator contracts for the Parley runtime.
//!
//! The runtime crates only ever talk to a messaging client through
//! [`ChatTransport`] and to the reply generator through [`DecisionEngine`].
//! Every transport call takes an explicit [`ChatHandle`]; there is no notion of
//! a "currently open" chat.

pub mod action;
pub mod decision;
pub mod message;
pub mod state;
pub mod transport;

pub use action::{Action, ActionKind, ActionOutcome, ActionResult};
pub use decision::{Decision, DecisionEngine, DecisionEngineConfig, DecisionError, DecisionRequest};
pub use message::{MediaKind, MediaPayload, Message, MessageBody, MessageId, Reaction};
pub use state::ChatState;
pub use transport::{ChatHandle, ChatTransport, TransportError};
