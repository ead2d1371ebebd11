//! Per-chat memory of the runtime: which messages were seen, what state was
//! derived from them, and how both survive a restart.

pub mod message_store;
pub mod persistence;
pub mod state_cache;

pub use message_store::{ChatLog, GapMarker, IngestOutcome, IngestPreview, LoggedMessage, MessageStore};
pub use persistence::{ChatRecord, PersistenceLayer, CHAT_RECORD_SCHEMA_VERSION};
pub use state_cache::{fingerprint_message_ids, StateCache};
