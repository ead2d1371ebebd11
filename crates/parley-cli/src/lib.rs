//! Command-line bridge for the Parley runtime.
//!
//! Resolves settings from flags, environment and an optional TOML file, wires
//! the file-backed transport and a built-in decision engine into the event
//! loop, and forwards operator commands from stdin.

pub mod bootstrap;
pub mod cli_args;
pub mod config_file;
pub mod control;
pub mod engines;
pub mod file_transport;
pub mod signup_list;

pub use bootstrap::init_tracing;
pub use cli_args::{Cli, CliEngine, CliSupersedeMode};
pub use config_file::{load_config_file, resolve_config, BridgeConfig, ParleyConfig};
pub use control::{parse_control_line, spawn_stdin_control};
pub use engines::{build_engine, EngineKind, ReactDecisionEngine, SignupDecisionEngine};
pub use file_transport::{chat_file_stem, FileTransport, OutboxEntry, OutboxRecord};
pub use signup_list::SignupList;
