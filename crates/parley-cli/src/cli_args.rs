use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use parley_runtime::SupersedeMode;

use crate::engines::EngineKind;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_non_empty(value: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("value must not be empty".to_string());
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliEngine {
    React,
    Signup,
}

impl From<CliEngine> for EngineKind {
    fn from(value: CliEngine) -> Self {
        match value {
            CliEngine::React => Self::React,
            CliEngine::Signup => Self::Signup,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliSupersedeMode {
    Queue,
    Supersede,
}

impl From<CliSupersedeMode> for SupersedeMode {
    fn from(value: CliSupersedeMode) -> Self {
        match value {
            CliSupersedeMode::Queue => Self::Queue,
            CliSupersedeMode::Supersede => Self::Supersede,
        }
    }
}

/// Flags left unset fall back to the config file, then to built-in defaults.
#[derive(Debug, Parser)]
#[command(
    name = "parley",
    about = "Watches chats and answers new messages through a decision engine",
    version
)]
pub struct Cli {
    #[arg(
        long = "chat",
        env = "PARLEY_CHATS",
        value_delimiter = ',',
        value_parser = parse_non_empty,
        help = "Chat to watch. Repeat the flag or pass a comma-separated list."
    )]
    pub chats: Vec<String>,

    #[arg(
        long,
        env = "PARLEY_CONFIG",
        help = "Optional TOML file with runtime and bridge settings"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long = "poll-interval-ms",
        env = "PARLEY_POLL_INTERVAL_MS",
        value_parser = parse_positive_u64,
        help = "Milliseconds between poll ticks"
    )]
    pub poll_interval_ms: Option<u64>,

    #[arg(
        long = "self-name",
        env = "PARLEY_SELF_NAME",
        value_parser = parse_non_empty,
        help = "Display name of the watched account; ingress messages from this sender count as outgoing"
    )]
    pub self_name: Option<String>,

    #[arg(
        long = "state-dir",
        env = "PARLEY_STATE_DIR",
        help = "Directory for chat records and the runtime events log"
    )]
    pub state_dir: Option<PathBuf>,

    #[arg(
        long = "ingress-dir",
        env = "PARLEY_INGRESS_DIR",
        help = "Directory holding one <chat>.ndjson visible-window file per chat"
    )]
    pub ingress_dir: Option<PathBuf>,

    #[arg(
        long = "outbox-dir",
        env = "PARLEY_OUTBOX_DIR",
        help = "Directory receiving one <chat>.jsonl file of sends and reactions per chat"
    )]
    pub outbox_dir: Option<PathBuf>,

    #[arg(
        long,
        env = "PARLEY_ENGINE",
        value_enum,
        help = "Built-in decision engine"
    )]
    pub engine: Option<CliEngine>,

    #[arg(
        long,
        env = "PARLEY_EMOJI",
        value_parser = parse_non_empty,
        help = "Emoji used by the react engine"
    )]
    pub emoji: Option<String>,

    #[arg(
        long = "decision-timeout-seconds",
        env = "PARLEY_DECISION_TIMEOUT_SECONDS",
        value_parser = parse_positive_u64,
        help = "Upper bound for one decision call"
    )]
    pub decision_timeout_seconds: Option<u64>,

    #[arg(
        long,
        env = "PARLEY_SUPERSEDE",
        value_enum,
        help = "What to do with an in-flight decision when newer messages arrive"
    )]
    pub supersede: Option<CliSupersedeMode>,

    #[arg(
        long = "no-baseline",
        env = "PARLEY_NO_BASELINE",
        action = ArgAction::SetTrue,
        help = "Treat messages already visible on a chat's first poll as new"
    )]
    pub no_baseline: bool,

    #[arg(
        long,
        action = ArgAction::SetTrue,
        help = "Run a single poll cycle, print its report and exit"
    )]
    pub once: bool,

    #[arg(
        long = "stdin-control",
        env = "PARLEY_STDIN_CONTROL",
        action = ArgAction::SetTrue,
        help = "Accept 'wake <chat>', 'resume <chat>' and 'stop' commands on stdin"
    )]
    pub stdin_control: bool,
}
