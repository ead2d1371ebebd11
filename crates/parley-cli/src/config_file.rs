//! Settings resolution: built-in defaults, then the optional TOML file, then
//! CLI flags and `PARLEY_*` environment variables.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use parley_runtime::RuntimeConfig;
use serde::{Deserialize, Serialize};

use crate::cli_args::Cli;
use crate::engines::EngineKind;

/// Where the file transport reads and writes, and which built-in engine runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub ingress_dir: PathBuf,
    pub outbox_dir: PathBuf,
    pub engine: EngineKind,
    pub emoji: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ingress_dir: PathBuf::from(".parley/ingress"),
            outbox_dir: PathBuf::from(".parley/outbox"),
            engine: EngineKind::React,
            emoji: "🤡".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub runtime: RuntimeConfig,
    pub bridge: BridgeConfig,
}

impl ParleyConfig {
    pub fn validate(&self) -> Result<()> {
        self.runtime
            .validate()
            .context("invalid runtime settings")?;
        if self.bridge.engine == EngineKind::Signup && self.runtime.self_identity.trim().is_empty() {
            bail!("the signup engine needs a non-empty self name");
        }
        if self.bridge.engine == EngineKind::React && self.bridge.emoji.trim().is_empty() {
            bail!("the react engine needs a non-empty emoji");
        }
        Ok(())
    }
}

pub fn load_config_file(path: &Path) -> Result<ParleyConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str::<ParleyConfig>(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

pub fn resolve_config(cli: &Cli) -> Result<ParleyConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_file(path)?,
        None => ParleyConfig::default(),
    };
    apply_cli_overrides(&mut config, cli);
    config.validate()?;
    Ok(config)
}

fn apply_cli_overrides(config: &mut ParleyConfig, cli: &Cli) {
    let runtime = &mut config.runtime;
    if !cli.chats.is_empty() {
        runtime.chats = cli.chats.clone();
    }
    if let Some(poll_interval_ms) = cli.poll_interval_ms {
        runtime.poll_interval_ms = poll_interval_ms;
    }
    if let Some(self_name) = &cli.self_name {
        runtime.self_identity = self_name.clone();
    }
    if let Some(state_dir) = &cli.state_dir {
        runtime.state_dir = state_dir.clone();
    }
    if let Some(timeout_seconds) = cli.decision_timeout_seconds {
        runtime.decision.timeout_seconds = timeout_seconds;
    }
    if let Some(supersede) = cli.supersede {
        runtime.supersede = supersede.into();
    }
    if cli.no_baseline {
        runtime.baseline_on_first_poll = false;
    }

    let bridge = &mut config.bridge;
    if let Some(ingress_dir) = &cli.ingress_dir {
        bridge.ingress_dir = ingress_dir.clone();
    }
    if let Some(outbox_dir) = &cli.outbox_dir {
        bridge.outbox_dir = outbox_dir.clone();
    }
    if let Some(engine) = cli.engine {
        bridge.engine = engine.into();
    }
    if let Some(emoji) = &cli.emoji {
        bridge.emoji = emoji.clone();
    }
}
