use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use parley_cli::{build_engine, init_tracing, resolve_config, spawn_stdin_control, Cli, FileTransport};
use parley_runtime::EventLoop;
use tokio::sync::mpsc;

const CONTROL_CHANNEL_CAPACITY: usize = 16;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    let transport = Arc::new(FileTransport::new(
        config.bridge.ingress_dir.clone(),
        config.bridge.outbox_dir.clone(),
        config.runtime.self_identity.clone(),
    ));
    let engine = build_engine(
        config.bridge.engine,
        &config.bridge.emoji,
        &config.runtime.self_identity,
    );
    tracing::info!(
        engine = config.bridge.engine.as_str(),
        ingress_dir = %config.bridge.ingress_dir.display(),
        outbox_dir = %config.bridge.outbox_dir.display(),
        state_dir = %config.runtime.state_dir.display(),
        "starting parley"
    );
    let mut event_loop = EventLoop::new(config.runtime, transport, engine)?;

    if cli.once {
        let report = event_loop.run_once().await?;
        let rendered =
            serde_json::to_string_pretty(&report).context("failed to render cycle report")?;
        println!("{rendered}");
        return Ok(());
    }

    let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
    if cli.stdin_control {
        spawn_stdin_control(control_tx);
    } else {
        drop(control_tx);
    }
    event_loop.run(control_rx).await?;
    if cli.stdin_control {
        // The blocking stdin reader cannot be cancelled.
        std::process::exit(0);
    }
    Ok(())
}
