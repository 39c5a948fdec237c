//! Request Bot: config-driven chat commands backed by HTTP requests.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use request_bot::bootstrap;
use request_bot::channels::{Channel, ReplChannel, admin};
use request_bot::cli::{Cli, Command, run_check_command};
use request_bot::config::Config;
use request_bot::engine::{CommandEngine, EventLanes};
use request_bot::requests::ReqwestRunner;

/// How long an idle conversation keeps its event lane.
const LANE_IDLE: Duration = Duration::from_secs(600);

/// Initialize tracing for simple CLI commands (warn level, no fancy layers).
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
}

fn init_run_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap::load_env();
    let cli = Cli::parse();

    if cli.command == Some(Command::Check) {
        init_cli_tracing();
        return run_check_command(&cli.config);
    }
    if !cli.should_run() {
        return Ok(());
    }

    init_run_tracing();
    let config = Config::load(&cli.config)
        .map_err(|e| anyhow::anyhow!("{}: {}", cli.config.display(), e))?;
    tracing::info!(
        commands = config.catalog.commands().len(),
        destinations = config.catalog.channels.len(),
        "Catalog loaded from {}",
        cli.config.display()
    );

    let runner = Arc::new(ReqwestRunner::new(config.engine.request_timeout)?);
    let completions = config
        .catalog
        .commands()
        .iter()
        .map(|c| format!("/{}", c.name))
        .collect();
    let channel: Arc<dyn Channel> = Arc::new(ReplChannel::new(completions));

    let engine = Arc::new(CommandEngine::new(
        Arc::clone(&config.catalog),
        Arc::clone(&channel),
        runner,
    ));

    let admin_handle = config.admin.clone().map(|admin_config| {
        let channel = Arc::clone(&channel);
        tokio::spawn(async move {
            if let Err(e) = admin::serve(admin_config, channel).await {
                tracing::error!("Admin push surface stopped: {}", e);
            }
        })
    });

    let pruning_handle = config.engine.idle_timeout.map(|max_idle| {
        tracing::info!("Cancelling commands idle for more than {}s", max_idle.as_secs());
        engine.spawn_idle_pruner(max_idle)
    });

    let mut lanes = EventLanes::new(Arc::clone(&engine), LANE_IDLE);
    let mut events = channel.start().await?;
    tracing::info!("Bot ready and listening on {}", channel.name());

    let stream_ended = loop {
        let event = tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down...");
                break false;
            }
            event = events.next() => match event {
                Some(event) => event,
                None => {
                    tracing::info!("Channel stream ended, shutting down...");
                    break true;
                }
            },
        };

        lanes.dispatch(event);
    };

    // Let queued events of a closed channel finish
    if stream_ended {
        lanes.drain().await;
    }

    if let Some(handle) = admin_handle {
        handle.abort();
    }
    if let Some(handle) = pruning_handle {
        handle.abort();
    }
    Ok(())
}
