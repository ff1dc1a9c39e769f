//! Background daemon mode for periodic topology generation
//!
//! This module implements a background service that:
//! - Regenerates the topology on a fixed interval
//! - Keeps the last-known-good topology when a run fails
//! - Handles graceful shutdown via SIGTERM/SIGINT

use crate::agent::Agent;
use anyhow::Result;
use netmap_core::pipeline::GenerateOptions;
use tokio::time::{Duration, interval};
use tokio_util::sync::CancellationToken;

/// Run the background generation daemon
pub async fn run_daemon(agent: Agent, interval_minutes: u64, options: GenerateOptions) -> Result<()> {
    let interval_minutes = interval_minutes.max(1);
    tracing::info!(
        "Starting daemon: regenerating every {} minutes from {}",
        interval_minutes,
        agent.config.inventory
    );

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    tracing::info!("Running initial generation...");
    run_once(&agent, &options).await;

    let mut tick = interval(Duration::from_secs(interval_minutes * 60));
    // Skip the first tick since we just ran
    tick.tick().await;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                run_once(&agent, &options).await;
            }
            _ = shutdown.cancelled() => {
                tracing::info!("Shutdown requested, stopping daemon");
                break;
            }
        }
    }

    tracing::info!("Daemon stopped");
    Ok(())
}

/// One generation; failures are logged and the previous topology stays active.
async fn run_once(agent: &Agent, options: &GenerateOptions) {
    match agent.generator.generate(options.clone()).await {
        Ok(report) => {
            if report.from_cache {
                tracing::info!("Device snapshot unchanged, topology {} still current", report.topology.id);
            }
        }
        Err(e) => {
            tracing::error!("Generation failed, keeping last-known-good topology: {}", e);
        }
    }

    let stats = agent.generator.cache_stats();
    tracing::debug!(
        "Cache hit rates: snapshot {:.0}%, election {:.0}%, protocol poll {:.0}%",
        stats.snapshot.hit_rate() * 100.0,
        stats.election.hit_rate() * 100.0,
        stats.protocol_poll.hit_rate() * 100.0
    );
}

/// Cancel `shutdown` on Ctrl+C, and on SIGTERM where available
fn setup_signal_handlers(shutdown: CancellationToken) {
    let on_ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C");
            on_ctrl_c.cancel();
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::spawn(async move {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM");
                    shutdown.cancel();
                });
            }
            Err(e) => tracing::warn!("Failed to register SIGTERM handler: {}", e),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = shutdown;
    }
}
