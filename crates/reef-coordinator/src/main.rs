//! Rank 0 of the Reef fish-and-sharks simulation.

mod cluster;
mod coordinator;
mod database;
mod snapshot;
mod telemetry;

use anyhow::Result;
use reef_core::{CoordinatorConfig, RunId};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = CoordinatorConfig::load()?;

    telemetry::init_telemetry(config.otel_endpoint.as_deref())?;

    let simulation = config.simulation.clone();
    if let Err(e) = simulation.validate() {
        error!("Invalid simulation configuration: {}", e);
        telemetry::shutdown_telemetry();
        return Err(e.into());
    }

    let db = database::Database::new(&config.database_path).await?;
    db.migrate().await?;

    let run_id = RunId::new();
    db.start_run(run_id, &simulation).await?;
    info!(
        event = "run_registered",
        run_id = %run_id,
        workers = simulation.workers,
        generations = simulation.generations,
        local = config.local,
        "Starting run"
    );

    let writer = snapshot::SnapshotWriter::spawn(
        PathBuf::from(&config.snapshot_dir),
        db.clone(),
        run_id,
        config.snapshot_queue_depth,
    )
    .await?;
    let sink = writer.sink();

    let addr = format!("{}:{}", config.bind_address, config.port);
    let run = async {
        if config.local {
            cluster::run_local(simulation, sink).await
        } else {
            cluster::run_networked(simulation, &addr, sink).await
        }
    };

    let outcome = tokio::select! {
        outcome = run => outcome,
        _ = shutdown_signal() => {
            // rank tasks may be parked in a blocking receive; leave without joining them
            warn!(event = "run_interrupted", run_id = %run_id, "Run interrupted");
            telemetry::shutdown_telemetry();
            std::process::exit(130);
        }
    };

    let stats = writer.finish().await;

    let summary = match outcome {
        Ok(summary) => summary,
        Err(e) => {
            error!(event = "run_failed", run_id = %run_id, "Run failed: {}", e);
            telemetry::shutdown_telemetry();
            return Err(e.into());
        }
    };

    db.finish_run(run_id, summary.final_counts).await?;
    let elapsed_secs = db
        .get_run(run_id)
        .await?
        .and_then(|record| record.finished_at.map(|end| end - record.started_at))
        .unwrap_or_default();
    let recorded = db.generation_counts(run_id).await?.len();

    info!(
        event = "run_complete",
        run_id = %run_id,
        elapsed_secs,
        generations = summary.generations,
        fish = summary.final_counts.fish,
        sharks = summary.final_counts.sharks,
        snapshots = stats.saved,
        failed_snapshots = stats.failed,
        last_snapshot = ?stats.last_generation,
        recorded_generations = recorded,
        history = %serde_json::to_string(&summary.history)?,
        "Run complete"
    );

    telemetry::shutdown_telemetry();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
