//! Worker rank of the Reef fish-and-sharks simulation.

mod client;
mod telemetry;

use anyhow::Result;
use reef_core::WorkerConfig;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = WorkerConfig::load()?;

    telemetry::init_telemetry(config.otel_endpoint.as_deref())?;

    info!("Starting Reef worker");
    let client = client::WorkerClient::new(config);
    info!("Coordinator address: {}", client.config().coordinator_addr);

    tokio::select! {
        result = client.run() => match result {
            Ok(summary) => info!(
                event = "worker_done",
                rank = %summary.rank,
                generations = summary.generations,
                fish = summary.counts.fish,
                sharks = summary.counts.sharks,
                starved = summary.steps.starved,
                eaten = summary.steps.eaten,
                births = summary.steps.births,
                "Partition complete"
            ),
            Err(e) => {
                error!("Worker failed: {}", e);
                telemetry::shutdown_telemetry();
                return Err(e);
            }
        },
        _ = shutdown_signal() => {
            // the simulation thread may be parked in a blocking receive
            warn!("Shutting down worker mid-run");
            telemetry::shutdown_telemetry();
            std::process::exit(130);
        }
    }

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
