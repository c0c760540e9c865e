//! Worker client for taking part in a coordinator's run.

use anyhow::Result;
use reef_comm::{wire, Transport};
use reef_core::WorkerConfig;
use reef_world::{run_worker, WorkerSummary};
use std::time::Instant;
use tracing::{info, instrument};

pub struct WorkerClient {
    config: WorkerConfig,
}

impl WorkerClient {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Connect, simulate the partition the coordinator assigns, and hang up
    #[instrument(skip(self), fields(coordinator = %self.config.coordinator_addr))]
    pub async fn run(&self) -> Result<WorkerSummary> {
        let (mut endpoint, connection) = wire::connect(&self.config.coordinator_addr).await?;
        let rank = endpoint.rank();
        info!("Joined run as rank {}", rank);

        let start = Instant::now();
        let result = tokio::task::spawn_blocking(move || run_worker(&mut endpoint)).await;

        // the endpoint went down with the task, so this flushes the last gather
        connection.close().await;
        let summary = result??;

        let duration = start.elapsed();
        info!(
            "Rank {} simulated {} generations in {:.2}s",
            rank,
            summary.generations,
            duration.as_secs_f64()
        );

        crate::record_histogram!("partition_run_seconds", duration.as_secs_f64(), rank = rank.0);
        crate::record_counter!("generations_completed", summary.generations, rank = rank.0);
        crate::record_counter!("migrants_received", summary.merges.incoming(), rank = rank.0);

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reef_comm::wire::accept_workers;
    use reef_comm::{Endpoint, Payload, Router, Tag};
    use reef_core::{PopulationCounts, Rank, SimulationConfig, WorldConfig};
    use reef_world::{decompose, reassemble};
    use tokio::net::TcpListener;

    #[test]
    fn test_worker_client_creation() {
        let config = WorkerConfig::default();
        let client = WorkerClient::new(config);
        assert_eq!(client.config().coordinator_addr, "127.0.0.1:7878");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_client_runs_assigned_partition() {
        let simulation = SimulationConfig {
            world: WorldConfig {
                length: 4,
                width: 4,
                height: 4,
                fish: 20,
                sharks: 4,
            },
            generations: 3,
            workers: 2,
            seed: Some(11),
            require_even_split: true,
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let clients: Vec<_> = (0..2)
            .map(|_| {
                let client = WorkerClient::new(WorkerConfig {
                    coordinator_addr: addr.clone(),
                    otel_endpoint: None,
                });
                tokio::spawn(async move { client.run().await.unwrap() })
            })
            .collect();

        let router = Router::new();
        let mut coordinator = Endpoint::direct(Rank::COORDINATOR, 3, &router);
        let readers = accept_workers(&listener, &router, 2).await.unwrap();

        let gathered = tokio::task::spawn_blocking(move || {
            let specs = decompose(&simulation).unwrap();
            for spec in &specs {
                coordinator
                    .send(spec.rank, Tag::Setup, Payload::Setup(spec.clone()))
                    .unwrap();
            }
            (0..simulation.generations)
                .map(|generation| {
                    let parts = specs
                        .iter()
                        .map(|spec| {
                            coordinator
                                .recv(spec.rank, Tag::Gather)
                                .unwrap()
                                .into_snapshot()
                                .unwrap()
                        })
                        .collect();
                    reassemble(generation, parts).unwrap().counts
                })
                .collect::<Vec<_>>()
        })
        .await
        .unwrap();

        let mut ranks = Vec::new();
        for client in clients {
            let summary = client.await.unwrap();
            assert_eq!(summary.generations, 3);
            ranks.push(summary.rank);
        }
        ranks.sort();
        assert_eq!(ranks, vec![Rank(1), Rank(2)]);
        assert_eq!(gathered[0], PopulationCounts { fish: 20, sharks: 4 });

        for reader in readers {
            reader.await.unwrap();
        }
    }
}
