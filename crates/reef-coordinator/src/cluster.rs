//! Wiring a run: in-process workers, or workers connecting over TCP.

use crate::coordinator::{run_coordinator, RunSummary};
use crate::snapshot::SnapshotSink;
use futures::future::join_all;
use reef_comm::wire::accept_workers;
use reef_comm::{local_mesh_on, Endpoint, Router, Transport};
use reef_core::{Error, Rank, Result, SimulationConfig};
use reef_world::{run_worker, WorkerSummary};
use tokio::net::TcpListener;
use tokio::task::JoinError;
use tracing::{debug, error, info, instrument};

/// Run every worker as a blocking task of this process.
///
/// The first rank to fail or panic closes every inbox, so the others stop
/// waiting on it and the run fails fast.
#[instrument(skip_all, fields(workers = config.workers))]
pub async fn run_local(config: SimulationConfig, sink: SnapshotSink) -> Result<RunSummary> {
    run_ranks(config, sink, run_worker::<Endpoint>).await
}

async fn run_ranks<W>(config: SimulationConfig, sink: SnapshotSink, work: W) -> Result<RunSummary>
where
    W: Fn(&mut Endpoint) -> Result<WorkerSummary> + Clone + Send + 'static,
{
    let router = Router::new();
    let mut mesh = local_mesh_on(&router, config.workers + 1);
    let mut coordinator = mesh.remove(0);

    let workers: Vec<_> = mesh
        .into_iter()
        .map(|mut endpoint| {
            let guard = router.close_on_drop();
            let work = work.clone();
            tokio::task::spawn_blocking(move || {
                let result = work(&mut endpoint);
                match &result {
                    Ok(_) => guard.disarm(),
                    Err(e) => error!(rank = %endpoint.rank(), error = %e, "Worker failed"),
                }
                result
            })
        })
        .collect();

    let guard = router.close_on_drop();
    let coordinated = tokio::task::spawn_blocking(move || {
        let result = run_coordinator(&mut coordinator, &config, |world| sink.submit(world));
        if result.is_ok() {
            guard.disarm();
        }
        result
    })
    .await;

    let mut first_failure = None;
    let mut first_panic = None;
    for joined in join_all(workers).await {
        match joined {
            Ok(Ok(summary)) => debug!(
                rank = %summary.rank,
                fish = summary.counts.fish,
                sharks = summary.counts.sharks,
                births = summary.steps.births,
                migrants = summary.merges.incoming(),
                "Worker finished"
            ),
            Ok(Err(e)) => {
                first_failure.get_or_insert(e);
            }
            Err(e) => {
                error!(error = %e, "Worker task panicked");
                first_panic.get_or_insert(panicked(e));
            }
        }
    }
    // peers of a crashed rank only see their inboxes close
    let first_failure = first_panic.or(first_failure);

    // a worker's own error explains a coordinator that lost its inbox
    match (coordinated.map_err(panicked)?, first_failure) {
        (Ok(summary), None) => Ok(summary),
        (_, Some(e)) | (Err(e), None) => Err(e),
    }
}

/// Accept `config.workers` TCP connections on `addr`, then run rank 0.
///
/// A worker that fails or disconnects mid-run leaves its neighbors waiting;
/// there is no timeout.
#[instrument(skip(config, sink))]
pub async fn run_networked(config: SimulationConfig, addr: &str, sink: SnapshotSink) -> Result<RunSummary> {
    let listener = TcpListener::bind(addr).await?;
    info!("Waiting for {} workers on {}", config.workers, addr);

    let router = Router::new();
    let mut coordinator = Endpoint::direct(Rank::COORDINATOR, config.workers + 1, &router);
    let readers = accept_workers(&listener, &router, config.workers).await?;
    info!(event = "workers_connected", workers = config.workers, "All workers connected");

    let summary = tokio::task::spawn_blocking(move || {
        run_coordinator(&mut coordinator, &config, |world| sink.submit(world))
    })
    .await
    .map_err(panicked)??;

    // workers hang up once their last gather is sent
    for joined in join_all(readers).await {
        if let Err(e) = joined {
            error!("Connection reader failed: {}", e);
        }
    }
    Ok(summary)
}

fn panicked(e: JoinError) -> Error {
    Error::Other(format!("rank task failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::snapshot::{load_snapshot, snapshot_path, SnapshotWriter};
    use reef_core::{PopulationCounts, RunId, WorldConfig};
    use std::path::PathBuf;

    fn config(workers: u32) -> SimulationConfig {
        SimulationConfig {
            world: WorldConfig {
                length: 6,
                width: 6,
                height: 6,
                fish: 90,
                sharks: 18,
            },
            generations: 4,
            workers,
            seed: Some(5),
            require_even_split: true,
        }
    }

    async fn writer() -> (SnapshotWriter, Database, RunId, PathBuf) {
        let dir = std::env::temp_dir().join(format!("reef-cluster-{}", uuid::Uuid::new_v4()));
        let db = Database::new(":memory:").await.unwrap();
        db.migrate().await.unwrap();
        let run_id = RunId::new();
        db.start_run(run_id, &config(1)).await.unwrap();
        let writer = SnapshotWriter::spawn(dir.clone(), db.clone(), run_id, 2).await.unwrap();
        (writer, db, run_id, dir)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_local_run_persists_every_generation() {
        let (writer, db, run_id, dir) = writer().await;

        let summary = run_local(config(3), writer.sink()).await.unwrap();
        let stats = writer.finish().await;

        assert_eq!(summary.history[0], PopulationCounts { fish: 90, sharks: 18 });
        assert_eq!(stats.saved, 4);

        let recorded: Vec<PopulationCounts> = db
            .generation_counts(run_id)
            .await
            .unwrap()
            .into_iter()
            .map(|(_, counts)| counts)
            .collect();
        assert_eq!(recorded, summary.history);

        let last = load_snapshot(&snapshot_path(&dir, 3)).await.unwrap();
        assert_eq!(last.cells.iter().flatten().count(), summary.final_counts.total());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_local_and_networked_runs_agree() {
        let (writer, _db, _run_id, dir) = writer().await;
        let local = run_local(config(2), writer.sink()).await.unwrap();

        // find a free port, then release it for the coordinator
        let addr = {
            let free = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            free.local_addr().unwrap().to_string()
        };
        let sink = writer.sink();
        let coordinator = tokio::spawn({
            let addr = addr.clone();
            async move { run_networked(config(2), &addr, sink).await }
        });

        let mut clients = Vec::new();
        for _ in 0..2 {
            let addr = addr.clone();
            clients.push(tokio::spawn(async move {
                let (mut endpoint, connection) = loop {
                    match reef_comm::wire::connect(&addr).await {
                        Ok(connected) => break connected,
                        Err(_) => tokio::time::sleep(std::time::Duration::from_millis(20)).await,
                    }
                };
                let summary = tokio::task::spawn_blocking(move || run_worker(&mut endpoint))
                    .await
                    .unwrap()
                    .unwrap();
                connection.close().await;
                summary
            }));
        }

        let networked = coordinator.await.unwrap().unwrap();
        for client in clients {
            client.await.unwrap();
        }
        assert_eq!(networked.history, local.history);

        writer.finish().await;
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_panicking_worker_fails_the_run() {
        let (writer, _db, _run_id, dir) = writer().await;

        let run = run_ranks(config(3), writer.sink(), |endpoint: &mut Endpoint| {
            if endpoint.rank() == Rank(2) {
                panic!("rank 2 crashed");
            }
            run_worker(endpoint)
        });
        let result = tokio::time::timeout(std::time::Duration::from_secs(10), run)
            .await
            .expect("run hung after a worker panic");
        assert!(matches!(result, Err(Error::Other(_))));

        writer.finish().await;
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
