//! The per-rank loop every worker runs: setup, then exchange, gather and
//! evolve once per generation.

use crate::exchange::GhostExchange;
use crate::grid::Grid;
use crate::selection::{partition_rng, RandomSelection, SelectionPolicy};
use crate::simulation::Simulation;
use rand::Rng;
use reef_comm::{Payload, Tag, Transport};
use reef_core::{
    Error, MergeReport, PartitionSpec, PopulationCounts, Rank, Result, StepReport,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, event, info, instrument, Level};

/// What one worker did over a whole run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub rank: Rank,
    pub generations: u64,
    /// Owned population after the final step
    pub counts: PopulationCounts,
    pub steps: StepReport,
    pub merges: MergeReport,
}

/// Wait for this rank's setup, then simulate it with a seeded random policy
#[instrument(skip(transport), fields(rank = %transport.rank()))]
pub fn run_worker<T: Transport + ?Sized>(transport: &mut T) -> Result<WorkerSummary> {
    let spec = receive_setup(transport)?;
    let mut rng = partition_rng(spec.seed, spec.rank);
    let grid = populate(&spec, &mut rng)?;
    run_partition(transport, &spec, grid, RandomSelection::new(rng))
}

/// Receive and check the setup message from the coordinator
pub fn receive_setup<T: Transport + ?Sized>(transport: &mut T) -> Result<PartitionSpec> {
    let spec = transport.recv(Rank::COORDINATOR, Tag::Setup)?.into_setup()?;
    if spec.rank != transport.rank() {
        return Err(Error::Protocol(format!(
            "rank {} received the setup of rank {}",
            transport.rank(),
            spec.rank
        )));
    }
    if spec.workers + 1 != transport.size() {
        return Err(Error::Protocol(format!(
            "setup names {} workers but the run has {} ranks",
            spec.workers,
            transport.size()
        )));
    }
    info!(
        event = "worker_setup",
        rank = %spec.rank,
        own_width = spec.own_width,
        y_offset = spec.y_offset,
        fish = spec.fish,
        sharks = spec.sharks,
        "Received partition"
    );
    Ok(spec)
}

/// Empty local grid for `spec`, with its initial population scattered over owned cells
pub fn populate<R: Rng + ?Sized>(spec: &PartitionSpec, rng: &mut R) -> Result<Grid> {
    let mut grid = Grid::new(spec.layout());
    grid.populate(spec.fish, spec.sharks, rng)?;
    Ok(grid)
}

/// Seed the ghosts, then run every generation of `spec` over `grid`
pub fn run_partition<T, P>(
    transport: &mut T,
    spec: &PartitionSpec,
    mut grid: Grid,
    policy: P,
) -> Result<WorkerSummary>
where
    T: Transport + ?Sized,
    P: SelectionPolicy,
{
    let started = Instant::now();
    let exchange = GhostExchange::for_partition(spec);
    exchange.seed(transport, &mut grid)?;

    let mut sim = Simulation::new(grid, policy);
    let mut summary = WorkerSummary {
        rank: spec.rank,
        generations: 0,
        counts: PopulationCounts::default(),
        steps: StepReport::default(),
        merges: MergeReport::default(),
    };

    for generation in 0..spec.generations {
        let (grid, policy) = sim.parts_mut();
        let merges = exchange.synchronize(transport, grid, policy)?;

        let snapshot = sim.grid().snapshot(spec.rank, generation);
        transport.send(Rank::COORDINATOR, Tag::Gather, Payload::Snapshot(snapshot))?;

        let steps = sim.step()?;

        debug!(
            event = "generation_evolved",
            rank = %spec.rank,
            generation,
            fish = sim.grid().counts().fish,
            sharks = sim.grid().counts().sharks,
            starved = steps.starved,
            eaten = steps.eaten,
            births = steps.births,
            migrants = merges.incoming(),
            "Generation evolved"
        );

        summary.steps += steps;
        summary.merges += merges;
        summary.generations += 1;
    }

    summary.counts = sim.grid().counts();
    event!(
        Level::INFO,
        histogram_name = "worker_run_seconds",
        histogram_value = started.elapsed().as_secs_f64(),
        rank = %spec.rank,
        "Worker run duration"
    );
    info!(
        event = "worker_finished",
        rank = %spec.rank,
        generations = summary.generations,
        fish = summary.counts.fish,
        sharks = summary.counts.sharks,
        "Worker finished"
    );
    Ok(summary)
}
