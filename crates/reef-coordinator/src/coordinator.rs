//! Rank 0: hand out partitions, then gather and reassemble every generation.

use reef_comm::{Payload, Tag, Transport};
use reef_core::{Error, PopulationCounts, Rank, Result, SimulationConfig};
use reef_world::{decompose, reassemble, Reassembled};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, instrument};

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub generations: u64,
    pub final_counts: PopulationCounts,
    /// Global counts per gathered generation
    pub history: Vec<PopulationCounts>,
}

/// Drive a whole run from rank 0.
///
/// Every reassembled world is moved into `on_world`; an error from it aborts
/// the run.
#[instrument(skip_all, fields(workers = config.workers, generations = config.generations))]
pub fn run_coordinator<T, F>(
    transport: &mut T,
    config: &SimulationConfig,
    mut on_world: F,
) -> Result<RunSummary>
where
    T: Transport + ?Sized,
    F: FnMut(Reassembled) -> Result<()>,
{
    if transport.rank() != Rank::COORDINATOR {
        return Err(Error::Protocol(format!(
            "the coordinator must run as rank 0, not rank {}",
            transport.rank()
        )));
    }
    if transport.workers() != config.workers {
        return Err(Error::Config(format!(
            "configured for {} workers but {} are connected",
            config.workers,
            transport.workers()
        )));
    }

    let specs = decompose(config)?;
    for spec in &specs {
        transport.send(spec.rank, Tag::Setup, Payload::Setup(spec.clone()))?;
    }
    info!(
        event = "run_started",
        workers = config.workers,
        length = config.world.length,
        width = config.world.width,
        height = config.world.height,
        "Partitions sent"
    );

    let started = Instant::now();
    let mut history = Vec::with_capacity(config.generations as usize);
    for generation in 0..config.generations {
        let gather_started = Instant::now();

        let mut parts = Vec::with_capacity(specs.len());
        for spec in &specs {
            let part = transport.recv(spec.rank, Tag::Gather)?.into_snapshot()?;
            if part.rank != spec.rank {
                return Err(Error::Protocol(format!(
                    "rank {} sent a snapshot labelled rank {}",
                    spec.rank, part.rank
                )));
            }
            parts.push(part);
        }

        let world = reassemble(generation, parts)?;
        let counts = world.counts;
        info!(
            event = "generation_gathered",
            generation,
            fish = counts.fish,
            sharks = counts.sharks,
            "Generation {} gathered",
            generation
        );
        crate::record_gauge!("fish_population", counts.fish, generation = generation);
        crate::record_gauge!("shark_population", counts.sharks, generation = generation);
        crate::record_histogram!(
            "gather_seconds",
            gather_started.elapsed().as_secs_f64()
        );

        history.push(counts);
        on_world(world)?;
    }

    let final_counts = history.last().copied().unwrap_or_default();
    crate::record_histogram!("run_seconds", started.elapsed().as_secs_f64());
    info!(
        event = "run_finished",
        generations = config.generations,
        fish = final_counts.fish,
        sharks = final_counts.sharks,
        "Run finished"
    );

    Ok(RunSummary {
        generations: config.generations,
        final_counts,
        history,
    })
}
