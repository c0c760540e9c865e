//! Ghost layer synchronization between neighboring partitions.
//!
//! Each worker keeps one ghost layer per neighbor: the lead ghost (`y = 0`)
//! mirrors the up neighbor's last owned layer and the trail ghost mirrors the
//! down neighbor's first owned layer. Ghosts are seeded once before the first
//! generation and refreshed after every migration round.

use crate::grid::Grid;
use crate::selection::SelectionPolicy;
use reef_comm::{Payload, Tag, Transport};
use reef_core::{
    BoundaryLayer, Coord, Error, MergeReport, PartitionSpec, PopulationCounts, Rank, Result,
    Species,
};
use tracing::{debug, instrument};

/// Neighbor wiring of one partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GhostExchange {
    up: Option<Rank>,
    down: Option<Rank>,
}

impl GhostExchange {
    pub fn new(up: Option<Rank>, down: Option<Rank>) -> Self {
        Self { up, down }
    }

    pub fn for_partition(spec: &PartitionSpec) -> Self {
        Self::new(spec.up(), spec.down())
    }

    /// Fill both ghost layers from the neighbors' boundary layers, then rescan
    #[instrument(skip_all, fields(rank = %transport.rank()))]
    pub fn seed<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        grid: &mut Grid,
    ) -> Result<PopulationCounts> {
        let layout = grid.layout();
        let own = layout.own_range();

        if let Some(down) = self.down {
            transport.send(down, Tag::Halo, Payload::Layer(grid.layer(own.end - 1)))?;
        }
        if let Some(up) = self.up {
            let layer = transport.recv(up, Tag::Halo)?.into_layer()?;
            grid.install_layer(ghost_y(layout.lead_ghost_y(), "lead")?, layer)?;
        }
        if let Some(up) = self.up {
            transport.send(up, Tag::Halo, Payload::Layer(grid.layer(own.start)))?;
        }
        if let Some(down) = self.down {
            let layer = transport.recv(down, Tag::Halo)?.into_layer()?;
            grid.install_layer(ghost_y(layout.trail_ghost_y(), "trail")?, layer)?;
        }

        Ok(grid.rescan())
    }

    /// Hand creatures that wandered into a ghost layer to the neighbor owning
    /// that layer, merge what the neighbors hand back, then refresh the ghosts
    #[instrument(skip_all, fields(rank = %transport.rank()))]
    pub fn synchronize<T, P>(
        &self,
        transport: &mut T,
        grid: &mut Grid,
        policy: &mut P,
    ) -> Result<MergeReport>
    where
        T: Transport + ?Sized,
        P: SelectionPolicy,
    {
        let layout = grid.layout();
        let own = layout.own_range();
        let mut report = MergeReport::default();

        let lead_arrivals = match self.up {
            Some(_) => Some(grid.take_arrivals(ghost_y(layout.lead_ghost_y(), "lead")?)),
            None => None,
        };
        let trail_arrivals = match self.down {
            Some(_) => Some(grid.take_arrivals(ghost_y(layout.trail_ghost_y(), "trail")?)),
            None => None,
        };

        if let (Some(down), Some(outgoing)) = (self.down, trail_arrivals) {
            debug!(to = %down, creatures = outgoing.occupied(), "Migrating down");
            transport.send(down, Tag::Migrate, Payload::Layer(outgoing))?;
        }
        if let Some(up) = self.up {
            let incoming = transport.recv(up, Tag::Migrate)?.into_layer()?;
            report += merge_layer(grid, own.start, incoming, policy)?;
        }
        if let (Some(up), Some(outgoing)) = (self.up, lead_arrivals) {
            debug!(to = %up, creatures = outgoing.occupied(), "Migrating up");
            transport.send(up, Tag::Migrate, Payload::Layer(outgoing))?;
        }
        if let Some(down) = self.down {
            let incoming = transport.recv(down, Tag::Migrate)?.into_layer()?;
            report += merge_layer(grid, own.end - 1, incoming, policy)?;
        }

        self.seed(transport, grid)?;
        Ok(report)
    }
}

fn ghost_y(y: Option<usize>, which: &str) -> Result<usize> {
    y.ok_or_else(|| Error::InvalidState(format!("partition has a neighbor but no {} ghost layer", which)))
}

/// Merge an incoming layer into owned layer `y`, cell by cell.
///
/// - empty local cell: the incoming creature is placed
/// - incoming fish onto any occupant: placed on an empty owned neighbor, or dropped
/// - incoming shark onto a fish: the shark replaces it
/// - anything else is dropped
pub fn merge_layer<P: SelectionPolicy>(
    grid: &mut Grid,
    y: usize,
    incoming: BoundaryLayer,
    policy: &mut P,
) -> Result<MergeReport> {
    grid.check_shape(&incoming)?;
    let layout = grid.layout();
    if !layout.own_range().contains(&y) {
        return Err(Error::InvalidState(format!(
            "merge target layer {} is not owned",
            y
        )));
    }

    let height = incoming.height;
    let mut report = MergeReport::default();

    for (offset, arriving) in incoming.cells.into_iter().enumerate() {
        let Some(arriving) = arriving else {
            continue;
        };
        let at = Coord::new(offset / height, y, offset % height);

        let local = grid.occupant(at).map(|creature| creature.species);
        match local {
            None => {
                grid.place(at, arriving);
                report.placed += 1;
            }
            Some(_) if arriving.is_fish() => {
                let escapes: Vec<Coord> = grid
                    .empty_neighbors(at)
                    .into_iter()
                    .filter(|coord| layout.is_owned(*coord))
                    .collect();
                match policy.pick(escapes.len()).and_then(|i| escapes.get(i)) {
                    Some(&escape) => {
                        grid.place(escape, arriving);
                        report.displaced += 1;
                    }
                    None => report.absorbed += 1,
                }
            }
            Some(Species::Fish) => {
                grid.kill_at(at);
                grid.place(at, arriving);
                report.devoured += 1;
            }
            Some(_) => report.rejected += 1,
        }
    }

    Ok(report)
}
