//! Stitching gathered partitions back into one global grid.

use reef_core::{Coord, Error, GridSnapshot, Layout, PopulationCounts, Rank, Result};

/// A global grid rebuilt from one generation's gather
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reassembled {
    pub world: GridSnapshot,
    pub counts: PopulationCounts,
}

/// Drop every partition's ghost layers and concatenate the owned layers along
/// the width axis in rank order.
///
/// Creature positions in the result are global coordinates.
pub fn reassemble(generation: u64, mut parts: Vec<GridSnapshot>) -> Result<Reassembled> {
    parts.sort_by_key(|part| part.rank);

    let first = parts
        .first()
        .ok_or_else(|| Error::InvalidState("nothing to reassemble".to_string()))?;
    let (length, height) = (first.layout.length, first.layout.height);

    for part in &parts {
        if part.layout.length != length || part.layout.height != height {
            return Err(Error::Protocol(format!(
                "rank {} sent a {}x{} grid, expected {}x{}",
                part.rank, part.layout.length, part.layout.height, length, height
            )));
        }
        if part.generation != generation {
            return Err(Error::Protocol(format!(
                "rank {} sent generation {}, expected {}",
                part.rank, part.generation, generation
            )));
        }
        if part.cells.len() != part.layout.volume() {
            return Err(Error::Protocol(format!(
                "rank {} sent {} cells for a grid of {}",
                part.rank,
                part.cells.len(),
                part.layout.volume()
            )));
        }
    }

    let width = parts.iter().map(|part| part.layout.own_width()).sum();
    let layout = Layout::new(length, width, height);
    let mut cells = vec![None; layout.volume()];

    let mut y_offset = 0;
    for mut part in parts {
        let own = part.layout.own_range();
        for x in 0..length {
            for (shift, y) in own.clone().enumerate() {
                for z in 0..height {
                    let local = part.layout.index(Coord::new(x, y, z));
                    let global = layout.index(Coord::new(x, y_offset + shift, z));
                    cells[global] = part.cells[local].take();
                }
            }
        }
        y_offset += own.len();
    }

    let mut counts = PopulationCounts::default();
    for (index, cell) in cells.iter_mut().enumerate() {
        if let Some(creature) = cell {
            creature.position = layout.coord(index);
            counts.record(creature.species);
        }
    }

    Ok(Reassembled {
        world: GridSnapshot {
            rank: Rank::COORDINATOR,
            generation,
            layout,
            cells,
        },
        counts,
    })
}
