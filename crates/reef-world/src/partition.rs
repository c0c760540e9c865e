//! Domain decomposition along the width axis.

use reef_core::{Coord, Error, GridSnapshot, PartitionSpec, Rank, Result, SimulationConfig};

/// Split the world between `config.workers` ranks.
///
/// Each rank gets `width / workers` layers, with the remainder handed out one
/// layer at a time to the leading ranks. Creature counts are divided evenly,
/// dropping any remainder.
pub fn decompose(config: &SimulationConfig) -> Result<Vec<PartitionSpec>> {
    config.validate()?;

    let world = &config.world;
    let workers = config.workers as usize;
    let base = world.width / workers;
    let extra = world.width % workers;
    let fish = world.fish / workers;
    let sharks = world.sharks / workers;

    let mut y_offset = 0;
    let mut specs = Vec::with_capacity(workers);
    for index in 0..workers {
        let own_width = base + (index < extra) as usize;
        let owned_cells = world.length * own_width * world.height;
        if fish + sharks > owned_cells {
            return Err(Error::Config(format!(
                "partition {} has {} cells for {} creatures",
                index,
                owned_cells,
                fish + sharks
            )));
        }

        specs.push(PartitionSpec {
            rank: Rank(index as u32 + 1),
            workers: config.workers,
            length: world.length,
            own_width,
            height: world.height,
            y_offset,
            fish,
            sharks,
            generations: config.generations,
            seed: config.seed,
        });
        y_offset += own_width;
    }

    Ok(specs)
}

/// Cut one partition's local view, ghost layers included, out of a global grid
pub fn extract_partition(global: &GridSnapshot, spec: &PartitionSpec) -> Result<GridSnapshot> {
    let layout = spec.layout();
    let source = global.layout;
    let lead = layout.lead_ghost as usize;

    if source.length != layout.length
        || source.height != layout.height
        || spec.y_offset < lead
        || spec.y_offset - lead + layout.width > source.width
    {
        return Err(Error::InvalidState(format!(
            "partition of rank {} does not fit a {}x{}x{} world",
            spec.rank, source.length, source.width, source.height
        )));
    }

    let mut cells = vec![None; layout.volume()];
    for (index, cell) in cells.iter_mut().enumerate() {
        let local = layout.coord(index);
        let origin = Coord::new(local.x, spec.y_offset - lead + local.y, local.z);
        *cell = global.cells[source.index(origin)].clone().map(|mut creature| {
            creature.position = local;
            creature
        });
    }

    Ok(GridSnapshot {
        rank: spec.rank,
        generation: global.generation,
        layout,
        cells,
    })
}
