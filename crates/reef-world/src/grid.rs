//! Dense 3D cell storage plus the registry of creatures living in it.

use crate::neighborhood::neighbors;
use rand::Rng;
use reef_core::{
    BoundaryLayer, Coord, Creature, CreatureId, Error, GridSnapshot, Layout, PopulationCounts,
    Rank, Result, Species,
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Random placement tries per creature before `populate` falls back to enumerating free cells
const PLACEMENT_ATTEMPTS: usize = 64;

/// One partition's cells, ghost layers included.
///
/// Cells hold creature ids; the creatures themselves live in a registry keyed
/// by id. Creatures found in owned layers at the last [`Grid::rescan`] form the
/// live list that evolution walks. Creatures found in ghost layers are ghost
/// copies: they can be seen and eaten but never take a turn.
#[derive(Debug, Clone)]
pub struct Grid {
    layout: Layout,
    cells: Vec<Option<CreatureId>>,
    creatures: HashMap<CreatureId, Creature>,
    live: Vec<CreatureId>,
    ghosts: HashSet<CreatureId>,
    counts: PopulationCounts,
}

impl Grid {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            cells: vec![None; layout.volume()],
            creatures: HashMap::new(),
            live: Vec::new(),
            ghosts: HashSet::new(),
            counts: PopulationCounts::default(),
        }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Live creatures standing in owned layers as of the last rescan or step.
    ///
    /// Movers that stepped into a ghost layer belong to the neighbor once
    /// migrated and are left out.
    pub fn counts(&self) -> PopulationCounts {
        self.counts
    }

    pub fn live(&self) -> &[CreatureId] {
        &self.live
    }

    pub fn creature(&self, id: CreatureId) -> Option<&Creature> {
        self.creatures.get(&id)
    }

    pub(crate) fn creature_mut(&mut self, id: CreatureId) -> Option<&mut Creature> {
        self.creatures.get_mut(&id)
    }

    pub fn occupant(&self, coord: Coord) -> Option<&Creature> {
        self.cells[self.layout.index(coord)].and_then(|id| self.creatures.get(&id))
    }

    pub fn is_empty(&self, coord: Coord) -> bool {
        self.cells[self.layout.index(coord)].is_none()
    }

    /// Whether `id` sat in a ghost layer at the last rescan
    pub fn is_ghost_copy(&self, id: CreatureId) -> bool {
        self.ghosts.contains(&id)
    }

    /// Number of occupied cells, ghosts included
    pub fn occupied(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_some()).count()
    }

    /// Create a creature in an empty cell
    pub fn spawn(&mut self, species: Species, coord: Coord) -> Result<CreatureId> {
        let index = self.layout.index(coord);
        if self.cells[index].is_some() {
            return Err(Error::InvalidState(format!(
                "cannot spawn {} at {}: cell is occupied",
                species, coord
            )));
        }

        let creature = Creature::spawn(species, coord);
        let id = creature.id;
        self.cells[index] = Some(id);
        self.creatures.insert(id, creature);
        if self.layout.is_owned(coord) {
            self.live.push(id);
            self.counts.record(species);
        }
        Ok(id)
    }

    /// Scatter the initial population over owned cells, fish first
    pub fn populate<R: Rng + ?Sized>(
        &mut self,
        fish: usize,
        sharks: usize,
        rng: &mut R,
    ) -> Result<PopulationCounts> {
        let free = self.free_owned_cells().len();
        if fish + sharks > free {
            return Err(Error::PlacementExhausted(format!(
                "{} fish and {} sharks requested but only {} owned cells are free",
                fish, sharks, free
            )));
        }

        for species in std::iter::repeat(Species::Fish)
            .take(fish)
            .chain(std::iter::repeat(Species::Shark).take(sharks))
        {
            let coord = self.random_free_cell(rng)?;
            self.spawn(species, coord)?;
        }

        debug!(fish, sharks, "Populated partition");
        Ok(self.rescan())
    }

    fn random_free_cell<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Coord> {
        let own = self.layout.own_range();
        for _ in 0..PLACEMENT_ATTEMPTS {
            let coord = Coord::new(
                rng.gen_range(0..self.layout.length),
                rng.gen_range(own.clone()),
                rng.gen_range(0..self.layout.height),
            );
            if self.is_empty(coord) {
                return Ok(coord);
            }
        }

        let free = self.free_owned_cells();
        if free.is_empty() {
            return Err(Error::PlacementExhausted(
                "no free owned cell left".to_string(),
            ));
        }
        Ok(free[rng.gen_range(0..free.len())])
    }

    fn free_owned_cells(&self) -> Vec<Coord> {
        self.layout
            .own_range()
            .flat_map(|y| self.layout.layer_coords(y))
            .filter(|coord| self.is_empty(*coord))
            .collect()
    }

    /// Walk every cell and rebuild the registry, live list, ghost set and counts.
    ///
    /// Each creature's stored position is overwritten with its cell. Dead,
    /// duplicated and dangling cell references are cleared, and registry
    /// entries no cell refers to are dropped.
    pub fn rescan(&mut self) -> PopulationCounts {
        let mut registry = HashMap::with_capacity(self.creatures.len());
        self.live.clear();
        self.ghosts.clear();
        self.counts = PopulationCounts::default();

        for index in 0..self.cells.len() {
            let Some(id) = self.cells[index] else {
                continue;
            };
            let coord = self.layout.coord(index);

            match self.creatures.remove(&id) {
                Some(mut creature) if creature.alive => {
                    creature.position = coord;
                    if self.layout.is_owned(coord) {
                        self.live.push(id);
                        self.counts.record(creature.species);
                    } else {
                        self.ghosts.insert(id);
                    }
                    registry.insert(id, creature);
                }
                Some(_) => {
                    warn!(event = "rescan_dead", %coord, "Cleared a dead creature left in its cell");
                    self.cells[index] = None;
                }
                None if registry.contains_key(&id) => {
                    warn!(event = "rescan_duplicate", %coord, "Cleared a second cell holding the same creature");
                    self.cells[index] = None;
                }
                None => {
                    warn!(event = "rescan_dangling", %coord, "Cleared a cell referring to an unknown creature");
                    self.cells[index] = None;
                }
            }
        }

        self.creatures = registry;
        self.counts
    }

    /// Neighbor cells holding nobody
    pub fn empty_neighbors(&self, coord: Coord) -> Vec<Coord> {
        neighbors(&self.layout, coord)
            .filter(|neighbor| self.is_empty(*neighbor))
            .collect()
    }

    /// Neighbor cells holding a living fish
    pub fn fish_neighbors(&self, coord: Coord) -> Vec<Coord> {
        neighbors(&self.layout, coord)
            .filter(|neighbor| {
                self.occupant(*neighbor)
                    .is_some_and(|creature| creature.alive && creature.is_fish())
            })
            .collect()
    }

    /// Empty the cell, leaving its creature in the registry
    pub(crate) fn clear(&mut self, coord: Coord) -> Option<CreatureId> {
        let index = self.layout.index(coord);
        self.cells[index].take()
    }

    /// Kill whatever occupies `coord` and empty the cell
    pub(crate) fn kill_at(&mut self, coord: Coord) -> Option<Species> {
        let id = self.clear(coord)?;
        let creature = self.creatures.get_mut(&id)?;
        creature.kill();
        Some(creature.species)
    }

    /// Move a creature to an empty cell, vacating its current one
    pub(crate) fn relocate(&mut self, id: CreatureId, to: Coord) {
        let Some(creature) = self.creatures.get_mut(&id) else {
            return;
        };
        let from = std::mem::replace(&mut creature.position, to);

        let from_index = self.layout.index(from);
        if self.cells[from_index] == Some(id) {
            self.cells[from_index] = None;
        }
        let to_index = self.layout.index(to);
        debug_assert!(self.cells[to_index].is_none(), "relocating onto occupied {to}");
        self.cells[to_index] = Some(id);
    }

    /// Put a creature into a cell as-is; its stored position is fixed by the next rescan
    pub(crate) fn place(&mut self, coord: Coord, creature: Creature) {
        let index = self.layout.index(coord);
        self.cells[index] = Some(creature.id);
        self.creatures.insert(creature.id, creature);
    }

    /// Forget everything that died during a step
    pub(crate) fn drop_dead(&mut self) {
        self.live
            .retain(|id| self.creatures.get(id).is_some_and(|creature| creature.alive));
        self.creatures.retain(|_, creature| creature.alive);

        let mut counts = PopulationCounts::default();
        for id in &self.live {
            match self.creatures.get(id) {
                Some(creature) if self.layout.is_owned(creature.position) => {
                    counts.record(creature.species)
                }
                _ => {}
            }
        }
        self.counts = counts;
    }

    /// Copy of one `y` layer
    pub fn layer(&self, y: usize) -> BoundaryLayer {
        let mut layer = BoundaryLayer::empty(self.layout.length, self.layout.height);
        for coord in self.layout.layer_coords(y) {
            layer.set(coord.x, coord.z, self.occupant(coord).cloned());
        }
        layer
    }

    /// Overwrite one `y` layer with `layer`
    pub fn install_layer(&mut self, y: usize, layer: BoundaryLayer) -> Result<()> {
        self.check_shape(&layer)?;
        let length = self.layout.length;
        let height = self.layout.height;

        for (offset, incoming) in layer.cells.into_iter().enumerate() {
            let coord = Coord::new(offset / height, y, offset % height);
            debug_assert!(coord.x < length);
            match incoming {
                Some(creature) => self.place(coord, creature),
                None => {
                    self.clear(coord);
                }
            }
        }
        Ok(())
    }

    /// Empty a ghost layer, returning the creatures that entered it since the last rescan
    pub fn take_arrivals(&mut self, y: usize) -> BoundaryLayer {
        let mut arrivals = BoundaryLayer::empty(self.layout.length, self.layout.height);
        let coords: Vec<Coord> = self.layout.layer_coords(y).collect();

        for coord in coords {
            let Some(id) = self.clear(coord) else {
                continue;
            };
            let Some(creature) = self.creatures.remove(&id) else {
                continue;
            };
            if creature.alive && !self.ghosts.contains(&id) {
                arrivals.set(coord.x, coord.z, Some(creature));
            }
        }
        arrivals
    }

    pub(crate) fn check_shape(&self, layer: &BoundaryLayer) -> Result<()> {
        if layer.length != self.layout.length
            || layer.height != self.layout.height
            || layer.cells.len() != self.layout.layer_len()
        {
            return Err(Error::Protocol(format!(
                "boundary layer of {}x{} ({} cells) does not fit a {}x{} grid",
                layer.length,
                layer.height,
                layer.cells.len(),
                self.layout.length,
                self.layout.height
            )));
        }
        Ok(())
    }

    /// Full local grid, ghosts included, for the per-generation gather
    pub fn snapshot(&self, rank: Rank, generation: u64) -> GridSnapshot {
        let cells = self
            .cells
            .iter()
            .map(|cell| cell.and_then(|id| self.creatures.get(&id).cloned()))
            .collect();

        GridSnapshot {
            rank,
            generation,
            layout: self.layout,
            cells,
        }
    }
}
