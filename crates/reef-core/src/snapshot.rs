//! Grid geometry and the serializable views exchanged between ranks.

use crate::{Coord, Creature, Rank};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Dimensions of a local grid, including its ghost layers.
///
/// Cells are stored x-major: index of `(x, y, z)` is `(x * width + y) * height + z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub length: usize,
    pub width: usize,
    pub height: usize,
    /// Ghost layer at `y = 0` mirroring the up neighbor
    pub lead_ghost: bool,
    /// Ghost layer at `y = width - 1` mirroring the down neighbor
    pub trail_ghost: bool,
}

impl Layout {
    /// Layout without ghost layers
    pub fn new(length: usize, width: usize, height: usize) -> Self {
        Self {
            length,
            width,
            height,
            lead_ghost: false,
            trail_ghost: false,
        }
    }

    /// Layout of a partition owning `own_width` layers plus the requested ghosts
    pub fn with_ghosts(
        length: usize,
        own_width: usize,
        height: usize,
        lead_ghost: bool,
        trail_ghost: bool,
    ) -> Self {
        Self {
            length,
            width: own_width + lead_ghost as usize + trail_ghost as usize,
            height,
            lead_ghost,
            trail_ghost,
        }
    }

    pub fn volume(&self) -> usize {
        self.length * self.width * self.height
    }

    /// Cells in one `y` layer
    pub fn layer_len(&self) -> usize {
        self.length * self.height
    }

    pub fn contains(&self, coord: Coord) -> bool {
        coord.x < self.length && coord.y < self.width && coord.z < self.height
    }

    pub fn index(&self, coord: Coord) -> usize {
        debug_assert!(self.contains(coord), "{coord} outside {self:?}");
        (coord.x * self.width + coord.y) * self.height + coord.z
    }

    pub fn coord(&self, index: usize) -> Coord {
        let z = index % self.height;
        let y = (index / self.height) % self.width;
        let x = index / (self.height * self.width);
        Coord::new(x, y, z)
    }

    /// Owned (non-ghost) `y` range
    pub fn own_range(&self) -> Range<usize> {
        let start = self.lead_ghost as usize;
        let end = self.width - self.trail_ghost as usize;
        start..end
    }

    pub fn own_width(&self) -> usize {
        self.own_range().len()
    }

    pub fn is_owned(&self, coord: Coord) -> bool {
        self.own_range().contains(&coord.y)
    }

    pub fn lead_ghost_y(&self) -> Option<usize> {
        self.lead_ghost.then_some(0)
    }

    pub fn trail_ghost_y(&self) -> Option<usize> {
        self.trail_ghost.then(|| self.width - 1)
    }

    /// All coordinates of one `y` layer, in layer order
    pub fn layer_coords(&self, y: usize) -> impl Iterator<Item = Coord> + '_ {
        (0..self.length).flat_map(move |x| (0..self.height).map(move |z| Coord::new(x, y, z)))
    }
}

/// One `y` layer of a grid, `length * height` cells indexed `x * height + z`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryLayer {
    pub length: usize,
    pub height: usize,
    pub cells: Vec<Option<Creature>>,
}

impl BoundaryLayer {
    pub fn empty(length: usize, height: usize) -> Self {
        Self {
            length,
            height,
            cells: vec![None; length * height],
        }
    }

    pub fn get(&self, x: usize, z: usize) -> Option<&Creature> {
        self.cells[x * self.height + z].as_ref()
    }

    pub fn set(&mut self, x: usize, z: usize, creature: Option<Creature>) {
        self.cells[x * self.height + z] = creature;
    }

    pub fn occupied(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }
}

/// A full local grid as contributed to the per-generation gather
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSnapshot {
    pub rank: Rank,
    pub generation: u64,
    pub layout: Layout,
    pub cells: Vec<Option<Creature>>,
}
