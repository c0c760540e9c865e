//! Core type definitions for the simulation.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Process rank within a run. Rank 0 is the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rank(pub u32);

impl Rank {
    pub const COORDINATOR: Rank = Rank(0);

    pub fn is_coordinator(&self) -> bool {
        self.0 == 0
    }

    /// Partition index owned by a worker rank
    pub fn partition_index(&self) -> Option<usize> {
        self.0.checked_sub(1).map(|i| i as usize)
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a simulation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a creature.
///
/// Ghost copies and migrated creatures keep the id they were spawned with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CreatureId(pub Uuid);

impl CreatureId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CreatureId {
    fn default() -> Self {
        Self::new()
    }
}

/// 3D cell coordinate. `y` runs along the partitioned width axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Coord {
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    /// Offset by a signed delta, `None` if any axis would go negative
    pub fn offset(&self, dx: i8, dy: i8, dz: i8) -> Option<Coord> {
        Some(Coord {
            x: self.x.checked_add_signed(dx as isize)?,
            y: self.y.checked_add_signed(dy as isize)?,
            z: self.z.checked_add_signed(dz as isize)?,
        })
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// The closed set of creature kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Species {
    Fish,
    Shark,
}

impl Species {
    pub const FISH_ENERGY: i32 = 20;
    pub const FISH_FERTILITY_THRESHOLD: u32 = 4;
    pub const SHARK_ENERGY: i32 = 3;
    pub const SHARK_FERTILITY_THRESHOLD: u32 = 12;

    /// Energy a shark gains per fish eaten
    pub const MEAL_ENERGY: i32 = 1;

    pub const fn initial_energy(self) -> i32 {
        match self {
            Species::Fish => Self::FISH_ENERGY,
            Species::Shark => Self::SHARK_ENERGY,
        }
    }

    pub const fn fertility_threshold(self) -> u32 {
        match self {
            Species::Fish => Self::FISH_FERTILITY_THRESHOLD,
            Species::Shark => Self::SHARK_FERTILITY_THRESHOLD,
        }
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Species::Fish => write!(f, "fish"),
            Species::Shark => write!(f, "shark"),
        }
    }
}

/// A fish or a shark
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creature {
    pub id: CreatureId,
    pub species: Species,
    pub position: Coord,
    pub energy: i32,
    pub fertility: u32,
    pub alive: bool,
}

impl Creature {
    pub fn spawn(species: Species, position: Coord) -> Self {
        Self {
            id: CreatureId::new(),
            species,
            position,
            energy: species.initial_energy(),
            fertility: 0,
            alive: true,
        }
    }

    pub fn fish(position: Coord) -> Self {
        Self::spawn(Species::Fish, position)
    }

    pub fn shark(position: Coord) -> Self {
        Self::spawn(Species::Shark, position)
    }

    pub fn is_fish(&self) -> bool {
        self.species == Species::Fish
    }

    pub fn is_shark(&self) -> bool {
        self.species == Species::Shark
    }

    /// Advance fertility and burn one unit of energy.
    ///
    /// Returns `false` and marks the creature dead once energy goes negative.
    pub fn age(&mut self) -> bool {
        self.fertility += 1;
        self.energy -= 1;
        if self.energy < 0 {
            self.alive = false;
        }
        self.alive
    }

    pub fn is_fertile(&self) -> bool {
        self.fertility >= self.species.fertility_threshold()
    }

    pub fn feed(&mut self) {
        self.energy += Species::MEAL_ENERGY;
    }

    pub fn kill(&mut self) {
        self.alive = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_species_constants() {
        assert_eq!(Species::Fish.initial_energy(), 20);
        assert_eq!(Species::Fish.fertility_threshold(), 4);
        assert_eq!(Species::Shark.initial_energy(), 3);
        assert_eq!(Species::Shark.fertility_threshold(), 12);
    }

    #[test]
    fn test_coord_offset() {
        let coord = Coord::new(1, 0, 2);
        assert_eq!(coord.offset(1, 1, -1), Some(Coord::new(2, 1, 1)));
        assert_eq!(coord.offset(0, -1, 0), None);
        assert_eq!(coord.offset(-1, 0, -2), None);
    }

    #[test]
    fn test_fish_ages_and_dies_below_zero() {
        let mut fish = Creature::fish(Coord::new(0, 0, 0));
        assert!(fish.age());
        assert_eq!(fish.energy, 19);
        assert_eq!(fish.fertility, 1);

        fish.energy = 0;
        assert!(!fish.age());
        assert_eq!(fish.energy, -1);
        assert!(!fish.alive);
    }

    #[test]
    fn test_fertility_threshold() {
        let mut shark = Creature::shark(Coord::new(0, 0, 0));
        shark.fertility = 11;
        assert!(!shark.is_fertile());
        shark.fertility = 12;
        assert!(shark.is_fertile());
    }

    #[test]
    fn test_rank_partition_index() {
        assert_eq!(Rank::COORDINATOR.partition_index(), None);
        assert_eq!(Rank(1).partition_index(), Some(0));
        assert_eq!(Rank(4).partition_index(), Some(3));
    }
}
