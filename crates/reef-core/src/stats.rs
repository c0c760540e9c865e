//! Population counts and per-step bookkeeping.

use crate::Species;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Per-species head count
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationCounts {
    pub fish: usize,
    pub sharks: usize,
}

impl PopulationCounts {
    pub fn total(&self) -> usize {
        self.fish + self.sharks
    }

    pub fn record(&mut self, species: Species) {
        match species {
            Species::Fish => self.fish += 1,
            Species::Shark => self.sharks += 1,
        }
    }
}

impl AddAssign for PopulationCounts {
    fn add_assign(&mut self, other: Self) {
        self.fish += other.fish;
        self.sharks += other.sharks;
    }
}

/// What happened during one evolution step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// Creatures whose energy went negative
    pub starved: usize,
    /// Fish eaten by sharks
    pub eaten: usize,
    /// Creatures that changed cell
    pub moved: usize,
    /// Offspring spawned
    pub births: usize,
}

impl StepReport {
    pub fn deaths(&self) -> usize {
        self.starved + self.eaten
    }
}

impl AddAssign for StepReport {
    fn add_assign(&mut self, other: Self) {
        self.starved += other.starved;
        self.eaten += other.eaten;
        self.moved += other.moved;
        self.births += other.births;
    }
}

/// Outcome of merging one incoming boundary layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Incoming creatures placed on an empty cell
    pub placed: usize,
    /// Incoming fish moved to an empty neighbor of an occupied cell
    pub displaced: usize,
    /// Incoming fish dropped for lack of an empty neighbor
    pub absorbed: usize,
    /// Local fish replaced by an incoming shark
    pub devoured: usize,
    /// Any other incoming creature that was discarded
    pub rejected: usize,
}

impl MergeReport {
    pub fn incoming(&self) -> usize {
        self.placed + self.displaced + self.absorbed + self.devoured + self.rejected
    }
}

impl AddAssign for MergeReport {
    fn add_assign(&mut self, other: Self) {
        self.placed += other.placed;
        self.displaced += other.displaced;
        self.absorbed += other.absorbed;
        self.devoured += other.devoured;
        self.rejected += other.rejected;
    }
}
