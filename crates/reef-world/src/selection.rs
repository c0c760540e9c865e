//! Random choice, abstracted so tests can swap in a deterministic policy.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use reef_core::{CreatureId, Rank};

/// Source of every random decision the engine makes after initial placement
pub trait SelectionPolicy {
    /// Index of the chosen candidate, `None` when there are no candidates
    fn pick(&mut self, candidates: usize) -> Option<usize>;

    /// Reorder the creatures walked in one generation
    fn shuffle(&mut self, ids: &mut [CreatureId]);
}

/// Uniform choice backed by a seeded ChaCha stream
pub struct RandomSelection {
    rng: ChaCha8Rng,
}

impl RandomSelection {
    pub fn new(rng: ChaCha8Rng) -> Self {
        Self { rng }
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(ChaCha8Rng::seed_from_u64(seed))
    }
}

impl SelectionPolicy for RandomSelection {
    fn pick(&mut self, candidates: usize) -> Option<usize> {
        (candidates > 0).then(|| self.rng.gen_range(0..candidates))
    }

    fn shuffle(&mut self, ids: &mut [CreatureId]) {
        ids.shuffle(&mut self.rng);
    }
}

/// Always takes the first candidate and never reorders
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstCandidate;

impl SelectionPolicy for FirstCandidate {
    fn pick(&mut self, candidates: usize) -> Option<usize> {
        (candidates > 0).then_some(0)
    }

    fn shuffle(&mut self, _ids: &mut [CreatureId]) {}
}

/// RNG for one worker: distinct per rank, reproducible when the run is seeded
pub fn partition_rng(seed: Option<u64>, rank: Rank) -> ChaCha8Rng {
    match seed {
        Some(seed) => {
            let stream = seed ^ (rank.0 as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
            ChaCha8Rng::seed_from_u64(stream)
        }
        None => ChaCha8Rng::from_entropy(),
    }
}
