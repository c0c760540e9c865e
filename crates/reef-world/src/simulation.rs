//! Evolution engine: one predator-prey generation over a partition.

use crate::grid::Grid;
use crate::selection::SelectionPolicy;
use reef_core::{Coord, Result, Species, StepReport};
use tracing::{instrument, trace};

pub struct Simulation<P> {
    grid: Grid,
    policy: P,
    generation: u64,
}

impl<P: SelectionPolicy> Simulation<P> {
    pub fn new(grid: Grid, policy: P) -> Self {
        Self {
            grid,
            policy,
            generation: 0,
        }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Generations evolved so far
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Grid and policy borrowed together, for the boundary exchange
    pub fn parts_mut(&mut self) -> (&mut Grid, &mut P) {
        (&mut self.grid, &mut self.policy)
    }

    pub fn into_grid(self) -> Grid {
        self.grid
    }

    /// Give every live creature one turn, in shuffled order.
    ///
    /// Creatures killed earlier in the same step are skipped when their turn
    /// comes. Newborns do not act until the next step.
    #[instrument(skip(self), fields(generation = self.generation))]
    pub fn step(&mut self) -> Result<StepReport> {
        let mut report = StepReport::default();
        let mut order = self.grid.live().to_vec();
        self.policy.shuffle(&mut order);

        for id in order {
            let Some(creature) = self.grid.creature_mut(id) else {
                continue;
            };
            if !creature.alive {
                continue;
            }
            let species = creature.species;
            let origin = creature.position;

            if !creature.age() {
                self.grid.clear(origin);
                report.starved += 1;
                trace!(%origin, %species, "starved");
                continue;
            }

            let target = match species {
                Species::Fish => self.pick_empty(origin),
                Species::Shark => {
                    let prey = self.grid.fish_neighbors(origin);
                    match choose(&mut self.policy, &prey) {
                        Some(meal) => {
                            self.grid.kill_at(meal);
                            if let Some(shark) = self.grid.creature_mut(id) {
                                shark.feed();
                            }
                            report.eaten += 1;
                            Some(meal)
                        }
                        None => self.pick_empty(origin),
                    }
                }
            };

            let Some(target) = target else {
                continue;
            };
            self.grid.relocate(id, target);
            report.moved += 1;

            let fertile = match self.grid.creature_mut(id) {
                Some(creature) if creature.is_fertile() => {
                    creature.fertility = 0;
                    true
                }
                _ => false,
            };
            if fertile {
                self.grid.spawn(species, origin)?;
                report.births += 1;
            }
        }

        self.grid.drop_dead();
        self.generation += 1;
        Ok(report)
    }

    fn pick_empty(&mut self, origin: Coord) -> Option<Coord> {
        let open = self.grid.empty_neighbors(origin);
        choose(&mut self.policy, &open)
    }
}

fn choose<P: SelectionPolicy>(policy: &mut P, candidates: &[Coord]) -> Option<Coord> {
    policy
        .pick(candidates.len())
        .and_then(|index| candidates.get(index).copied())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::tests::assert_consistent;
    use crate::selection::{FirstCandidate, RandomSelection};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use reef_core::{Layout, PopulationCounts};

    fn world(length: usize, width: usize, height: usize) -> Grid {
        Grid::new(Layout::new(length, width, height))
    }

    #[test]
    fn test_shark_eats_adjacent_fish() {
        let mut grid = world(4, 4, 4);
        grid.spawn(Species::Fish, Coord::new(0, 0, 0)).unwrap();
        let shark = grid.spawn(Species::Shark, Coord::new(0, 0, 1)).unwrap();

        let mut sim = Simulation::new(grid, FirstCandidate);
        let report = sim.step().unwrap();

        assert_eq!(report.eaten, 1);
        assert_eq!(sim.grid().counts(), PopulationCounts { fish: 0, sharks: 1 });
        assert_eq!(sim.grid().live(), &[shark]);

        let survivor = sim.grid().creature(shark).unwrap();
        assert_eq!(survivor.energy, Species::SHARK_ENERGY + 1 - 1);
        assert_consistent(sim.grid());
    }

    #[test]
    fn test_packed_world_of_fish_stays_put() {
        let mut grid = world(2, 2, 2);
        let layout = grid.layout();
        let ids: Vec<_> = (0..layout.volume())
            .map(|index| grid.spawn(Species::Fish, layout.coord(index)).unwrap())
            .collect();

        let mut sim = Simulation::new(grid, RandomSelection::seeded(5));
        let report = sim.step().unwrap();

        assert_eq!(report, StepReport::default());
        for (index, id) in ids.iter().enumerate() {
            let fish = sim.grid().creature(*id).unwrap();
            assert_eq!(fish.position, layout.coord(index));
            assert_eq!(fish.energy, Species::FISH_ENERGY - 1);
            assert_eq!(fish.fertility, 1);
        }
    }

    #[test]
    fn test_packed_world_of_sharks_stays_put() {
        let mut grid = world(2, 2, 2);
        let layout = grid.layout();
        for index in 0..layout.volume() {
            grid.spawn(Species::Shark, layout.coord(index)).unwrap();
        }

        let mut sim = Simulation::new(grid, FirstCandidate);
        let report = sim.step().unwrap();

        assert_eq!(report.moved, 0);
        assert_eq!(sim.grid().counts().sharks, 8);
        for index in 0..layout.volume() {
            let shark = sim.grid().occupant(layout.coord(index)).unwrap();
            assert_eq!(shark.energy, Species::SHARK_ENERGY - 1);
        }
    }

    #[test]
    fn test_packed_mixed_world_sharks_eat_every_fish() {
        let mut grid = world(2, 2, 2);
        let layout = grid.layout();
        let sharks: Vec<_> = (0..4)
            .map(|index| grid.spawn(Species::Shark, layout.coord(index)).unwrap())
            .collect();
        for index in 4..8 {
            grid.spawn(Species::Fish, layout.coord(index)).unwrap();
        }

        let mut sim = Simulation::new(grid, FirstCandidate);
        let report = sim.step().unwrap();

        assert_eq!(report.eaten, 4);
        assert_eq!(report.moved, 4);
        assert_eq!(report.starved, 0);
        assert_eq!(report.births, 0);
        assert_eq!(sim.grid().counts(), PopulationCounts { fish: 0, sharks: 4 });
        for index in 0..4 {
            assert!(sim.grid().is_empty(layout.coord(index)));
            assert!(sim.grid().occupant(layout.coord(index + 4)).unwrap().is_shark());
        }
        for id in sharks {
            let shark = sim.grid().creature(id).unwrap();
            assert_eq!(shark.energy, Species::SHARK_ENERGY - 1 + Species::MEAL_ENERGY);
        }
        assert_consistent(sim.grid());
    }

    #[test]
    fn test_packed_mixed_world_keeps_population_balanced() {
        let mut grid = world(2, 2, 2);
        let layout = grid.layout();
        for index in 0..layout.volume() {
            let species = if index % 2 == 0 { Species::Fish } else { Species::Shark };
            grid.spawn(species, layout.coord(index)).unwrap();
        }

        let mut sim = Simulation::new(grid, RandomSelection::seeded(9));
        let report = sim.step().unwrap();

        // every cell neighbors every other, so no shark goes hungry
        assert_eq!(report.eaten, 4);
        assert_eq!(report.starved, 0);
        assert_eq!(sim.grid().counts(), PopulationCounts { fish: 0, sharks: 4 });
        assert_consistent(sim.grid());
    }

    #[test]
    fn test_fertile_shark_leaves_offspring_where_it_fed() {
        let mut grid = world(1, 1, 3);
        let origin = Coord::new(0, 0, 0);
        let parent = grid.spawn(Species::Shark, origin).unwrap();
        grid.spawn(Species::Fish, Coord::new(0, 0, 1)).unwrap();
        grid.creature_mut(parent).unwrap().fertility = Species::SHARK_FERTILITY_THRESHOLD - 1;

        let mut sim = Simulation::new(grid, FirstCandidate);
        let report = sim.step().unwrap();

        assert_eq!(report.eaten, 1);
        assert_eq!(report.births, 1);
        assert_eq!(sim.grid().counts(), PopulationCounts { fish: 0, sharks: 2 });

        let fed = sim.grid().creature(parent).unwrap();
        assert_eq!(fed.position, Coord::new(0, 0, 1));
        assert_eq!(fed.fertility, 0);
        assert_eq!(fed.energy, Species::SHARK_ENERGY - 1 + Species::MEAL_ENERGY);

        let child = sim.grid().occupant(origin).unwrap();
        assert_ne!(child.id, parent);
        assert!(child.is_shark());
        assert_eq!(child.energy, Species::SHARK_ENERGY);
        assert_eq!(child.fertility, 0);
        assert!(sim.grid().is_empty(Coord::new(0, 0, 2)));
        assert_consistent(sim.grid());
    }

    #[test]
    fn test_shark_short_of_threshold_does_not_reproduce() {
        let mut grid = world(1, 1, 2);
        let parent = grid.spawn(Species::Shark, Coord::new(0, 0, 0)).unwrap();
        grid.creature_mut(parent).unwrap().fertility = Species::SHARK_FERTILITY_THRESHOLD - 2;

        let mut sim = Simulation::new(grid, FirstCandidate);
        let report = sim.step().unwrap();

        assert_eq!(report.births, 0);
        assert_eq!(report.moved, 1);
        assert!(sim.grid().is_empty(Coord::new(0, 0, 0)));
        assert_eq!(
            sim.grid().creature(parent).unwrap().fertility,
            Species::SHARK_FERTILITY_THRESHOLD - 1
        );
    }

    #[test]
    fn test_fish_with_zero_energy_dies() {
        let mut grid = world(3, 3, 3);
        let at = Coord::new(1, 1, 1);
        let fish = grid.spawn(Species::Fish, at).unwrap();
        grid.creature_mut(fish).unwrap().energy = 0;

        let mut sim = Simulation::new(grid, FirstCandidate);
        let report = sim.step().unwrap();

        assert_eq!(report.starved, 1);
        assert!(sim.grid().is_empty(at));
        assert!(sim.grid().creature(fish).is_none());
        assert!(sim.grid().live().is_empty());
    }

    #[test]
    fn test_fertile_fish_leaves_offspring_behind() {
        let mut grid = world(3, 3, 3);
        let origin = Coord::new(1, 1, 1);
        let parent = grid.spawn(Species::Fish, origin).unwrap();
        grid.creature_mut(parent).unwrap().fertility = Species::FISH_FERTILITY_THRESHOLD - 1;

        let mut sim = Simulation::new(grid, FirstCandidate);
        let report = sim.step().unwrap();

        assert_eq!(report.births, 1);
        let moved = sim.grid().creature(parent).unwrap();
        assert_eq!(moved.position, Coord::new(1, 1, 2));
        assert_eq!(moved.fertility, 0);

        let child = sim.grid().occupant(origin).unwrap();
        assert_ne!(child.id, parent);
        assert!(child.is_fish());
        assert_eq!(child.energy, Species::FISH_ENERGY);
        assert_eq!(sim.grid().counts().fish, 2);
        assert_consistent(sim.grid());
    }

    #[test]
    fn test_stuck_creature_never_reproduces() {
        let mut grid = world(1, 1, 2);
        let stuck = grid.spawn(Species::Shark, Coord::new(0, 0, 0)).unwrap();
        grid.spawn(Species::Shark, Coord::new(0, 0, 1)).unwrap();
        grid.creature_mut(stuck).unwrap().fertility = 50;

        let mut sim = Simulation::new(grid, FirstCandidate);
        let report = sim.step().unwrap();

        assert_eq!(report.births, 0);
        assert_eq!(sim.grid().creature(stuck).unwrap().fertility, 51);
    }

    #[test]
    fn test_eaten_fish_never_takes_a_turn() {
        let mut grid = world(1, 1, 3);
        grid.spawn(Species::Shark, Coord::new(0, 0, 0)).unwrap();
        let fish = grid.spawn(Species::Fish, Coord::new(0, 0, 1)).unwrap();

        let mut sim = Simulation::new(grid, FirstCandidate);
        let report = sim.step().unwrap();

        assert_eq!(report.eaten, 1);
        assert_eq!(report.moved, 1);
        assert!(sim.grid().creature(fish).is_none());
        assert!(sim.grid().is_empty(Coord::new(0, 0, 2)));
    }

    #[test]
    fn test_population_never_grows_beyond_one_birth_per_parent() {
        let mut grid = world(6, 6, 6);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        grid.populate(60, 15, &mut rng).unwrap();

        let mut sim = Simulation::new(grid, RandomSelection::seeded(11));
        for _ in 0..30 {
            let before = sim.grid().counts().total();
            let report = sim.step().unwrap();
            let after = sim.grid().counts().total();

            assert_eq!(after + report.deaths(), before + report.births);
            assert!(report.births <= before);
            assert_consistent(sim.grid());
        }
        assert_eq!(sim.generation(), 30);
    }
}
