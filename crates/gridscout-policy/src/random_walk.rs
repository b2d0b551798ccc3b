//! Uniform random walk over cells not believed to be occupied.

use gridscout_core::{BeliefCell, NavigationPolicy, Step, TickContext};
use rand::{Rng, rngs::SmallRng};

/// Picks uniformly among the in-bounds 8-neighbors whose cell is not believed
/// occupied; stays put when every neighbor is blocked. All randomness flows
/// through the engine's seeded RNG.
#[derive(Debug, Default)]
pub struct RandomWalkPolicy;

impl RandomWalkPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl NavigationPolicy for RandomWalkPolicy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select_move(
        &mut self,
        ctx: &TickContext<'_>,
        self_id: usize,
        rng: &mut SmallRng,
    ) -> Step {
        let pos = ctx.agents[self_id].pos;
        let candidates: Vec<Step> = Step::NEIGHBORS
            .into_iter()
            .filter(|&step| {
                let next = pos.offset(step);
                ctx.belief.in_bounds(next) && ctx.belief.cell(next) != BeliefCell::Occupied
            })
            .collect();
        if candidates.is_empty() {
            Step::STAY
        } else {
            candidates[rng.random_range(0..candidates.len())]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridscout_core::{AgentObservation, BeliefGrid, CellPos};
    use rand::SeedableRng;

    fn ctx_at<'a>(
        belief: &'a BeliefGrid,
        agents: &'a [AgentObservation],
    ) -> TickContext<'a> {
        TickContext {
            belief,
            agents,
            known_targets: &[],
        }
    }

    #[test]
    fn avoids_known_obstacles() {
        let mut belief = BeliefGrid::new(3, 3);
        for y in 0..3 {
            for x in 0..3 {
                let value = if x == 1 && y == 1 {
                    BeliefCell::Free
                } else {
                    BeliefCell::Occupied
                };
                belief.reveal(CellPos::new(x, y), value, 0);
            }
        }
        let agents = [AgentObservation {
            id: 0,
            pos: CellPos::new(1, 1),
            alive: true,
        }];
        let mut policy = RandomWalkPolicy::new();
        let mut rng = SmallRng::seed_from_u64(1);
        assert_eq!(
            policy.select_move(&ctx_at(&belief, &agents), 0, &mut rng),
            Step::STAY
        );
    }

    #[test]
    fn identical_seeds_pick_identical_moves() {
        let belief = BeliefGrid::new(5, 5);
        let agents = [AgentObservation {
            id: 0,
            pos: CellPos::new(2, 2),
            alive: true,
        }];
        let mut policy = RandomWalkPolicy::new();
        let ctx = ctx_at(&belief, &agents);
        let mut rng_a = SmallRng::seed_from_u64(7);
        let mut rng_b = SmallRng::seed_from_u64(7);
        for _ in 0..16 {
            assert_eq!(
                policy.select_move(&ctx, 0, &mut rng_a),
                policy.select_move(&ctx, 0, &mut rng_b)
            );
        }
    }

    #[test]
    fn unknown_cells_are_fair_game() {
        let belief = BeliefGrid::new(5, 5);
        let agents = [AgentObservation {
            id: 0,
            pos: CellPos::new(2, 2),
            alive: true,
        }];
        let mut policy = RandomWalkPolicy::new();
        let mut rng = SmallRng::seed_from_u64(3);
        let step = policy.select_move(&ctx_at(&belief, &agents), 0, &mut rng);
        assert!(!step.is_stay());
    }
}
