//! Single-agent frontier exploration.

use gridscout_core::{CellPos, NavigationPolicy, Step, TickContext};
use rand::rngs::SmallRng;

use crate::{bfs_over_free, nearest_goal, step_into_unknown};

/// Greedy frontier chaser: BFS over believed-free cells to the nearest
/// frontier, one step along the reconstructed path per tick. Targets that are
/// revealed in belief but not yet credited preempt frontier selection.
#[derive(Debug, Default)]
pub struct FrontierPolicy {
    frontiers: Vec<CellPos>,
}

impl FrontierPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl NavigationPolicy for FrontierPolicy {
    fn name(&self) -> &'static str {
        "frontier"
    }

    fn begin_tick(&mut self, ctx: &TickContext<'_>) {
        self.frontiers = ctx.belief.frontier_cells();
    }

    fn select_move(
        &mut self,
        ctx: &TickContext<'_>,
        self_id: usize,
        _rng: &mut SmallRng,
    ) -> Step {
        let pos = ctx.agents[self_id].pos;
        frontier_move(ctx, pos, &self.frontiers)
    }
}

/// Shared goal-then-step logic used by both frontier and swarm fallback.
pub(crate) fn frontier_move(ctx: &TickContext<'_>, pos: CellPos, frontiers: &[CellPos]) -> Step {
    let field = bfs_over_free(ctx.belief, pos);
    let goal = nearest_goal(&field, ctx.known_targets.iter().copied())
        .or_else(|| nearest_goal(&field, frontiers.iter().copied()));
    match goal {
        Some(goal) if goal == pos => step_into_unknown(ctx.belief, pos),
        Some(goal) => field.first_step_to(pos, goal).unwrap_or(Step::STAY),
        None => Step::STAY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridscout_core::{AgentObservation, BeliefCell, BeliefGrid};
    use rand::SeedableRng;

    /// A 7x7 belief fully revealed free except an unknown band at x >= 5.
    fn belief_with_unknown_east() -> BeliefGrid {
        let mut belief = BeliefGrid::new(7, 7);
        for y in 0..7 {
            for x in 0..5 {
                belief.reveal(CellPos::new(x, y), BeliefCell::Free, 0);
            }
        }
        belief
    }

    fn ctx<'a>(
        belief: &'a BeliefGrid,
        agents: &'a [AgentObservation],
        known_targets: &'a [CellPos],
    ) -> TickContext<'a> {
        TickContext {
            belief,
            agents,
            known_targets,
        }
    }

    #[test]
    fn walks_toward_nearest_frontier() {
        let belief = belief_with_unknown_east();
        let agents = [AgentObservation {
            id: 0,
            pos: CellPos::new(0, 3),
            alive: true,
        }];
        let mut policy = FrontierPolicy::new();
        let c = ctx(&belief, &agents, &[]);
        policy.begin_tick(&c);
        let mut rng = SmallRng::seed_from_u64(0);
        let step = policy.select_move(&c, 0, &mut rng);
        // Frontier column sits at x = 4; head east.
        assert_eq!(step, Step::new(1, 0));
    }

    #[test]
    fn steps_into_unknown_when_standing_on_frontier() {
        let belief = belief_with_unknown_east();
        let agents = [AgentObservation {
            id: 0,
            pos: CellPos::new(4, 0),
            alive: true,
        }];
        let mut policy = FrontierPolicy::new();
        let c = ctx(&belief, &agents, &[]);
        policy.begin_tick(&c);
        let mut rng = SmallRng::seed_from_u64(0);
        let step = policy.select_move(&c, 0, &mut rng);
        assert_eq!(step, Step::new(1, 0));
    }

    #[test]
    fn known_target_preempts_frontier() {
        let belief = belief_with_unknown_east();
        let agents = [AgentObservation {
            id: 0,
            pos: CellPos::new(3, 3),
            alive: true,
        }];
        // A revealed, uncredited target to the west; frontier is to the east.
        let targets = [CellPos::new(0, 3)];
        let mut policy = FrontierPolicy::new();
        let c = ctx(&belief, &agents, &targets);
        policy.begin_tick(&c);
        let mut rng = SmallRng::seed_from_u64(0);
        let step = policy.select_move(&c, 0, &mut rng);
        assert_eq!(step, Step::new(-1, 0));
    }

    #[test]
    fn fully_explored_belief_means_stay() {
        let mut belief = BeliefGrid::new(4, 4);
        for y in 0..4 {
            for x in 0..4 {
                belief.reveal(CellPos::new(x, y), BeliefCell::Free, 0);
            }
        }
        let agents = [AgentObservation {
            id: 0,
            pos: CellPos::new(1, 1),
            alive: true,
        }];
        let mut policy = FrontierPolicy::new();
        let c = ctx(&belief, &agents, &[]);
        policy.begin_tick(&c);
        let mut rng = SmallRng::seed_from_u64(0);
        assert_eq!(policy.select_move(&c, 0, &mut rng), Step::STAY);
    }
}
