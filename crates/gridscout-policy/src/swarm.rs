//! Coordinated frontier assignment for multi-drone rosters.

use gridscout_core::{CellPos, NavigationPolicy, Step, TickContext};
use rand::rngs::SmallRng;
use std::collections::HashSet;

use crate::{bfs_over_free, frontier::frontier_move, nearest_goal, step_into_unknown};

/// Frontier exploration with ownership: the frontier set is computed once per
/// tick, and agents claim their BFS-nearest unclaimed frontier in id order so
/// the team fans out instead of converging on one opening.
///
/// An agent with no unclaimed reachable frontier falls back to plain frontier
/// logic over the full set, and known targets preempt claiming entirely. With
/// a single drone this is exactly [`FrontierPolicy`](crate::FrontierPolicy).
#[derive(Debug, Default)]
pub struct SwarmPolicy {
    frontiers: Vec<CellPos>,
    claimed: HashSet<CellPos>,
}

impl SwarmPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl NavigationPolicy for SwarmPolicy {
    fn name(&self) -> &'static str {
        "swarm"
    }

    fn begin_tick(&mut self, ctx: &TickContext<'_>) {
        self.frontiers = ctx.belief.frontier_cells();
        self.claimed.clear();
    }

    fn select_move(
        &mut self,
        ctx: &TickContext<'_>,
        self_id: usize,
        _rng: &mut SmallRng,
    ) -> Step {
        let pos = ctx.agents[self_id].pos;
        if !ctx.known_targets.is_empty() {
            return frontier_move(ctx, pos, &self.frontiers);
        }

        let field = bfs_over_free(ctx.belief, pos);
        let unclaimed = self
            .frontiers
            .iter()
            .copied()
            .filter(|f| !self.claimed.contains(f));
        if let Some(goal) = nearest_goal(&field, unclaimed) {
            self.claimed.insert(goal);
            if goal == pos {
                return step_into_unknown(ctx.belief, pos);
            }
            return field.first_step_to(pos, goal).unwrap_or(Step::STAY);
        }
        frontier_move(ctx, pos, &self.frontiers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FrontierPolicy;
    use gridscout_core::{AgentObservation, BeliefCell, BeliefGrid};
    use rand::SeedableRng;

    /// 9x9 belief revealed free in the middle, unknown bands west and east.
    fn two_sided_belief() -> BeliefGrid {
        let mut belief = BeliefGrid::new(9, 9);
        for y in 0..9 {
            for x in 2..7 {
                belief.reveal(CellPos::new(x, y), BeliefCell::Free, 0);
            }
        }
        belief
    }

    fn ctx<'a>(
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
    fn agents_claim_distinct_frontiers() {
        let belief = two_sided_belief();
        let agents = [
            AgentObservation {
                id: 0,
                pos: CellPos::new(3, 0),
                alive: true,
            },
            AgentObservation {
                id: 1,
                pos: CellPos::new(3, 1),
                alive: true,
            },
        ];
        let c = ctx(&belief, &agents);
        let mut policy = SwarmPolicy::new();
        policy.begin_tick(&c);
        let mut rng = SmallRng::seed_from_u64(0);
        policy.select_move(&c, 0, &mut rng);
        let claimed_first: Vec<CellPos> = policy.claimed.iter().copied().collect();
        policy.select_move(&c, 1, &mut rng);
        assert_eq!(policy.claimed.len(), 2, "each agent claims its own goal");
        let claimed_second: Vec<CellPos> = policy
            .claimed
            .iter()
            .copied()
            .filter(|c| !claimed_first.contains(c))
            .collect();
        assert_ne!(claimed_first[0], claimed_second[0]);
    }

    #[test]
    fn single_drone_matches_frontier_policy() {
        let belief = two_sided_belief();
        let agents = [AgentObservation {
            id: 0,
            pos: CellPos::new(4, 4),
            alive: true,
        }];
        let c = ctx(&belief, &agents);
        let mut rng = SmallRng::seed_from_u64(0);

        let mut swarm = SwarmPolicy::new();
        swarm.begin_tick(&c);
        let swarm_step = swarm.select_move(&c, 0, &mut rng);

        let mut frontier = FrontierPolicy::new();
        frontier.begin_tick(&c);
        let frontier_step = frontier.select_move(&c, 0, &mut rng);

        assert_eq!(swarm_step, frontier_step);
    }

    #[test]
    fn exhausted_claims_fall_back_to_shared_frontier() {
        // One reachable frontier cell only: a corridor dead-ending in unknown.
        let mut belief = BeliefGrid::new(7, 3);
        for x in 0..5 {
            belief.reveal(CellPos::new(x, 1), BeliefCell::Free, 0);
        }
        for x in 0..7 {
            belief.reveal(CellPos::new(x, 0), BeliefCell::Occupied, 0);
            belief.reveal(CellPos::new(x, 2), BeliefCell::Occupied, 0);
        }
        let agents = [
            AgentObservation {
                id: 0,
                pos: CellPos::new(1, 1),
                alive: true,
            },
            AgentObservation {
                id: 1,
                pos: CellPos::new(0, 1),
                alive: true,
            },
        ];
        let c = ctx(&belief, &agents);
        let mut policy = SwarmPolicy::new();
        policy.begin_tick(&c);
        let mut rng = SmallRng::seed_from_u64(0);
        let first = policy.select_move(&c, 0, &mut rng);
        let second = policy.select_move(&c, 1, &mut rng);
        // Agent 0 claimed the lone frontier; agent 1 still trails it east.
        assert_eq!(first, Step::new(1, 0));
        assert_eq!(second, Step::new(1, 0));
    }
}
