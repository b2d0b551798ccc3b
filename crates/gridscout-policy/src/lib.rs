//! Navigation policies for GridScout agents.
//!
//! The [`NavigationPolicy`] trait lives in `gridscout-core`; this crate holds
//! the four implementations plus the belief-space BFS they share. Frontier
//! distances use the 4-neighborhood while agent moves use all eight
//! directions, and every tie is broken by the lowest `(y, x)` scan key so runs
//! stay reproducible.

use gridscout_core::{BeliefCell, BeliefGrid, CellPos, NavigationPolicy, Step};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::str::FromStr;
use thiserror::Error;

mod frontier;
mod random_walk;
mod swarm;
mod wall_follow;

pub use frontier::FrontierPolicy;
pub use random_walk::RandomWalkPolicy;
pub use swarm::SwarmPolicy;
pub use wall_follow::WallFollowPolicy;

/// Raised when a request names a policy that is not registered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown policy: {0}")]
pub struct UnknownPolicy(pub String);

/// The closed set of registered policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Random,
    WallFollow,
    Frontier,
    Swarm,
}

impl PolicyKind {
    /// Every registered policy, in registry order.
    pub const ALL: [PolicyKind; 4] = [
        PolicyKind::Random,
        PolicyKind::WallFollow,
        PolicyKind::Frontier,
        PolicyKind::Swarm,
    ];

    /// Stable wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            PolicyKind::Random => "random",
            PolicyKind::WallFollow => "wall_follow",
            PolicyKind::Frontier => "frontier",
            PolicyKind::Swarm => "swarm",
        }
    }

    /// Instantiate a boxed policy for a roster of `num_agents` drones.
    #[must_use]
    pub fn build(self, num_agents: usize) -> Box<dyn NavigationPolicy> {
        match self {
            PolicyKind::Random => Box::new(RandomWalkPolicy::new()),
            PolicyKind::WallFollow => Box::new(WallFollowPolicy::new(num_agents)),
            PolicyKind::Frontier => Box::new(FrontierPolicy::new()),
            PolicyKind::Swarm => Box::new(SwarmPolicy::new()),
        }
    }
}

impl FromStr for PolicyKind {
    type Err = UnknownPolicy;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "random" => Ok(PolicyKind::Random),
            "wall_follow" => Ok(PolicyKind::WallFollow),
            "frontier" => Ok(PolicyKind::Frontier),
            "swarm" => Ok(PolicyKind::Swarm),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

/// BFS distance/predecessor field over believed-free cells.
///
/// Built once per agent decision and discarded; nothing here outlives the
/// tick. Expansion uses the 4-neighborhood in N, E, S, W order, which fixes
/// the predecessor of every cell deterministically.
pub struct BeliefField {
    width: u32,
    dist: Vec<u32>,
    parent: Vec<Option<CellPos>>,
}

impl BeliefField {
    fn index(&self, pos: CellPos) -> usize {
        (pos.y as usize) * (self.width as usize) + (pos.x as usize)
    }

    /// BFS distance to `pos`, if reachable through believed-free cells.
    #[must_use]
    pub fn distance(&self, pos: CellPos) -> Option<u32> {
        match self.dist[self.index(pos)] {
            u32::MAX => None,
            d => Some(d),
        }
    }

    /// First step of the BFS path from the field origin to `goal`.
    #[must_use]
    pub fn first_step_to(&self, from: CellPos, goal: CellPos) -> Option<Step> {
        if goal == from || self.distance(goal).is_none() {
            return None;
        }
        let mut cursor = goal;
        loop {
            let parent = self.parent[self.index(cursor)]?;
            if parent == from {
                return Some(Step::new(cursor.x - from.x, cursor.y - from.y));
            }
            cursor = parent;
        }
    }
}

/// Build the BFS field from `from` over cells believed free.
#[must_use]
pub fn bfs_over_free(belief: &BeliefGrid, from: CellPos) -> BeliefField {
    let width = belief.width();
    let total = (width as usize) * (belief.height() as usize);
    let mut field = BeliefField {
        width,
        dist: vec![u32::MAX; total],
        parent: vec![None; total],
    };
    if !belief.in_bounds(from) {
        return field;
    }
    let origin = field.index(from);
    field.dist[origin] = 0;
    let mut queue = VecDeque::from([from]);
    while let Some(cell) = queue.pop_front() {
        let base = field.dist[field.index(cell)];
        for step in Step::ORTHOGONAL {
            let next = cell.offset(step);
            if !belief.in_bounds(next) || belief.cell(next) != BeliefCell::Free {
                continue;
            }
            let idx = field.index(next);
            if field.dist[idx] == u32::MAX {
                field.dist[idx] = base + 1;
                field.parent[idx] = Some(cell);
                queue.push_back(next);
            }
        }
    }
    field
}

/// Nearest reachable goal by BFS distance, ties by lowest `(y, x)`.
#[must_use]
pub fn nearest_goal<I>(field: &BeliefField, goals: I) -> Option<CellPos>
where
    I: IntoIterator<Item = CellPos>,
{
    goals
        .into_iter()
        .filter_map(|goal| field.distance(goal).map(|d| (d, goal)))
        .min_by_key(|&(d, goal)| (d, goal.scan_key()))
        .map(|(_, goal)| goal)
}

/// Step into the first unknown 4-neighbor, used when an agent already stands
/// on its goal frontier.
#[must_use]
pub(crate) fn step_into_unknown(belief: &BeliefGrid, from: CellPos) -> Step {
    for step in Step::ORTHOGONAL {
        let next = from.offset(step);
        if belief.in_bounds(next) && belief.cell(next) == BeliefCell::Unknown {
            return step;
        }
    }
    Step::STAY
}
