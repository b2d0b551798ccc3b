//! Right-hand wall following with a per-agent heading.

use gridscout_core::{BeliefCell, NavigationPolicy, Step, TickContext};
use rand::rngs::SmallRng;

/// Cardinal heading of a wall-following agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heading {
    North,
    East,
    South,
    West,
}

impl Heading {
    #[must_use]
    pub const fn step(self) -> Step {
        match self {
            Heading::North => Step::new(0, -1),
            Heading::East => Step::new(1, 0),
            Heading::South => Step::new(0, 1),
            Heading::West => Step::new(-1, 0),
        }
    }

    #[must_use]
    pub const fn right(self) -> Heading {
        match self {
            Heading::North => Heading::East,
            Heading::East => Heading::South,
            Heading::South => Heading::West,
            Heading::West => Heading::North,
        }
    }

    #[must_use]
    pub const fn left(self) -> Heading {
        self.right().right().right()
    }

    #[must_use]
    pub const fn reverse(self) -> Heading {
        self.right().right()
    }
}

/// Classic right-hand rule: prefer turning right, then straight ahead, then
/// left, then reversing. A candidate direction is taken when its cell is in
/// bounds and not believed occupied, and becomes the new heading.
///
/// Headings start facing east, matching an agent that has seen no wall yet.
#[derive(Debug)]
pub struct WallFollowPolicy {
    headings: Vec<Heading>,
}

impl WallFollowPolicy {
    #[must_use]
    pub fn new(num_agents: usize) -> Self {
        Self {
            headings: vec![Heading::East; num_agents],
        }
    }

    /// Current heading of an agent, mostly useful in tests.
    #[must_use]
    pub fn heading(&self, agent: usize) -> Heading {
        self.headings[agent]
    }
}

impl NavigationPolicy for WallFollowPolicy {
    fn name(&self) -> &'static str {
        "wall_follow"
    }

    fn select_move(
        &mut self,
        ctx: &TickContext<'_>,
        self_id: usize,
        _rng: &mut SmallRng,
    ) -> Step {
        let pos = ctx.agents[self_id].pos;
        let heading = self.headings[self_id];
        let precedence = [
            heading.right(),
            heading,
            heading.left(),
            heading.reverse(),
        ];
        for candidate in precedence {
            let next = pos.offset(candidate.step());
            if ctx.belief.in_bounds(next) && ctx.belief.cell(next) != BeliefCell::Occupied {
                self.headings[self_id] = candidate;
                return candidate.step();
            }
        }
        Step::STAY
    }
}
