//! Core types and the simulation engine shared across the GridScout workspace.
//!
//! A simulation owns one generated [`GridMap`], one shared [`BeliefGrid`], and
//! a fixed roster of agents driven by a [`NavigationPolicy`]. Everything is
//! deterministic under the configured seed: map generation, policy
//! tie-breaking, and the emitted history are bit-identical across runs with
//! equal inputs.

use rand::{Rng, SeedableRng, rngs::SmallRng, seq::index};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::f64::consts::SQRT_2;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Attempts allowed before random map generation gives up.
const MAP_GENERATION_ATTEMPTS: u32 = 8;
/// Rejection-sampling attempts per room in floorplan generation.
const ROOM_PLACEMENT_ATTEMPTS: u32 = 100;
/// Hard ceiling on ticks regardless of drone count.
const MAX_STEP_CEILING: u32 = 5_000;

/// Errors produced while constructing or running a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Map parameters could not produce a connected grid with the requested
    /// targets within the attempt budget.
    #[error("map ungeneratable after {attempts} attempts")]
    Ungeneratable { attempts: u32 },
}

/// A cell coordinate on the grid. `x` is the column, `y` the row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CellPos {
    pub x: i32,
    pub y: i32,
}

impl CellPos {
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Offset by a step without bounds checking.
    #[must_use]
    pub const fn offset(self, step: Step) -> Self {
        Self {
            x: self.x + step.dx,
            y: self.y + step.dy,
        }
    }

    /// Chebyshev distance to another cell.
    #[must_use]
    pub fn chebyshev(self, other: Self) -> i32 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }

    /// Euclidean distance to another cell.
    #[must_use]
    pub fn euclidean(self, other: Self) -> f64 {
        let dx = f64::from(self.x - other.x);
        let dy = f64::from(self.y - other.y);
        (dx * dx + dy * dy).sqrt()
    }

    /// Sort key realising the `(y, x)` tie-break used throughout the engine.
    #[must_use]
    pub const fn scan_key(self) -> (i32, i32) {
        (self.y, self.x)
    }
}

impl fmt::Display for CellPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// One intended move: an offset in the 8-neighborhood, or stay.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Step {
    pub dx: i32,
    pub dy: i32,
}

impl Step {
    /// The in-place step.
    pub const STAY: Step = Step { dx: 0, dy: 0 };

    /// The four orthogonal offsets in N, E, S, W order.
    pub const ORTHOGONAL: [Step; 4] = [
        Step { dx: 0, dy: -1 },
        Step { dx: 1, dy: 0 },
        Step { dx: 0, dy: 1 },
        Step { dx: -1, dy: 0 },
    ];

    /// All eight neighbor offsets, scanned row-major.
    pub const NEIGHBORS: [Step; 8] = [
        Step { dx: -1, dy: -1 },
        Step { dx: 0, dy: -1 },
        Step { dx: 1, dy: -1 },
        Step { dx: -1, dy: 0 },
        Step { dx: 1, dy: 0 },
        Step { dx: -1, dy: 1 },
        Step { dx: 0, dy: 1 },
        Step { dx: 1, dy: 1 },
    ];

    #[must_use]
    pub const fn new(dx: i32, dy: i32) -> Self {
        Self { dx, dy }
    }

    #[must_use]
    pub const fn is_stay(self) -> bool {
        self.dx == 0 && self.dy == 0
    }

    #[must_use]
    pub const fn is_diagonal(self) -> bool {
        self.dx != 0 && self.dy != 0
    }

    /// Distance contribution of this step; diagonals cost `sqrt(2)`.
    #[must_use]
    pub fn travel_cost(self) -> f64 {
        if self.is_stay() {
            0.0
        } else if self.is_diagonal() {
            SQRT_2
        } else {
            1.0
        }
    }
}

/// Ground-truth terrain state of one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Cell {
    Free,
    Wall,
}

impl From<Cell> for u8 {
    fn from(cell: Cell) -> Self {
        match cell {
            Cell::Free => 0,
            Cell::Wall => 1,
        }
    }
}

impl TryFrom<u8> for Cell {
    type Error = String;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Cell::Free),
            1 => Ok(Cell::Wall),
            other => Err(format!("invalid terrain cell value {other}")),
        }
    }
}

/// Knowledge state of one cell in the shared belief map.
///
/// Serialized as `-1` (unknown), `0` (free), `1` (occupied) to keep the wire
/// format stable for replay clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum BeliefCell {
    Unknown,
    Free,
    Occupied,
}

impl From<BeliefCell> for i8 {
    fn from(cell: BeliefCell) -> Self {
        match cell {
            BeliefCell::Unknown => -1,
            BeliefCell::Free => 0,
            BeliefCell::Occupied => 1,
        }
    }
}

impl TryFrom<i8> for BeliefCell {
    type Error = String;

    fn try_from(raw: i8) -> Result<Self, Self::Error> {
        match raw {
            -1 => Ok(BeliefCell::Unknown),
            0 => Ok(BeliefCell::Free),
            1 => Ok(BeliefCell::Occupied),
            other => Err(format!("invalid belief cell value {other}")),
        }
    }
}

/// Supported map generation modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapKind {
    Random,
    Floorplan,
}

impl MapKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MapKind::Random => "random",
            MapKind::Floorplan => "floorplan",
        }
    }
}

/// Static configuration for one simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Grid width in cells (10..=500).
    pub width: u32,
    /// Grid height in cells (10..=500).
    pub height: u32,
    /// Map generation mode.
    pub map_kind: MapKind,
    /// Obstacle density knob in `[0, 1]`.
    pub complexity: f64,
    /// Target room side length for floorplan maps.
    pub room_size: u32,
    /// Number of rooms attempted in floorplan maps.
    pub num_rooms: u32,
    /// Number of drones exploring the map (1..=10).
    pub num_drones: u32,
    /// Number of hidden targets (1..=20).
    pub num_targets: u32,
    /// Chebyshev sensing radius.
    pub sensor_range: u32,
    /// Communication range (Euclidean, cells) for the connectivity metric.
    pub comm_range: f64,
    /// Per-drone step budget; the effective cap is `max_steps * num_drones`
    /// bounded by a hard ceiling of 5000.
    pub max_steps: u32,
    /// Optional battery capacity; `None` means batteries never deplete.
    pub battery: Option<u32>,
    /// RNG seed for reproducible runs; drawn from entropy when absent.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            width: 100,
            height: 100,
            map_kind: MapKind::Floorplan,
            complexity: 0.67,
            room_size: 15,
            num_rooms: 10,
            num_drones: 1,
            num_targets: 1,
            sensor_range: 3,
            comm_range: 20.0,
            max_steps: 500,
            battery: None,
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// Validates the configuration against the supported parameter ranges.
    pub fn validate(&self) -> Result<(), SimError> {
        if !(10..=500).contains(&self.width) || !(10..=500).contains(&self.height) {
            return Err(SimError::InvalidConfig(
                "width and height must be within 10..=500",
            ));
        }
        if !(0.0..=1.0).contains(&self.complexity) {
            return Err(SimError::InvalidConfig("complexity must be within 0..=1"));
        }
        if !(1..=10).contains(&self.num_drones) {
            return Err(SimError::InvalidConfig("num_drones must be within 1..=10"));
        }
        if !(1..=20).contains(&self.num_targets) {
            return Err(SimError::InvalidConfig("num_targets must be within 1..=20"));
        }
        if self.room_size < 3 {
            return Err(SimError::InvalidConfig("room_size must be at least 3"));
        }
        if self.num_rooms == 0 {
            return Err(SimError::InvalidConfig("num_rooms must be at least 1"));
        }
        if self.sensor_range == 0 {
            return Err(SimError::InvalidConfig("sensor_range must be positive"));
        }
        if self.comm_range <= 0.0 {
            return Err(SimError::InvalidConfig("comm_range must be positive"));
        }
        if self.max_steps == 0 {
            return Err(SimError::InvalidConfig("max_steps must be positive"));
        }
        Ok(())
    }

    /// Effective tick budget: scales with the drone count, hard-capped.
    #[must_use]
    pub fn effective_max_steps(&self) -> u32 {
        (self.max_steps.saturating_mul(self.num_drones)).min(MAX_STEP_CEILING)
    }

    /// Returns the configured seed, drawing one from entropy if absent.
    #[must_use]
    pub fn resolve_seed(&self) -> u64 {
        self.seed.unwrap_or_else(rand::random)
    }
}

/// Iterator over the cells of a Bresenham line, endpoints included.
#[derive(Debug, Clone)]
pub struct Bresenham {
    current: CellPos,
    end: CellPos,
    sx: i32,
    sy: i32,
    err: i32,
    dx: i32,
    dy: i32,
    done: bool,
}

impl Bresenham {
    #[must_use]
    pub fn new(from: CellPos, to: CellPos) -> Self {
        let dx = (to.x - from.x).abs();
        let dy = (to.y - from.y).abs();
        Self {
            current: from,
            end: to,
            sx: if from.x < to.x { 1 } else { -1 },
            sy: if from.y < to.y { 1 } else { -1 },
            err: dx - dy,
            dx,
            dy,
            done: false,
        }
    }
}

impl Iterator for Bresenham {
    type Item = CellPos;

    fn next(&mut self) -> Option<CellPos> {
        if self.done {
            return None;
        }
        let cell = self.current;
        if cell == self.end {
            self.done = true;
            return Some(cell);
        }
        let e2 = 2 * self.err;
        if e2 > -self.dy {
            self.err -= self.dy;
            self.current.x += self.sx;
        }
        if e2 < self.dx {
            self.err += self.dx;
            self.current.y += self.sy;
        }
        Some(cell)
    }
}

/// Immutable occupancy grid with hidden targets and a start cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridMap {
    width: u32,
    height: u32,
    cells: Vec<Cell>,
    targets: Vec<CellPos>,
    start: CellPos,
}

impl GridMap {
    /// Generates a map from the configuration, deterministically under `seed`.
    pub fn generate(config: &SimulationConfig, seed: u64) -> Result<Self, SimError> {
        let mut rng = SmallRng::seed_from_u64(seed);
        match config.map_kind {
            MapKind::Random => Self::generate_random(config, &mut rng),
            MapKind::Floorplan => Self::generate_floorplan(config, &mut rng),
        }
    }

    fn generate_random(config: &SimulationConfig, rng: &mut SmallRng) -> Result<Self, SimError> {
        let (width, height) = (config.width, config.height);
        let total = (width as usize) * (height as usize);
        for attempt in 1..=MAP_GENERATION_ATTEMPTS {
            let mut cells = vec![Cell::Free; total];
            let interior: Vec<usize> = (0..total)
                .filter(|&idx| {
                    let x = (idx % width as usize) as u32;
                    let y = (idx / width as usize) as u32;
                    x > 0 && y > 0 && x < width - 1 && y < height - 1
                })
                .collect();
            let wall_count =
                ((config.complexity * total as f64).floor() as usize).min(interior.len());
            for pick in index::sample(rng, interior.len(), wall_count) {
                cells[interior[pick]] = Cell::Wall;
            }

            let candidate = Self {
                width,
                height,
                cells,
                targets: Vec::new(),
                start: CellPos::new(0, 0),
            };
            if !candidate.free_region_connected() {
                debug!(attempt, "rejected disconnected random map");
                continue;
            }
            match candidate.with_targets_and_start(config.num_targets, rng) {
                Ok(map) => return Ok(map),
                Err(_) => continue,
            }
        }
        Err(SimError::Ungeneratable {
            attempts: MAP_GENERATION_ATTEMPTS,
        })
    }

    fn generate_floorplan(config: &SimulationConfig, rng: &mut SmallRng) -> Result<Self, SimError> {
        let (width, height) = (config.width, config.height);
        let total = (width as usize) * (height as usize);
        let mut cells = vec![Cell::Wall; total];

        let min_side = ((config.room_size as f64 * 0.7).round() as u32).max(3);
        let max_side = ((config.room_size as f64 * 1.3).round() as u32).max(min_side);

        // Rooms are recorded as their carved interiors; a one-cell wall buffer
        // is enforced between interiors during placement.
        let mut rooms: Vec<(u32, u32, u32, u32)> = Vec::new();
        for _ in 0..config.num_rooms {
            for _ in 0..ROOM_PLACEMENT_ATTEMPTS {
                let w = rng.random_range(min_side..=max_side);
                let h = rng.random_range(min_side..=max_side);
                if w + 2 > width || h + 2 > height {
                    continue;
                }
                let x = rng.random_range(1..=width - w - 1);
                let y = rng.random_range(1..=height - h - 1);
                let separated = rooms.iter().all(|&(rx, ry, rw, rh)| {
                    x + w + 1 <= rx || rx + rw + 1 <= x || y + h + 1 <= ry || ry + rh + 1 <= y
                });
                if separated {
                    rooms.push((x, y, w, h));
                    break;
                }
            }
        }
        if rooms.is_empty() {
            return Err(SimError::Ungeneratable { attempts: 1 });
        }

        for &(x, y, w, h) in &rooms {
            for cy in y..y + h {
                for cx in x..x + w {
                    cells[(cy as usize) * (width as usize) + cx as usize] = Cell::Free;
                }
            }
        }

        // Connect each room's centroid to the nearest already-placed centroid
        // with a straight-then-orthogonal corridor.
        let centroids: Vec<CellPos> = rooms
            .iter()
            .map(|&(x, y, w, h)| CellPos::new((x + w / 2) as i32, (y + h / 2) as i32))
            .collect();
        for i in 1..centroids.len() {
            let from = centroids[i];
            let to = centroids[..i]
                .iter()
                .copied()
                .min_by_key(|c| (from.x - c.x).abs() + (from.y - c.y).abs())
                .expect("at least one earlier centroid");
            carve_corridor(&mut cells, width, from, to);
        }

        let candidate = Self {
            width,
            height,
            cells,
            targets: Vec::new(),
            start: CellPos::new(0, 0),
        };
        candidate.with_targets_and_start(config.num_targets, rng)
    }

    /// Samples targets and derives the start cell, failing when the free
    /// region cannot host them.
    fn with_targets_and_start(mut self, num_targets: u32, rng: &mut SmallRng) -> Result<Self, SimError> {
        let free: Vec<CellPos> = self.free_cells().collect();
        if free.len() < num_targets as usize + 1 {
            return Err(SimError::Ungeneratable { attempts: 1 });
        }

        let picks = index::sample(rng, free.len(), num_targets as usize);
        self.targets = picks.iter().map(|i| free[i]).collect();

        // Start = the free cell reachable from every target that maximises the
        // minimum BFS distance to any target; ties resolved by lowest (y, x).
        let fields: Vec<Vec<u32>> = self
            .targets
            .iter()
            .map(|&t| self.bfs_distances(t))
            .collect();
        let mut best: Option<(u32, CellPos)> = None;
        for &cell in &free {
            let idx = self.index(cell);
            let mut nearest = u32::MAX;
            let mut reachable = true;
            for field in &fields {
                let d = field[idx];
                if d == u32::MAX {
                    reachable = false;
                    break;
                }
                nearest = nearest.min(d);
            }
            if !reachable {
                continue;
            }
            let better = match best {
                None => true,
                Some((dist, pos)) => {
                    nearest > dist || (nearest == dist && cell.scan_key() < pos.scan_key())
                }
            };
            if better {
                best = Some((nearest, cell));
            }
        }
        match best {
            Some((_, start)) => {
                self.start = start;
                Ok(self)
            }
            None => Err(SimError::Ungeneratable { attempts: 1 }),
        }
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Hidden target cells, all free and distinct.
    #[must_use]
    pub fn targets(&self) -> &[CellPos] {
        &self.targets
    }

    /// The shared spawn cell.
    #[must_use]
    pub const fn start(&self) -> CellPos {
        self.start
    }

    #[must_use]
    pub fn in_bounds(&self, pos: CellPos) -> bool {
        pos.x >= 0 && pos.y >= 0 && (pos.x as u32) < self.width && (pos.y as u32) < self.height
    }

    fn index(&self, pos: CellPos) -> usize {
        (pos.y as usize) * (self.width as usize) + (pos.x as usize)
    }

    /// Ground-truth obstacle test; out-of-bounds counts as a wall.
    #[must_use]
    pub fn is_wall(&self, pos: CellPos) -> bool {
        if !self.in_bounds(pos) {
            return true;
        }
        self.cells[self.index(pos)] == Cell::Wall
    }

    /// Iterate free cells in row-major `(y, x)` order.
    pub fn free_cells(&self) -> impl Iterator<Item = CellPos> + '_ {
        (0..self.height as i32).flat_map(move |y| {
            (0..self.width as i32)
                .map(move |x| CellPos::new(x, y))
                .filter(move |&p| !self.is_wall(p))
        })
    }

    /// Number of wall cells.
    #[must_use]
    pub fn wall_count(&self) -> usize {
        self.cells.iter().filter(|&&c| c == Cell::Wall).count()
    }

    /// BFS distance field over free cells from `from`, 4-neighborhood.
    /// Unreachable cells hold `u32::MAX`.
    #[must_use]
    pub fn bfs_distances(&self, from: CellPos) -> Vec<u32> {
        let mut dist = vec![u32::MAX; self.cells.len()];
        if self.is_wall(from) {
            return dist;
        }
        let mut queue = VecDeque::new();
        dist[self.index(from)] = 0;
        queue.push_back(from);
        while let Some(cell) = queue.pop_front() {
            let base = dist[self.index(cell)];
            for step in Step::ORTHOGONAL {
                let next = cell.offset(step);
                if self.is_wall(next) {
                    continue;
                }
                let idx = self.index(next);
                if dist[idx] == u32::MAX {
                    dist[idx] = base + 1;
                    queue.push_back(next);
                }
            }
        }
        dist
    }

    /// Whether every free cell is 4-connected to every other free cell.
    #[must_use]
    pub fn free_region_connected(&self) -> bool {
        let Some(seed_cell) = self.free_cells().next() else {
            return false;
        };
        let dist = self.bfs_distances(seed_cell);
        self.free_cells().all(|c| dist[self.index(c)] != u32::MAX)
    }

    /// Free cells that cannot be reached from the start cell.
    #[must_use]
    pub fn unreachable_free_count(&self) -> usize {
        let dist = self.bfs_distances(self.start);
        self.free_cells()
            .filter(|&c| dist[self.index(c)] == u32::MAX)
            .count()
    }

    /// True when a straight line between the two cells crosses no wall
    /// strictly between them.
    #[must_use]
    pub fn line_of_sight(&self, from: CellPos, to: CellPos) -> bool {
        Bresenham::new(from, to)
            .filter(|&cell| cell != from && cell != to)
            .all(|cell| !self.is_wall(cell))
    }
}

fn carve_corridor(cells: &mut [Cell], width: u32, from: CellPos, to: CellPos) {
    let w = width as usize;
    let (x0, x1) = (from.x.min(to.x), from.x.max(to.x));
    for x in x0..=x1 {
        cells[(from.y as usize) * w + x as usize] = Cell::Free;
    }
    let (y0, y1) = (from.y.min(to.y), from.y.max(to.y));
    for y in y0..=y1 {
        cells[(y as usize) * w + to.x as usize] = Cell::Free;
    }
}

/// One recorded belief transition, keyed by `(row, col)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BeliefChange {
    pub row: u32,
    pub col: u32,
    pub value: BeliefCell,
}

/// Tri-state belief map shared by every agent in a simulation.
///
/// Cells transition away from [`BeliefCell::Unknown`] exactly once and never
/// revert. Changes since the last drain are buffered for history frames.
#[derive(Debug, Clone)]
pub struct BeliefGrid {
    width: u32,
    height: u32,
    cells: Vec<BeliefCell>,
    first_seen: Vec<Option<u32>>,
    pending: Vec<BeliefChange>,
    known: usize,
}

impl BeliefGrid {
    /// Create an all-unknown belief for a `width x height` grid.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        let total = (width as usize) * (height as usize);
        Self {
            width,
            height,
            cells: vec![BeliefCell::Unknown; total],
            first_seen: vec![None; total],
            pending: Vec::new(),
            known: 0,
        }
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn in_bounds(&self, pos: CellPos) -> bool {
        pos.x >= 0 && pos.y >= 0 && (pos.x as u32) < self.width && (pos.y as u32) < self.height
    }

    fn index(&self, pos: CellPos) -> usize {
        (pos.y as usize) * (self.width as usize) + (pos.x as usize)
    }

    /// Belief state of a cell; out-of-bounds reads as occupied.
    #[must_use]
    pub fn cell(&self, pos: CellPos) -> BeliefCell {
        if !self.in_bounds(pos) {
            return BeliefCell::Occupied;
        }
        self.cells[self.index(pos)]
    }

    /// Number of cells no longer unknown.
    #[must_use]
    pub const fn known_count(&self) -> usize {
        self.known
    }

    /// Tick at which a cell first became known, if it has.
    #[must_use]
    pub fn first_seen(&self, pos: CellPos) -> Option<u32> {
        self.first_seen.get(self.index(pos)).copied().flatten()
    }

    /// Reveal a cell. Only the first reveal of a cell takes effect; the
    /// transition is recorded in the pending diff with its discovery tick.
    pub fn reveal(&mut self, pos: CellPos, value: BeliefCell, tick: u32) {
        debug_assert!(value != BeliefCell::Unknown, "cannot reveal as unknown");
        if !self.in_bounds(pos) {
            return;
        }
        let idx = self.index(pos);
        if self.cells[idx] != BeliefCell::Unknown {
            return;
        }
        self.cells[idx] = value;
        self.first_seen[idx] = Some(tick);
        self.known += 1;
        self.pending.push(BeliefChange {
            row: pos.y as u32,
            col: pos.x as u32,
            value,
        });
    }

    /// Drain the buffered changes in `(row, col)` ascending order.
    pub fn drain_changes(&mut self) -> Vec<BeliefChange> {
        let mut diff = std::mem::take(&mut self.pending);
        diff.sort_by_key(|c| (c.row, c.col));
        diff
    }

    /// Whether the cell is believed free and 4-adjacent to unknown space.
    #[must_use]
    pub fn is_frontier(&self, pos: CellPos) -> bool {
        if self.cell(pos) != BeliefCell::Free {
            return false;
        }
        Step::ORTHOGONAL.iter().any(|&step| {
            let next = pos.offset(step);
            self.in_bounds(next) && self.cell(next) == BeliefCell::Unknown
        })
    }

    /// All frontier cells in row-major `(y, x)` order.
    #[must_use]
    pub fn frontier_cells(&self) -> Vec<CellPos> {
        let mut cells = Vec::new();
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let pos = CellPos::new(x, y);
                if self.is_frontier(pos) {
                    cells.push(pos);
                }
            }
        }
        cells
    }

    /// Number of frontier cells.
    #[must_use]
    pub fn frontier_count(&self) -> usize {
        let mut count = 0;
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                if self.is_frontier(CellPos::new(x, y)) {
                    count += 1;
                }
            }
        }
        count
    }

    /// Raw belief cells in row-major order.
    #[must_use]
    pub fn cells(&self) -> &[BeliefCell] {
        &self.cells
    }
}

/// Read-only view of one agent exposed to policies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AgentObservation {
    pub id: usize,
    pub pos: CellPos,
    pub alive: bool,
}

/// Per-tick inputs handed to a policy. Policies never mutate shared state.
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'a> {
    /// The shared belief as of the start of the tick.
    pub belief: &'a BeliefGrid,
    /// All agents, indexed by id, positions as of the start of the tick.
    pub agents: &'a [AgentObservation],
    /// Targets revealed in belief but not yet found, `(y, x)` ordered.
    pub known_targets: &'a [CellPos],
}

/// A navigation policy mapping the shared belief and peer positions to one
/// intended move per agent.
///
/// The engine calls [`begin_tick`](NavigationPolicy::begin_tick) once per tick
/// and then [`select_move`](NavigationPolicy::select_move) for each alive
/// agent in ascending id order.
pub trait NavigationPolicy: Send {
    /// Stable wire name of the policy.
    fn name(&self) -> &'static str;

    /// Hook invoked before any agent of the tick selects a move.
    fn begin_tick(&mut self, _ctx: &TickContext<'_>) {}

    /// Propose a move for `self_id`.
    fn select_move(
        &mut self,
        ctx: &TickContext<'_>,
        self_id: usize,
        rng: &mut SmallRng,
    ) -> Step;
}

/// Mutable per-drone state tracked by the engine.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub id: usize,
    pub pos: CellPos,
    pub alive: bool,
    pub battery: Option<i64>,
    pub last_step: Option<Step>,
    pub distance: f64,
    pub accepted_moves: u64,
    pub turns: u64,
    pub collisions: u64,
    pub idle_steps: u64,
    pub backtracks: u64,
    pub visited: HashSet<CellPos>,
}

impl AgentState {
    fn new(id: usize, pos: CellPos, battery: Option<u32>) -> Self {
        let mut visited = HashSet::new();
        visited.insert(pos);
        Self {
            id,
            pos,
            alive: true,
            battery: battery.map(i64::from),
            last_step: None,
            distance: 0.0,
            accepted_moves: 0,
            turns: 0,
            collisions: 0,
            idle_steps: 0,
            backtracks: 0,
            visited,
        }
    }

    fn apply_move(&mut self, step: Step) {
        let next = self.pos.offset(step);
        if let Some(prev) = self.last_step {
            if prev != step {
                self.turns += 1;
            }
        }
        self.last_step = Some(step);
        self.distance += step.travel_cost();
        self.accepted_moves += 1;
        if self.visited.contains(&next) {
            self.backtracks += 1;
        } else {
            self.visited.insert(next);
        }
        self.pos = next;
        if let Some(battery) = self.battery.as_mut() {
            *battery -= 1;
            if *battery <= 0 {
                self.alive = false;
            }
        }
    }

    fn observation(&self) -> AgentObservation {
        AgentObservation {
            id: self.id,
            pos: self.pos,
            alive: self.alive,
        }
    }
}

/// Snapshot of one agent inside a history frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentFrame {
    pub x: i32,
    pub y: i32,
    pub battery: Option<i64>,
    pub dead: bool,
}

/// One tick of recorded history.
///
/// Frame 0 carries the full initial belief as its diff; every later frame
/// carries only the cells that changed since the previous frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryFrame {
    pub step: u32,
    pub agents: Vec<AgentFrame>,
    pub belief_diff: Vec<BeliefChange>,
    pub found_targets: Vec<CellPos>,
    /// Current target cells; static today, kept for moving-target replays.
    pub target_positions: Vec<CellPos>,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every target was found.
    Success,
    /// The tick budget ran out first.
    MaxSteps,
    /// Every drone drained its battery.
    AllAgentsDead,
    /// The frontier set emptied while targets remained.
    NoFrontiers,
}

/// Quantitative summary of one finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    pub success: bool,
    pub outcome: RunOutcome,
    pub steps: u32,
    pub targets_total: usize,
    pub targets_found: usize,
    /// Known cells over knowable cells (grid minus unreachable free cells).
    pub coverage: f64,
    /// Unique visited cells over total accepted moves.
    pub efficiency: f64,
    pub turns: u64,
    pub collisions: u64,
    pub distance: f64,
    pub idle_steps: u64,
    pub backtracks: u64,
    pub unique_visited: usize,
    pub obstacle_density: f64,
    pub max_frontier: usize,
    pub avg_frontier: f64,
    /// Average newly revealed cells per tick.
    pub exploration_rate: f64,
    /// Fraction of ticks with a single communication component.
    pub connectivity: f64,
    pub max_partitions: usize,
    pub frontier_series: Vec<usize>,
    pub partition_series: Vec<usize>,
}

/// The configuration echo stored with every run record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSetup {
    pub width: u32,
    pub height: u32,
    pub policy: String,
    pub map_kind: MapKind,
    pub complexity: f64,
    pub room_size: u32,
    pub num_rooms: u32,
    pub num_drones: u32,
    pub num_targets: u32,
    pub seed: u64,
}

/// Complete, replayable record of one simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub config: RunSetup,
    pub map: GridMap,
    pub stats: RunStats,
    pub history: Vec<HistoryFrame>,
}

/// One simulation instance: grid, belief, agents, and the driving policy.
pub struct Simulation {
    config: SimulationConfig,
    seed: u64,
    map: GridMap,
    belief: BeliefGrid,
    agents: Vec<AgentState>,
    policy: Box<dyn NavigationPolicy>,
    rng: SmallRng,
    tick: u32,
    max_ticks: u32,
    found: Vec<CellPos>,
    history: Vec<HistoryFrame>,
    frontier_series: Vec<usize>,
    partition_series: Vec<usize>,
}

impl fmt::Debug for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulation")
            .field("policy", &self.policy.name())
            .field("seed", &self.seed)
            .field("tick", &self.tick)
            .field("agents", &self.agents.len())
            .field("found", &self.found.len())
            .finish()
    }
}

impl Simulation {
    /// Build a simulation: validate, generate the map, spawn agents, and run
    /// the initial sensing pass that produces frame 0.
    pub fn new(
        mut config: SimulationConfig,
        policy: Box<dyn NavigationPolicy>,
    ) -> Result<Self, SimError> {
        config.validate()?;
        let seed = config.resolve_seed();
        config.seed = Some(seed);

        let map = GridMap::generate(&config, seed)?;
        let belief = BeliefGrid::new(map.width(), map.height());
        let spawns = spawn_cells(&map, config.num_drones as usize)?;
        let agents: Vec<AgentState> = spawns
            .into_iter()
            .enumerate()
            .map(|(id, pos)| AgentState::new(id, pos, config.battery))
            .collect();

        let max_ticks = config.effective_max_steps();
        let mut sim = Self {
            config,
            seed,
            map,
            belief,
            agents,
            policy,
            rng: SmallRng::seed_from_u64(seed),
            tick: 0,
            max_ticks,
            found: Vec::new(),
            history: Vec::new(),
            frontier_series: Vec::new(),
            partition_series: Vec::new(),
        };

        sim.stage_sense();
        sim.stage_found_targets();
        sim.stage_series();
        sim.record_frame();
        Ok(sim)
    }

    /// The resolved seed this run executes under.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Current tick counter (frames recorded so far minus one).
    #[must_use]
    pub const fn tick(&self) -> u32 {
        self.tick
    }

    /// Ground-truth map of this run.
    #[must_use]
    pub const fn map(&self) -> &GridMap {
        &self.map
    }

    /// Shared belief accumulated so far.
    #[must_use]
    pub const fn belief(&self) -> &BeliefGrid {
        &self.belief
    }

    /// Targets found so far, in discovery order.
    #[must_use]
    pub fn found_targets(&self) -> &[CellPos] {
        &self.found
    }

    fn all_found(&self) -> bool {
        self.found.len() == self.map.targets().len()
    }

    fn any_alive(&self) -> bool {
        self.agents.iter().any(|a| a.alive)
    }

    /// Execute one tick: policy pass, collision resolution, sensing, target
    /// discovery, metric series, history frame.
    pub fn step(&mut self) {
        self.tick += 1;
        let proposals = self.stage_policies();
        self.stage_resolve(&proposals);
        self.stage_sense();
        self.stage_found_targets();
        self.stage_series();
        self.record_frame();
    }

    fn stage_policies(&mut self) -> Vec<Step> {
        let observations: Vec<AgentObservation> =
            self.agents.iter().map(AgentState::observation).collect();
        let known_targets = self.known_unfound_targets();
        let ctx = TickContext {
            belief: &self.belief,
            agents: &observations,
            known_targets: &known_targets,
        };
        let policy = &mut self.policy;
        let rng = &mut self.rng;
        policy.begin_tick(&ctx);
        let mut proposals = Vec::with_capacity(self.agents.len());
        for agent in &self.agents {
            proposals.push(if agent.alive {
                policy.select_move(&ctx, agent.id, rng)
            } else {
                Step::STAY
            });
        }
        proposals
    }

    /// Resolve proposed moves in id order. A wall rejects the move, counts a
    /// collision, and teaches the belief; an occupied cell rejects and counts
    /// a collision. No two alive agents ever share a cell.
    fn stage_resolve(&mut self, proposals: &[Step]) {
        for id in 0..self.agents.len() {
            if !self.agents[id].alive {
                continue;
            }
            let step = proposals[id];
            if step.is_stay() {
                self.agents[id].idle_steps += 1;
                continue;
            }
            let target = self.agents[id].pos.offset(step);
            if self.map.is_wall(target) {
                self.agents[id].collisions += 1;
                self.agents[id].idle_steps += 1;
                self.belief.reveal(target, BeliefCell::Occupied, self.tick);
                continue;
            }
            let occupied = self
                .agents
                .iter()
                .any(|other| other.id != id && other.alive && other.pos == target);
            if occupied {
                self.agents[id].collisions += 1;
                self.agents[id].idle_steps += 1;
                continue;
            }
            self.agents[id].apply_move(step);
        }
    }

    fn stage_sense(&mut self) {
        let range = self.config.sensor_range as i32;
        let tick = self.tick;
        for id in 0..self.agents.len() {
            if !self.agents[id].alive {
                continue;
            }
            let origin = self.agents[id].pos;
            sense_from(&self.map, &mut self.belief, origin, range, tick);
        }
    }

    fn stage_found_targets(&mut self) {
        let range = self.config.sensor_range as i32;
        for &target in self.map.targets() {
            if self.found.contains(&target) {
                continue;
            }
            let spotted = self.agents.iter().filter(|a| a.alive).any(|agent| {
                agent.pos == target
                    || (agent.pos.chebyshev(target) <= range
                        && self.map.line_of_sight(agent.pos, target))
            });
            if spotted {
                self.found.push(target);
            }
        }
    }

    fn stage_series(&mut self) {
        self.frontier_series.push(self.belief.frontier_count());
        self.partition_series.push(self.network_components());
    }

    fn record_frame(&mut self) {
        let frame = HistoryFrame {
            step: self.tick,
            agents: self
                .agents
                .iter()
                .map(|a| AgentFrame {
                    x: a.pos.x,
                    y: a.pos.y,
                    battery: a.battery,
                    dead: !a.alive,
                })
                .collect(),
            belief_diff: self.belief.drain_changes(),
            found_targets: self.found.clone(),
            target_positions: self.map.targets().to_vec(),
        };
        self.history.push(frame);
    }

    fn known_unfound_targets(&self) -> Vec<CellPos> {
        let mut targets: Vec<CellPos> = self
            .map
            .targets()
            .iter()
            .copied()
            .filter(|t| !self.found.contains(t) && self.belief.cell(*t) != BeliefCell::Unknown)
            .collect();
        targets.sort_by_key(|t| t.scan_key());
        targets
    }

    /// Connected components of the communication graph over alive agents.
    fn network_components(&self) -> usize {
        let alive: Vec<&AgentState> = self.agents.iter().filter(|a| a.alive).collect();
        if alive.is_empty() {
            return 0;
        }
        let range = self.config.comm_range;
        let mut component = vec![usize::MAX; alive.len()];
        let mut count = 0;
        for root in 0..alive.len() {
            if component[root] != usize::MAX {
                continue;
            }
            let mut queue = VecDeque::from([root]);
            component[root] = count;
            while let Some(i) = queue.pop_front() {
                for j in 0..alive.len() {
                    if component[j] == usize::MAX
                        && alive[i].pos.euclidean(alive[j].pos) <= range
                    {
                        component[j] = count;
                        queue.push_back(j);
                    }
                }
            }
            count += 1;
        }
        count
    }

    /// Drive the simulation to termination and produce its record.
    pub fn run(mut self) -> RunRecord {
        let outcome = loop {
            if self.all_found() {
                break RunOutcome::Success;
            }
            if self.tick >= self.max_ticks {
                break RunOutcome::MaxSteps;
            }
            if !self.any_alive() {
                break RunOutcome::AllAgentsDead;
            }
            if self.frontier_series.last() == Some(&0) {
                break RunOutcome::NoFrontiers;
            }
            self.step();
        };
        debug!(
            policy = self.policy.name(),
            seed = self.seed,
            ticks = self.tick,
            ?outcome,
            found = self.found.len(),
            "simulation finished"
        );
        self.into_record(outcome)
    }

    fn into_record(self, outcome: RunOutcome) -> RunRecord {
        let total_cells = (self.map.width() as usize) * (self.map.height() as usize);
        let knowable = total_cells - self.map.unreachable_free_count();
        let coverage = if knowable > 0 {
            self.belief.known_count() as f64 / knowable as f64
        } else {
            0.0
        };

        let mut union_visited: HashSet<CellPos> = HashSet::new();
        for agent in &self.agents {
            union_visited.extend(agent.visited.iter().copied());
        }
        let total_moves: u64 = self.agents.iter().map(|a| a.accepted_moves).sum();
        let efficiency = if total_moves > 0 {
            union_visited.len() as f64 / total_moves as f64
        } else {
            0.0
        };

        let ticks_observed = self.partition_series.len().max(1);
        let single_ticks = self.partition_series.iter().filter(|&&c| c == 1).count();
        let max_frontier = self.frontier_series.iter().copied().max().unwrap_or(0);
        let avg_frontier = self.frontier_series.iter().sum::<usize>() as f64
            / self.frontier_series.len().max(1) as f64;

        let stats = RunStats {
            success: outcome == RunOutcome::Success,
            outcome,
            steps: self.tick,
            targets_total: self.map.targets().len(),
            targets_found: self.found.len(),
            coverage,
            efficiency,
            turns: self.agents.iter().map(|a| a.turns).sum(),
            collisions: self.agents.iter().map(|a| a.collisions).sum(),
            distance: self.agents.iter().map(|a| a.distance).sum(),
            idle_steps: self.agents.iter().map(|a| a.idle_steps).sum(),
            backtracks: self.agents.iter().map(|a| a.backtracks).sum(),
            unique_visited: union_visited.len(),
            obstacle_density: self.map.wall_count() as f64 / total_cells as f64,
            max_frontier,
            avg_frontier,
            exploration_rate: self.belief.known_count() as f64 / f64::from(self.tick.max(1)),
            connectivity: single_ticks as f64 / ticks_observed as f64,
            max_partitions: self.partition_series.iter().copied().max().unwrap_or(0),
            frontier_series: self.frontier_series,
            partition_series: self.partition_series,
        };

        RunRecord {
            config: RunSetup {
                width: self.config.width,
                height: self.config.height,
                policy: self.policy.name().to_string(),
                map_kind: self.config.map_kind,
                complexity: self.config.complexity,
                room_size: self.config.room_size,
                num_rooms: self.config.num_rooms,
                num_drones: self.config.num_drones,
                num_targets: self.config.num_targets,
                seed: self.seed,
            },
            map: self.map,
            stats,
            history: self.history,
        }
    }
}

/// Reveal cells visible from `origin` within the Chebyshev `range`.
///
/// Every candidate cell is probed along its Bresenham line: traversed cells
/// are revealed free until a wall is met, which is revealed occupied before
/// the walk stops.
pub fn sense_from(map: &GridMap, belief: &mut BeliefGrid, origin: CellPos, range: i32, tick: u32) {
    belief.reveal(origin, BeliefCell::Free, tick);
    for dy in -range..=range {
        for dx in -range..=range {
            let candidate = CellPos::new(origin.x + dx, origin.y + dy);
            if !map.in_bounds(candidate) || candidate == origin {
                continue;
            }
            for cell in Bresenham::new(origin, candidate).skip(1) {
                if map.is_wall(cell) {
                    belief.reveal(cell, BeliefCell::Occupied, tick);
                    break;
                }
                belief.reveal(cell, BeliefCell::Free, tick);
            }
        }
    }
}

/// Spawn cells for `count` agents: the start cell plus the nearest free cells
/// in BFS ring order, `(y, x)` ties, so no two agents share a cell.
fn spawn_cells(map: &GridMap, count: usize) -> Result<Vec<CellPos>, SimError> {
    let dist = map.bfs_distances(map.start());
    let mut reachable: Vec<CellPos> = map
        .free_cells()
        .filter(|&c| {
            dist[(c.y as usize) * (map.width() as usize) + c.x as usize] != u32::MAX
        })
        .collect();
    reachable.sort_by_key(|&c| {
        (
            dist[(c.y as usize) * (map.width() as usize) + c.x as usize],
            c.scan_key(),
        )
    });
    if reachable.len() < count {
        return Err(SimError::Ungeneratable { attempts: 1 });
    }
    Ok(reachable.into_iter().take(count).collect())
}

/// Reconstruction of belief state from delta-encoded history.
pub mod replay {
    use super::{BeliefCell, HistoryFrame};

    /// Apply the diffs of `frames` in order, starting from all-unknown.
    ///
    /// The result matches the engine's final belief bit-exactly for any
    /// history the engine emitted.
    #[must_use]
    pub fn reconstruct_belief(width: u32, height: u32, frames: &[HistoryFrame]) -> Vec<BeliefCell> {
        let mut cells = vec![BeliefCell::Unknown; (width as usize) * (height as usize)];
        for frame in frames {
            for change in &frame.belief_diff {
                cells[(change.row as usize) * (width as usize) + change.col as usize] =
                    change.value;
            }
        }
        cells
    }
}
