//! Navigation for the sheep.
//!
//! The behaviour controller only sees the [`NavigationService`] contract. The
//! [`GridAgent`] implementation moves an agent across a flat zone with
//! circle/box obstacles using context steering, and falls back to a grid A*
//! when steering gets stuck.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::f32::consts::PI;
use std::sync::Arc;

use log::{debug, trace};
use rand::{Rng, RngCore};
use serde::Deserialize;

use redsheep_shared::Vec3;

/// Collision radius of the sheep
pub const AGENT_RADIUS: f32 = 0.6;

/// Directions sampled by context steering
const STEERING_DIRECTIONS: usize = 16;

/// Probe distances used to score steering danger
const STEERING_PROBES: [f32; 3] = [1.0, 2.0, 3.0];

/// Extra clearance kept when pushing out of obstacles
const OBSTACLE_MARGIN: f32 = 0.3;

/// A* cell size
const GRID_SIZE: f32 = 1.0;

/// A* node budget
const MAX_PATH_ITERATIONS: usize = 4000;

/// Black-box navigation capability used by the behaviour controller
pub trait NavigationService {
    fn position(&self) -> Vec3;

    /// Facing direction (unit length)
    fn forward(&self) -> Vec3;

    /// Returns false if the point cannot be navigated to
    fn set_destination(&mut self, point: Vec3) -> bool;

    fn destination(&self) -> Option<Vec3>;

    fn distance_to(&self, point: Vec3) -> f32 {
        self.position().distance_to(point)
    }

    fn speed(&self) -> f32;
    fn set_speed(&mut self, speed: f32);
    fn acceleration(&self) -> f32;
    fn set_acceleration(&mut self, acceleration: f32);

    /// Whether the agent moves toward its destination at all
    fn set_moving(&mut self, moving: bool);

    /// Farthest known node within `max_distance` of `origin`, skipping
    /// `offset` farther ones
    fn farthest_point_from(&self, origin: Vec3, offset: usize, max_distance: f32) -> Option<Vec3>;

    fn closest_point_to(&self, origin: Vec3) -> Option<Vec3>;

    fn random_point_in_radius(&self, center: Vec3, radius: f32, rng: &mut dyn RngCore) -> Option<Vec3>;

    /// Number of known navigation nodes
    fn node_count(&self) -> usize;
}

// ============================================================================
// Geometry
// ============================================================================

/// A position on the ground plane (x, z)
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub z: f32,
}

impl Vec2 {
    pub fn new(x: f32, z: f32) -> Self {
        Self { x, z }
    }

    pub fn from_3d(pos: Vec3) -> Self {
        Self { x: pos.x, z: pos.z }
    }

    pub fn to_3d(self, y: f32) -> Vec3 {
        Vec3::new(self.x, y, self.z)
    }

    pub fn length(&self) -> f32 {
        self.x.hypot(self.z)
    }

    pub fn normalized(&self) -> Self {
        let len = self.length();
        if len > 0.0001 {
            Self::new(self.x / len, self.z / len)
        } else {
            Self::new(0.0, 0.0)
        }
    }

    pub fn dot(&self, other: Vec2) -> f32 {
        self.x * other.x + self.z * other.z
    }

    pub fn distance_to(&self, other: Vec2) -> f32 {
        (other - *self).length()
    }
}

impl std::ops::Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.z + rhs.z)
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.z - rhs.z)
    }
}

impl std::ops::Mul<f32> for Vec2 {
    type Output = Vec2;
    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.z * rhs)
    }
}

/// Static obstacle on the ground plane
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Obstacle {
    Circle { center: Vec2, radius: f32 },
    Box { min: Vec2, max: Vec2 },
}

impl Obstacle {
    pub fn circle(x: f32, z: f32, radius: f32) -> Self {
        Self::Circle { center: Vec2::new(x, z), radius }
    }

    /// Box from center and half extents
    pub fn rect(center_x: f32, center_z: f32, half_width: f32, half_depth: f32) -> Self {
        Self::Box {
            min: Vec2::new(center_x - half_width, center_z - half_depth),
            max: Vec2::new(center_x + half_width, center_z + half_depth),
        }
    }

    /// Whether a disc at `pos` overlaps this obstacle
    pub fn overlaps(&self, pos: Vec2, radius: f32) -> bool {
        match self {
            Self::Circle { center, radius: r } => pos.distance_to(*center) < radius + r,
            Self::Box { min, max } => {
                let closest = Vec2::new(pos.x.clamp(min.x, max.x), pos.z.clamp(min.z, max.z));
                pos.distance_to(closest) < radius
            }
        }
    }

    /// Vector that moves a disc at `pos` clear of this obstacle
    fn pushout(&self, pos: Vec2, radius: f32) -> Option<Vec2> {
        match self {
            Self::Circle { center, radius: r } => {
                let away = pos - *center;
                let dist = away.length();
                let clearance = radius + r + OBSTACLE_MARGIN;
                (dist < clearance && dist > 0.001).then(|| away.normalized() * (clearance - dist))
            }
            Self::Box { min, max } => {
                let closest = Vec2::new(pos.x.clamp(min.x, max.x), pos.z.clamp(min.z, max.z));
                let away = pos - closest;
                let dist = away.length();
                let clearance = radius + OBSTACLE_MARGIN;
                if dist >= clearance {
                    return None;
                }
                if dist > 0.001 {
                    return Some(away.normalized() * (clearance - dist));
                }
                // Center inside the box: leave through the nearest face
                let faces = [
                    (pos.x - min.x, Vec2::new(-1.0, 0.0)),
                    (max.x - pos.x, Vec2::new(1.0, 0.0)),
                    (pos.z - min.z, Vec2::new(0.0, -1.0)),
                    (max.z - pos.z, Vec2::new(0.0, 1.0)),
                ];
                faces
                    .iter()
                    .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal))
                    .map(|(depth, dir)| *dir * (depth + clearance))
            }
        }
    }
}

/// Whether a disc collides with any obstacle
pub fn check_collision(pos: Vec2, radius: f32, obstacles: &[Obstacle]) -> bool {
    let hit = obstacles.iter().find(|o| o.overlaps(pos, radius));
    if let Some(obstacle) = hit {
        trace!("[COLLISION] ({:.2}, {:.2}) r={:.2} hits {:?}", pos.x, pos.z, radius, obstacle);
    }
    hit.is_some()
}

/// Whether the straight segment between two points passes through an obstacle
pub fn segment_blocked(from: Vec2, to: Vec2, obstacles: &[Obstacle]) -> bool {
    let length = from.distance_to(to);
    let steps = (length / 0.25).ceil().max(1.0) as usize;
    (1..steps).any(|i| {
        let t = i as f32 / steps as f32;
        check_collision(from + (to - from) * t, 0.0, obstacles)
    })
}

/// Push a disc out of every obstacle it overlaps
pub fn resolve_collision(pos: Vec2, radius: f32, obstacles: &[Obstacle]) -> Vec2 {
    let mut result = pos;
    for _ in 0..3 {
        let push = obstacles
            .iter()
            .filter_map(|o| o.pushout(result, radius))
            .fold(None, |acc: Option<Vec2>, p| Some(acc.map_or(p, |a| a + p)));
        match push {
            Some(p) => result = result + p,
            None => break,
        }
    }
    result
}

// ============================================================================
// Context Steering
// ============================================================================

/// Pick the sampled direction with the best interest/danger balance.
///
/// Returns `None` when already at the target or when every direction is
/// blocked.
pub fn steering_direction(from: Vec2, to: Vec2, obstacles: &[Obstacle], radius: f32) -> Option<Vec2> {
    let to_target = to - from;
    if to_target.length() < 0.1 {
        return None;
    }
    let wanted = to_target.normalized();
    let lookahead = STEERING_PROBES[STEERING_PROBES.len() - 1];

    let (best_dir, best_score) = (0..STEERING_DIRECTIONS)
        .map(|i| {
            let angle = i as f32 / STEERING_DIRECTIONS as f32 * 2.0 * PI;
            let dir = Vec2::new(angle.cos(), angle.sin());

            let mut danger = STEERING_PROBES
                .iter()
                .filter(|d| check_collision(from + dir * **d, radius, obstacles))
                .map(|d| 1.0 - d / lookahead)
                .fold(0.0f32, f32::max);
            if check_collision(from + dir * 0.5, radius, obstacles) {
                danger = 1.5;
            }

            (dir, dir.dot(wanted) - danger * 2.0)
        })
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))?;

    if best_score > -0.5 {
        Some(best_dir)
    } else {
        debug!("[STEER] All directions blocked (best score {:.2})", best_score);
        None
    }
}

// ============================================================================
// A* Pathfinding
// ============================================================================

#[derive(Clone, Copy, PartialEq)]
struct OpenNode {
    cell: (i32, i32),
    f_cost: f32,
}

impl Eq for OpenNode {}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on f cost
        other.f_cost.partial_cmp(&self.f_cost).unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn cell_of(pos: Vec2) -> (i32, i32) {
    ((pos.x / GRID_SIZE).round() as i32, (pos.z / GRID_SIZE).round() as i32)
}

fn cell_center(cell: (i32, i32)) -> Vec2 {
    Vec2::new(cell.0 as f32 * GRID_SIZE, cell.1 as f32 * GRID_SIZE)
}

/// Grid A* from `start` to `goal`; waypoints exclude the start
pub fn find_path(start: Vec2, goal: Vec2, obstacles: &[Obstacle], radius: f32) -> Option<Vec<Vec2>> {
    if check_collision(goal, radius, obstacles) {
        return None;
    }

    let start_cell = cell_of(start);
    let goal_cell = cell_of(goal);
    let mut open = BinaryHeap::new();
    let mut g_cost: HashMap<(i32, i32), f32> = HashMap::new();
    let mut came_from: HashMap<(i32, i32), (i32, i32)> = HashMap::new();

    g_cost.insert(start_cell, 0.0);
    open.push(OpenNode { cell: start_cell, f_cost: start.distance_to(goal) });

    let mut iterations = 0;
    while let Some(OpenNode { cell, .. }) = open.pop() {
        iterations += 1;
        if iterations > MAX_PATH_ITERATIONS {
            break;
        }

        if cell == goal_cell {
            let mut path = vec![goal];
            let mut current = cell;
            while let Some(prev) = came_from.get(&current) {
                if *prev != start_cell {
                    path.push(cell_center(*prev));
                }
                current = *prev;
            }
            path.reverse();
            return Some(path);
        }

        let current_g = g_cost.get(&cell).copied().unwrap_or(f32::INFINITY);
        for dx in -1..=1 {
            for dz in -1..=1 {
                if dx == 0 && dz == 0 {
                    continue;
                }
                let next = (cell.0 + dx, cell.1 + dz);
                let next_pos = cell_center(next);
                if check_collision(next_pos, radius, obstacles) {
                    continue;
                }
                let step = if dx != 0 && dz != 0 { std::f32::consts::SQRT_2 } else { 1.0 } * GRID_SIZE;
                let tentative = current_g + step;
                if tentative < g_cost.get(&next).copied().unwrap_or(f32::INFINITY) {
                    g_cost.insert(next, tentative);
                    came_from.insert(next, cell);
                    open.push(OpenNode { cell: next, f_cost: tentative + next_pos.distance_to(goal) });
                }
            }
        }
    }

    None
}

// ============================================================================
// Grid Agent
// ============================================================================

/// Waypoint-following state kept between steps
#[derive(Debug, Clone, Default)]
pub struct NavigationState {
    pub path: Vec<Vec2>,
    pub path_index: usize,
    pub stuck_time: f32,
    pub last_position: Option<Vec2>,
}

impl NavigationState {
    pub fn clear_path(&mut self) {
        self.path.clear();
        self.path_index = 0;
    }

    pub fn current_waypoint(&self) -> Option<Vec2> {
        self.path.get(self.path_index).copied()
    }
}

/// Reference [`NavigationService`] for a flat zone with static obstacles
#[derive(Debug, Clone)]
pub struct GridAgent {
    position: Vec3,
    forward: Vec3,
    destination: Option<Vec3>,
    moving: bool,
    /// Speed cap set by the controller
    speed: f32,
    acceleration: f32,
    /// Actual speed this step
    velocity: f32,
    obstacles: Arc<Vec<Obstacle>>,
    nodes: Arc<Vec<Vec3>>,
    nav_state: NavigationState,
}

impl GridAgent {
    pub fn new(position: Vec3, obstacles: Arc<Vec<Obstacle>>, nodes: Arc<Vec<Vec3>>) -> Self {
        Self {
            position,
            forward: Vec3::FORWARD,
            destination: None,
            moving: true,
            speed: 0.0,
            acceleration: 0.0,
            velocity: 0.0,
            obstacles,
            nodes,
            nav_state: NavigationState::default(),
        }
    }

    /// Current actual speed (not the cap)
    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    /// Advance the agent by one tick
    pub fn step(&mut self, delta: f32) {
        let target_speed = if self.moving && self.destination.is_some() { self.speed } else { 0.0 };
        let max_change = self.acceleration.max(0.0) * delta;
        self.velocity += (target_speed - self.velocity).clamp(-max_change, max_change);
        if target_speed == 0.0 && self.acceleration == 0.0 {
            self.velocity = 0.0;
        }

        let Some(destination) = self.destination else {
            return;
        };
        if self.velocity <= 0.0 {
            return;
        }

        let from = Vec2::from_3d(self.position);
        let to = Vec2::from_3d(destination);
        let next = self.navigate(from, to, self.velocity * delta);
        let moved = next - from;
        if moved.length() > 0.0001 {
            self.forward = moved.normalized().to_3d(0.0);
        }
        self.position = next.to_3d(self.position.y);
    }

    fn navigate(&mut self, from: Vec2, to: Vec2, step: f32) -> Vec2 {
        let remaining = from.distance_to(to);
        if remaining < 0.2 {
            return from;
        }

        // Follow an A* path while one is active
        if let Some(waypoint) = self.nav_state.current_waypoint() {
            if from.distance_to(waypoint) < GRID_SIZE {
                self.nav_state.path_index += 1;
            }
            if let Some(waypoint) = self.nav_state.current_waypoint() {
                let dir = (waypoint - from).normalized();
                let next = from + dir * step.min(from.distance_to(waypoint));
                return resolve_collision(next, AGENT_RADIUS, &self.obstacles);
            }
            self.nav_state.clear_path();
        }

        if let Some(dir) = steering_direction(from, to, &self.obstacles, AGENT_RADIUS) {
            let next = resolve_collision(from + dir * step.min(remaining), AGENT_RADIUS, &self.obstacles);

            let progress = self.nav_state.last_position.map(|p| from.distance_to(p));
            self.nav_state.last_position = Some(from);
            match progress {
                Some(p) if p < 0.01 * step.max(0.001) => self.nav_state.stuck_time += 1.0,
                _ => self.nav_state.stuck_time = 0.0,
            }
            if self.nav_state.stuck_time > 5.0 {
                self.replan(from, to);
            }
            return next;
        }

        self.replan(from, to);
        from
    }

    fn replan(&mut self, from: Vec2, to: Vec2) {
        self.nav_state.stuck_time = 0.0;
        match find_path(from, to, &self.obstacles, AGENT_RADIUS) {
            Some(path) => {
                debug!("[NAV] A* found path with {} waypoints", path.len());
                self.nav_state.path = path;
                self.nav_state.path_index = 0;
            }
            None => debug!("[NAV] A* failed to find a path"),
        }
    }
}

impl NavigationService for GridAgent {
    fn position(&self) -> Vec3 {
        self.position
    }

    fn forward(&self) -> Vec3 {
        self.forward
    }

    fn set_destination(&mut self, point: Vec3) -> bool {
        let finite = point.x.is_finite() && point.y.is_finite() && point.z.is_finite();
        if !finite || check_collision(Vec2::from_3d(point), AGENT_RADIUS, &self.obstacles) {
            return false;
        }
        self.destination = Some(point);
        self.nav_state.clear_path();
        true
    }

    fn destination(&self) -> Option<Vec3> {
        self.destination
    }

    fn speed(&self) -> f32 {
        self.speed
    }

    fn set_speed(&mut self, speed: f32) {
        self.speed = speed;
    }

    fn acceleration(&self) -> f32 {
        self.acceleration
    }

    fn set_acceleration(&mut self, acceleration: f32) {
        self.acceleration = acceleration;
    }

    fn set_moving(&mut self, moving: bool) {
        self.moving = moving;
    }

    fn farthest_point_from(&self, origin: Vec3, offset: usize, max_distance: f32) -> Option<Vec3> {
        let mut sorted: Vec<Vec3> = self
            .nodes
            .iter()
            .copied()
            .filter(|node| origin.distance_to(*node) <= max_distance)
            .collect();
        sorted.sort_by(|a, b| {
            origin
                .distance_to(*b)
                .partial_cmp(&origin.distance_to(*a))
                .unwrap_or(Ordering::Equal)
        });
        let index = offset.min(sorted.len().checked_sub(1)?);
        sorted.get(index).copied()
    }

    fn closest_point_to(&self, origin: Vec3) -> Option<Vec3> {
        self.nodes.iter().copied().min_by(|a, b| {
            origin
                .distance_to(*a)
                .partial_cmp(&origin.distance_to(*b))
                .unwrap_or(Ordering::Equal)
        })
    }

    fn random_point_in_radius(&self, center: Vec3, radius: f32, rng: &mut dyn RngCore) -> Option<Vec3> {
        if radius <= 0.0 {
            return None;
        }
        for _ in 0..30 {
            let angle = rng.gen_range(0.0..2.0 * PI);
            let dist = radius * rng.gen_range(0.0f32..1.0).sqrt();
            let point = Vec2::new(center.x + angle.cos() * dist, center.z + angle.sin() * dist);
            if !check_collision(point, AGENT_RADIUS, &self.obstacles) {
                return Some(point.to_3d(center.y));
            }
        }
        None
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
