//! Perception contract and the roster-backed implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use redsheep_shared::{PlayerId, Vec3};

use crate::navigation::{segment_blocked, Obstacle, Vec2};

/// Eye height used for sight lines
pub const EYE_HEIGHT: f32 = 1.2;

/// A player the sheep could perceive
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: PlayerId,
    pub position: Vec3,
    pub alive: bool,
    pub in_exclusion_zone: bool,
    /// Whether a live peer controls this player
    pub controlled: bool,
    /// How absorbed the player is; high values make them ignorable
    pub immersion: f32,
}

impl Candidate {
    pub fn new(id: PlayerId, position: Vec3) -> Self {
        Self {
            id,
            position,
            alive: true,
            in_exclusion_zone: false,
            controlled: true,
            immersion: 0.0,
        }
    }

    /// Alive, controlled and outside every exclusion zone
    pub fn is_targetable(&self) -> bool {
        self.alive && self.controlled && !self.in_exclusion_zone
    }

    /// Targetable and not immersed past `immersion_limit`
    pub fn is_annoying(&self, immersion_limit: f32) -> bool {
        self.is_targetable() && self.immersion <= immersion_limit
    }
}

/// Sound heard by the sheep
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseEvent {
    pub position: Vec3,
    pub loudness: f32,
    pub tag: i32,
    pub repeat_count: u32,
}

/// Sight parameters for one query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewCone {
    /// Maximum angle in degrees between forward and the target
    pub angle: f32,
    pub range: f32,
    /// Distance within which the angle test is skipped
    pub proximity_awareness: f32,
    /// Rays cast per sight test; the first one aims at the point itself
    pub precision_samples: u32,
    /// Radius around the point the extra rays are spread over
    pub tolerance: f32,
}

impl ViewCone {
    /// Ray targets around `point` as seen from `eye`, centre first
    pub fn sample_points(&self, eye: Vec3, point: Vec3) -> Vec<Vec3> {
        let samples = self.precision_samples.max(1);
        let mut points = Vec::with_capacity(samples as usize);
        points.push(point);

        let direction = point - eye;
        let side = Vec3::new(-direction.z, 0.0, direction.x).normalized();
        if samples == 1 || self.tolerance <= 0.0 || side == Vec3::ZERO {
            return points;
        }

        let up = Vec3::new(0.0, 1.0, 0.0);
        let spread = samples - 1;
        for i in 0..spread {
            let angle = std::f32::consts::TAU * i as f32 / spread as f32;
            let offset = side * angle.cos() + up * angle.sin();
            points.push(point + offset * self.tolerance);
        }
        points
    }
}

/// Black-box perception used by the behaviour controller
pub trait PerceptionService {
    /// Every player currently known
    fn candidates(&self) -> Vec<Candidate>;

    /// Whether geometry blocks the line between two points
    fn occluded(&self, from: Vec3, to: Vec3) -> bool;

    /// Range and cone test on `point`, then visible if any sample ray is unoccluded
    fn line_of_sight(&self, eye: Vec3, forward: Vec3, point: Vec3, view: &ViewCone) -> bool {
        let distance = eye.distance_to(point);
        if distance > view.range {
            return false;
        }
        let to_point = point - eye;
        let in_cone = distance <= view.proximity_awareness || forward.angle_to(to_point) <= view.angle;
        in_cone && view.sample_points(eye, point).into_iter().any(|p| !self.occluded(eye, p))
    }

    fn all_visible_candidates(&self, eye: Vec3, forward: Vec3, view: &ViewCone) -> Vec<Candidate> {
        self.candidates()
            .into_iter()
            .filter(|c| c.is_targetable())
            .filter(|c| self.line_of_sight(eye, forward, c.position + Vec3::new(0.0, EYE_HEIGHT, 0.0), view))
            .collect()
    }

    fn closest_visible_candidate(&self, eye: Vec3, forward: Vec3, view: &ViewCone) -> Option<Candidate> {
        self.all_visible_candidates(eye, forward, view)
            .into_iter()
            .min_by(|a, b| {
                eye.distance_to(a.position)
                    .partial_cmp(&eye.distance_to(b.position))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

/// Shared table of players, written by the network layer
#[derive(Debug, Clone, Default)]
pub struct PlayerRoster {
    players: Arc<RwLock<HashMap<PlayerId, Candidate>>>,
}

impl PlayerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<PlayerId, Candidate>> {
        self.players.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<PlayerId, Candidate>> {
        self.players.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn upsert(&self, candidate: Candidate) {
        self.write().insert(candidate.id, candidate);
    }

    pub fn remove(&self, id: PlayerId) -> Option<Candidate> {
        self.write().remove(&id)
    }

    pub fn get(&self, id: PlayerId) -> Option<Candidate> {
        self.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn all(&self) -> Vec<Candidate> {
        self.read().values().cloned().collect()
    }
}

/// [`PerceptionService`] over the player roster and the zone's obstacles
#[derive(Debug, Clone)]
pub struct RosterPerception {
    roster: PlayerRoster,
    obstacles: Arc<Vec<Obstacle>>,
}

impl RosterPerception {
    pub fn new(roster: PlayerRoster, obstacles: Arc<Vec<Obstacle>>) -> Self {
        Self { roster, obstacles }
    }
}

impl PerceptionService for RosterPerception {
    fn candidates(&self) -> Vec<Candidate> {
        self.roster.all()
    }

    fn occluded(&self, from: Vec3, to: Vec3) -> bool {
        segment_blocked(Vec2::from_3d(from), Vec2::from_3d(to), &self.obstacles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIEW: ViewCone = ViewCone {
        angle: 45.0,
        range: 30.0,
        proximity_awareness: 3.0,
        precision_samples: 1,
        tolerance: 0.0,
    };

    fn perception(obstacles: Vec<Obstacle>) -> (PlayerRoster, RosterPerception) {
        let roster = PlayerRoster::new();
        let perception = RosterPerception::new(roster.clone(), Arc::new(obstacles));
        (roster, perception)
    }

    #[test]
    fn test_candidate_filters() {
        let mut candidate = Candidate::new(1, Vec3::ZERO);
        assert!(candidate.is_targetable());
        assert!(candidate.is_annoying(0.73));

        candidate.immersion = 0.9;
        assert!(candidate.is_targetable());
        assert!(!candidate.is_annoying(0.73));

        candidate.in_exclusion_zone = true;
        assert!(!candidate.is_targetable());
    }

    #[test]
    fn test_line_of_sight_cone() {
        let (_, perception) = perception(vec![]);
        let eye = Vec3::ZERO;

        assert!(perception.line_of_sight(eye, Vec3::FORWARD, Vec3::new(0.0, 0.0, 10.0), &VIEW));
        // Behind but within proximity awareness
        assert!(perception.line_of_sight(eye, Vec3::FORWARD, Vec3::new(0.0, 0.0, -2.0), &VIEW));
        assert!(!perception.line_of_sight(eye, Vec3::FORWARD, Vec3::new(0.0, 0.0, -10.0), &VIEW));
        assert!(!perception.line_of_sight(eye, Vec3::FORWARD, Vec3::new(0.0, 0.0, 40.0), &VIEW));
    }

    #[test]
    fn test_walls_block_sight() {
        let (roster, perception) = perception(vec![Obstacle::rect(0.0, 5.0, 3.0, 0.5)]);
        roster.upsert(Candidate::new(7, Vec3::new(0.0, 0.0, 10.0)));

        assert!(perception.occluded(Vec3::ZERO, Vec3::new(0.0, 0.0, 10.0)));
        assert!(perception.closest_visible_candidate(Vec3::ZERO, Vec3::FORWARD, &VIEW).is_none());
    }

    #[test]
    fn test_offset_samples_see_past_thin_cover() {
        // Post covers the centre ray only
        let (_, perception) = perception(vec![Obstacle::rect(0.0, 5.0, 0.3, 0.2)]);
        let target = Vec3::new(0.0, 0.0, 10.0);
        let wide = ViewCone { precision_samples: 3, tolerance: 1.0, ..VIEW };

        assert!(perception.occluded(Vec3::ZERO, target));
        assert!(!perception.line_of_sight(Vec3::ZERO, Vec3::FORWARD, target, &VIEW));
        assert!(perception.line_of_sight(Vec3::ZERO, Vec3::FORWARD, target, &wide));

        let points = wide.sample_points(Vec3::ZERO, target);
        assert_eq!(points.len(), 3);
        assert_eq!(points[0], target);
        assert!((points[1].x.abs() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_offset_samples_do_not_see_through_walls() {
        let (_, perception) = perception(vec![Obstacle::rect(0.0, 5.0, 3.0, 0.5)]);
        let wide = ViewCone { precision_samples: 5, tolerance: 1.0, ..VIEW };
        assert!(!perception.line_of_sight(Vec3::ZERO, Vec3::FORWARD, Vec3::new(0.0, 0.0, 10.0), &wide));
    }

    #[test]
    fn test_closest_visible_candidate() {
        let (roster, perception) = perception(vec![]);
        roster.upsert(Candidate::new(1, Vec3::new(0.0, 0.0, 20.0)));
        roster.upsert(Candidate::new(2, Vec3::new(1.0, 0.0, 8.0)));
        let mut dead = Candidate::new(3, Vec3::new(0.0, 0.0, 4.0));
        dead.alive = false;
        roster.upsert(dead);

        let seen = perception.closest_visible_candidate(Vec3::ZERO, Vec3::FORWARD, &VIEW);
        assert_eq!(seen.map(|c| c.id), Some(2));
        assert_eq!(perception.all_visible_candidates(Vec3::ZERO, Vec3::FORWARD, &VIEW).len(), 2);

        roster.remove(2);
        assert_eq!(roster.len(), 2);
    }
}
