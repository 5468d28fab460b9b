//! Test utilities for the behaviour controller

use std::sync::Arc;

use rand::{Rng, RngCore};

use redsheep_shared::{BehaviourState, EntityId, SheepConfig, SheepEvent, Vec3};

use crate::entities::SheepController;
use crate::navigation::NavigationService;
use crate::perception::{Candidate, PerceptionService};

pub const TEST_ENTITY_ID: &str = "abc123";

/// Navigation fake that teleports on demand
#[derive(Debug, Clone)]
pub struct FakeNav {
    pub position: Vec3,
    pub forward: Vec3,
    pub destination: Option<Vec3>,
    pub speed: f32,
    pub acceleration: f32,
    pub moving: bool,
    pub nodes: Vec<Vec3>,
    /// Refuse every destination and random point
    pub unreachable: bool,
}

impl FakeNav {
    pub fn new() -> Self {
        Self {
            position: Vec3::ZERO,
            forward: Vec3::FORWARD,
            destination: None,
            speed: 0.0,
            acceleration: 0.0,
            moving: true,
            nodes: vec![
                Vec3::new(0.0, 0.0, 40.0),
                Vec3::new(30.0, 0.0, 0.0),
                Vec3::new(-20.0, 0.0, -20.0),
                Vec3::new(5.0, 0.0, 5.0),
            ],
            unreachable: false,
        }
    }

    /// Jump to the current destination
    pub fn arrive(&mut self) {
        if let Some(destination) = self.destination {
            self.position = destination;
        }
    }
}

impl NavigationService for FakeNav {
    fn position(&self) -> Vec3 {
        self.position
    }

    fn forward(&self) -> Vec3 {
        self.forward
    }

    fn set_destination(&mut self, point: Vec3) -> bool {
        if self.unreachable {
            return false;
        }
        self.destination = Some(point);
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
        if self.unreachable {
            return None;
        }
        let mut nodes: Vec<Vec3> =
            self.nodes.iter().copied().filter(|n| origin.distance_to(*n) <= max_distance).collect();
        nodes.sort_by(|a, b| origin.distance_to(*b).total_cmp(&origin.distance_to(*a)));
        nodes.get(offset.min(nodes.len().saturating_sub(1))).copied()
    }

    fn closest_point_to(&self, origin: Vec3) -> Option<Vec3> {
        if self.unreachable {
            return None;
        }
        self.nodes
            .iter()
            .copied()
            .min_by(|a, b| origin.distance_to(*a).total_cmp(&origin.distance_to(*b)))
    }

    fn random_point_in_radius(&self, center: Vec3, radius: f32, rng: &mut dyn RngCore) -> Option<Vec3> {
        if self.unreachable {
            return None;
        }
        let angle = rng.gen_range(0.0..std::f32::consts::TAU);
        Some(center + Vec3::new(angle.cos(), 0.0, angle.sin()) * (radius * 0.5))
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Perception fake over a fixed player list
#[derive(Debug, Clone, Default)]
pub struct FakePerception {
    pub players: Vec<Candidate>,
    /// Every sight line is blocked
    pub blind: bool,
}

impl PerceptionService for FakePerception {
    fn candidates(&self) -> Vec<Candidate> {
        self.players.clone()
    }

    fn occluded(&self, _from: Vec3, _to: Vec3) -> bool {
        self.blind
    }
}

pub type TestSheep = SheepController<FakeNav, FakePerception>;

/// Sheep with default config, not yet spawned
pub fn create_test_sheep() -> TestSheep {
    create_test_sheep_with(SheepConfig::default())
}

pub fn create_test_sheep_with(config: SheepConfig) -> TestSheep {
    SheepController::new(
        EntityId::new(TEST_ENTITY_ID),
        Arc::new(config),
        FakeNav::new(),
        FakePerception::default(),
        42,
    )
}

/// Spawned sheep in Roaming with the outbox drained
pub fn spawn_test_sheep() -> TestSheep {
    let mut sheep = create_test_sheep();
    sheep.spawn();
    sheep.drain_events();
    sheep
}

/// State changes announced in a batch of events
pub fn state_changes(events: &[SheepEvent]) -> Vec<BehaviourState> {
    events
        .iter()
        .filter_map(|e| match e {
            SheepEvent::ChangeBehaviourState { state, .. } => Some(*state),
            _ => None,
        })
        .collect()
}

/// A visible player standing in front of the sheep
pub fn player_in_front(id: u64, sheep: &TestSheep) -> Candidate {
    let nav = sheep.nav();
    Candidate::new(id, nav.position + nav.forward * 5.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_sheep() {
        let sheep = create_test_sheep();
        assert_eq!(sheep.entity_id().as_str(), TEST_ENTITY_ID);
        assert!(!sheep.is_spawned());
    }

    #[test]
    fn test_spawn_sheep() {
        let sheep = spawn_test_sheep();
        assert_eq!(sheep.state(), BehaviourState::Roaming);
        assert!(sheep.nav().destination.is_some());
    }
}
