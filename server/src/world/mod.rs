//! Sheep world: the set of live sheep, the day clock and the player roster.

mod layout;

pub use layout::LevelLayout;

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use uuid::Uuid;

use redsheep_shared::{
    BehaviourState, EntityId, ObjectId, PlayerId, ProtocolError, ServerMessage, SheepAck, SheepConfig,
    SheepEvent, Vec3,
};

use crate::entities::SheepController;
use crate::navigation::{GridAgent, NavigationService, Obstacle};
use crate::perception::{NoiseEvent, PlayerRoster, RosterPerception};

/// Sheep as driven by the server
pub type ServerSheep = SheepController<GridAgent, RosterPerception>;

/// In-game time of day as a fraction of the day
#[derive(Debug, Clone)]
pub struct DayClock {
    elapsed: f32,
    day_length: f32,
}

impl DayClock {
    pub fn new(day_length: f32) -> Self {
        Self { elapsed: 0.0, day_length: day_length.max(1.0) }
    }

    pub fn advance(&mut self, delta: f32) {
        self.elapsed += delta;
    }

    /// 0 at dawn, 1 at the end of the day; stays at 1 afterwards
    pub fn time_of_day(&self) -> f32 {
        (self.elapsed / self.day_length).min(1.0)
    }

    pub fn set_time_of_day(&mut self, fraction: f32) {
        self.elapsed = fraction.clamp(0.0, 1.0) * self.day_length;
    }
}

/// The world containing every sheep in the level
pub struct SheepWorld {
    config: Arc<SheepConfig>,
    config_version: u32,
    layout: LevelLayout,
    obstacles: Arc<Vec<Obstacle>>,
    nodes: Arc<Vec<Vec3>>,
    roster: PlayerRoster,
    sheep: HashMap<ObjectId, ServerSheep>,
    next_object_id: u32,
    clock: DayClock,
    ai_timer: f32,
}

impl SheepWorld {
    pub fn new(config: Arc<SheepConfig>, layout: LevelLayout, roster: PlayerRoster) -> Self {
        let obstacles = Arc::new(layout.obstacles.clone());
        let nodes = Arc::new(layout.nodes.clone());
        let clock = DayClock::new(layout.day_length);
        Self {
            config,
            config_version: 1,
            layout,
            obstacles,
            nodes,
            roster,
            sheep: HashMap::new(),
            next_object_id: 1,
            clock,
            ai_timer: 0.0,
        }
    }

    pub fn config(&self) -> &Arc<SheepConfig> {
        &self.config
    }

    pub fn config_version(&self) -> u32 {
        self.config_version
    }

    pub fn roster(&self) -> &PlayerRoster {
        &self.roster
    }

    pub fn clock_mut(&mut self) -> &mut DayClock {
        &mut self.clock
    }

    pub fn time_of_day(&self) -> f32 {
        self.clock.time_of_day()
    }

    pub fn sheep(&self, object: ObjectId) -> Option<&ServerSheep> {
        self.sheep.get(&object)
    }

    pub fn sheep_mut(&mut self, object: ObjectId) -> Option<&mut ServerSheep> {
        self.sheep.get_mut(&object)
    }

    pub fn sheep_count(&self) -> usize {
        self.sheep.len()
    }

    /// Object ids in ascending order
    pub fn object_ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.sheep.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Spawn one sheep if the level's spawn weight allows it
    pub fn spawn_for_level(&mut self) -> Option<ObjectId> {
        if !self.config.enabled {
            info!("Red sheep disabled in config, not spawning");
            return None;
        }
        let weight = self.config.spawn_table().weight_for(&self.layout.name);
        if weight == 0 {
            info!("Spawn weight for '{}' is 0, not spawning", self.layout.name);
            return None;
        }
        info!("Spawn weight for '{}' is {}", self.layout.name, weight);
        Some(self.spawn_sheep(self.layout.spawn_point()))
    }

    /// Spawn a sheep at `position`
    pub fn spawn_sheep(&mut self, position: Vec3) -> ObjectId {
        let object = ObjectId(self.next_object_id);
        self.next_object_id += 1;

        let entity_id = EntityId::new(Uuid::new_v4().to_string());
        let nav = GridAgent::new(position, Arc::clone(&self.obstacles), Arc::clone(&self.nodes));
        let perception = RosterPerception::new(self.roster.clone(), Arc::clone(&self.obstacles));
        let mut sheep = SheepController::new(entity_id, Arc::clone(&self.config), nav, perception, self.layout.seed)
            .with_config_version(self.config_version);
        sheep.spawn();

        info!("Spawned sheep {} in slot {}", sheep.entity_id(), object);
        self.sheep.insert(object, sheep);
        object
    }

    /// Remove a sheep; its events stop with it
    pub fn despawn(&mut self, object: ObjectId) -> Option<ServerMessage> {
        let sheep = self.sheep.remove(&object)?;
        info!("Despawned sheep {} from slot {}", sheep.entity_id(), object);
        Some(ServerMessage::EntityDespawn { object })
    }

    /// Tick every sheep. Returns the events to broadcast.
    pub fn update(&mut self, delta: f32) -> Vec<ServerMessage> {
        self.clock.advance(delta);
        self.ai_timer += delta;
        let run_ai = self.ai_timer >= self.config.behaviour.ai_interval;
        let interval = self.ai_timer;
        let time_of_day = self.clock.time_of_day();

        for sheep in self.sheep.values_mut() {
            sheep.update(delta);
            sheep.nav_mut().step(delta);
            if run_ai {
                sheep.do_ai_interval(interval, time_of_day);
            }
        }
        if run_ai {
            self.ai_timer = 0.0;
        }

        self.drain_messages()
    }

    /// Pending sheep events wrapped for the wire, ordered by slot
    pub fn drain_messages(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        for object in self.object_ids() {
            if let Some(sheep) = self.sheep.get_mut(&object) {
                messages.extend(
                    sheep
                        .drain_events()
                        .into_iter()
                        .map(|event| ServerMessage::Sheep { object, event }),
                );
            }
        }
        messages
    }

    /// Current transform of every sheep
    pub fn transforms(&self) -> Vec<ServerMessage> {
        self.object_ids()
            .into_iter()
            .filter_map(|object| {
                let sheep = self.sheep.get(&object)?;
                Some(ServerMessage::EntityTransform {
                    object,
                    position: sheep.nav().position(),
                    forward: sheep.nav().forward(),
                })
            })
            .collect()
    }

    /// Snapshot reply for one sheep
    pub fn snapshot_message(&self, object: ObjectId) -> Option<ServerMessage> {
        let sheep = self.sheep.get(&object)?;
        Some(ServerMessage::Sheep { object, event: SheepEvent::Snapshot { snapshot: sheep.snapshot() } })
    }

    /// Snapshots of every sheep, for a peer that just joined
    pub fn all_snapshots(&self) -> Vec<ServerMessage> {
        self.object_ids()
            .into_iter()
            .filter_map(|object| self.snapshot_message(object))
            .collect()
    }

    /// Route an acknowledgement from the owner replica.
    ///
    /// Returns a reply addressed to the sender only (snapshot requests).
    pub fn handle_ack(&mut self, object: ObjectId, ack: &SheepAck) -> Option<ServerMessage> {
        if *ack == SheepAck::RequestSnapshot {
            debug!("Snapshot requested for slot {}", object);
            return self.snapshot_message(object);
        }
        match self.sheep.get_mut(&object) {
            Some(sheep) => {
                sheep.handle_ack(ack);
            }
            None => warn!("Ack for empty slot {}: {:?}", object, ack),
        }
        None
    }

    /// A player struck a sheep
    pub fn hit_sheep(&mut self, object: ObjectId, force: i32, attacker: Option<PlayerId>) {
        match self.sheep.get_mut(&object) {
            Some(sheep) => sheep.hit(force, attacker),
            None => warn!("Hit for empty slot {}", object),
        }
    }

    /// Every sheep hears the noise
    pub fn broadcast_noise(&mut self, noise: &NoiseEvent) {
        for sheep in self.sheep.values_mut() {
            sheep.detect_noise(noise);
        }
    }

    /// Replace the live config; new spawns use it, running sheep keep theirs
    pub fn set_config(&mut self, config: SheepConfig) {
        self.config = Arc::new(config);
        self.config_version += 1;
        info!("Config updated to version {}", self.config_version);
    }

    /// Versioned config snapshot for replicas
    pub fn config_sync(&self) -> Result<ServerMessage, ProtocolError> {
        let sync = ServerMessage::ConfigSync {
            version: self.config_version,
            payload: self.config.to_bytes()?,
        };
        // Fail here rather than in the send loop
        sync.serialize()?;
        Ok(sync)
    }

    /// Number of sheep in `state`
    pub fn count_in_state(&self, state: BehaviourState) -> usize {
        self.sheep.values().filter(|s| s.state() == state).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::Candidate;

    fn test_world() -> SheepWorld {
        SheepWorld::new(Arc::new(SheepConfig::default()), LevelLayout::fallback(), PlayerRoster::new())
    }

    #[test]
    fn test_day_clock() {
        let mut clock = DayClock::new(100.0);
        clock.advance(25.0);
        assert!((clock.time_of_day() - 0.25).abs() < 1e-6);
        clock.advance(500.0);
        assert_eq!(clock.time_of_day(), 1.0);
        clock.set_time_of_day(0.5);
        assert!((clock.time_of_day() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_spawn_broadcasts_identity_first() {
        let mut world = test_world();
        let object = world.spawn_for_level().expect("default weights spawn everywhere");
        let messages = world.drain_messages();

        let ServerMessage::Sheep { object: first_object, event: SheepEvent::SyncIdentity { entity_id } } = &messages[0]
        else {
            panic!("expected identity sync first, got {:?}", messages[0]);
        };
        assert_eq!(*first_object, object);
        assert_eq!(entity_id, world.sheep(object).unwrap().entity_id());
        assert!(Uuid::parse_str(entity_id.as_str()).is_ok());
    }

    #[test]
    fn test_disabled_or_unweighted_level_does_not_spawn() {
        let mut config = SheepConfig::default();
        config.enabled = false;
        let mut world = SheepWorld::new(Arc::new(config), LevelLayout::fallback(), PlayerRoster::new());
        assert_eq!(world.spawn_for_level(), None);

        let mut config = SheepConfig::default();
        config.spawn_weights = "RendLevel:50".into();
        let mut world = SheepWorld::new(Arc::new(config), LevelLayout::fallback(), PlayerRoster::new());
        assert_eq!(world.spawn_for_level(), None);
        assert_eq!(world.sheep_count(), 0);
    }

    #[test]
    fn test_snapshot_request_answered_from_current_state() {
        let mut world = test_world();
        let object = world.spawn_sheep(Vec3::new(20.0, 0.0, 0.0));
        world.drain_messages();
        world.sheep_mut(object).unwrap().switch_state(BehaviourState::NormalIdle);

        let reply = world.handle_ack(object, &SheepAck::RequestSnapshot).unwrap();
        let ServerMessage::Sheep { event: SheepEvent::Snapshot { snapshot }, .. } = reply else {
            panic!("expected a snapshot");
        };
        assert_eq!(snapshot.state, BehaviourState::NormalIdle);
        assert_eq!(world.handle_ack(ObjectId(99), &SheepAck::RequestSnapshot), None);
    }

    #[test]
    fn test_night_transforms_every_sheep() {
        let mut world = test_world();
        world.spawn_sheep(Vec3::new(20.0, 0.0, 0.0));
        world.spawn_sheep(Vec3::new(-20.0, 0.0, 0.0));
        world.drain_messages();

        world.clock_mut().set_time_of_day(0.8);
        let messages = world.update(0.25);

        assert_eq!(world.count_in_state(BehaviourState::Transforming), 2);
        let starts = messages
            .iter()
            .filter(|m| matches!(m, ServerMessage::Sheep { event: SheepEvent::StartTransformation { .. }, .. }))
            .count();
        assert_eq!(starts, 2);
    }

    #[test]
    fn test_hit_and_despawn() {
        let mut world = test_world();
        let object = world.spawn_sheep(Vec3::new(20.0, 0.0, 0.0));
        world.roster().upsert(Candidate::new(3, Vec3::new(25.0, 0.0, 0.0)));

        world.hit_sheep(object, 100, Some(3));
        assert_eq!(world.sheep(object).unwrap().state(), BehaviourState::Dead);

        assert_eq!(world.despawn(object), Some(ServerMessage::EntityDespawn { object }));
        assert!(world.sheep(object).is_none());
        assert!(world.drain_messages().is_empty());
    }

    #[test]
    fn test_roaming_sheep_moves() {
        let mut world = test_world();
        let object = world.spawn_sheep(Vec3::new(20.0, 0.0, 0.0));
        let start = world.sheep(object).unwrap().nav().position();

        for _ in 0..90 {
            world.update(1.0 / 30.0);
        }
        let moved = world.sheep(object).unwrap().nav().position();
        assert!(start.distance_to(moved) > 0.1);
        assert_eq!(world.transforms().len(), 1);
    }

    #[test]
    fn test_config_sync_is_versioned() {
        let mut world = test_world();
        let mut config = SheepConfig::default();
        config.annoyance.threshold = 3.0;
        world.set_config(config.clone());

        let ServerMessage::ConfigSync { version, payload } = world.config_sync().unwrap() else {
            panic!("expected config sync");
        };
        assert_eq!(version, 2);
        assert_eq!(SheepConfig::from_bytes(&payload).unwrap(), config);
    }
}
