//! Client session: routes server messages to per-object replicas.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use log::{debug, error, info, warn};
use redsheep_shared::{ClientMessage, ObjectId, PlayerId, ServerMessage, SheepConfig, SheepEvent};

use crate::host::PresentationHost;
use crate::replica::SheepReplica;

/// Every replica this peer renders, plus the session state around them
pub struct ClientSession<H, F>
where
    H: PresentationHost,
    F: FnMut(ObjectId) -> H,
{
    make_host: F,
    player_id: Option<PlayerId>,
    owner: bool,
    rejected: Option<String>,
    config: Arc<SheepConfig>,
    config_version: u32,
    replicas: BTreeMap<ObjectId, SheepReplica<H>>,
    /// Slots despawned since their last identity; stragglers for them are dropped
    despawned: HashSet<ObjectId>,
    outgoing: Vec<ClientMessage>,
}

impl<H, F> ClientSession<H, F>
where
    H: PresentationHost,
    F: FnMut(ObjectId) -> H,
{
    /// `make_host` builds the presentation host for a newly seen object
    pub fn new(make_host: F) -> Self {
        Self {
            make_host,
            player_id: None,
            owner: false,
            rejected: None,
            config: Arc::new(SheepConfig::default()),
            config_version: 0,
            replicas: BTreeMap::new(),
            despawned: HashSet::new(),
            outgoing: Vec::new(),
        }
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        self.player_id
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn rejection(&self) -> Option<&str> {
        self.rejected.as_deref()
    }

    pub fn config(&self) -> &Arc<SheepConfig> {
        &self.config
    }

    pub fn config_version(&self) -> u32 {
        self.config_version
    }

    pub fn replica(&self, object: ObjectId) -> Option<&SheepReplica<H>> {
        self.replicas.get(&object)
    }

    pub fn replica_mut(&mut self, object: ObjectId) -> Option<&mut SheepReplica<H>> {
        self.replicas.get_mut(&object)
    }

    pub fn replicas(&self) -> impl Iterator<Item = &SheepReplica<H>> {
        self.replicas.values()
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    fn replica_entry(&mut self, object: ObjectId) -> &mut SheepReplica<H> {
        let Self { replicas, make_host, owner, config, config_version, .. } = self;
        replicas.entry(object).or_insert_with(|| {
            debug!("New replica for {}", object);
            SheepReplica::new(object, make_host(object), *owner, Arc::clone(config), *config_version)
        })
    }

    pub fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Welcome { player_id, owner } => {
                self.player_id = Some(player_id);
                self.owner = owner;
                self.rejected = None;
                for replica in self.replicas.values_mut() {
                    replica.set_owner(owner);
                }
            }
            ServerMessage::JoinRejected { reason } => {
                error!("Join rejected: {}", reason);
                self.rejected = Some(reason);
            }
            ServerMessage::Sheep { object, event } => {
                if matches!(event, SheepEvent::SyncIdentity { .. } | SheepEvent::Snapshot { .. }) {
                    self.despawned.remove(&object);
                } else if self.despawned.contains(&object) {
                    debug!("Dropping {:?} event for despawned {}", event.channel(), object);
                    return;
                }
                self.replica_entry(object).handle_event(&event);
            }
            ServerMessage::EntityTransform { object, position, forward } => {
                if !self.despawned.contains(&object) {
                    self.replica_entry(object).observe_transform(position, forward);
                }
            }
            ServerMessage::EntityDespawn { object } => {
                self.despawned.insert(object);
                if self.replicas.remove(&object).is_some() {
                    info!("Replica {} despawned", object);
                }
            }
            ServerMessage::ConfigSync { version, payload } => {
                self.adopt_config(version, &payload);
            }
            ServerMessage::CommandResult { success, message } => {
                if success {
                    info!("{}", message);
                } else {
                    warn!("{}", message);
                }
            }
        }
    }

    /// A bad payload keeps the previous config
    fn adopt_config(&mut self, version: u32, payload: &[u8]) {
        match SheepConfig::from_bytes(payload) {
            Ok(config) => {
                info!("Adopted config version {}", version);
                self.config = Arc::new(config);
                self.config_version = version;
                for replica in self.replicas.values_mut() {
                    replica.set_config(Arc::clone(&self.config), version);
                }
            }
            Err(e) => {
                error!("Failed to decode config version {}: {}", version, e);
            }
        }
    }

    pub fn update(&mut self, delta: f32) {
        for replica in self.replicas.values_mut() {
            replica.update(delta);
        }
    }

    /// The animator of `object` finished an idle cycle
    pub fn on_idle_cycle_finished(&mut self, object: ObjectId) {
        if let Some(replica) = self.replicas.get_mut(&object) {
            replica.on_idle_cycle_finished();
        }
    }

    /// Queue a message that is not tied to a replica
    pub fn queue(&mut self, message: ClientMessage) {
        self.outgoing.push(message);
    }

    /// Messages for the server, in object order
    pub fn drain_outgoing(&mut self) -> Vec<ClientMessage> {
        let mut messages = std::mem::take(&mut self.outgoing);
        for replica in self.replicas.values_mut() {
            messages.extend(replica.drain_outgoing());
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::RecordingHost;
    use redsheep_shared::{BehaviourState, EntityId, SheepAck, SheepSnapshot, Vec3};

    fn session() -> ClientSession<RecordingHost, impl FnMut(ObjectId) -> RecordingHost> {
        ClientSession::new(|_| RecordingHost::default())
    }

    fn sheep(object: u32, event: SheepEvent) -> ServerMessage {
        ServerMessage::Sheep { object: ObjectId(object), event }
    }

    #[test]
    fn test_events_are_routed_by_object() {
        let mut session = session();
        session.handle_message(sheep(1, SheepEvent::SyncIdentity { entity_id: EntityId::new("a") }));
        session.handle_message(sheep(2, SheepEvent::SyncIdentity { entity_id: EntityId::new("b") }));
        session.handle_message(sheep(
            2,
            SheepEvent::ChangeBehaviourState { entity_id: EntityId::new("b"), state: BehaviourState::NormalIdle },
        ));

        assert_eq!(session.replica_count(), 2);
        assert_eq!(session.replica(ObjectId(1)).unwrap().state(), BehaviourState::Roaming);
        assert_eq!(session.replica(ObjectId(2)).unwrap().state(), BehaviourState::NormalIdle);

        session.handle_message(ServerMessage::EntityDespawn { object: ObjectId(1) });
        assert_eq!(session.replica_count(), 1);
    }

    #[test]
    fn test_stragglers_after_despawn_are_dropped() {
        let mut session = session();
        session.handle_message(sheep(1, SheepEvent::SyncIdentity { entity_id: EntityId::new("a") }));
        session.handle_message(ServerMessage::EntityDespawn { object: ObjectId(1) });

        session.handle_message(sheep(1, SheepEvent::ChangeTarget { entity_id: EntityId::new("a"), target: Some(2) }));
        session.handle_message(ServerMessage::EntityTransform {
            object: ObjectId(1),
            position: Vec3::ZERO,
            forward: Vec3::FORWARD,
        });
        assert_eq!(session.replica_count(), 0);
        assert!(session.drain_outgoing().is_empty());

        // Slot reused by a new sheep
        session.handle_message(sheep(1, SheepEvent::SyncIdentity { entity_id: EntityId::new("b") }));
        session.handle_message(sheep(1, SheepEvent::ChangeTarget { entity_id: EntityId::new("b"), target: Some(2) }));
        assert_eq!(session.replica(ObjectId(1)).unwrap().target(), Some(2));
        assert!(session.drain_outgoing().is_empty());
    }

    #[test]
    fn test_welcome_sets_ownership_on_replicas() {
        let mut session = session();
        session.handle_message(sheep(1, SheepEvent::SyncIdentity { entity_id: EntityId::new("a") }));
        session.handle_message(sheep(
            1,
            SheepEvent::ChangeBehaviourState { entity_id: EntityId::new("a"), state: BehaviourState::NormalIdle },
        ));

        session.on_idle_cycle_finished(ObjectId(1));
        assert!(session.drain_outgoing().is_empty());

        session.handle_message(ServerMessage::Welcome { player_id: 3, owner: true });
        assert_eq!(session.player_id(), Some(3));
        session.on_idle_cycle_finished(ObjectId(1));
        assert_eq!(
            session.drain_outgoing(),
            vec![ClientMessage::Sheep {
                object: ObjectId(1),
                ack: SheepAck::IdleCycleComplete { entity_id: EntityId::new("a") }
            }]
        );
    }

    #[test]
    fn test_config_sync_and_bad_payload() {
        let mut session = session();
        let mut config = SheepConfig::default();
        config.presentation.fear_strong = 0.5;
        let payload = config.to_bytes().unwrap();

        session.handle_message(ServerMessage::ConfigSync { version: 2, payload });
        assert_eq!(session.config_version(), 2);
        assert_eq!(session.config().presentation.fear_strong, 0.5);

        session.handle_message(ServerMessage::ConfigSync { version: 3, payload: vec![1, 2, 3] });
        assert_eq!(session.config_version(), 2);
        assert_eq!(session.config().presentation.fear_strong, 0.5);
    }

    #[test]
    fn test_late_joiner_snapshot_creates_synced_replica() {
        let mut session = session();
        session.handle_message(ServerMessage::EntityTransform {
            object: ObjectId(4),
            position: Vec3::new(1.0, 0.0, 1.0),
            forward: Vec3::FORWARD,
        });
        let snapshot = SheepSnapshot {
            entity_id: EntityId::new("xyz"),
            state: BehaviourState::Attacking,
            target: Some(8),
            transformed: true,
            alive: true,
            config_version: 0,
        };
        session.handle_message(sheep(4, SheepEvent::Snapshot { snapshot }));

        let replica = session.replica(ObjectId(4)).unwrap();
        assert!(replica.is_synced());
        assert_eq!(replica.target(), Some(8));
        assert_eq!(replica.position(), Vec3::new(1.0, 0.0, 1.0));
    }
}
