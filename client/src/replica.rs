//! Presentation replica of one sheep.
//!
//! Mirrors identity, state and target from authoritative events and drives
//! the host's animator. Never decides anything: the only things it sends
//! back are acknowledgements and a snapshot request.

use std::sync::Arc;

use log::{debug, info, warn};
use redsheep_shared::animation;
use redsheep_shared::math::lerp;
use redsheep_shared::{
    BehaviourState, ClientMessage, EntityId, ObjectId, PlayerId, SheepAck, SheepConfig, SheepEvent, SheepSnapshot,
    Vec3,
};

use crate::fear::{self, FearResponse};
use crate::host::{Effect, PresentationHost, Rig};
use crate::transformation::{SequenceAction, TransformationSequence};

/// Client-side mirror of one sheep
pub struct SheepReplica<H: PresentationHost> {
    object: ObjectId,
    host: H,
    owner: bool,

    entity_id: Option<EntityId>,
    state: BehaviourState,
    target: Option<PlayerId>,
    transformed: bool,
    dead: bool,

    config: Arc<SheepConfig>,
    config_version: u32,
    config_requested: bool,
    snapshot_requested: bool,

    position: Vec3,
    forward: Vec3,
    sampled_position: Option<Vec3>,
    speed: f32,

    sequence: TransformationSequence,
    outgoing: Vec<ClientMessage>,
}

impl<H: PresentationHost> SheepReplica<H> {
    pub fn new(object: ObjectId, host: H, owner: bool, config: Arc<SheepConfig>, config_version: u32) -> Self {
        let sequence = TransformationSequence::new(&config.presentation);
        Self {
            object,
            host,
            owner,
            entity_id: None,
            state: BehaviourState::Roaming,
            target: None,
            transformed: false,
            dead: false,
            config,
            config_version,
            config_requested: false,
            snapshot_requested: false,
            position: Vec3::ZERO,
            forward: Vec3::FORWARD,
            sampled_position: None,
            speed: 0.0,
            sequence,
            outgoing: Vec::new(),
        }
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn entity_id(&self) -> Option<&EntityId> {
        self.entity_id.as_ref()
    }

    pub fn is_synced(&self) -> bool {
        self.entity_id.is_some()
    }

    pub fn state(&self) -> BehaviourState {
        self.state
    }

    pub fn target(&self) -> Option<PlayerId> {
        self.target
    }

    pub fn is_transformed(&self) -> bool {
        self.transformed
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn is_transforming(&self) -> bool {
        self.sequence.is_running()
    }

    /// Smoothed speed estimated from observed positions
    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn config_version(&self) -> u32 {
        self.config_version
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn set_owner(&mut self, owner: bool) {
        if self.owner != owner {
            debug!("[REPLICA {}] Owner: {}", self.object, owner);
        }
        self.owner = owner;
    }

    /// Adopt a synced config. A running transformation keeps its timings.
    pub fn set_config(&mut self, config: Arc<SheepConfig>, version: u32) {
        self.config = config;
        self.config_version = version;
        self.config_requested = false;
    }

    /// Messages for the server
    pub fn drain_outgoing(&mut self) -> Vec<ClientMessage> {
        std::mem::take(&mut self.outgoing)
    }

    // ========================================================================
    // Inbound events
    // ========================================================================

    pub fn handle_event(&mut self, event: &SheepEvent) {
        match event {
            SheepEvent::SyncIdentity { entity_id } => {
                self.sync_identity(entity_id);
                return;
            }
            SheepEvent::Snapshot { snapshot } => {
                self.apply_snapshot(snapshot);
                return;
            }
            _ => {}
        }

        if self.entity_id.as_ref() != Some(event.entity_id()) {
            self.drop_unsynced(event);
            return;
        }

        match event {
            SheepEvent::InitializeConfig { config_version, .. } => {
                if *config_version > self.config_version && !self.config_requested {
                    info!(
                        "[REPLICA {}] Config version {} is newer than {}, requesting sync",
                        self.object, config_version, self.config_version
                    );
                    self.config_requested = true;
                    self.outgoing.push(ClientMessage::RequestConfigSync);
                }
            }
            SheepEvent::ChangeBehaviourState { state, .. } => {
                debug!("[REPLICA {}] State {:?} -> {:?}", self.object, self.state, state);
                self.state = *state;
                if state.is_transformed() && !self.transformed {
                    // Transformation ran without us, e.g. the failsafe
                    info!("[REPLICA {}] Already transformed, swapping rig", self.object);
                    self.sequence.cancel();
                    self.transformed = true;
                    self.host.activate_rig(Rig::Transformed);
                }
            }
            SheepEvent::ChangeTarget { target, .. } => {
                self.target = *target;
            }
            SheepEvent::DoAnimation { param, .. } => {
                self.host.set_trigger(*param);
            }
            SheepEvent::SetAnimationBool { param, value, .. } => {
                self.host.set_bool(*param, *value);
            }
            SheepEvent::EnterDeathState { .. } => {
                info!("[REPLICA {}] Died", self.object);
                self.dead = true;
                self.sequence.cancel();
                self.host.set_bool(animation::WALKING, false);
                self.host.set_trigger(animation::DEAD);
            }
            SheepEvent::StartTransformation { .. } => {
                self.start_transformation();
            }
            SheepEvent::IncreaseFear { .. } => {
                self.scare_local_player();
            }
            SheepEvent::SyncIdentity { .. } | SheepEvent::Snapshot { .. } => {}
        }
    }

    fn sync_identity(&mut self, entity_id: &EntityId) {
        if self.entity_id.as_ref() == Some(entity_id) {
            debug!("[REPLICA {}] Identity {} already synced", self.object, entity_id);
            return;
        }
        info!("[REPLICA {}] Synced identity {}", self.object, entity_id);
        self.entity_id = Some(entity_id.clone());
        self.snapshot_requested = false;

        // New behaviour lifetime in this slot
        self.state = BehaviourState::Roaming;
        self.target = None;
        self.dead = false;
        self.transformed = false;
        self.sequence.cancel();
        self.host.activate_rig(Rig::Sheep);
    }

    fn apply_snapshot(&mut self, snapshot: &SheepSnapshot) {
        info!(
            "[REPLICA {}] Snapshot {} {:?} target={:?}",
            self.object, snapshot.entity_id, snapshot.state, snapshot.target
        );
        self.entity_id = Some(snapshot.entity_id.clone());
        self.snapshot_requested = false;
        self.state = snapshot.state;
        self.target = snapshot.target;
        self.transformed = snapshot.transformed;
        self.dead = !snapshot.alive;
        self.sequence.cancel();

        self.host.activate_rig(if self.transformed { Rig::Transformed } else { Rig::Sheep });
        let walking = matches!(
            snapshot.state,
            BehaviourState::Roaming
                | BehaviourState::SearchingForPlayers
                | BehaviourState::InvestigatingTargetPosition
                | BehaviourState::Attacking
        );
        self.host.set_bool(animation::WALKING, walking);

        if self.dead {
            self.host.set_trigger(animation::DEAD);
        } else if snapshot.state == BehaviourState::Transforming && !snapshot.transformed {
            // The server waits on this sequence; run it locally
            self.start_transformation();
        }

        if snapshot.config_version > self.config_version && !self.config_requested {
            self.config_requested = true;
            self.outgoing.push(ClientMessage::RequestConfigSync);
        }
    }

    /// Events for an identity this replica does not hold are dropped. The
    /// first drop asks for a snapshot.
    fn drop_unsynced(&mut self, event: &SheepEvent) {
        debug!(
            "[REPLICA {}] Dropping {:?} event for unsynced identity {}",
            self.object,
            event.channel(),
            event.entity_id()
        );
        if !self.snapshot_requested {
            warn!("[REPLICA {}] Out of sync, requesting snapshot", self.object);
            self.snapshot_requested = true;
            self.outgoing.push(ClientMessage::Sheep { object: self.object, ack: SheepAck::RequestSnapshot });
        }
    }

    /// Ask for the current state, e.g. after joining late
    pub fn request_snapshot(&mut self) {
        if self.snapshot_requested {
            return;
        }
        self.snapshot_requested = true;
        self.outgoing.push(ClientMessage::Sheep { object: self.object, ack: SheepAck::RequestSnapshot });
    }

    fn start_transformation(&mut self) {
        if self.sequence.is_running() {
            debug!("[REPLICA {}] Transformation already running", self.object);
            return;
        }
        self.sequence = TransformationSequence::new(&self.config.presentation);
        if let Some(actions) = self.sequence.start() {
            info!("[REPLICA {}] Transformation started", self.object);
            self.apply_sequence(actions);
        }
    }

    fn apply_sequence(&mut self, actions: Vec<SequenceAction>) {
        for action in actions {
            match action {
                SequenceAction::Trigger(param) => self.host.set_trigger(param),
                SequenceAction::FogStart => self.host.play_effect(Effect::FogStart),
                SequenceAction::SwapRig => {
                    self.transformed = true;
                    self.host.activate_rig(Rig::Transformed);
                }
                SequenceAction::FogEnd => self.host.play_effect(Effect::FogEnd),
                SequenceAction::Complete => {
                    info!("[REPLICA {}] Transformation complete", self.object);
                    if !self.owner {
                        continue;
                    }
                    if let Some(entity_id) = self.entity_id.clone() {
                        self.outgoing.push(ClientMessage::Sheep {
                            object: self.object,
                            ack: SheepAck::TransformationComplete { entity_id },
                        });
                    }
                }
            }
        }
    }

    fn scare_local_player(&mut self) {
        let Some(observer) = self.host.local_observer() else {
            return;
        };
        let occluded = self.host.occluded(observer.position, self.position);
        let response = fear::assess(&observer, self.position, occluded, &self.config.presentation);
        if response != FearResponse::None {
            debug!("[REPLICA {}] Local player fear {:?}", self.object, response);
            self.host.increase_fear(response.amount(&self.config.presentation));
        }
    }

    // ========================================================================
    // Local inputs
    // ========================================================================

    /// Rendered transform from the server
    pub fn observe_transform(&mut self, position: Vec3, forward: Vec3) {
        self.position = position;
        self.forward = forward;
    }

    pub fn forward(&self) -> Vec3 {
        self.forward
    }

    /// The host's animator finished one idle cycle
    pub fn on_idle_cycle_finished(&mut self) {
        if !self.owner || !self.state.is_idle() {
            return;
        }
        if let Some(entity_id) = self.entity_id.clone() {
            self.outgoing.push(ClientMessage::Sheep {
                object: self.object,
                ack: SheepAck::IdleCycleComplete { entity_id },
            });
        }
    }

    /// Per-frame update: speed estimate and the transformation timers
    pub fn update(&mut self, delta: f32) {
        if delta > 0.0 {
            if let Some(previous) = self.sampled_position {
                let raw = previous.distance_to(self.position) / delta;
                let t = self.config.presentation.speed_smoothing * delta;
                self.speed = lerp(self.speed, raw, t);
                self.host.set_float(animation::WALK_SPEED, self.speed);
            }
            self.sampled_position = Some(self.position);
        }

        let actions = self.sequence.advance(delta);
        if !actions.is_empty() {
            self.apply_sequence(actions);
        }
    }
}
