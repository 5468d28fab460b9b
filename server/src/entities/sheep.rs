//! Authoritative behaviour controller for the red sheep.
//!
//! The controller owns the state machine, the annoyance meter and movement
//! smoothing. Everything replicas need to know leaves through an ordered
//! outbox of [`SheepEvent`]s that the world drains once per tick.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use redsheep_shared::animation::{self, AnimParam, IDLE_ANIMATIONS};
use redsheep_shared::config::MovementProfile;
use redsheep_shared::{
    BehaviourState, Channel, EntityId, PlayerId, SheepAck, SheepConfig, SheepEvent, SheepSnapshot,
    Vec3,
};

use super::annoyance::{proximity_contribution, AnnoyanceMeter};
use super::movement::MovementSmoother;
use crate::navigation::NavigationService;
use crate::perception::{Candidate, NoiseEvent, PerceptionService, ViewCone, EYE_HEIGHT};

/// Progress of the expanding search pattern
#[derive(Debug, Clone, Default)]
struct SearchProgress {
    center: Vec3,
    radius: f32,
    elapsed: f32,
    /// Set once the search has timed out and the sheep heads somewhere to rest
    fallback: Option<Vec3>,
}

/// Server-side red sheep
pub struct SheepController<N: NavigationService, P: PerceptionService> {
    id: EntityId,
    config: Arc<SheepConfig>,
    config_version: u32,
    nav: N,
    perception: P,
    rng: StdRng,

    spawned: bool,
    state: BehaviourState,
    previous_state: Option<BehaviourState>,
    target: Option<PlayerId>,
    last_known_target_position: Option<Vec3>,
    health: i32,
    transformed: bool,

    annoyance: AnnoyanceMeter,
    movement: MovementSmoother,
    idle_cycles_left: i32,
    search: SearchProgress,
    transformation_elapsed: f32,
    damage_cooldown: f32,
    attack_cooldown: f32,
    fear_timer: f32,

    outbox: VecDeque<SheepEvent>,
}

impl<N: NavigationService, P: PerceptionService> SheepController<N, P> {
    pub fn new(id: EntityId, config: Arc<SheepConfig>, nav: N, perception: P, seed: u64) -> Self {
        let rng = StdRng::seed_from_u64(seed ^ entity_hash(&id));
        let health = config.behaviour.max_health;
        Self {
            id,
            config,
            config_version: 1,
            nav,
            perception,
            rng,
            spawned: false,
            state: BehaviourState::Roaming,
            previous_state: None,
            target: None,
            last_known_target_position: None,
            health,
            transformed: false,
            annoyance: AnnoyanceMeter::new(),
            movement: MovementSmoother::default(),
            idle_cycles_left: 0,
            search: SearchProgress::default(),
            transformation_elapsed: 0.0,
            damage_cooldown: 0.0,
            attack_cooldown: 0.0,
            fear_timer: 0.0,
            outbox: VecDeque::new(),
        }
    }

    /// Version of the config this sheep was built with, announced at spawn
    pub fn with_config_version(mut self, version: u32) -> Self {
        self.config_version = version;
        self
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.id
    }

    pub fn state(&self) -> BehaviourState {
        self.state
    }

    pub fn previous_state(&self) -> Option<BehaviourState> {
        self.previous_state
    }

    pub fn target(&self) -> Option<PlayerId> {
        self.target
    }

    pub fn health(&self) -> i32 {
        self.health
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0 && self.state != BehaviourState::Dead
    }

    pub fn is_spawned(&self) -> bool {
        self.spawned
    }

    pub fn is_transformed(&self) -> bool {
        self.transformed
    }

    pub fn annoyance(&self) -> &AnnoyanceMeter {
        &self.annoyance
    }

    pub fn idle_cycles_left(&self) -> i32 {
        self.idle_cycles_left
    }

    pub fn nav(&self) -> &N {
        &self.nav
    }

    pub fn nav_mut(&mut self) -> &mut N {
        &mut self.nav
    }

    pub fn perception_mut(&mut self) -> &mut P {
        &mut self.perception
    }

    /// Take every pending event in broadcast order
    pub fn drain_events(&mut self) -> Vec<SheepEvent> {
        self.outbox.drain(..).collect()
    }

    /// Current authoritative state for a late joiner
    pub fn snapshot(&self) -> SheepSnapshot {
        SheepSnapshot {
            entity_id: self.id.clone(),
            state: self.state,
            target: self.target,
            transformed: self.transformed,
            alive: self.is_alive(),
            config_version: self.config_version,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Announce the identity and start roaming
    pub fn spawn(&mut self) {
        if self.spawned {
            warn!("[SHEEP {}] Spawn called twice", self.id);
            return;
        }
        self.spawned = true;
        info!("[SHEEP {}] Spawned at {:?}", self.id, self.nav.position());

        self.emit(SheepEvent::SyncIdentity { entity_id: self.id.clone() });
        self.emit(SheepEvent::InitializeConfig {
            entity_id: self.id.clone(),
            config_version: self.config_version,
        });

        self.annoyance.reset();
        self.enter_state(BehaviourState::Roaming);
    }

    /// Per-tick update: timers and movement smoothing
    pub fn update(&mut self, delta: f32) {
        if !self.spawned {
            return;
        }
        self.damage_cooldown = (self.damage_cooldown - delta).max(0.0);
        self.attack_cooldown = (self.attack_cooldown - delta).max(0.0);
        self.annoyance.tick(delta);

        if self.state == BehaviourState::Dead {
            return;
        }
        self.movement.update(delta, &mut self.nav);
    }

    /// Decision interval: evaluate the guards of the current state
    pub fn do_ai_interval(&mut self, delta: f32, time_of_day: f32) {
        if !self.spawned || self.state == BehaviourState::Dead {
            return;
        }
        let config = Arc::clone(&self.config);
        let behaviour = &config.behaviour;
        self.annoyance.decay(config.annoyance.decay_rate, delta);

        match self.state {
            BehaviourState::Roaming | BehaviourState::NormalIdle => {
                let nearby = self.perception.candidates();
                let added = proximity_contribution(&nearby, self.nav.position(), &config.annoyance);
                self.annoyance.add(added);

                if self.annoyance.crossed(config.annoyance.threshold) {
                    info!("[SHEEP {}] Annoyed enough to transform ({:.2})", self.id, self.annoyance.level());
                    self.switch_state(BehaviourState::Transforming);
                    return;
                }
                if time_of_day >= behaviour.transform_time_of_day {
                    info!("[SHEEP {}] Night has come ({:.2}), transforming", self.id, time_of_day);
                    self.switch_state(BehaviourState::Transforming);
                    return;
                }
                if self.state == BehaviourState::Roaming && self.reached_destination() {
                    self.switch_state(BehaviourState::NormalIdle);
                }
            }

            BehaviourState::Transforming => {
                self.transformation_elapsed += delta;
                if self.transformation_elapsed >= behaviour.transformation_timeout {
                    warn!(
                        "[SHEEP {}] No transformation ack after {:.1}s, continuing without it",
                        self.id, self.transformation_elapsed
                    );
                    self.transformed = true;
                    self.switch_state(BehaviourState::SearchingForPlayers);
                }
            }

            BehaviourState::TransformedIdle => {
                self.attack_if_visible();
            }

            BehaviourState::SearchingForPlayers => {
                if self.attack_if_visible() {
                    return;
                }
                self.continue_search(delta);
            }

            BehaviourState::InvestigatingTargetPosition => {
                if self.attack_if_visible() {
                    return;
                }
                if self.reached_destination() {
                    debug!("[SHEEP {}] Nothing found at the investigated position", self.id);
                    self.switch_state(BehaviourState::SearchingForPlayers);
                }
            }

            BehaviourState::Attacking => {
                self.continue_attack(delta);
            }

            BehaviourState::Dead => {}
        }
    }

    // ========================================================================
    // State Machine
    // ========================================================================

    /// Switch to `state`; returns false when nothing changed
    pub fn switch_state(&mut self, state: BehaviourState) -> bool {
        if !self.spawned || self.state == state || self.state == BehaviourState::Dead {
            return false;
        }
        self.enter_state(state);
        true
    }

    /// Switch by wire value; unknown values are ignored
    pub fn switch_state_by_index(&mut self, index: u8) -> bool {
        match BehaviourState::from_u8(index) {
            Some(state) => self.switch_state(state),
            None => {
                warn!("[SHEEP {}] Ignoring switch to unknown state {}", self.id, index);
                false
            }
        }
    }

    fn enter_state(&mut self, state: BehaviourState) {
        let previous = self.state;
        debug!("[SHEEP {}] Switching {:?} -> {:?}", self.id, previous, state);
        self.previous_state = Some(previous);
        self.state = state;

        if state.is_annoyance_sensitive() && !previous.is_annoyance_sensitive() {
            self.annoyance.reset();
        }

        let redirect = self.initialize_state(state);

        let change = SheepEvent::ChangeBehaviourState { entity_id: self.id.clone(), state };
        if state == BehaviourState::Dead {
            let death = SheepEvent::EnterDeathState { entity_id: self.id.clone() };
            self.emit_ahead_of_pending([death, change]);
        } else {
            self.emit(change);
        }

        if let Some(next) = redirect {
            self.switch_state(next);
        }
    }

    /// Entry actions for `state`. Returns a state to fall through to when
    /// entry is impossible.
    fn initialize_state(&mut self, state: BehaviourState) -> Option<BehaviourState> {
        let config = Arc::clone(&self.config);
        let behaviour = &config.behaviour;
        match state {
            BehaviourState::Roaming => {
                self.apply_profile(behaviour.roaming);
                self.nav.set_moving(true);
                if !self.go_to_far_away_node() {
                    warn!("[SHEEP {}] Nowhere to roam to, idling instead", self.id);
                    return Some(BehaviourState::NormalIdle);
                }
                self.set_bool(animation::WALKING, true);
            }

            BehaviourState::NormalIdle | BehaviourState::TransformedIdle => {
                self.apply_profile(behaviour.idle);
                self.movement.halt(&mut self.nav);
                self.nav.set_moving(false);
                self.idle_cycles_left = self.sample_idle_cycles();
                debug!("[SHEEP {}] Idling for {} cycles", self.id, self.idle_cycles_left);
                self.set_bool(animation::WALKING, false);
                self.pick_random_idle_animation();
            }

            BehaviourState::Transforming => {
                self.movement.halt(&mut self.nav);
                self.nav.set_moving(false);
                self.transformation_elapsed = 0.0;
                self.set_bool(animation::WALKING, false);
                self.emit(SheepEvent::StartTransformation { entity_id: self.id.clone() });
            }

            BehaviourState::SearchingForPlayers => {
                self.apply_profile(behaviour.searching);
                self.nav.set_moving(true);
                self.change_target(None);
                self.search = SearchProgress {
                    center: self.nav.position(),
                    radius: behaviour.search_radius,
                    elapsed: 0.0,
                    fallback: None,
                };
                self.set_bool(animation::WALKING, true);
                self.pick_search_point();
            }

            BehaviourState::InvestigatingTargetPosition => {
                self.apply_profile(behaviour.investigating);
                self.nav.set_moving(true);
                let reachable = self
                    .last_known_target_position
                    .is_some_and(|position| self.nav.set_destination(position));
                if !reachable {
                    warn!("[SHEEP {}] Cannot investigate {:?}", self.id, self.last_known_target_position);
                    return Some(BehaviourState::SearchingForPlayers);
                }
                self.set_bool(animation::WALKING, true);
            }

            BehaviourState::Attacking => {
                self.apply_profile(behaviour.attacking);
                self.nav.set_moving(true);
                if let Some(position) = self.target_candidate().map(|c| c.position) {
                    self.last_known_target_position = Some(position);
                    self.chase(position);
                }
                self.set_bool(animation::WALKING, true);
                self.fear_timer = behaviour.fear_interval;
                self.emit(SheepEvent::IncreaseFear { entity_id: self.id.clone() });
            }

            BehaviourState::Dead => {
                self.movement.halt(&mut self.nav);
                self.nav.set_moving(false);
                info!("[SHEEP {}] Died", self.id);
            }
        }
        None
    }

    // ========================================================================
    // Inputs
    // ========================================================================

    /// Set the target; returns false if it was already the target
    pub fn change_target(&mut self, target: Option<PlayerId>) -> bool {
        if self.target == target {
            return false;
        }
        debug!("[SHEEP {}] Target {:?} -> {:?}", self.id, self.target, target);
        self.target = target;
        self.emit(SheepEvent::ChangeTarget { entity_id: self.id.clone(), target });
        true
    }

    /// Apply damage from an optional attacker
    pub fn hit(&mut self, force: i32, attacker: Option<PlayerId>) {
        if !self.spawned || self.state == BehaviourState::Dead {
            return;
        }
        if self.damage_cooldown > 0.0 {
            debug!("[SHEEP {}] Hit ignored during damage cooldown", self.id);
            return;
        }
        self.damage_cooldown = self.config.behaviour.damage_cooldown;
        self.health -= force;
        info!("[SHEEP {}] Hit for {} (health {})", self.id, force, self.health);

        if self.health <= 0 {
            self.switch_state(BehaviourState::Dead);
            return;
        }

        match self.state {
            BehaviourState::Roaming | BehaviourState::NormalIdle => {
                self.switch_state(BehaviourState::Transforming);
            }
            BehaviourState::Transforming => {}
            state if state.is_transformed() => {
                if let Some(attacker) = attacker {
                    self.change_target(Some(attacker));
                    if let Some(position) = self.target_candidate().map(|c| c.position) {
                        self.last_known_target_position = Some(position);
                        if state == BehaviourState::Attacking {
                            self.chase(position);
                        }
                    }
                }
                self.switch_state(BehaviourState::Attacking);
            }
            _ => {}
        }
    }

    pub fn set_stunned(&mut self, seconds: f32) {
        debug!("[SHEEP {}] Stunned for {:.1}s", self.id, seconds);
        self.movement.stun(seconds);
    }

    pub fn is_stunned(&self) -> bool {
        self.movement.is_stunned()
    }

    /// Feed a noise to the annoyance meter
    pub fn detect_noise(&mut self, noise: &NoiseEvent) {
        if !self.spawned || !self.state.is_annoyance_sensitive() {
            return;
        }
        let eye = self.eye_position();
        let occluded = self.perception.occluded(eye, noise.position);
        self.annoyance.hear(noise, eye, occluded, self.is_stunned(), &self.config.noise);
    }

    /// Handle an acknowledgement from the owner replica. Returns whether it
    /// was accepted.
    pub fn handle_ack(&mut self, ack: &SheepAck) -> bool {
        match ack {
            SheepAck::IdleCycleComplete { entity_id } => {
                if *entity_id != self.id || !self.state.is_idle() {
                    debug!("[SHEEP {}] Discarding stale idle ack for {} in {:?}", self.id, entity_id, self.state);
                    return false;
                }
                self.idle_cycles_left -= 1;
                debug!("[SHEEP {}] {} idle cycles left", self.id, self.idle_cycles_left);
                if self.idle_cycles_left <= 0 {
                    let next = if self.state == BehaviourState::NormalIdle {
                        BehaviourState::Roaming
                    } else {
                        BehaviourState::SearchingForPlayers
                    };
                    self.switch_state(next);
                } else {
                    self.pick_random_idle_animation();
                }
                true
            }
            SheepAck::TransformationComplete { entity_id } => {
                if *entity_id != self.id || self.state != BehaviourState::Transforming {
                    debug!("[SHEEP {}] Discarding stale transformation ack for {}", self.id, entity_id);
                    return false;
                }
                self.transformed = true;
                self.switch_state(BehaviourState::SearchingForPlayers);
                true
            }
            SheepAck::RequestSnapshot => false,
        }
    }

    // ========================================================================
    // Behaviour Helpers
    // ========================================================================

    fn view(&self) -> ViewCone {
        let behaviour = &self.config.behaviour;
        ViewCone {
            angle: behaviour.view_width,
            range: behaviour.view_range,
            proximity_awareness: behaviour.proximity_awareness,
            precision_samples: behaviour.sight_samples,
            tolerance: behaviour.sight_tolerance,
        }
    }

    fn eye_position(&self) -> Vec3 {
        self.nav.position() + Vec3::new(0.0, EYE_HEIGHT, 0.0)
    }

    fn closest_visible(&self) -> Option<Candidate> {
        self.perception
            .closest_visible_candidate(self.eye_position(), self.nav.forward(), &self.view())
    }

    fn target_candidate(&self) -> Option<Candidate> {
        let target = self.target?;
        self.perception.candidates().into_iter().find(|c| c.id == target)
    }

    fn can_see(&self, candidate: &Candidate) -> bool {
        candidate.is_targetable()
            && self.perception.line_of_sight(
                self.eye_position(),
                self.nav.forward(),
                candidate.position + Vec3::new(0.0, EYE_HEIGHT, 0.0),
                &self.view(),
            )
    }

    /// Lock onto the closest visible player, if any
    fn attack_if_visible(&mut self) -> bool {
        let Some(seen) = self.closest_visible() else {
            return false;
        };
        info!("[SHEEP {}] Spotted player {}", self.id, seen.id);
        self.change_target(Some(seen.id));
        self.last_known_target_position = Some(seen.position);
        self.switch_state(BehaviourState::Attacking);
        true
    }

    fn continue_attack(&mut self, delta: f32) {
        let tracked = self.target_candidate().filter(|c| self.can_see(c));
        let target = match tracked.or_else(|| self.closest_visible()) {
            Some(candidate) => candidate,
            None => {
                debug!("[SHEEP {}] Lost sight of {:?}", self.id, self.target);
                self.switch_state(BehaviourState::InvestigatingTargetPosition);
                return;
            }
        };

        self.change_target(Some(target.id));
        self.last_known_target_position = Some(target.position);
        self.chase(target.position);

        let config = Arc::clone(&self.config);
        if self.nav.distance_to(target.position) <= config.behaviour.attack_range && self.attack_cooldown <= 0.0 {
            self.attack_cooldown = config.behaviour.attack_cooldown;
            self.trigger(animation::ATTACK);
        }

        self.fear_timer -= delta;
        if self.fear_timer <= 0.0 {
            self.fear_timer = config.behaviour.fear_interval;
            self.emit(SheepEvent::IncreaseFear { entity_id: self.id.clone() });
        }
    }

    fn continue_search(&mut self, delta: f32) {
        let config = Arc::clone(&self.config);
        self.search.elapsed += delta;

        if self.search.elapsed >= config.behaviour.search_timeout {
            if self.search.fallback.is_none() {
                debug!("[SHEEP {}] Search timed out, heading somewhere to rest", self.id);
                if !self.go_to_far_away_node() {
                    self.switch_state(BehaviourState::TransformedIdle);
                    return;
                }
                self.search.fallback = self.nav.destination();
            }
            if self.reached_destination() {
                self.switch_state(BehaviourState::TransformedIdle);
            }
            return;
        }

        if self.nav.destination().is_none() || self.reached_destination() {
            let behaviour = &config.behaviour;
            self.search.radius = (self.search.radius + behaviour.search_radius_growth).min(behaviour.max_search_radius);
            self.pick_search_point();
        }
    }

    fn pick_search_point(&mut self) {
        let point = self
            .nav
            .random_point_in_radius(self.search.center, self.search.radius, &mut self.rng);
        match point {
            Some(point) if self.nav.set_destination(point) => {
                debug!("[SHEEP {}] Searching around {:?} (r={:.1})", self.id, point, self.search.radius);
            }
            _ => {
                warn!("[SHEEP {}] No search point within {:.1}", self.id, self.search.radius);
                if !self.go_to_far_away_node() {
                    warn!("[SHEEP {}] Search has nowhere to go", self.id);
                }
            }
        }
    }

    fn chase(&mut self, position: Vec3) {
        if self.nav.set_destination(position) {
            return;
        }
        let closest = self.nav.closest_point_to(position);
        if !closest.is_some_and(|node| self.nav.set_destination(node)) {
            warn!("[SHEEP {}] Cannot path toward {:?}", self.id, position);
        }
    }

    /// Head for one of the farthest nodes within the roaming radius,
    /// falling back to the closest one
    fn go_to_far_away_node(&mut self) -> bool {
        let origin = self.nav.position();
        let max_offset = (self.nav.node_count() / 10).max(1);
        let offset = self.rng.gen_range(0..max_offset);
        let radius = self.config.behaviour.max_roaming_radius;

        if let Some(node) = self.nav.farthest_point_from(origin, offset, radius) {
            if self.nav.set_destination(node) {
                return true;
            }
            warn!("[SHEEP {}] Far away node {:?} is not reachable", self.id, node);
        }
        match self.nav.closest_point_to(origin) {
            Some(node) if self.nav.set_destination(node) => true,
            _ => {
                warn!("[SHEEP {}] No reachable navigation node", self.id);
                false
            }
        }
    }

    fn reached_destination(&self) -> bool {
        self.nav
            .destination()
            .is_some_and(|d| self.nav.distance_to(d) <= self.config.behaviour.destination_epsilon)
    }

    fn sample_idle_cycles(&mut self) -> i32 {
        let behaviour = &self.config.behaviour;
        if behaviour.idle_cycles_max > behaviour.idle_cycles_min {
            self.rng.gen_range(behaviour.idle_cycles_min..behaviour.idle_cycles_max)
        } else {
            behaviour.idle_cycles_min
        }
    }

    fn pick_random_idle_animation(&mut self) {
        let index = self.rng.gen_range(0..IDLE_ANIMATIONS.len());
        self.trigger(IDLE_ANIMATIONS[index]);
    }

    fn apply_profile(&mut self, profile: MovementProfile) {
        self.movement.target = profile;
    }

    // ========================================================================
    // Outbox
    // ========================================================================

    fn emit(&mut self, event: SheepEvent) {
        self.outbox.push_back(event);
    }

    /// Queue events ahead of everything pending except identity and config
    fn emit_ahead_of_pending<I: IntoIterator<Item = SheepEvent>>(&mut self, events: I) {
        let mut index = self
            .outbox
            .iter()
            .position(|e| !matches!(e.channel(), Channel::Identity | Channel::Config))
            .unwrap_or(self.outbox.len());
        for event in events {
            self.outbox.insert(index, event);
            index += 1;
        }
    }

    fn trigger(&mut self, param: AnimParam) {
        self.emit(SheepEvent::DoAnimation { entity_id: self.id.clone(), param });
    }

    fn set_bool(&mut self, param: AnimParam, value: bool) {
        self.emit(SheepEvent::SetAnimationBool { entity_id: self.id.clone(), param, value });
    }
}

fn entity_hash(id: &EntityId) -> u64 {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    hasher.finish()
}
