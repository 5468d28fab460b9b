//! The seam between a replica and whatever renders it.

use redsheep_shared::animation::AnimParam;
use redsheep_shared::Vec3;

/// Visual effects the replica asks the host to play
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    FogStart,
    FogEnd,
}

/// The two swappable animation rigs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rig {
    Sheep,
    Transformed,
}

/// The player this peer controls, as seen by the host
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observer {
    pub position: Vec3,
    pub forward: Vec3,
    pub alive: bool,
}

/// Sink for everything a replica renders.
///
/// Implementations wrap an animator, an effect system and the local player.
pub trait PresentationHost {
    fn set_trigger(&mut self, param: AnimParam);

    fn set_bool(&mut self, param: AnimParam, value: bool);

    fn set_float(&mut self, param: AnimParam, value: f32);

    fn play_effect(&mut self, effect: Effect);

    fn activate_rig(&mut self, rig: Rig);

    /// Raise the local player's fear level
    fn increase_fear(&mut self, amount: f32);

    /// The locally controlled player, if any
    fn local_observer(&self) -> Option<Observer>;

    /// Whether something blocks the line between two points
    fn occluded(&self, from: Vec3, to: Vec3) -> bool;
}
