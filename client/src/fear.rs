//! Fear applied to the local player when the sheep screams.

use redsheep_shared::{PresentationConfig, Vec3};

use crate::host::Observer;

/// How badly the local player is spooked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FearResponse {
    None,
    /// Close by but not looking
    Mild,
    /// Saw it happen
    Strong,
}

impl FearResponse {
    pub fn amount(&self, config: &PresentationConfig) -> f32 {
        match self {
            Self::None => 0.0,
            Self::Mild => config.fear_mild,
            Self::Strong => config.fear_strong,
        }
    }
}

/// Classify the observer's exposure to a scare at `source`.
///
/// `occluded` is the host's line-of-sight answer for observer -> source.
pub fn assess(observer: &Observer, source: Vec3, occluded: bool, config: &PresentationConfig) -> FearResponse {
    if !observer.alive {
        return FearResponse::None;
    }

    let offset = source - observer.position;
    let distance = offset.length();

    let in_view = distance <= config.fear_view_range
        && observer.forward.angle_to(offset) <= config.fear_view_angle
        && !occluded;
    if in_view {
        return FearResponse::Strong;
    }

    if distance <= config.fear_proximity_radius {
        FearResponse::Mild
    } else {
        FearResponse::None
    }
}
