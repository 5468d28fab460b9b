//! Per-tick speed and acceleration smoothing.

use redsheep_shared::{config::MovementProfile, math::lerp};

use crate::navigation::NavigationService;

/// Live movement values approaching the active profile
#[derive(Debug, Clone, Default)]
pub struct MovementSmoother {
    pub target: MovementProfile,
    speed: f32,
    acceleration: f32,
    stun_remaining: f32,
}

impl MovementSmoother {
    pub fn new(target: MovementProfile) -> Self {
        Self { target, ..Default::default() }
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn acceleration(&self) -> f32 {
        self.acceleration
    }

    pub fn is_stunned(&self) -> bool {
        self.stun_remaining > 0.0
    }

    pub fn stun(&mut self, seconds: f32) {
        self.stun_remaining = self.stun_remaining.max(seconds);
    }

    /// Approach the target profile and push the result to the agent
    pub fn update<N: NavigationService>(&mut self, delta: f32, nav: &mut N) {
        self.stun_remaining = (self.stun_remaining - delta).max(0.0);

        self.acceleration = lerp(self.acceleration, self.target.max_acceleration, delta);
        self.speed = if self.is_stunned() {
            0.0
        } else {
            lerp(self.speed, self.target.max_speed, delta / 2.0)
        };

        nav.set_speed(self.speed);
        nav.set_acceleration(self.acceleration);
    }

    /// Drop to a standstill immediately
    pub fn halt<N: NavigationService>(&mut self, nav: &mut N) {
        self.speed = 0.0;
        self.acceleration = 0.0;
        nav.set_speed(0.0);
        nav.set_acceleration(0.0);
    }
}
