//! Annoyance accumulator.
//!
//! A decaying scalar fed by noise and by players lingering nearby. Crossing
//! the threshold fires once; the meter stays disarmed until the sheep calms
//! down into a sensitive state again.

use log::trace;

use redsheep_shared::{AnnoyanceConfig, NoiseConfig, Vec3};

use crate::perception::{Candidate, NoiseEvent};

/// Rounding slack when comparing an accumulated level to the threshold
const THRESHOLD_EPSILON: f32 = 1e-4;

/// Closest distance used when weighting proximity
const MIN_PROXIMITY_DISTANCE: f32 = 0.1;

#[derive(Debug, Clone)]
pub struct AnnoyanceMeter {
    level: f32,
    armed: bool,
    noise_cooldown: f32,
}

impl Default for AnnoyanceMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl AnnoyanceMeter {
    pub fn new() -> Self {
        Self { level: 0.0, armed: true, noise_cooldown: 0.0 }
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Zero the level and allow the threshold to fire again
    pub fn reset(&mut self) {
        self.level = 0.0;
        self.armed = true;
    }

    /// Advance the noise cooldown
    pub fn tick(&mut self, delta: f32) {
        self.noise_cooldown = (self.noise_cooldown - delta).max(0.0);
    }

    pub fn decay(&mut self, rate: f32, delta: f32) {
        self.level = (self.level - rate * delta).max(0.0);
    }

    pub fn add(&mut self, amount: f32) {
        if amount.is_finite() {
            self.level = (self.level + amount).max(0.0);
        }
    }

    /// True exactly once per arming when the level reaches `threshold`
    pub fn crossed(&mut self, threshold: f32) -> bool {
        if self.armed && self.level + THRESHOLD_EPSILON >= threshold {
            self.armed = false;
            return true;
        }
        false
    }

    /// Apply a noise event, returning the amount added
    pub fn hear(&mut self, noise: &NoiseEvent, listener: Vec3, occluded: bool, stunned: bool, config: &NoiseConfig) -> f32 {
        if stunned || self.noise_cooldown > 0.0 {
            return 0.0;
        }
        let amount = noise_contribution(noise, listener, occluded, config);
        if amount > 0.0 {
            self.add(amount);
            self.noise_cooldown = config.cooldown;
            trace!("Noise tag {} added {:.3} annoyance (level {:.3})", noise.tag, amount, self.level);
        }
        amount
    }
}

/// Annoyance a single noise adds, or 0 if it is discarded
pub fn noise_contribution(noise: &NoiseEvent, listener: Vec3, occluded: bool, config: &NoiseConfig) -> f32 {
    if config.ignored_tags.contains(&noise.tag) {
        return 0.0;
    }

    let mut loudness = noise.loudness;
    if occluded && config.occlusion_divisor > 0.0 {
        loudness /= config.occlusion_divisor;
    }
    if loudness < config.min_loudness {
        return 0.0;
    }

    let max_distance = loudness * config.range_per_loudness;
    let distance = listener.distance_to(noise.position);
    if max_distance <= 0.0 || distance > max_distance {
        return 0.0;
    }

    if config.annoying_tags.contains(&noise.tag) {
        loudness *= config.annoying_multiplier;
    }

    let repeats = noise.repeat_count.saturating_sub(1).min(config.max_repeats.saturating_sub(1));
    let repeat_factor = 1.0 + config.repeat_bonus * repeats as f32;

    let distance_factor = 1.0 - distance / max_distance;
    loudness * distance_factor * repeat_factor * config.sensitivity
}

/// Annoyance added this interval by players within the proximity radius
pub fn proximity_contribution(candidates: &[Candidate], origin: Vec3, config: &AnnoyanceConfig) -> f32 {
    candidates
        .iter()
        .filter(|c| c.is_annoying(config.immersion_limit))
        .map(|c| origin.distance_to(c.position))
        .filter(|d| *d <= config.proximity_radius)
        .map(|d| config.proximity_multiplier / d.max(MIN_PROXIMITY_DISTANCE))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise(tag: i32, loudness: f32, distance: f32) -> NoiseEvent {
        NoiseEvent { position: Vec3::new(distance, 0.0, 0.0), loudness, tag, repeat_count: 1 }
    }

    #[test]
    fn test_level_never_negative() {
        let mut meter = AnnoyanceMeter::new();
        meter.decay(0.35, 10.0);
        assert_eq!(meter.level(), 0.0);

        meter.add(1.0);
        meter.decay(0.35, 1.0);
        meter.add(-5.0);
        meter.decay(0.35, 100.0);
        meter.add(f32::NAN);
        assert_eq!(meter.level(), 0.0);
    }

    #[test]
    fn test_threshold_fires_once_until_reset() {
        let mut meter = AnnoyanceMeter::new();
        meter.add(9.0);
        assert!(meter.crossed(8.0));
        meter.add(9.0);
        assert!(!meter.crossed(8.0));
        assert!(!meter.is_armed());

        meter.reset();
        assert_eq!(meter.level(), 0.0);
        assert!(!meter.crossed(8.0));
        meter.add(8.0);
        assert!(meter.crossed(8.0));
    }

    #[test]
    fn test_steady_proximity_crosses_at_fifty_first_interval() {
        let config = AnnoyanceConfig::default();
        let mut meter = AnnoyanceMeter::new();

        let mut crossed_at = None;
        for interval in 1..=100 {
            meter.decay(config.decay_rate, 1.0);
            meter.add(0.5);
            if meter.crossed(config.threshold) {
                crossed_at = Some(interval);
                break;
            }
            if interval == 20 {
                assert!(meter.level() < config.threshold);
            }
        }
        assert_eq!(crossed_at, Some(51));
    }

    #[test]
    fn test_noise_filters() {
        let config = NoiseConfig::default();

        assert_eq!(noise_contribution(&noise(5, 1.0, 1.0), Vec3::ZERO, false, &config), 0.0);
        assert_eq!(noise_contribution(&noise(1, 0.2, 1.0), Vec3::ZERO, false, &config), 0.0);
        // 0.4 halved by occlusion drops below the minimum
        assert_eq!(noise_contribution(&noise(1, 0.4, 1.0), Vec3::ZERO, true, &config), 0.0);
        assert_eq!(noise_contribution(&noise(1, 0.5, 31.0), Vec3::ZERO, false, &config), 0.0);

        let plain = noise_contribution(&noise(1, 1.0, 30.0), Vec3::ZERO, false, &config);
        assert!((plain - 0.5).abs() < 1e-5);
        let annoying = noise_contribution(&noise(941, 1.0, 30.0), Vec3::ZERO, false, &config);
        assert!((annoying - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_repeated_noise_weighs_more() {
        let config = NoiseConfig::default();
        let mut repeated = noise(1, 1.0, 30.0);

        repeated.repeat_count = 0;
        assert!((noise_contribution(&repeated, Vec3::ZERO, false, &config) - 0.5).abs() < 1e-5);
        repeated.repeat_count = 3;
        assert!((noise_contribution(&repeated, Vec3::ZERO, false, &config) - 0.75).abs() < 1e-5);
        // Capped at four repeats
        repeated.repeat_count = 40;
        assert!((noise_contribution(&repeated, Vec3::ZERO, false, &config) - 0.875).abs() < 1e-5);
    }

    #[test]
    fn test_hear_respects_stun_and_cooldown() {
        let config = NoiseConfig::default();
        let mut meter = AnnoyanceMeter::new();
        let loud = noise(1, 1.0, 0.0);

        assert_eq!(meter.hear(&loud, Vec3::ZERO, false, true, &config), 0.0);
        assert!(meter.hear(&loud, Vec3::ZERO, false, false, &config) > 0.0);
        assert_eq!(meter.hear(&loud, Vec3::ZERO, false, false, &config), 0.0);

        meter.tick(config.cooldown);
        assert!(meter.hear(&loud, Vec3::ZERO, false, false, &config) > 0.0);
        assert!((meter.level() - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_proximity_contribution() {
        let config = AnnoyanceConfig::default();
        let mut immersed = Candidate::new(3, Vec3::new(2.0, 0.0, 0.0));
        immersed.immersion = 1.0;
        let candidates = vec![
            Candidate::new(1, Vec3::new(1.0, 0.0, 0.0)),
            Candidate::new(2, Vec3::new(0.0, 0.0, 0.05)),
            Candidate::new(4, Vec3::new(50.0, 0.0, 0.0)),
            immersed,
        ];

        let added = proximity_contribution(&candidates, Vec3::ZERO, &config);
        assert!((added - (0.5 + 5.0)).abs() < 1e-4);
    }
}
