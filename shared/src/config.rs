//! Red Sheep configuration.
//!
//! The configuration is a plain value object. The server loads it once at
//! startup and hands an `Arc` to every controller; replicas receive a
//! versioned copy through `ConfigSync`.

use std::collections::HashMap;
use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Errors raised while loading a configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheepConfig {
    /// Whether the sheep spawns at all
    pub enabled: bool,
    /// Spawn weight table, `"LevelName:weight, LevelName:weight"`
    pub spawn_weights: String,
    pub behaviour: BehaviourConfig,
    pub annoyance: AnnoyanceConfig,
    pub noise: NoiseConfig,
    pub presentation: PresentationConfig,
}

impl Default for SheepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            spawn_weights: "All:30".to_string(),
            behaviour: BehaviourConfig::default(),
            annoyance: AnnoyanceConfig::default(),
            noise: NoiseConfig::default(),
            presentation: PresentationConfig::default(),
        }
    }
}

/// Movement caps applied while a state is active
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MovementProfile {
    pub max_speed: f32,
    pub max_acceleration: f32,
}

impl MovementProfile {
    pub const fn new(max_speed: f32, max_acceleration: f32) -> Self {
        Self { max_speed, max_acceleration }
    }
}

/// Authoritative behaviour tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviourConfig {
    pub max_health: i32,
    /// Seconds during which further hits are ignored
    pub damage_cooldown: f32,
    /// Seconds between decision intervals
    pub ai_interval: f32,
    pub view_width: f32,
    pub view_range: f32,
    pub proximity_awareness: f32,
    /// Rays per sight test
    pub sight_samples: u32,
    /// Spread of the extra sight rays around the target
    pub sight_tolerance: f32,
    /// Roaming destinations farther than this from the sheep are skipped
    pub max_roaming_radius: f32,
    /// Distance at which a destination counts as reached
    pub destination_epsilon: f32,
    /// Normalised time of day (0..1) after which the sheep transforms
    pub transform_time_of_day: f32,
    pub idle_cycles_min: i32,
    /// Exclusive upper bound
    pub idle_cycles_max: i32,
    pub search_timeout: f32,
    pub search_radius: f32,
    pub search_radius_growth: f32,
    pub max_search_radius: f32,
    pub transformation_timeout: f32,
    pub attack_range: f32,
    pub attack_cooldown: f32,
    /// Seconds between fear pulses while attacking
    pub fear_interval: f32,
    pub roaming: MovementProfile,
    pub idle: MovementProfile,
    pub searching: MovementProfile,
    pub investigating: MovementProfile,
    pub attacking: MovementProfile,
}

impl Default for BehaviourConfig {
    fn default() -> Self {
        Self {
            max_health: 8,
            damage_cooldown: 0.3,
            ai_interval: 0.2,
            view_width: 135.0,
            view_range: 150.0,
            proximity_awareness: 3.0,
            sight_samples: 3,
            sight_tolerance: 0.5,
            max_roaming_radius: 100.0,
            destination_epsilon: 1.0,
            transform_time_of_day: 0.75,
            idle_cycles_min: 1,
            idle_cycles_max: 4,
            search_timeout: 30.0,
            search_radius: 25.0,
            search_radius_growth: 5.0,
            max_search_radius: 100.0,
            transformation_timeout: 15.0,
            attack_range: 2.0,
            attack_cooldown: 1.5,
            fear_interval: 3.0,
            roaming: MovementProfile::new(2.0, 10.0),
            idle: MovementProfile::new(0.0, 10.0),
            searching: MovementProfile::new(6.0, 12.0),
            investigating: MovementProfile::new(7.0, 20.0),
            attacking: MovementProfile::new(9.0, 30.0),
        }
    }
}

/// Proximity annoyance and decay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnoyanceConfig {
    pub threshold: f32,
    /// Units per second
    pub decay_rate: f32,
    pub proximity_radius: f32,
    pub proximity_multiplier: f32,
    /// Candidates submerged deeper than this are ignored
    pub immersion_limit: f32,
}

impl Default for AnnoyanceConfig {
    fn default() -> Self {
        Self {
            threshold: 8.0,
            decay_rate: 0.35,
            proximity_radius: 10.0,
            proximity_multiplier: 0.5,
            immersion_limit: 0.73,
        }
    }
}

/// Noise annoyance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    pub sensitivity: f32,
    pub cooldown: f32,
    pub occlusion_divisor: f32,
    pub min_loudness: f32,
    /// Maximum hearing distance per unit of loudness
    pub range_per_loudness: f32,
    pub annoying_multiplier: f32,
    /// Extra weight per repeat of the same sound
    pub repeat_bonus: f32,
    /// Repeats beyond this add nothing
    pub max_repeats: u32,
    pub ignored_tags: Vec<i32>,
    pub annoying_tags: Vec<i32>,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            sensitivity: 1.0,
            cooldown: 0.2,
            occlusion_divisor: 2.0,
            min_loudness: 0.25,
            range_per_loudness: 60.0,
            annoying_multiplier: 2.0,
            repeat_bonus: 0.25,
            max_repeats: 4,
            ignored_tags: vec![5, 6, 7, 75],
            annoying_tags: vec![941, 1011],
        }
    }
}

/// Client-side presentation tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresentationConfig {
    pub transformation_start_delay: f32,
    pub transformation_fog_duration: f32,
    pub transformation_end_delay: f32,
    /// Exponential smoothing factor per second for the speed estimate
    pub speed_smoothing: f32,
    pub fear_view_angle: f32,
    pub fear_view_range: f32,
    pub fear_proximity_radius: f32,
    pub fear_strong: f32,
    pub fear_mild: f32,
}

impl Default for PresentationConfig {
    fn default() -> Self {
        Self {
            transformation_start_delay: 1.0,
            transformation_fog_duration: 1.5,
            transformation_end_delay: 1.0,
            speed_smoothing: 8.0,
            fear_view_angle: 45.0,
            fear_view_range: 60.0,
            fear_proximity_radius: 5.0,
            fear_strong: 0.8,
            fear_mild: 0.3,
        }
    }
}

impl SheepConfig {
    /// Load a JSON config file; missing fields take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Parse the spawn weight table
    pub fn spawn_table(&self) -> SpawnWeights {
        SpawnWeights::parse(&self.spawn_weights)
    }

    /// Encode for `ConfigSync`
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode a `ConfigSync` payload
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(bincode::deserialize(data)?)
    }
}

/// Built-in level categories that spawn weights can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LevelType {
    ExperimentationLevel,
    AssuranceLevel,
    VowLevel,
    OffenseLevel,
    MarchLevel,
    RendLevel,
    DineLevel,
    TitanLevel,
    AdamanceLevel,
    ArtificeLevel,
    EmbrionLevel,
    Vanilla,
    Modded,
    All,
}

impl LevelType {
    const ALL_TYPES: [LevelType; 14] = [
        Self::ExperimentationLevel,
        Self::AssuranceLevel,
        Self::VowLevel,
        Self::OffenseLevel,
        Self::MarchLevel,
        Self::RendLevel,
        Self::DineLevel,
        Self::TitanLevel,
        Self::AdamanceLevel,
        Self::ArtificeLevel,
        Self::EmbrionLevel,
        Self::Vanilla,
        Self::Modded,
        Self::All,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ExperimentationLevel => "ExperimentationLevel",
            Self::AssuranceLevel => "AssuranceLevel",
            Self::VowLevel => "VowLevel",
            Self::OffenseLevel => "OffenseLevel",
            Self::MarchLevel => "MarchLevel",
            Self::RendLevel => "RendLevel",
            Self::DineLevel => "DineLevel",
            Self::TitanLevel => "TitanLevel",
            Self::AdamanceLevel => "AdamanceLevel",
            Self::ArtificeLevel => "ArtificeLevel",
            Self::EmbrionLevel => "EmbrionLevel",
            Self::Vanilla => "Vanilla",
            Self::Modded => "Modded",
            Self::All => "All",
        }
    }

    /// Case-insensitive lookup by name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL_TYPES
            .iter()
            .copied()
            .find(|level| level.name().eq_ignore_ascii_case(name))
    }

    fn is_vanilla(&self) -> bool {
        !matches!(self, Self::Vanilla | Self::Modded | Self::All)
    }
}

/// Parsed spawn weight tables
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpawnWeights {
    pub by_level: HashMap<LevelType, u32>,
    /// Levels that are not part of the built-in set
    pub custom: HashMap<String, u32>,
}

impl SpawnWeights {
    /// Parse `"name:weight, name:weight"`. Malformed entries are skipped.
    pub fn parse(text: &str) -> Self {
        let mut weights = Self::default();

        for entry in text.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            let [name, weight] = parts.as_slice() else {
                warn!("Skipping malformed spawn weight entry '{}'", entry);
                continue;
            };
            let Ok(weight) = weight.parse::<u32>() else {
                warn!("Skipping spawn weight entry '{}': weight is not a number", entry);
                continue;
            };

            if let Some(level) = LevelType::from_name(name) {
                debug!("Registered spawn weight for level type {:?} to {}", level, weight);
                weights.by_level.insert(level, weight);
            } else {
                debug!("Registered spawn weight for custom level {} to {}", name, weight);
                weights.custom.insert(name.to_string(), weight);
            }
        }

        weights
    }

    /// Resolve the weight for a level name.
    ///
    /// Exact entries win, then `Vanilla`/`Modded`, then `All`.
    pub fn weight_for(&self, level_name: &str) -> u32 {
        match LevelType::from_name(level_name) {
            Some(level) => self
                .by_level
                .get(&level)
                .or_else(|| level.is_vanilla().then(|| self.by_level.get(&LevelType::Vanilla)).flatten())
                .or_else(|| self.by_level.get(&LevelType::All))
                .copied()
                .unwrap_or(0),
            None => self
                .custom
                .get(level_name)
                .or_else(|| self.by_level.get(&LevelType::Modded))
                .or_else(|| self.by_level.get(&LevelType::All))
                .copied()
                .unwrap_or(0),
        }
    }
}
