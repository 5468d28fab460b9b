//! Level layout: navigation nodes, obstacles and spawn points.

use std::path::Path;

use log::{error, info, warn};
use serde::Deserialize;

use redsheep_shared::Vec3;

use crate::navigation::Obstacle;

/// Static description of the level the sheep lives in
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LevelLayout {
    /// Level name used for spawn weight lookup
    pub name: String,
    /// Seed for every sheep's RNG
    pub seed: u64,
    /// Real seconds in one in-game day
    pub day_length: f32,
    pub nodes: Vec<Vec3>,
    pub obstacles: Vec<Obstacle>,
    pub spawn_points: Vec<Vec3>,
}

impl Default for LevelLayout {
    fn default() -> Self {
        Self::fallback()
    }
}

impl LevelLayout {
    /// Load a layout exported from the level editor, or fall back to the
    /// built-in pasture when the file is missing or unreadable
    pub fn load_or_fallback<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to read layout file {:?}: {}", path, e);
                }
                info!("No layout at {:?}, using the built-in pasture", path);
                return Self::fallback();
            }
        };

        match serde_json::from_str::<LevelLayout>(&content) {
            Ok(layout) if layout.nodes.is_empty() => {
                error!("Layout {:?} has no navigation nodes, using the built-in pasture", path);
                Self::fallback()
            }
            Ok(layout) => {
                info!(
                    "Loaded layout '{}' from {:?}: {} nodes, {} obstacles, {} spawn points",
                    layout.name,
                    path,
                    layout.nodes.len(),
                    layout.obstacles.len(),
                    layout.spawn_points.len()
                );
                layout
            }
            Err(e) => {
                error!("Failed to parse layout {:?}: {}", path, e);
                Self::fallback()
            }
        }
    }

    /// Built-in pasture: a ring of nodes around a barn and a few fence posts
    pub fn fallback() -> Self {
        let mut nodes = Vec::new();
        for ring in [12.0f32, 24.0, 36.0] {
            for i in 0..8 {
                let angle = i as f32 / 8.0 * std::f32::consts::TAU;
                nodes.push(Vec3::new(angle.cos() * ring, 0.0, angle.sin() * ring));
            }
        }

        Self {
            name: "ExperimentationLevel".into(),
            seed: 0x5EED,
            day_length: 900.0,
            nodes,
            obstacles: vec![
                // Barn
                Obstacle::rect(0.0, 0.0, 4.0, 6.0),
                // Fence posts
                Obstacle::circle(-20.0, -20.0, 1.0),
                Obstacle::circle(20.0, -20.0, 1.0),
                Obstacle::circle(-20.0, 20.0, 1.0),
                Obstacle::circle(20.0, 20.0, 1.0),
            ],
            spawn_points: vec![Vec3::new(20.0, 0.0, 0.0)],
        }
    }

    /// First spawn point, or the first node
    pub fn spawn_point(&self) -> Vec3 {
        self.spawn_points
            .first()
            .or_else(|| self.nodes.first())
            .copied()
            .unwrap_or(Vec3::ZERO)
    }
}
