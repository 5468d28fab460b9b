//! Red Sheep Server
//!
//! Authoritative host for the red sheep: runs the behaviour state machine
//! and replicates its events to every connected peer.

mod commands;
mod entities;
mod navigation;
mod network;
mod perception;
mod world;

#[cfg(test)]
mod test_utils;

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use redsheep_shared::{SheepConfig, DEFAULT_PORT, SERVER_TICK_RATE};

use crate::network::Server;
use crate::perception::PlayerRoster;
use crate::world::{LevelLayout, SheepWorld};

/// Config file used when none is given on the command line
const DEFAULT_CONFIG_PATH: &str = "redsheep.json";

/// Layout file used when none is given on the command line
const DEFAULT_LAYOUT_PATH: &str = "layout.json";

/// Transforms are sent every this many ticks
const TRANSFORM_SEND_INTERVAL: u64 = 3;

fn load_config(path: &str) -> SheepConfig {
    match SheepConfig::load(path) {
        Ok(config) => {
            info!("Loaded sheep config from {}", path);
            config
        }
        Err(e) => {
            error!("Failed to load sheep config from {}: {}", path, e);
            error!("Using fallback default config");
            SheepConfig::default()
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = args.get(1).map(String::as_str).unwrap_or(DEFAULT_CONFIG_PATH);
    let layout_path = args.get(2).map(String::as_str).unwrap_or(DEFAULT_LAYOUT_PATH);

    info!("Starting Red Sheep Server...");
    info!("Tick rate: {} Hz", SERVER_TICK_RATE);
    info!("Listening on port {}", DEFAULT_PORT);

    let config = load_config(config_path);
    let mut layout = LevelLayout::load_or_fallback(layout_path);
    if let Some(level) = args.get(3) {
        info!("Overriding level name '{}' with '{}'", layout.name, level);
        layout.name = level.clone();
    }

    let mut world = SheepWorld::new(Arc::new(config), layout, PlayerRoster::new());
    if world.spawn_for_level().is_none() {
        warn!("No sheep spawned at startup; use /spawn to add one");
    }

    let mut server = match Server::new(DEFAULT_PORT).await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to start server: {}", e);
            return;
        }
    };

    let tick_duration = Duration::from_secs_f64(1.0 / SERVER_TICK_RATE as f64);
    let mut last_tick = Instant::now();
    let mut tick_count: u64 = 0;

    info!("Server started successfully!");

    // Main loop
    loop {
        let tick_start = Instant::now();

        server.process_incoming(&mut world).await;

        let delta = last_tick.elapsed().as_secs_f32();
        last_tick = Instant::now();
        let mut messages = world.update(delta);

        if tick_count % TRANSFORM_SEND_INTERVAL == 0 {
            messages.extend(world.transforms());
        }
        if !messages.is_empty() {
            server.queue_broadcasts(messages);
        }

        server.process_outgoing().await;

        tick_count += 1;

        // Sleep until next tick
        let elapsed = tick_start.elapsed();
        if elapsed < tick_duration {
            tokio::time::sleep(tick_duration - elapsed).await;
        }
    }
}
