//! Developer console commands for poking at live sheep.

use redsheep_shared::{ObjectId, ServerMessage, SheepConfig, Vec3};

use crate::world::SheepWorld;

/// Bytes of `/sheep` output that still fit in one packet with room to spare
const LIST_OUTPUT_LIMIT: usize = 900;

/// Result of executing a command
pub struct CommandResult {
    /// Whether the command was successful
    pub success: bool,
    /// Message to display to the user
    pub message: String,
    /// Message every peer needs to see (despawns)
    pub broadcast: Option<ServerMessage>,
}

impl CommandResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into(), broadcast: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into(), broadcast: None }
    }

    pub fn with_broadcast(mut self, msg: ServerMessage) -> Self {
        self.broadcast = Some(msg);
        self
    }

    pub fn into_message(self) -> ServerMessage {
        ServerMessage::CommandResult { success: self.success, message: self.message }
    }
}

/// Parse and execute a command.
/// Returns None if it's not a command (doesn't start with /)
pub fn parse_and_execute(content: &str, world: &mut SheepWorld) -> Option<CommandResult> {
    let body = content.strip_prefix('/')?;
    let parts: Vec<&str> = body.split_whitespace().collect();
    let Some((command, args)) = parts.split_first() else {
        return Some(CommandResult::error("Invalid command"));
    };

    Some(match command.to_lowercase().as_str() {
        "help" => cmd_help(),
        "sheep" | "list" => cmd_list(world),
        "spawn" => cmd_spawn(args, world),
        "despawn" => cmd_despawn(args, world),
        "state" => cmd_state(args, world),
        "hit" => cmd_hit(args, world),
        "stun" => cmd_stun(args, world),
        "time" => cmd_time(args, world),
        "reload" => cmd_reload(args, world),
        other => CommandResult::error(format!("Unknown command: /{}", other)),
    })
}

fn parse_object(args: &[&str]) -> Result<ObjectId, CommandResult> {
    args.first()
        .and_then(|s| s.trim_start_matches('#').parse::<u32>().ok())
        .map(ObjectId)
        .ok_or_else(|| CommandResult::error("Expected a sheep slot, e.g. 1 or #1"))
}

fn parse_arg<T: std::str::FromStr>(args: &[&str], index: usize, usage: &str) -> Result<T, CommandResult> {
    args.get(index)
        .and_then(|s| s.parse::<T>().ok())
        .ok_or_else(|| CommandResult::error(format!("Usage: {}", usage)))
}

fn cmd_help() -> CommandResult {
    let mut help = String::from("Available commands:\n");
    help.push_str("  /sheep - List live sheep\n");
    help.push_str("  /spawn [x z] - Spawn a sheep\n");
    help.push_str("  /despawn <slot> - Remove a sheep\n");
    help.push_str("  /state <slot> <index> - Force a behaviour state (0-7)\n");
    help.push_str("  /hit <slot> <force> - Damage a sheep\n");
    help.push_str("  /stun <slot> <seconds> - Stun a sheep\n");
    help.push_str("  /time <fraction> - Set the time of day (0-1)\n");
    help.push_str("  /reload <path> - Load a config file for new spawns\n");
    CommandResult::success(help)
}

fn cmd_list(world: &SheepWorld) -> CommandResult {
    let mut msg = format!("{} sheep, time of day {:.2}:\n", world.sheep_count(), world.time_of_day());
    let objects = world.object_ids();
    for (listed, object) in objects.iter().enumerate() {
        let Some(sheep) = world.sheep(*object) else {
            continue;
        };
        let line = format!(
            "  {} {} {:?} target={:?} health={}\n",
            object,
            sheep.entity_id(),
            sheep.state(),
            sheep.target(),
            sheep.health()
        );
        if msg.len() + line.len() > LIST_OUTPUT_LIMIT {
            msg.push_str(&format!("  ... and {} more\n", objects.len() - listed));
            break;
        }
        msg.push_str(&line);
    }
    CommandResult::success(msg)
}

fn cmd_spawn(args: &[&str], world: &mut SheepWorld) -> CommandResult {
    let object = if args.is_empty() {
        match world.spawn_for_level() {
            Some(object) => object,
            None => return CommandResult::error("Sheep do not spawn on this level"),
        }
    } else {
        let usage = "/spawn [x z]";
        let (x, z) = match (parse_arg::<f32>(args, 0, usage), parse_arg::<f32>(args, 1, usage)) {
            (Ok(x), Ok(z)) => (x, z),
            (Err(e), _) | (_, Err(e)) => return e,
        };
        world.spawn_sheep(Vec3::new(x, 0.0, z))
    };
    CommandResult::success(format!("Spawned sheep in slot {}", object))
}

fn cmd_despawn(args: &[&str], world: &mut SheepWorld) -> CommandResult {
    let object = match parse_object(args) {
        Ok(o) => o,
        Err(e) => return e,
    };
    match world.despawn(object) {
        Some(msg) => CommandResult::success(format!("Despawned slot {}", object)).with_broadcast(msg),
        None => CommandResult::error(format!("No sheep in slot {}", object)),
    }
}

fn cmd_state(args: &[&str], world: &mut SheepWorld) -> CommandResult {
    let object = match parse_object(args) {
        Ok(o) => o,
        Err(e) => return e,
    };
    let index = match parse_arg::<u8>(args, 1, "/state <slot> <index>") {
        Ok(i) => i,
        Err(e) => return e,
    };
    let Some(sheep) = world.sheep_mut(object) else {
        return CommandResult::error(format!("No sheep in slot {}", object));
    };

    if sheep.switch_state_by_index(index) {
        CommandResult::success(format!("Slot {} is now {:?}", object, sheep.state()))
    } else {
        CommandResult::error(format!("Slot {} stays {:?}", object, sheep.state()))
    }
}

fn cmd_hit(args: &[&str], world: &mut SheepWorld) -> CommandResult {
    let object = match parse_object(args) {
        Ok(o) => o,
        Err(e) => return e,
    };
    let force = match parse_arg::<i32>(args, 1, "/hit <slot> <force>") {
        Ok(f) => f,
        Err(e) => return e,
    };
    if world.sheep(object).is_none() {
        return CommandResult::error(format!("No sheep in slot {}", object));
    }
    world.hit_sheep(object, force, None);
    let health = world.sheep(object).map(|s| s.health()).unwrap_or_default();
    CommandResult::success(format!("Slot {} health is now {}", object, health))
}

fn cmd_stun(args: &[&str], world: &mut SheepWorld) -> CommandResult {
    let object = match parse_object(args) {
        Ok(o) => o,
        Err(e) => return e,
    };
    let seconds = match parse_arg::<f32>(args, 1, "/stun <slot> <seconds>") {
        Ok(s) => s,
        Err(e) => return e,
    };
    match world.sheep_mut(object) {
        Some(sheep) => {
            sheep.set_stunned(seconds);
            CommandResult::success(format!("Slot {} stunned for {:.1}s", object, seconds))
        }
        None => CommandResult::error(format!("No sheep in slot {}", object)),
    }
}

fn cmd_time(args: &[&str], world: &mut SheepWorld) -> CommandResult {
    let fraction = match parse_arg::<f32>(args, 0, "/time <fraction>") {
        Ok(f) => f,
        Err(e) => return e,
    };
    world.clock_mut().set_time_of_day(fraction);
    CommandResult::success(format!("Time of day set to {:.2}", world.time_of_day()))
}

fn cmd_reload(args: &[&str], world: &mut SheepWorld) -> CommandResult {
    let Some(path) = args.first() else {
        return CommandResult::error("Usage: /reload <path>");
    };
    let config = match SheepConfig::load(path) {
        Ok(config) => config,
        Err(e) => return CommandResult::error(format!("Failed to load {}: {}", path, e)),
    };
    world.set_config(config);
    match world.config_sync() {
        Ok(sync) => CommandResult::success(format!("Config version {} loaded", world.config_version())).with_broadcast(sync),
        Err(e) => CommandResult::error(format!("Config loaded but could not be encoded: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use redsheep_shared::{BehaviourState, SheepConfig};

    use crate::perception::PlayerRoster;
    use crate::world::LevelLayout;

    fn test_world() -> SheepWorld {
        SheepWorld::new(Arc::new(SheepConfig::default()), LevelLayout::fallback(), PlayerRoster::new())
    }

    #[test]
    fn test_not_a_command() {
        let mut world = test_world();
        assert!(parse_and_execute("hello", &mut world).is_none());
        assert!(!parse_and_execute("/", &mut world).unwrap().success);
        assert!(!parse_and_execute("/dance", &mut world).unwrap().success);
    }

    #[test]
    fn test_state_command() {
        let mut world = test_world();
        parse_and_execute("/spawn 20 0", &mut world);
        let object = ObjectId(1);

        let result = parse_and_execute("/state #1 3", &mut world).unwrap();
        assert!(result.success);
        assert_eq!(world.sheep(object).unwrap().state(), BehaviourState::TransformedIdle);

        let result = parse_and_execute("/state 1 9", &mut world).unwrap();
        assert!(!result.success);
        assert_eq!(world.sheep(object).unwrap().state(), BehaviourState::TransformedIdle);
    }

    #[test]
    fn test_hit_and_despawn_commands() {
        let mut world = test_world();
        parse_and_execute("/spawn 20 0", &mut world);

        assert!(parse_and_execute("/hit 1 3", &mut world).unwrap().success);
        assert_eq!(world.sheep(ObjectId(1)).unwrap().health(), 5);

        let result = parse_and_execute("/despawn 1", &mut world).unwrap();
        assert!(result.success);
        assert_eq!(result.broadcast, Some(ServerMessage::EntityDespawn { object: ObjectId(1) }));
        assert!(!parse_and_execute("/despawn 1", &mut world).unwrap().success);
    }

    #[test]
    fn test_long_sheep_list_fits_in_a_packet() {
        let mut world = test_world();
        for i in 0..40 {
            world.spawn_sheep(Vec3::new(20.0, 0.0, i as f32 * 0.5));
        }

        let result = parse_and_execute("/sheep", &mut world).unwrap();
        assert!(result.success);
        assert!(result.message.starts_with("40 sheep"));
        assert!(result.message.contains("more"));
        assert!(result.message.len() <= LIST_OUTPUT_LIMIT + 32);
        assert!(result.into_message().serialize().is_ok());
    }

    #[test]
    fn test_time_and_bad_arguments() {
        let mut world = test_world();
        assert!(parse_and_execute("/time 0.9", &mut world).unwrap().success);
        assert!((world.time_of_day() - 0.9).abs() < 1e-4);
        assert!(!parse_and_execute("/time soon", &mut world).unwrap().success);
        assert!(!parse_and_execute("/stun x 2", &mut world).unwrap().success);
    }

    #[test]
    fn test_reload_bumps_the_config_version() {
        let mut world = test_world();
        let path = std::env::temp_dir().join(format!("redsheep-reload-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "enabled": false }"#).unwrap();

        let result = parse_and_execute(&format!("/reload {}", path.display()), &mut world).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(result.success);
        assert!(matches!(result.broadcast, Some(ServerMessage::ConfigSync { version: 2, .. })));
        assert!(!world.config().enabled);
        assert!(!parse_and_execute("/reload /nonexistent/redsheep.json", &mut world).unwrap().success);
    }
}
