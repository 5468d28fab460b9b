//! Headless observer: joins a sheep server, mirrors every sheep and logs
//! what a renderer would show. Lines typed on stdin are sent as commands.

use std::io::BufRead;
use std::net::SocketAddr;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use redsheep_client::{ClientSession, ConnectionState, Effect, NetworkClient, Observer, PresentationHost, Rig};
use redsheep_shared::animation::AnimParam;
use redsheep_shared::{ObjectId, Vec3, DEFAULT_PORT};

/// Frame time of the observer loop
const FRAME_TIME: Duration = Duration::from_millis(16);

/// Stand-in for the animator's idle clip length
const IDLE_CYCLE_SECONDS: f32 = 2.5;

/// Host that logs instead of rendering
struct LoggingHost {
    object: ObjectId,
    observer: Observer,
}

impl LoggingHost {
    fn param_name(param: AnimParam) -> String {
        param.name().map(str::to_string).unwrap_or_else(|| format!("{:#x}", param.0))
    }
}

impl PresentationHost for LoggingHost {
    fn set_trigger(&mut self, param: AnimParam) {
        info!("[{}] trigger {}", self.object, Self::param_name(param));
    }

    fn set_bool(&mut self, param: AnimParam, value: bool) {
        info!("[{}] {} = {}", self.object, Self::param_name(param), value);
    }

    // Every frame; too chatty for info
    fn set_float(&mut self, _param: AnimParam, _value: f32) {}

    fn play_effect(&mut self, effect: Effect) {
        info!("[{}] effect {:?}", self.object, effect);
    }

    fn activate_rig(&mut self, rig: Rig) {
        info!("[{}] rig {:?}", self.object, rig);
    }

    fn increase_fear(&mut self, amount: f32) {
        warn!("[{}] fear +{:.2}", self.object, amount);
    }

    fn local_observer(&self) -> Option<Observer> {
        Some(self.observer)
    }

    fn occluded(&self, _from: Vec3, _to: Vec3) -> bool {
        false
    }
}

fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let server_addr: SocketAddr = match args
        .get(1)
        .cloned()
        .unwrap_or_else(|| format!("127.0.0.1:{}", DEFAULT_PORT))
        .parse()
    {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid server address: {}", e);
            return;
        }
    };
    let x = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(0.0);
    let z = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(0.0);
    let observer = Observer { position: Vec3::new(x, 0.0, z), forward: Vec3::FORWARD, alive: true };

    let mut client = NetworkClient::new();
    if let Err(e) = client.connect(server_addr) {
        error!("Failed to connect: {}", e);
        return;
    }

    let mut session = ClientSession::new(|object| LoggingHost { object, observer });
    let commands = spawn_stdin_reader();
    let mut last_frame = Instant::now();
    let mut idle_timer = 0.0;

    loop {
        for message in client.poll() {
            session.handle_message(message);
        }
        if let ConnectionState::Failed(reason) = client.state() {
            error!("Giving up: {}", reason);
            break;
        }

        while let Ok(line) = commands.try_recv() {
            let line = line.trim();
            if line == "/quit" {
                client.disconnect();
                return;
            }
            if !line.is_empty() {
                client.send_command(line);
            }
        }

        let delta = last_frame.elapsed().as_secs_f32();
        last_frame = Instant::now();
        session.update(delta);

        idle_timer += delta;
        if idle_timer >= IDLE_CYCLE_SECONDS {
            idle_timer = 0.0;
            let idle: Vec<ObjectId> = session
                .replicas()
                .filter(|r| r.state().is_idle())
                .map(|r| r.object())
                .collect();
            for object in idle {
                session.on_idle_cycle_finished(object);
            }
        }

        for message in session.drain_outgoing() {
            if let Err(e) = client.send_message(&message) {
                warn!("Failed to send {:?}: {}", message.channel(), e);
            }
        }

        if client.should_send_heartbeat() {
            client.send_player_update(observer.position, observer.alive, false, 0.0);
        }

        std::thread::sleep(FRAME_TIME);
    }
}
