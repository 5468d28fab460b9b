//! UDP server: peers, the owner replica and message routing.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use tokio::net::UdpSocket;

use redsheep_shared::{ClientMessage, ObjectId, PlayerId, ServerMessage, SheepAck, Vec3, MAX_PACKET_SIZE, PROTOCOL_VERSION};

use crate::commands;
use crate::perception::{Candidate, NoiseEvent};
use crate::world::SheepWorld;

/// Connection timeout in seconds
const CONNECTION_TIMEOUT: f32 = 30.0;

/// Connected peer
#[derive(Debug)]
pub struct ClientConnection {
    pub addr: SocketAddr,
    pub player_id: PlayerId,
    pub last_seen: Instant,
    /// Messages addressed to this peer only
    pub outgoing_queue: Vec<ServerMessage>,
}

impl ClientConnection {
    pub fn new(addr: SocketAddr, player_id: PlayerId) -> Self {
        Self {
            addr,
            player_id,
            last_seen: Instant::now(),
            outgoing_queue: Vec::new(),
        }
    }

    pub fn is_timed_out(&self) -> bool {
        self.last_seen.elapsed().as_secs_f32() > CONNECTION_TIMEOUT
    }
}

/// Authoritative server
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: HashMap<SocketAddr, ClientConnection>,
    next_player_id: PlayerId,
    /// Peer whose acknowledgements drive the sheep
    owner: Option<SocketAddr>,
    /// Messages to broadcast to all clients
    broadcast_queue: Vec<ServerMessage>,
    /// Replies to addresses that are not connected (rejections)
    direct_queue: Vec<(SocketAddr, ServerMessage)>,
}

impl Server {
    /// Create a new server listening on the given port
    pub async fn new(port: u16) -> Result<Self, std::io::Error> {
        let addr = format!("0.0.0.0:{}", port);
        let socket = UdpSocket::bind(&addr).await?;

        Ok(Self {
            socket: Arc::new(socket),
            clients: HashMap::new(),
            next_player_id: 1,
            owner: None,
            broadcast_queue: Vec::new(),
            direct_queue: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.socket.local_addr()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn owner_player_id(&self) -> Option<PlayerId> {
        self.owner
            .and_then(|addr| self.clients.get(&addr))
            .map(|c| c.player_id)
    }

    /// Process incoming network messages
    pub async fn process_incoming(&mut self, world: &mut SheepWorld) {
        let mut buf = [0u8; MAX_PACKET_SIZE];

        // Non-blocking receive loop
        loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok((len, addr)) => {
                    self.handle_packet(&buf[..len], addr, world);
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    break;
                }
                Err(e) => {
                    error!("Error receiving packet: {}", e);
                    break;
                }
            }
        }

        self.check_timeouts(world);
    }

    /// Handle a received packet
    fn handle_packet(&mut self, data: &[u8], addr: SocketAddr, world: &mut SheepWorld) {
        let message = match ClientMessage::deserialize(data) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Failed to deserialize packet from {}: {}", addr, e);
                return;
            }
        };
        self.handle_message(addr, message, world);
    }

    pub(crate) fn handle_message(&mut self, addr: SocketAddr, message: ClientMessage, world: &mut SheepWorld) {
        if let ClientMessage::Join { protocol_version } = message {
            self.handle_join(addr, protocol_version, world);
            return;
        }

        let player_id = match self.clients.get_mut(&addr) {
            Some(client) => {
                client.last_seen = Instant::now();
                client.player_id
            }
            None => {
                debug!("Ignoring {:?} from unknown peer {}", message.channel(), addr);
                return;
            }
        };

        match message {
            ClientMessage::Join { .. } => {}
            ClientMessage::Leave => {
                self.handle_leave(addr, world);
            }
            ClientMessage::PlayerUpdate { position, alive, in_exclusion_zone, immersion } => {
                self.handle_player_update(player_id, position, alive, in_exclusion_zone, immersion, world);
            }
            ClientMessage::Sheep { object, ack } => {
                self.handle_sheep_ack(addr, object, ack, world);
            }
            ClientMessage::HitSheep { object, force } => {
                world.hit_sheep(object, force, Some(player_id));
            }
            ClientMessage::Noise { position, loudness, tag, repeat_count } => {
                world.broadcast_noise(&NoiseEvent { position, loudness, tag, repeat_count });
            }
            ClientMessage::RequestConfigSync => match world.config_sync() {
                Ok(msg) => self.queue_to(addr, msg),
                Err(e) => error!("Failed to encode config for {}: {}", addr, e),
            },
            ClientMessage::Command { content } => {
                self.handle_command(addr, content, world);
            }
        }
    }

    fn handle_join(&mut self, addr: SocketAddr, protocol_version: u32, world: &mut SheepWorld) {
        if protocol_version != PROTOCOL_VERSION {
            let reason = format!(
                "Protocol version mismatch. Server: {}, Client: {}",
                PROTOCOL_VERSION, protocol_version
            );
            warn!("Rejecting {}: {}", addr, reason);
            self.direct_queue.push((addr, ServerMessage::JoinRejected { reason }));
            return;
        }

        if self.clients.contains_key(&addr) {
            warn!("Client {} already connected, ignoring", addr);
            return;
        }

        let player_id = self.next_player_id;
        self.next_player_id += 1;
        self.clients.insert(addr, ClientConnection::new(addr, player_id));

        let owner = self.owner.is_none();
        if owner {
            self.owner = Some(addr);
        }
        info!("Player {} joined from {}{}", player_id, addr, if owner { " [OWNER]" } else { "" });

        self.queue_to(addr, ServerMessage::Welcome { player_id, owner });
        match world.config_sync() {
            Ok(msg) => self.queue_to(addr, msg),
            Err(e) => error!("Failed to encode config for {}: {}", addr, e),
        }
        for snapshot in world.all_snapshots() {
            self.queue_to(addr, snapshot);
        }
    }

    fn handle_leave(&mut self, addr: SocketAddr, world: &mut SheepWorld) {
        if let Some(client) = self.clients.remove(&addr) {
            info!("Player {} left", client.player_id);
            world.roster().remove(client.player_id);
        }
        if self.owner == Some(addr) {
            self.reassign_owner();
        }
    }

    fn handle_player_update(
        &mut self,
        player_id: PlayerId,
        position: Vec3,
        alive: bool,
        in_exclusion_zone: bool,
        immersion: f32,
        world: &mut SheepWorld,
    ) {
        world.roster().upsert(Candidate {
            id: player_id,
            position,
            alive,
            in_exclusion_zone,
            controlled: true,
            immersion,
        });
    }

    fn handle_sheep_ack(&mut self, addr: SocketAddr, object: ObjectId, ack: SheepAck, world: &mut SheepWorld) {
        if ack == SheepAck::RequestSnapshot {
            if let Some(reply) = world.handle_ack(object, &ack) {
                self.queue_to(addr, reply);
            }
            return;
        }
        if self.owner != Some(addr) {
            debug!("Ignoring {:?} from non-owner {}", ack, addr);
            return;
        }
        world.handle_ack(object, &ack);
    }

    fn handle_command(&mut self, addr: SocketAddr, content: String, world: &mut SheepWorld) {
        let Some(result) = commands::parse_and_execute(&content, world) else {
            return;
        };
        if let Some(broadcast) = result.broadcast.clone() {
            self.broadcast_queue.push(broadcast);
        }
        self.queue_to(addr, result.into_message());
    }

    /// The lowest player id still connected becomes the owner
    fn reassign_owner(&mut self) {
        self.owner = self
            .clients
            .values()
            .min_by_key(|c| c.player_id)
            .map(|c| c.addr);

        match self.owner {
            Some(addr) => {
                if let Some(client) = self.clients.get_mut(&addr) {
                    info!("Player {} is now the owner", client.player_id);
                    let player_id = client.player_id;
                    client.outgoing_queue.push(ServerMessage::Welcome { player_id, owner: true });
                }
            }
            None => info!("No peers left, owner cleared"),
        }
    }

    fn check_timeouts(&mut self, world: &mut SheepWorld) {
        let timed_out: Vec<SocketAddr> = self
            .clients
            .iter()
            .filter(|(_, c)| c.is_timed_out())
            .map(|(addr, _)| *addr)
            .collect();

        for addr in timed_out {
            if let Some(client) = self.clients.get(&addr) {
                warn!("Player {} timed out", client.player_id);
            }
            self.handle_leave(addr, world);
        }
    }

    fn queue_to(&mut self, addr: SocketAddr, msg: ServerMessage) {
        if let Some(client) = self.clients.get_mut(&addr) {
            client.outgoing_queue.push(msg);
        }
    }

    /// Queue messages for every client
    pub fn queue_broadcasts(&mut self, messages: Vec<ServerMessage>) {
        self.broadcast_queue.extend(messages);
    }

    /// Send every queued message
    pub async fn process_outgoing(&mut self) {
        for (addr, msg) in std::mem::take(&mut self.direct_queue) {
            self.send_to(addr, &msg).await;
        }

        // Per-client replies go first so a joiner sees Welcome before any event
        for (addr, client) in &mut self.clients {
            for msg in client.outgoing_queue.drain(..) {
                let data = match msg.serialize() {
                    Ok(data) => data,
                    Err(e) => {
                        error!("Failed to encode {:?} for {}: {}", msg.channel(), addr, e);
                        continue;
                    }
                };
                if let Err(e) = self.socket.send_to(&data, addr).await {
                    error!("Failed to send to {}: {}", addr, e);
                }
            }
        }

        for msg in self.broadcast_queue.drain(..) {
            let data = match msg.serialize() {
                Ok(data) => data,
                Err(e) => {
                    error!("Failed to encode broadcast {:?}: {}", msg.channel(), e);
                    continue;
                }
            };
            for addr in self.clients.keys() {
                if let Err(e) = self.socket.send_to(&data, addr).await {
                    error!("Failed to broadcast to {}: {}", addr, e);
                }
            }
        }
    }

    /// Send a message to a specific address
    async fn send_to(&self, addr: SocketAddr, msg: &ServerMessage) {
        match msg.serialize() {
            Ok(data) => {
                if let Err(e) = self.socket.send_to(&data, addr).await {
                    error!("Failed to send to {}: {}", addr, e);
                }
            }
            Err(e) => error!("Failed to encode message for {}: {}", addr, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use redsheep_shared::{BehaviourState, EntityId, SheepConfig, SheepEvent};

    use crate::perception::PlayerRoster;
    use crate::world::LevelLayout;

    fn test_world() -> SheepWorld {
        SheepWorld::new(Arc::new(SheepConfig::default()), LevelLayout::fallback(), PlayerRoster::new())
    }

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn join() -> ClientMessage {
        ClientMessage::Join { protocol_version: PROTOCOL_VERSION }
    }

    fn queued(server: &Server, addr: SocketAddr) -> &[ServerMessage] {
        &server.clients[&addr].outgoing_queue
    }

    #[tokio::test]
    async fn test_first_peer_owns_the_sheep() {
        let mut server = Server::new(0).await.unwrap();
        let mut world = test_world();

        server.handle_message(peer(5001), join(), &mut world);
        server.handle_message(peer(5002), join(), &mut world);

        assert_eq!(queued(&server, peer(5001))[0], ServerMessage::Welcome { player_id: 1, owner: true });
        assert_eq!(queued(&server, peer(5002))[0], ServerMessage::Welcome { player_id: 2, owner: false });
        assert!(matches!(queued(&server, peer(5002))[1], ServerMessage::ConfigSync { version: 1, .. }));
        assert_eq!(server.owner_player_id(), Some(1));
    }

    #[tokio::test]
    async fn test_version_mismatch_is_rejected() {
        let mut server = Server::new(0).await.unwrap();
        let mut world = test_world();

        server.handle_message(peer(5001), ClientMessage::Join { protocol_version: 99 }, &mut world);
        assert_eq!(server.client_count(), 0);
        assert!(matches!(server.direct_queue[0], (_, ServerMessage::JoinRejected { .. })));
    }

    #[tokio::test]
    async fn test_only_owner_acks_count() {
        let mut server = Server::new(0).await.unwrap();
        let mut world = test_world();
        let object = world.spawn_sheep(Vec3::new(20.0, 0.0, 0.0));
        world.sheep_mut(object).unwrap().switch_state(BehaviourState::Transforming);
        let entity_id: EntityId = world.sheep(object).unwrap().entity_id().clone();

        server.handle_message(peer(5001), join(), &mut world);
        server.handle_message(peer(5002), join(), &mut world);

        let ack = SheepAck::TransformationComplete { entity_id };
        server.handle_message(peer(5002), ClientMessage::Sheep { object, ack: ack.clone() }, &mut world);
        assert_eq!(world.sheep(object).unwrap().state(), BehaviourState::Transforming);

        server.handle_message(peer(5001), ClientMessage::Sheep { object, ack }, &mut world);
        assert_eq!(world.sheep(object).unwrap().state(), BehaviourState::SearchingForPlayers);
    }

    #[tokio::test]
    async fn test_late_joiner_snapshot() {
        let mut server = Server::new(0).await.unwrap();
        let mut world = test_world();
        let object = world.spawn_sheep(Vec3::new(20.0, 0.0, 0.0));
        world.roster().upsert(Candidate::new(77, Vec3::new(22.0, 0.0, 0.0)));
        {
            let sheep = world.sheep_mut(object).unwrap();
            sheep.switch_state(BehaviourState::Transforming);
            let ack = SheepAck::TransformationComplete { entity_id: sheep.entity_id().clone() };
            sheep.handle_ack(&ack);
            sheep.hit(1, Some(77));
        }
        world.drain_messages();

        server.handle_message(peer(5003), join(), &mut world);
        server.handle_message(peer(5003), ClientMessage::Sheep { object, ack: SheepAck::RequestSnapshot }, &mut world);

        let snapshots: Vec<_> = queued(&server, peer(5003))
            .iter()
            .filter_map(|m| match m {
                ServerMessage::Sheep { event: SheepEvent::Snapshot { snapshot }, .. } => Some(snapshot.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(snapshots.len(), 2);
        for snapshot in snapshots {
            assert_eq!(snapshot.state, BehaviourState::Attacking);
            assert_eq!(snapshot.target, Some(77));
            assert!(snapshot.alive);
        }
    }

    #[tokio::test]
    async fn test_owner_leaving_hands_over() {
        let mut server = Server::new(0).await.unwrap();
        let mut world = test_world();

        server.handle_message(peer(5001), join(), &mut world);
        server.handle_message(peer(5002), join(), &mut world);
        server.handle_message(peer(5001), ClientMessage::Leave, &mut world);

        assert_eq!(server.owner_player_id(), Some(2));
        assert_eq!(
            queued(&server, peer(5002)).last(),
            Some(&ServerMessage::Welcome { player_id: 2, owner: true })
        );
    }

    #[tokio::test]
    async fn test_player_updates_feed_the_roster() {
        let mut server = Server::new(0).await.unwrap();
        let mut world = test_world();

        server.handle_message(peer(5001), join(), &mut world);
        let update = ClientMessage::PlayerUpdate {
            position: Vec3::new(1.0, 0.0, 2.0),
            alive: true,
            in_exclusion_zone: false,
            immersion: 0.2,
        };
        server.handle_message(peer(5001), update, &mut world);
        assert_eq!(world.roster().get(1).map(|c| c.position), Some(Vec3::new(1.0, 0.0, 2.0)));

        server.handle_message(peer(5001), ClientMessage::Leave, &mut world);
        assert!(world.roster().is_empty());
    }

    #[tokio::test]
    async fn test_messages_from_unknown_peers_are_ignored() {
        let mut server = Server::new(0).await.unwrap();
        let mut world = test_world();
        let object = world.spawn_sheep(Vec3::new(20.0, 0.0, 0.0));

        server.handle_message(peer(5009), ClientMessage::HitSheep { object, force: 100 }, &mut world);
        assert_eq!(world.sheep(object).unwrap().state(), BehaviourState::Roaming);
        assert_eq!(world.handle_ack(ObjectId(42), &SheepAck::RequestSnapshot), None);
    }

    #[tokio::test]
    async fn test_join_over_udp() {
        let mut server = Server::new(0).await.unwrap();
        let mut world = test_world();
        let server_addr = peer(server.local_addr().unwrap().port());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let data = join().serialize().unwrap();
        client.send_to(&data, server_addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        server.process_incoming(&mut world).await;
        server.process_outgoing().await;

        let mut buf = [0u8; MAX_PACKET_SIZE];
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let reply = ServerMessage::deserialize(&buf[..len]).unwrap();
        assert_eq!(reply, ServerMessage::Welcome { player_id: 1, owner: true });
    }
}
