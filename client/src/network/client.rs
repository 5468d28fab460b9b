//! UDP network client for a presentation peer.
//!
//! This is a simple non-blocking UDP client that is polled from the host's
//! main loop.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use log::{error, info, warn};
use redsheep_shared::{ClientMessage, PlayerId, ServerMessage, Vec3, MAX_PACKET_SIZE, PROTOCOL_VERSION};

/// Connection timeout duration
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Heartbeat interval (send player update to keep connection alive)
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100); // 10 Hz

/// Connection state
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

/// Network client for communicating with the sheep server
pub struct NetworkClient {
    socket: Option<UdpSocket>,
    server_addr: Option<SocketAddr>,
    state: ConnectionState,
    player_id: Option<PlayerId>,
    owner: bool,
    connect_time: Option<Instant>,
    last_send_time: Instant,

    /// Received messages waiting to be processed
    incoming_messages: Vec<ServerMessage>,
}

impl NetworkClient {
    /// Create a new network client
    pub fn new() -> Self {
        Self {
            socket: None,
            server_addr: None,
            state: ConnectionState::Disconnected,
            player_id: None,
            owner: false,
            connect_time: None,
            last_send_time: Instant::now(),
            incoming_messages: Vec::new(),
        }
    }

    /// Bind a local socket and send the join request
    pub fn connect(&mut self, server_addr: SocketAddr) -> Result<(), String> {
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(|e| format!("Failed to create socket: {}", e))?;

        socket
            .set_nonblocking(true)
            .map_err(|e| format!("Failed to set non-blocking: {}", e))?;

        self.socket = Some(socket);
        self.server_addr = Some(server_addr);
        self.state = ConnectionState::Connecting;
        self.connect_time = Some(Instant::now());

        info!("Joining {}", server_addr);
        self.send_message(&ClientMessage::Join { protocol_version: PROTOCOL_VERSION })
    }

    /// Disconnect from the server
    pub fn disconnect(&mut self) {
        if self.is_connected() {
            if let Err(e) = self.send_message(&ClientMessage::Leave) {
                warn!("Failed to send leave: {}", e);
            }
        }

        self.socket = None;
        self.server_addr = None;
        self.state = ConnectionState::Disconnected;
        self.player_id = None;
        self.owner = false;
        self.connect_time = None;
        self.incoming_messages.clear();
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected)
    }

    /// Get connection state
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Get player ID (only valid when connected)
    pub fn player_id(&self) -> Option<PlayerId> {
        self.player_id
    }

    /// Whether this peer's acknowledgements drive the sheep
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Poll for incoming messages (should be called every frame)
    pub fn poll(&mut self) -> Vec<ServerMessage> {
        self.receive_packets();

        // Check for connection timeout
        if matches!(self.state, ConnectionState::Connecting) {
            if let Some(connect_time) = self.connect_time {
                if connect_time.elapsed() > CONNECTION_TIMEOUT {
                    error!("Connection timed out");
                    self.state = ConnectionState::Failed("Connection timed out".to_string());
                }
            }
        }

        std::mem::take(&mut self.incoming_messages)
    }

    /// Receive all pending packets
    fn receive_packets(&mut self) {
        let socket = match &self.socket {
            Some(s) => s,
            None => return,
        };

        let mut buf = [0u8; MAX_PACKET_SIZE];
        let mut received_packets: Vec<Vec<u8>> = Vec::new();

        // First, collect all packets without borrowing self mutably
        loop {
            match socket.recv_from(&mut buf) {
                Ok((len, _addr)) => {
                    received_packets.push(buf[..len].to_vec());
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    break;
                }
                Err(e) => {
                    error!("Network receive error: {}", e);
                    break;
                }
            }
        }

        for packet_data in received_packets {
            self.process_packet(&packet_data);
        }
    }

    /// Process a received packet
    fn process_packet(&mut self, data: &[u8]) {
        let message = match ServerMessage::deserialize(data) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Failed to deserialize server message: {}", e);
                return;
            }
        };

        // Handle connection state messages
        match &message {
            ServerMessage::Welcome { player_id, owner } => {
                if self.player_id != Some(*player_id) {
                    info!("Joined with player ID: {}", player_id);
                }
                if *owner && !self.owner {
                    info!("This peer now owns the sheep");
                }
                self.player_id = Some(*player_id);
                self.owner = *owner;
                self.state = ConnectionState::Connected;
            }
            ServerMessage::JoinRejected { reason } => {
                error!("Join rejected: {}", reason);
                self.state = ConnectionState::Failed(reason.clone());
            }
            _ => {}
        }

        self.incoming_messages.push(message);
    }

    /// Send a message to the server
    pub fn send_message(&mut self, msg: &ClientMessage) -> Result<(), String> {
        let socket = self.socket.as_ref().ok_or("Not connected")?;
        let server_addr = self.server_addr.ok_or("No server address")?;

        let data = msg.serialize().map_err(|e| e.to_string())?;
        socket
            .send_to(&data, server_addr)
            .map_err(|e| format!("Failed to send: {}", e))?;

        self.last_send_time = Instant::now();

        Ok(())
    }

    /// Send the controlled player's state
    pub fn send_player_update(&mut self, position: Vec3, alive: bool, in_exclusion_zone: bool, immersion: f32) {
        let msg = ClientMessage::PlayerUpdate { position, alive, in_exclusion_zone, immersion };
        if let Err(e) = self.send_message(&msg) {
            warn!("Failed to send player update: {}", e);
        }
    }

    /// Send a developer command
    pub fn send_command(&mut self, content: &str) {
        let msg = ClientMessage::Command { content: content.to_string() };
        if let Err(e) = self.send_message(&msg) {
            warn!("Failed to send command: {}", e);
        }
    }

    /// Check if we should send a heartbeat
    pub fn should_send_heartbeat(&self) -> bool {
        self.is_connected() && self.last_send_time.elapsed() > HEARTBEAT_INTERVAL
    }
}

impl Default for NetworkClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_without_socket_fails() {
        let mut client = NetworkClient::new();
        assert!(client.send_message(&ClientMessage::Leave).is_err());
        assert_eq!(*client.state(), ConnectionState::Disconnected);
        assert!(client.poll().is_empty());
    }

    #[test]
    fn test_join_and_welcome() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server.set_read_timeout(Some(Duration::from_secs(1))).unwrap();

        let mut client = NetworkClient::new();
        client.connect(server.local_addr().unwrap()).unwrap();
        assert_eq!(*client.state(), ConnectionState::Connecting);

        let mut buf = [0u8; MAX_PACKET_SIZE];
        let (len, client_addr) = server.recv_from(&mut buf).unwrap();
        assert_eq!(
            ClientMessage::deserialize(&buf[..len]).unwrap(),
            ClientMessage::Join { protocol_version: PROTOCOL_VERSION }
        );

        let welcome = ServerMessage::Welcome { player_id: 4, owner: true }.serialize().unwrap();
        server.send_to(&welcome, client_addr).unwrap();

        let mut messages = Vec::new();
        for _ in 0..100 {
            messages.extend(client.poll());
            if !messages.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(messages.len(), 1);
        assert!(client.is_connected());
        assert!(client.is_owner());
        assert_eq!(client.player_id(), Some(4));
    }
}
