//! Network protocol definitions shared between the authoritative server and
//! the presentation replicas.

use serde::{Deserialize, Serialize};

use crate::animation::AnimParam;
use crate::math::Vec3;

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Server tick rate in Hz
pub const SERVER_TICK_RATE: u32 = 30;

/// Default server port
pub const DEFAULT_PORT: u16 = 7787;

/// Largest datagram either side sends or reads
pub const MAX_PACKET_SIZE: usize = 1200;

/// Runtime id of a connected player (also the target reference)
pub type PlayerId = u64;

// =============================================================================
// Identity
// =============================================================================

/// Identifier of one behaviour lifetime, generated by the authoritative side
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Network object slot that addresses a spawned entity on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u32);

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// Behaviour State
// =============================================================================

/// Behaviour state of the sheep. Values are stable on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BehaviourState {
    Roaming = 0,
    NormalIdle = 1,
    Transforming = 2,
    TransformedIdle = 3,
    SearchingForPlayers = 4,
    InvestigatingTargetPosition = 5,
    Attacking = 6,
    Dead = 7,
}

impl BehaviourState {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Roaming),
            1 => Some(Self::NormalIdle),
            2 => Some(Self::Transforming),
            3 => Some(Self::TransformedIdle),
            4 => Some(Self::SearchingForPlayers),
            5 => Some(Self::InvestigatingTargetPosition),
            6 => Some(Self::Attacking),
            7 => Some(Self::Dead),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// States in which idle cycle acknowledgements are meaningful
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::NormalIdle | Self::TransformedIdle)
    }

    /// States before the transformation (annoyance and time of day apply)
    pub fn is_annoyance_sensitive(&self) -> bool {
        matches!(self, Self::Roaming | Self::NormalIdle)
    }

    /// Non-terminal states after the transformation
    pub fn is_transformed(&self) -> bool {
        matches!(
            self,
            Self::TransformedIdle
                | Self::SearchingForPlayers
                | Self::InvestigatingTargetPosition
                | Self::Attacking
        )
    }
}

/// Current authoritative state, answered to late joiners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheepSnapshot {
    pub entity_id: EntityId,
    pub state: BehaviourState,
    pub target: Option<PlayerId>,
    /// Whether the replica should show the transformed rig
    pub transformed: bool,
    /// Health above zero and not in the death state
    pub alive: bool,
    pub config_version: u32,
}

// =============================================================================
// Entity Events (server -> replicas)
// =============================================================================

/// Authoritative events for one sheep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SheepEvent {
    /// Root message: binds the object slot to a behaviour lifetime
    SyncIdentity { entity_id: EntityId },
    /// Tells replicas which config version the entity runs with
    InitializeConfig { entity_id: EntityId, config_version: u32 },
    ChangeBehaviourState { entity_id: EntityId, state: BehaviourState },
    ChangeTarget { entity_id: EntityId, target: Option<PlayerId> },
    DoAnimation { entity_id: EntityId, param: AnimParam },
    SetAnimationBool { entity_id: EntityId, param: AnimParam, value: bool },
    EnterDeathState { entity_id: EntityId },
    StartTransformation { entity_id: EntityId },
    IncreaseFear { entity_id: EntityId },
    /// Response to `SheepAck::RequestSnapshot`
    Snapshot { snapshot: SheepSnapshot },
}

impl SheepEvent {
    /// Identifier the event is scoped to
    pub fn entity_id(&self) -> &EntityId {
        match self {
            Self::SyncIdentity { entity_id }
            | Self::InitializeConfig { entity_id, .. }
            | Self::ChangeBehaviourState { entity_id, .. }
            | Self::ChangeTarget { entity_id, .. }
            | Self::DoAnimation { entity_id, .. }
            | Self::SetAnimationBool { entity_id, .. }
            | Self::EnterDeathState { entity_id }
            | Self::StartTransformation { entity_id }
            | Self::IncreaseFear { entity_id } => entity_id,
            Self::Snapshot { snapshot } => &snapshot.entity_id,
        }
    }

    pub fn channel(&self) -> Channel {
        match self {
            Self::SyncIdentity { .. } => Channel::Identity,
            Self::InitializeConfig { .. } => Channel::Config,
            Self::ChangeBehaviourState { .. }
            | Self::EnterDeathState { .. }
            | Self::StartTransformation { .. } => Channel::State,
            Self::ChangeTarget { .. } => Channel::Target,
            Self::DoAnimation { .. }
            | Self::SetAnimationBool { .. }
            | Self::IncreaseFear { .. } => Channel::Animation,
            Self::Snapshot { .. } => Channel::Snapshot,
        }
    }
}

/// Narrow replica -> server messages for one sheep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SheepAck {
    IdleCycleComplete { entity_id: EntityId },
    TransformationComplete { entity_id: EntityId },
    /// Late joiner pull; answered from current state
    RequestSnapshot,
}

// =============================================================================
// Client -> Server Messages
// =============================================================================

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Join the session
    Join {
        protocol_version: u32,
    },

    /// Leave gracefully
    Leave,

    /// State of the player this peer controls (sent frequently)
    PlayerUpdate {
        position: Vec3,
        alive: bool,
        in_exclusion_zone: bool,
        immersion: f32,
    },

    /// Acknowledgement or request addressed to one sheep
    Sheep {
        object: ObjectId,
        ack: SheepAck,
    },

    /// The controlled player struck a sheep
    HitSheep {
        object: ObjectId,
        force: i32,
    },

    /// A noise made near the controlled player
    Noise {
        position: Vec3,
        loudness: f32,
        tag: i32,
        repeat_count: u32,
    },

    /// Ask for the live configuration
    RequestConfigSync,

    /// Developer command, e.g. "/state 1 4"
    Command {
        content: String,
    },
}

// =============================================================================
// Server -> Client Messages
// =============================================================================

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Join accepted
    Welcome {
        player_id: PlayerId,
        /// The owner replica is the only one whose acknowledgements count
        owner: bool,
    },

    /// Join refused
    JoinRejected {
        reason: String,
    },

    /// Authoritative event for one sheep
    Sheep {
        object: ObjectId,
        event: SheepEvent,
    },

    /// Rendered transform of an entity (sent every server tick)
    EntityTransform {
        object: ObjectId,
        position: Vec3,
        forward: Vec3,
    },

    /// Entity removed
    EntityDespawn {
        object: ObjectId,
    },

    /// Versioned configuration snapshot (bincode encoded `SheepConfig`)
    ConfigSync {
        version: u32,
        payload: Vec<u8>,
    },

    /// Reply to a developer command
    CommandResult {
        success: bool,
        message: String,
    },
}

// =============================================================================
// Network Channels
// =============================================================================

/// Named channels. Delivery is ordered within a channel only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Session,
    Identity,
    State,
    Target,
    Animation,
    Snapshot,
    Config,
    Transform,
    /// Player actions that feed the behaviour (hits, noise)
    Input,
}

impl ServerMessage {
    pub fn channel(&self) -> Channel {
        match self {
            Self::Welcome { .. }
            | Self::JoinRejected { .. }
            | Self::EntityDespawn { .. }
            | Self::CommandResult { .. } => Channel::Session,
            Self::Sheep { event, .. } => event.channel(),
            Self::EntityTransform { .. } => Channel::Transform,
            Self::ConfigSync { .. } => Channel::Config,
        }
    }
}

impl ClientMessage {
    pub fn channel(&self) -> Channel {
        match self {
            Self::Join { .. } | Self::Leave | Self::PlayerUpdate { .. } | Self::Command { .. } => {
                Channel::Session
            }
            Self::HitSheep { .. } | Self::Noise { .. } => Channel::Input,
            Self::Sheep { ack: SheepAck::RequestSnapshot, .. } => Channel::Snapshot,
            Self::Sheep { .. } => Channel::State,
            Self::RequestConfigSync => Channel::Config,
        }
    }
}

// =============================================================================
// Serialization helpers
// =============================================================================

/// Failure to encode or decode a payload
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("payload serialization failed: {0}")]
    Codec(#[from] bincode::Error),
    #[error("message is {size} bytes, over the {limit} byte packet limit")]
    TooLarge { size: usize, limit: usize },
}

/// Encode a message that must fit in one datagram
fn encode_packet<T: Serialize>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    let data = bincode::serialize(msg)?;
    if data.len() > MAX_PACKET_SIZE {
        return Err(ProtocolError::TooLarge { size: data.len(), limit: MAX_PACKET_SIZE });
    }
    Ok(data)
}

impl ClientMessage {
    pub fn serialize(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_packet(self)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(bincode::deserialize(data)?)
    }
}

impl ServerMessage {
    pub fn serialize(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_packet(self)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(bincode::deserialize(data)?)
    }
}
