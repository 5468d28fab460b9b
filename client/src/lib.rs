//! Presentation side of the red sheep: replicas that mirror the
//! authoritative sheep and drive a host's animator.

pub mod fear;
pub mod host;
pub mod network;
pub mod replica;
pub mod session;
pub mod transformation;

pub use host::{Effect, Observer, PresentationHost, Rig};
pub use network::{ConnectionState, NetworkClient};
pub use replica::SheepReplica;
pub use session::ClientSession;
