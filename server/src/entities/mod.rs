//! Server-side entity definitions.

pub mod annoyance;
mod movement;
mod sheep;

pub use annoyance::AnnoyanceMeter;
pub use sheep::SheepController;
