pub mod protocol;
pub mod animation;
pub mod config;
pub mod math;

pub use protocol::*;
pub use config::*;
pub use math::Vec3;
