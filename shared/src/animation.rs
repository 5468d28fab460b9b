//! Animator parameter handles.
//!
//! Parameters are addressed by a stable symbolic name hashed to a 32-bit
//! handle once at startup. Both sides hash the same names, so only the handle
//! crosses the wire.

use serde::{Deserialize, Serialize};

/// Hashed animator parameter handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnimParam(pub u32);

impl AnimParam {
    /// Hash a parameter name (FNV-1a, 32 bit)
    pub const fn from_name(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut hash: u32 = 0x811c_9dc5;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u32;
            hash = hash.wrapping_mul(0x0100_0193);
            i += 1;
        }
        Self(hash)
    }

    /// Human readable name for the parameters this crate knows about
    pub fn name(&self) -> Option<&'static str> {
        ALL_PARAMS
            .iter()
            .find(|(param, _)| param == self)
            .map(|(_, name)| *name)
    }
}

pub const WALKING: AnimParam = AnimParam::from_name("Walking");
pub const WALK_SPEED: AnimParam = AnimParam::from_name("WalkSpeed");
pub const TRANSFORMATION: AnimParam = AnimParam::from_name("Transformation");
pub const TRANSFORMATION_END: AnimParam = AnimParam::from_name("TransformationEnd");
pub const IDLE_1: AnimParam = AnimParam::from_name("Idle1");
pub const IDLE_2: AnimParam = AnimParam::from_name("Idle2");
pub const IDLE_3: AnimParam = AnimParam::from_name("Idle3");
pub const ATTACK: AnimParam = AnimParam::from_name("Attack");
pub const DEAD: AnimParam = AnimParam::from_name("Dead");

const ALL_PARAMS: [(AnimParam, &str); 9] = [
    (WALKING, "Walking"),
    (WALK_SPEED, "WalkSpeed"),
    (TRANSFORMATION, "Transformation"),
    (TRANSFORMATION_END, "TransformationEnd"),
    (IDLE_1, "Idle1"),
    (IDLE_2, "Idle2"),
    (IDLE_3, "Idle3"),
    (ATTACK, "Attack"),
    (DEAD, "Dead"),
];

/// Idle animation variants, picked at random by the server
pub const IDLE_ANIMATIONS: [AnimParam; 3] = [IDLE_1, IDLE_2, IDLE_3];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_handles_are_distinct() {
        let handles: HashSet<AnimParam> = ALL_PARAMS.iter().map(|(p, _)| *p).collect();
        assert_eq!(handles.len(), ALL_PARAMS.len());
    }

    #[test]
    fn test_hash_is_stable() {
        // FNV-1a of the empty string is the offset basis
        assert_eq!(AnimParam::from_name("").0, 0x811c_9dc5);
        assert_eq!(AnimParam::from_name("Walking"), WALKING);
        assert_eq!(WALKING.name(), Some("Walking"));
        assert_eq!(AnimParam(7).name(), None);
    }
}
