//! Nonce construction for XChaCha20-Poly1305
//!
//! Nonces are 24 bytes:
//! - Path ID (4 bytes)
//! - Direction (1 byte): 0x00 = RID→RRD, 0x01 = RRD→RID
//! - Zeros (11 bytes)
//! - Counter (8 bytes)
//!
//! The authentication-key derived keys are shared by every path of an
//! attempt, so the path id keeps their nonces disjoint.

use crate::core::{AEAD_NONCE_SIZE, NONCE_DIR_INITIATOR, NONCE_DIR_RESPONDER, PathId, Role};

/// Direction of communication for nonce construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// RID → RRD (0x00)
    InitiatorToResponder,
    /// RRD → RID (0x01)
    ResponderToInitiator,
}

impl Direction {
    /// Direction of frames sent by `role`.
    pub fn outbound(role: Role) -> Self {
        match role {
            Role::Initiator => Direction::InitiatorToResponder,
            Role::Responder => Direction::ResponderToInitiator,
        }
    }

    /// Get the byte representation.
    pub fn as_byte(self) -> u8 {
        match self {
            Direction::InitiatorToResponder => NONCE_DIR_INITIATOR,
            Direction::ResponderToInitiator => NONCE_DIR_RESPONDER,
        }
    }

    /// Get the opposite direction.
    pub fn opposite(self) -> Self {
        match self {
            Direction::InitiatorToResponder => Direction::ResponderToInitiator,
            Direction::ResponderToInitiator => Direction::InitiatorToResponder,
        }
    }
}

/// Construct a 24-byte XChaCha20-Poly1305 nonce.
///
/// Layout:
/// ```text
/// [ pid (4) | direction (1) | zeros (11) | counter (8) ]
/// ```
pub fn construct_nonce(pid: PathId, direction: Direction, counter: u64) -> [u8; AEAD_NONCE_SIZE] {
    let mut nonce = [0u8; AEAD_NONCE_SIZE];
    nonce[0..4].copy_from_slice(&pid.to_le_bytes());
    nonce[4] = direction.as_byte();
    nonce[16..24].copy_from_slice(&counter.to_le_bytes());
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_construction() {
        let nonce = construct_nonce(7, Direction::ResponderToInitiator, 42);

        assert_eq!(&nonce[0..4], &7u32.to_le_bytes());
        assert_eq!(nonce[4], 0x01);
        assert_eq!(&nonce[5..16], &[0u8; 11]);
        assert_eq!(&nonce[16..24], &42u64.to_le_bytes());
    }

    #[test]
    fn test_nonce_fixture() {
        let nonce = construct_nonce(0x0403_0201, Direction::InitiatorToResponder, 1);
        assert_eq!(
            hex::encode(nonce),
            concat!("01020304", "00", "0000000000000000000000", "0100000000000000")
        );
    }

    #[test]
    fn test_paths_do_not_share_nonces() {
        let a = construct_nonce(1, Direction::InitiatorToResponder, 0);
        let b = construct_nonce(2, Direction::InitiatorToResponder, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_direction() {
        assert_eq!(
            Direction::outbound(Role::Initiator),
            Direction::InitiatorToResponder
        );
        assert_eq!(
            Direction::outbound(Role::Responder).opposite(),
            Direction::InitiatorToResponder
        );
        assert_eq!(Direction::ResponderToInitiator.as_byte(), 0x01);
    }
}
