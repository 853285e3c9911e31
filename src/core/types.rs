//! Core types shared by every layer.

use std::fmt;

use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::constants::{AUTHENTICATION_KEY_SIZE, RPH_SIZE};

/// A Path ID uniquely identifies a rendezvous connection path.
///
/// Assigned by the caller; unique among the paths of one connection attempt.
pub type PathId = u32;

/// Role of this device in the Rendezvous Protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Rendezvous Initiator Device (RID), the device presenting the offer.
    Initiator,
    /// Rendezvous Responder Device (RRD), the device accepting the offer.
    Responder,
}

impl Role {
    /// Short protocol name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Initiator => "rid",
            Role::Responder => "rrd",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendezvous Authentication Key (AK).
///
/// Shared out-of-band between both devices (e.g. via a QR code). Zeroized on
/// drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AuthenticationKey([u8; AUTHENTICATION_KEY_SIZE]);

impl AuthenticationKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut key = [0u8; AUTHENTICATION_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Create from raw key material.
    pub fn from_bytes(key: [u8; AUTHENTICATION_KEY_SIZE]) -> Self {
        Self(key)
    }

    /// Get the raw key bytes.
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn as_bytes(&self) -> &[u8; AUTHENTICATION_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for AuthenticationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthenticationKey(..)")
    }
}

/// Rendezvous Path Hash (RPH).
///
/// The confirmation value both devices derive for the nominated path. Users
/// compare it (e.g. as a phrase) to rule out a man-in-the-middle.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomPhraseHash([u8; RPH_SIZE]);

impl RoomPhraseHash {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; RPH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; RPH_SIZE] {
        &self.0
    }
}

impl fmt::Debug for RoomPhraseHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoomPhraseHash(")?;
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

impl AsRef<[u8]> for RoomPhraseHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Phase of the connection-establishment state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Engine constructed, initial frames not yet sent.
    Initializing,
    /// Handshakes running over all paths until one is nominated.
    Nominating,
    /// A path has been nominated (terminal success).
    Nominated,
    /// The attempt failed (terminal failure).
    Aborted,
}

impl HandshakePhase {
    /// Whether the phase is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, HandshakePhase::Nominated | HandshakePhase::Aborted)
    }
}

impl fmt::Display for HandshakePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakePhase::Initializing => "initializing",
            HandshakePhase::Nominating => "nominating",
            HandshakePhase::Nominated => "nominated",
            HandshakePhase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}
