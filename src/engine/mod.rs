//! Protocol engine contract.
//!
//! The engine performs all cryptography of the rendezvous and is driven
//! purely by calls: the connection layer feeds it inbound chunks keyed by
//! path, writes back whatever it asks to send and reacts to its state
//! updates. It never touches a transport itself.

use std::time::Duration;

use crate::core::{AuthenticationKey, EngineError, PathId, Role, RoomPhraseHash};

#[cfg(feature = "engine")]
mod frame;
#[cfg(feature = "engine")]
mod protocol;

#[cfg(feature = "engine")]
pub use frame::{FrameDecoder, Message, encode_frame};
#[cfg(feature = "engine")]
pub use protocol::RendezvousProtocol;

/// A frame the engine wants sent on a specific path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFrame {
    /// Path to send on.
    pub pid: PathId,
    /// Encoded frame.
    pub frame: Vec<u8>,
}

/// Handshake progress of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStateUpdate {
    /// The path finished its handshake and may be nominated.
    AwaitingNominate {
        /// Round-trip time measured during the handshake.
        measured_rtt: Duration,
    },
    /// The path has been nominated.
    Nominated {
        /// Rendezvous Path Hash of the nominated path.
        rph: RoomPhraseHash,
    },
}

/// Outcome of processing one frame.
///
/// Each slot is independent; which combination is valid depends on the
/// handshake phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathProcessResult {
    /// Path state transition.
    pub state_update: Option<PathStateUpdate>,
    /// Frame to send back on the same path.
    pub outgoing_frame: Option<Vec<u8>>,
    /// Decrypted upper layer protocol data.
    pub incoming_ulp_data: Option<Vec<u8>>,
}

impl PathProcessResult {
    /// A result carrying only an outgoing frame.
    pub fn outgoing(frame: Vec<u8>) -> Self {
        Self {
            outgoing_frame: Some(frame),
            ..Self::default()
        }
    }

    /// A result carrying only ULP data.
    pub fn ulp(data: Vec<u8>) -> Self {
        Self {
            incoming_ulp_data: Some(data),
            ..Self::default()
        }
    }

    /// A result carrying only a state update.
    pub fn update(update: PathStateUpdate) -> Self {
        Self {
            state_update: Some(update),
            ..Self::default()
        }
    }

    /// Add a state update.
    pub fn with_update(mut self, update: PathStateUpdate) -> Self {
        self.state_update = Some(update);
        self
    }

    /// Whether no slot is set.
    pub fn is_empty(&self) -> bool {
        self.state_update.is_none()
            && self.outgoing_frame.is_none()
            && self.incoming_ulp_data.is_none()
    }
}

/// Everything an engine is constructed from.
#[derive(Debug, Clone, Copy)]
pub struct EngineSetup<'a> {
    /// Role of this device.
    pub role: Role,
    /// Whether this device decides which path is nominated.
    pub is_nominator: bool,
    /// Rendezvous authentication key.
    pub ak: &'a AuthenticationKey,
    /// Candidate paths.
    pub pids: &'a [PathId],
}

/// The rendezvous protocol engine.
///
/// Calls are strictly sequential. Any `Err` is fatal for the attempt.
pub trait ProtocolEngine: Send {
    /// Frames to send before anything has been received.
    fn initial_outgoing_frames(&mut self) -> Result<Vec<OutgoingFrame>, EngineError>;

    /// Buffer an inbound chunk of `pid`.
    fn add_chunk(&mut self, pid: PathId, chunk: &[u8]) -> Result<(), EngineError>;

    /// Process the next complete buffered frame of `pid`.
    ///
    /// `Ok(None)` means no complete frame is buffered yet.
    fn process_frame(&mut self, pid: PathId) -> Result<Option<PathProcessResult>, EngineError>;

    /// Nominate `pid`. Only valid for the nominator.
    fn nominate_path(&mut self, pid: PathId) -> Result<PathProcessResult, EngineError>;

    /// Whether this side decides which path is nominated.
    fn is_nominator(&self) -> bool;

    /// Encrypt ULP data into a frame for the nominated path.
    fn create_ulp_frame(&mut self, data: &[u8]) -> Result<PathProcessResult, EngineError>;

    /// The nominated path, once nominated.
    fn nominated_path(&self) -> Option<PathId>;
}
