//! Error types for the Rendezvous Protocol.
//!
//! Error text carries phase and path context only. Frame contents and key
//! material never end up in an error message.

use std::fmt;

use thiserror::Error;

use super::abort::AbortCause;
use super::types::{HandshakePhase, PathId};

/// Errors of a single transport path.
///
/// Recovered locally while other paths remain.
#[derive(Debug, Error)]
pub enum PathError {
    /// The path could not be established.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The path did not become ready in time.
    #[error("connect timed out")]
    ConnectTimeout,

    /// WebSocket protocol or I/O error.
    #[cfg(feature = "websocket")]
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// A text message arrived on a binary-only path.
    #[error("unexpected text message")]
    UnexpectedText,

    /// The path is closed.
    #[error("path closed")]
    Closed,

    /// The connection attempt was aborted while the path was in use.
    #[error("path aborted")]
    Aborted,
}

#[cfg(feature = "websocket")]
impl From<tokio_tungstenite::tungstenite::Error> for PathError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        PathError::WebSocket(Box::new(error))
    }
}

/// Errors in the crypto primitives.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (invalid tag or corrupted).
    #[error("AEAD decryption failed (invalid tag or corrupted)")]
    DecryptionFailed,

    /// Key derivation failed.
    #[error("key derivation failed")]
    KeyDerivationFailed,

    /// The peer's ephemeral key produced a non-contributory shared secret.
    #[error("non-contributory key exchange")]
    NonContributory,

    /// Nonce counter exhausted - path must terminate.
    #[error("nonce counter exhausted - path must terminate")]
    CounterExhaustion,
}

/// Errors raised by a protocol engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Frame could not be decoded.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    /// Frame length exceeds the accepted maximum.
    #[error("frame too large: {length} > {max}")]
    FrameTooLarge {
        /// Announced length.
        length: usize,
        /// Accepted maximum.
        max: usize,
    },

    /// Message not valid in the current path state.
    #[error("unexpected {message} message while {state}")]
    UnexpectedMessage {
        /// Message name.
        message: &'static str,
        /// Path state name.
        state: &'static str,
    },

    /// A handshake challenge was not answered correctly.
    #[error("challenge response mismatch")]
    ChallengeMismatch,

    /// The path is unknown or has been dropped.
    #[error("unknown path {0}")]
    UnknownPath(PathId),

    /// The path has not finished its handshake.
    #[error("path {0} is not ready to be nominated")]
    NotReady(PathId),

    /// Only the nominator may nominate.
    #[error("not the nominator")]
    NotNominator,

    /// A path has already been nominated.
    #[error("a path has already been nominated")]
    AlreadyNominated,

    /// No path has been nominated yet.
    #[error("no path has been nominated")]
    NotNominated,

    /// The engine was set up incorrectly.
    #[error("invalid setup: {0}")]
    InvalidSetup(&'static str),

    /// Crypto failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Classification of a [`RendezvousError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed frame, authentication failure or protocol violation.
    EngineRejected,
    /// A path closed abnormally or never connected.
    TransportFailure,
    /// Every candidate path failed before nomination.
    NoPathsRemaining,
    /// Aborted from outside (or closed by the caller).
    Cancelled,
    /// Invalid configuration.
    Configuration,
}

/// Top-level rendezvous errors.
///
/// Every fatal error is surfaced as exactly one of these. A failed attempt
/// must be restarted by the caller with fresh paths and a fresh key.
#[derive(Debug, Error)]
pub enum RendezvousError {
    /// The protocol engine rejected an operation.
    #[error("engine rejected {operation} while {phase}{}: {source}", PathContext(*pid))]
    Engine {
        /// Phase the error occurred in.
        phase: HandshakePhase,
        /// Path the operation was keyed on, if any.
        pid: Option<PathId>,
        /// Engine operation that failed.
        operation: &'static str,
        /// Engine error.
        #[source]
        source: EngineError,
    },

    /// A frame arrived where the protocol does not allow one.
    #[error("protocol violation while {phase} (pid={pid}): {reason}")]
    ProtocolViolation {
        /// Phase the violation occurred in.
        phase: HandshakePhase,
        /// Offending path.
        pid: PathId,
        /// What was violated.
        reason: &'static str,
    },

    /// The engine returned a result shape the current phase never expects.
    #[error("engine contract violated while {phase}: {reason}")]
    ContractViolation {
        /// Phase the violation occurred in.
        phase: HandshakePhase,
        /// What was violated.
        reason: &'static str,
    },

    /// A path failed in a way that cannot be recovered from.
    #[error("transport failure on path {pid}: {source}")]
    Transport {
        /// Failed path.
        pid: PathId,
        /// Path error.
        #[source]
        source: PathError,
    },

    /// The path chosen by the engine was pruned before it could be nominated.
    #[error("nominated path {pid} is no longer available")]
    NominatedPathLost {
        /// Nominated path.
        pid: PathId,
    },

    /// Every candidate path failed before nomination.
    #[error("all paths closed before nomination")]
    NoPathsRemaining,

    /// Aborted by the caller.
    #[error("rendezvous cancelled")]
    Cancelled,

    /// The connection was closed.
    #[error("rendezvous connection closed")]
    Closed,

    /// Aborted by another component.
    #[error("rendezvous aborted: {0}")]
    Aborted(AbortCause),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Formats ` (pid=N)` when a path is known.
struct PathContext(Option<PathId>);

impl fmt::Display for PathContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(pid) => write!(f, " (pid={pid})"),
            None => Ok(()),
        }
    }
}

impl RendezvousError {
    /// Map an observed abort to the error surfaced to the caller.
    pub fn from_abort(cause: AbortCause) -> Self {
        match cause {
            AbortCause::Cancelled => RendezvousError::Cancelled,
            AbortCause::Closed => RendezvousError::Closed,
            AbortCause::NoPathsRemaining => RendezvousError::NoPathsRemaining,
            cause => RendezvousError::Aborted(cause),
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RendezvousError::Engine { .. }
            | RendezvousError::ProtocolViolation { .. }
            | RendezvousError::ContractViolation { .. }
            | RendezvousError::Aborted(AbortCause::ProtocolError) => ErrorKind::EngineRejected,
            RendezvousError::Transport { .. }
            | RendezvousError::NominatedPathLost { .. }
            | RendezvousError::Aborted(AbortCause::PathFailed(_)) => ErrorKind::TransportFailure,
            RendezvousError::NoPathsRemaining
            | RendezvousError::Aborted(AbortCause::NoPathsRemaining) => {
                ErrorKind::NoPathsRemaining
            }
            RendezvousError::Cancelled
            | RendezvousError::Closed
            | RendezvousError::Aborted(AbortCause::Cancelled | AbortCause::Closed) => {
                ErrorKind::Cancelled
            }
            RendezvousError::Config(_) => ErrorKind::Configuration,
        }
    }

    /// The abort cause this error raises when it ends an attempt.
    pub fn abort_cause(&self) -> AbortCause {
        match self {
            RendezvousError::Aborted(cause) => *cause,
            RendezvousError::Transport { pid, .. } | RendezvousError::NominatedPathLost { pid } => {
                AbortCause::PathFailed(*pid)
            }
            _ => match self.kind() {
                ErrorKind::EngineRejected => AbortCause::ProtocolError,
                ErrorKind::NoPathsRemaining => AbortCause::NoPathsRemaining,
                ErrorKind::TransportFailure => AbortCause::ProtocolError,
                ErrorKind::Cancelled | ErrorKind::Configuration => AbortCause::Cancelled,
            },
        }
    }

    /// Check if the whole attempt may be retried with fresh paths and key.
    ///
    /// Configuration errors will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Configuration)
    }

    /// Check if this error is a security-relevant rejection.
    pub fn is_security_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::EngineRejected)
    }
}

/// Result type for rendezvous operations.
pub type RendezvousResult<T> = Result<T, RendezvousError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let engine = RendezvousError::Engine {
            phase: HandshakePhase::Nominating,
            pid: Some(1),
            operation: "process frame",
            source: EngineError::Crypto(CryptoError::DecryptionFailed),
        };
        assert_eq!(engine.kind(), ErrorKind::EngineRejected);
        assert!(engine.is_security_error());

        let transport = RendezvousError::Transport {
            pid: 2,
            source: PathError::Closed,
        };
        assert_eq!(transport.kind(), ErrorKind::TransportFailure);
        assert!(!transport.is_security_error());

        assert_eq!(
            RendezvousError::NoPathsRemaining.kind(),
            ErrorKind::NoPathsRemaining
        );
        assert_eq!(RendezvousError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            RendezvousError::Config("no paths".into()).kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn test_from_abort() {
        assert!(matches!(
            RendezvousError::from_abort(AbortCause::Cancelled),
            RendezvousError::Cancelled
        ));
        assert!(matches!(
            RendezvousError::from_abort(AbortCause::NoPathsRemaining),
            RendezvousError::NoPathsRemaining
        ));
        let failed = RendezvousError::from_abort(AbortCause::PathFailed(4));
        assert_eq!(failed.kind(), ErrorKind::TransportFailure);
        assert_eq!(failed.abort_cause(), AbortCause::PathFailed(4));
    }

    #[test]
    fn test_abort_cause_for_errors() {
        let violation = RendezvousError::ProtocolViolation {
            phase: HandshakePhase::Nominated,
            pid: 9,
            reason: "frame received on a non-nominated path",
        };
        assert_eq!(violation.abort_cause(), AbortCause::ProtocolError);
        assert_eq!(
            RendezvousError::NoPathsRemaining.abort_cause(),
            AbortCause::NoPathsRemaining
        );
        assert_eq!(
            RendezvousError::NominatedPathLost { pid: 3 }.abort_cause(),
            AbortCause::PathFailed(3)
        );
    }

    #[test]
    fn test_retryable() {
        assert!(RendezvousError::NoPathsRemaining.is_retryable());
        assert!(RendezvousError::Cancelled.is_retryable());
        assert!(!RendezvousError::Config("bad".into()).is_retryable());
    }

    #[test]
    fn test_error_text_has_context() {
        let error = RendezvousError::Engine {
            phase: HandshakePhase::Nominating,
            pid: Some(7),
            operation: "add chunk",
            source: EngineError::UnknownPath(7),
        };
        let text = error.to_string();
        assert!(text.contains("nominating"));
        assert!(text.contains("(pid=7)"));
        assert!(!text.contains("Some"));

        let error = RendezvousError::Engine {
            phase: HandshakePhase::Initializing,
            pid: None,
            operation: "create engine",
            source: EngineError::InvalidSetup("no paths"),
        };
        assert_eq!(
            error.to_string(),
            "engine rejected create engine while initializing: invalid setup: no paths"
        );
        assert!(text.contains("add chunk"));
    }
}
