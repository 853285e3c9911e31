//! Single-fire cancellation signal shared by every component of one
//! connection attempt.
//!
//! Any component may raise it, all components observe it. Only the first
//! raise takes effect: the cause is recorded once and later raises are
//! no-ops, so listeners never see the terminal state twice.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::types::PathId;

/// Why a connection attempt (or established connection) was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortCause {
    /// Aborted by the caller.
    Cancelled,
    /// Closed locally after use, or the consumer went away.
    Closed,
    /// Every candidate path failed before nomination.
    NoPathsRemaining,
    /// The protocol engine rejected a frame or a protocol rule was broken.
    ProtocolError,
    /// The nominated path failed.
    PathFailed(PathId),
}

impl fmt::Display for AbortCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortCause::Cancelled => f.write_str("cancelled"),
            AbortCause::Closed => f.write_str("closed"),
            AbortCause::NoPathsRemaining => f.write_str("no paths remaining"),
            AbortCause::ProtocolError => f.write_str("protocol error"),
            AbortCause::PathFailed(pid) => write!(f, "path {pid} failed"),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    token: CancellationToken,
    cause: OnceLock<AbortCause>,
}

/// Broadcastable abort primitive.
///
/// Cloning yields another handle to the same signal.
#[derive(Debug, Clone, Default)]
pub struct AbortRaiser {
    inner: Arc<Inner>,
}

impl AbortRaiser {
    /// Create a new, not yet raised signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal.
    ///
    /// Returns `true` if this call raised it, `false` if it had already been
    /// raised (in which case the original cause is kept).
    pub fn raise(&self, cause: AbortCause) -> bool {
        if self.inner.cause.set(cause).is_err() {
            return false;
        }
        debug!(%cause, "Abort raised");
        self.inner.token.cancel();
        true
    }

    /// Whether the signal has been raised.
    pub fn is_aborted(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// The cause of the abort, if raised.
    pub fn cause(&self) -> Option<AbortCause> {
        self.inner.cause.get().copied()
    }

    /// Wait until the signal is raised and return its cause.
    pub async fn aborted(&self) -> AbortCause {
        self.inner.token.cancelled().await;
        self.cause().unwrap_or(AbortCause::Cancelled)
    }

    /// A token that is cancelled when the signal is raised.
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }
}
