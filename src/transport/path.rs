//! The single-path abstraction every transport implements.
//!
//! A path is a duplex byte stream with a numeric identity and an explicit,
//! idempotent close. Inbound data arrives as opaque chunks; framing is
//! restored by the protocol engine.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::core::{AbortCause, PathError, PathId};

/// Inbound side of a path.
pub type PathReader = BoxStream<'static, Result<Vec<u8>, PathError>>;

/// Outbound side of a path.
pub type PathWriter = Box<dyn PathWrite>;

/// Close handle of a path.
pub type PathCloser = Arc<dyn PathClose>;

/// Outbound byte sink of a path.
#[async_trait]
pub trait PathWrite: Send {
    /// Write a chunk.
    ///
    /// MUST NOT resolve before the transport has applied enough backpressure
    /// to avoid unbounded buffering, and MUST fail rather than hang once the
    /// path is closed.
    async fn write(&mut self, chunk: Vec<u8>) -> Result<(), PathError>;
}

/// Close operation of a path.
///
/// Fire-and-forget. Calling it more than once has no further effect.
pub trait PathClose: Send + Sync {
    /// Close the path, reporting `cause` to the remote side where possible.
    fn close(&self, cause: CloseCause);
}

/// Reason reported to the remote side when a path is closed.
///
/// Mirrors the rendezvous WebSocket close codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloseCause {
    /// Normal closure (e.g. path pruned after nomination).
    #[default]
    Normal,
    /// Rendezvous protocol error.
    ProtocolError,
    /// The other device did not connect in time.
    InitTimeout,
    /// The other device disconnected.
    OtherDeviceDisconnected,
    /// Upper layer protocol error.
    UlpError,
}

impl CloseCause {
    /// WebSocket close code.
    pub fn code(self) -> u16 {
        match self {
            CloseCause::Normal => 1000,
            CloseCause::ProtocolError => 4000,
            CloseCause::InitTimeout => 4003,
            CloseCause::OtherDeviceDisconnected => 4004,
            CloseCause::UlpError => 4100,
        }
    }

    /// Human-readable close reason.
    pub fn reason(self) -> &'static str {
        match self {
            CloseCause::Normal => "normal closure",
            CloseCause::ProtocolError => "rendezvous protocol error",
            CloseCause::InitTimeout => "init timeout reached",
            CloseCause::OtherDeviceDisconnected => "other device disconnected",
            CloseCause::UlpError => "upper layer protocol error",
        }
    }

    /// Map a received close code back to a cause.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1000 => Some(CloseCause::Normal),
            4000 => Some(CloseCause::ProtocolError),
            4003 => Some(CloseCause::InitTimeout),
            4004 => Some(CloseCause::OtherDeviceDisconnected),
            4100 => Some(CloseCause::UlpError),
            _ => None,
        }
    }
}

impl From<AbortCause> for CloseCause {
    fn from(cause: AbortCause) -> Self {
        match cause {
            AbortCause::ProtocolError => CloseCause::ProtocolError,
            _ => CloseCause::Normal,
        }
    }
}

/// A rendezvous path: a duplex byte stream with an identity.
pub struct SinglePath {
    pid: PathId,
    reader: PathReader,
    writer: PathWriter,
    closer: PathCloser,
}

impl SinglePath {
    /// Assemble a path from its parts.
    pub fn new(pid: PathId, reader: PathReader, writer: PathWriter, closer: PathCloser) -> Self {
        Self {
            pid,
            reader,
            writer,
            closer,
        }
    }

    /// Rendezvous Path ID.
    pub fn pid(&self) -> PathId {
        self.pid
    }

    /// Inbound stream.
    pub fn reader(&mut self) -> &mut PathReader {
        &mut self.reader
    }

    /// Outbound sink.
    pub fn writer(&mut self) -> &mut PathWriter {
        &mut self.writer
    }

    /// Close this path.
    pub fn close(&self, cause: CloseCause) {
        self.closer.close(cause);
    }

    /// Split into reader, writer and close handle.
    pub fn into_parts(self) -> (PathReader, PathWriter, PathCloser) {
        (self.reader, self.writer, self.closer)
    }
}

impl fmt::Debug for SinglePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinglePath").field("pid", &self.pid).finish()
    }
}
