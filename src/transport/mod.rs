//! Rendezvous Protocol - Transport Layer
//!
//! Everything below the protocol engine that moves opaque chunks:
//!
//! - **Paths**: [`SinglePath`], one bidirectional chunk channel with a reader,
//!   a writer and a close handle
//! - **Backpressure**: [`WriteBuffer`] stalls writers above a high watermark
//!   until the buffered amount drains below a low watermark
//! - **WebSocket paths**: [`WebSocketPath`] (requires `websocket` feature)
//! - **In-memory paths**: [`memory::pair`] for loopback setups and tests
//! - **Multiplexing**: [`PathMultiplexer`] races candidate paths over one
//!   event queue until one is nominated
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Rendezvous Connection            │
//! ├─────────────────────────────────────────┤
//! │         Path Multiplexer                │  ← This module
//! │   pumps, single-slot queue, nominate    │
//! ├─────────────────────────────────────────┤
//! │    Single Paths (WebSocket, memory)     │  ← This module
//! └─────────────────────────────────────────┘
//! ```

mod backpressure;
pub mod memory;
mod multiplex;
mod path;
#[cfg(feature = "websocket")]
mod websocket;

pub use backpressure::{BackpressureConfig, WriteBuffer};
pub use multiplex::{NominatedPath, NominatedReader, NominatedWriter, PathMultiplexer};
pub use path::{CloseCause, PathClose, PathCloser, PathReader, PathWrite, PathWriter, SinglePath};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketCloser, WebSocketPath};
