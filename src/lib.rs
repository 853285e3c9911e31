//! # Rendezvous Protocol
//!
//! Establishes an authenticated, encrypted byte stream between two devices
//! over one of several candidate transport paths. All paths are raced, one is
//! nominated and the rest are torn down, with backpressure on every path and
//! one cancellation signal for the whole attempt.
//!
//! - **Single-shot**: a failed attempt surfaces exactly one typed error and
//!   releases every path; retry with fresh paths and a fresh key
//! - **Backpressure**: writes stall between a high and a low watermark, and
//!   inbound frames from all paths funnel through a single-slot queue
//! - **Pluggable engine**: the cryptographic handshake sits behind
//!   [`ProtocolEngine`](engine::ProtocolEngine); a reference engine ships
//!   with the `engine` feature
//!
//! ## Feature Flags
//!
//! - `websocket` (default): WebSocket-backed paths
//! - `websocket-tls`: `wss://` support for WebSocket paths
//! - `engine` (default): Reference protocol engine (X25519, HKDF-SHA256,
//!   XChaCha20-Poly1305, BLAKE2s)
//!
//! ## Modules
//!
//! - [`core`]: Types, constants, errors and the abort signal (always included)
//! - [`transport`]: Paths, backpressure and the path multiplexer
//! - [`engine`]: The engine contract, plus the reference engine
//! - [`crypto`]: Primitives of the reference engine (requires `engine`)
//! - [`connection`]: Handshake driver and the nominated connection
//!
//! ## Example Usage
//!
//! ```rust
//! use rendezvous_protocol::prelude::*;
//! use rendezvous_protocol::transport::memory;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> RendezvousResult<()> {
//! let ak = AuthenticationKey::generate();
//! let (near, far) = memory::pair(1, 8);
//!
//! let initiator = RendezvousConfig::builder(Role::Initiator, ak.clone()).build()?;
//! let responder = RendezvousConfig::builder(Role::Responder, ak).build()?;
//!
//! let (rid, rrd) = tokio::join!(
//!     Rendezvous::new(initiator).with_paths([near]).connect_default(),
//!     Rendezvous::new(responder).with_paths([far]).connect_default(),
//! );
//! let (mut rid, mut rrd) = (rid?, rrd?);
//! assert_eq!(rid.rph, rrd.rph);
//!
//! rid.connection.send(b"hello").await?;
//! assert_eq!(rrd.connection.recv().await?, Some(b"hello".to_vec()));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Transport layer
pub mod transport;

// Engine contract (reference engine feature-gated inside)
pub mod engine;

// Reference engine crypto (feature-gated)
#[cfg(feature = "engine")]
#[cfg_attr(docsrs, doc(cfg(feature = "engine")))]
pub mod crypto;

// Handshake driver and connection
pub mod connection;

#[cfg(test)]
mod testing;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core types, errors and the abort signal
    pub use crate::core::*;

    pub use crate::connection::{
        ConnectResult, NominationPolicy, PathConfig, Rendezvous, RendezvousConfig,
        RendezvousConnection, RendezvousReader, RendezvousWriter,
    };
    pub use crate::engine::{
        EngineSetup, OutgoingFrame, PathProcessResult, PathStateUpdate, ProtocolEngine,
    };
    pub use crate::transport::{BackpressureConfig, CloseCause, PathMultiplexer, SinglePath};

    #[cfg(feature = "engine")]
    pub use crate::engine::RendezvousProtocol;

    #[cfg(feature = "websocket")]
    pub use crate::transport::WebSocketPath;
}

// Re-export commonly used items at crate root
pub use crate::connection::{ConnectResult, Rendezvous, RendezvousConfig, RendezvousConnection};
pub use crate::core::{AbortCause, AbortRaiser, RendezvousError, RendezvousResult};
