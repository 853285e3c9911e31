//! Rendezvous Protocol - Connection Layer
//!
//! Drives a [`ProtocolEngine`](crate::engine::ProtocolEngine) over a
//! [`PathMultiplexer`](crate::transport::PathMultiplexer) until one path is
//! nominated, then relays ULP data over that path.
//!
//! ```rust,no_run
//! use rendezvous_protocol::prelude::*;
//!
//! # async fn run() -> RendezvousResult<()> {
//! let config = RendezvousConfig::builder(Role::Initiator, AuthenticationKey::generate())
//!     .path(1, "wss://relay-a.example/rendezvous")
//!     .path(2, "wss://relay-b.example/rendezvous")
//!     .build()?;
//!
//! let ConnectResult { rph, mut connection } = Rendezvous::new(config)
//!     .connect_websockets()
//!     .await?
//!     .connect_default()
//!     .await?;
//! println!("confirm {rph:?}");
//!
//! connection.send(b"hello").await?;
//! while let Some(data) = connection.recv().await? {
//!     println!("received {} bytes", data.len());
//! }
//! # Ok(())
//! # }
//! ```

mod config;
#[allow(clippy::module_inception)]
mod connection;
mod handshake;
mod nomination;

pub use config::{NominationPolicy, PathConfig, RendezvousConfig, RendezvousConfigBuilder};
pub use connection::{
    ConnectResult, Rendezvous, RendezvousConnection, RendezvousReader, RendezvousWriter,
};
pub use handshake::{Handshake, HandshakeAction, HandshakeEvent};
