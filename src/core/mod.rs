//! Rendezvous Protocol - Core types, constants, errors and the abort signal.
//!
//! Everything in here is shared by the transport, engine and connection
//! layers and has no I/O of its own.

mod abort;
mod constants;
mod error;
mod types;

pub use abort::*;
pub use constants::*;
pub use error::*;
pub use types::*;
