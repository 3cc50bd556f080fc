//! A replayable EDHOC engine.
//!
//! Messages are built and read against a current session, whose handshake
//! material can be reset and whose OSCORE context is derived once the
//! exchange is complete. Every read operation reports plain success or
//! failure, every write operation the message or nothing, so that arbitrary
//! sequences of messages can be processed without aborting.

pub mod config;
pub mod cose;
pub mod crypto;
pub mod ead;
mod error;
pub mod keys;
pub mod processor;
pub mod registry;
pub mod session;
pub mod state;
pub mod suite;

pub use error::Error;

/// The result type for the `edhoc` module.
pub type Result<T> = std::result::Result<T, Error>;
