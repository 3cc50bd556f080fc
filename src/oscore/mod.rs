//! OSCORE security contexts for protecting CoAP messages with the keys
//! exported from EDHOC.

mod context;
mod db;
mod error;
pub mod util;

pub use context::{
    SecurityContext, DEFAULT_MAX_UNFRAGMENTED_SIZE, DEFAULT_REPLAY_WINDOW,
};
pub use db::ContextDb;
pub use error::Error;

/// The result type for the `oscore` module.
pub type Result<T> = std::result::Result<T, Error>;
