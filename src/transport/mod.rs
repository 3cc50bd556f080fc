//! The glue between the EDHOC engine and a CoAP stack.
//!
//! Holds the combined EDHOC+OSCORE payload codec, the queues that report CoAP
//! exchanges to the driver and the layer callbacks the stack invokes.

pub mod combined;
mod error;
mod exchange;
mod layer;

pub use error::Error;
pub use exchange::{CoapExchangeInfo, CoapExchanger, ExchangeQueue};
pub use layer::{EdhocLayer, EDHOC_OPTION};

/// The result type for the `transport` module.
pub type Result<T> = std::result::Result<T, Error>;
