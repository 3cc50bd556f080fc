//! An [EDHOC](https://datatracker.ietf.org/doc/rfc9528/) engine with an
//! [OSCORE](https://tools.ietf.org/html/rfc8613) transport layer, built to
//! be driven by a protocol state fuzzer.
//!
//! Unlike a regular implementation, the engine can write and read any EDHOC
//! message at any point of a session. Missing handshake material is replaced
//! with placeholders, so that out of order messages are still produced and
//! rejected inputs never end the run.
//!
//! The [`edhoc`] module contains the message processor and its sessions,
//! [`oscore`] the security contexts derived from them and [`transport`] the
//! callbacks of a CoAP stack carrying EDHOC message 3 together with the
//! first OSCORE request.
//!
//! Several revisions of the EDHOC draft are supported, selected with
//! [`edhoc::config::ProtocolVersion`].

pub mod aead;
pub mod cbor;
pub mod edhoc;
pub mod oscore;
pub mod transport;
