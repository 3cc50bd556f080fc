use std::{error, fmt};

use coap_lite::{error as coap, CoapOption};

use crate::{aead::AeadError, cbor};

/// The catch-all error type for this module, mostly just wrapping errors from
/// various libraries.
#[derive(Debug)]
pub enum Error {
    /// CoAP message doesn't contain OSCORE option.
    NoOscoreOption,
    /// CoAP request doesn't have kid or piv.
    NoKidPiv,
    /// This message has been received already or is too old.
    ReplayDetected,
    /// Message contains an unsupported option.
    UnsupportedOption(CoapOption),
    /// The decrypted plaintext doesn't hold a CoAP code.
    EmptyPlaintext,
    /// No security context is installed for the URI.
    UnknownContext(String),
    /// Wraps errors from the `cbor` module.
    Cbor(cbor::CborError),
    /// Wraps errors from `hkdf`.
    Hkdf(hkdf::InvalidLength),
    /// Wraps errors from the `aead` module.
    Aead(AeadError),
    /// Wraps errors from `coap_lite`.
    Coap(coap::MessageError),
}

impl From<cbor::CborError> for Error {
    fn from(e: cbor::CborError) -> Error {
        Error::Cbor(e)
    }
}

impl From<hkdf::InvalidLength> for Error {
    fn from(e: hkdf::InvalidLength) -> Error {
        Error::Hkdf(e)
    }
}

impl From<AeadError> for Error {
    fn from(e: AeadError) -> Error {
        Error::Aead(e)
    }
}

impl From<coap::MessageError> for Error {
    fn from(e: coap::MessageError) -> Error {
        Error::Coap(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NoOscoreOption => {
                write!(f, "CoAP message doesn't contain OSCORE option")
            }
            Error::NoKidPiv => {
                write!(f, "CoAP request doesn't have kid or piv")
            }
            Error::ReplayDetected => {
                write!(f, "This message has been received already")
            }
            Error::UnsupportedOption(o) => {
                write!(f, "Message contains an unsupported option: {:?}", o)
            }
            Error::EmptyPlaintext => write!(f, "Decrypted plaintext is empty"),
            Error::UnknownContext(uri) => {
                write!(f, "No OSCORE security context for {}", uri)
            }
            Error::Cbor(e) => e.fmt(f),
            Error::Hkdf(e) => e.fmt(f),
            Error::Aead(e) => e.fmt(f),
            Error::Coap(e) => write!(f, "{:?}", e),
        }
    }
}

impl error::Error for Error {}
