use std::{error, fmt};

use crate::cbor::CborError;

/// The errors of the send path of the EDHOC layer.
#[derive(Debug)]
pub enum Error {
    /// The combined payload exceeds the maximum unfragmented size.
    Oversize { size: usize, max: usize },
    /// The stored message 3 has no `CIPHERTEXT_3` where expected.
    InvalidMessage3,
    /// A layout without framing got nothing to put after message 3.
    EmptyOscorePayload,
    /// Wraps errors from the `cbor` module.
    Cbor(CborError),
}

impl From<CborError> for Error {
    fn from(e: CborError) -> Error {
        Error::Cbor(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Oversize { size, max } => write!(
                f,
                "The payload of the EDHOC+OSCORE request is exceeding \
                 MAX_UNFRAGMENTED_SIZE ({} > {})",
                size, max
            ),
            Error::InvalidMessage3 => {
                write!(f, "No EDHOC message 3 in the stored sequence")
            }
            Error::EmptyOscorePayload => {
                write!(f, "No OSCORE payload to combine with message 3")
            }
            Error::Cbor(e) => e.fmt(f),
        }
    }
}

impl error::Error for Error {}
