//! The errors of the `edhoc` module.

use std::{error, fmt};

use crate::{aead::AeadError, cbor::CborError, oscore};

/// The catch-all error type for this module, mostly the reason a message was
/// rejected or could not be built.
#[derive(Debug)]
pub enum Error {
    /// Wraps errors from the `cbor` module.
    Cbor(CborError),
    /// A message doesn't have the expected structure.
    Malformed(&'static str),
    /// A connection identifier or `kid` of the wrong type or in a
    /// non-canonical encoding.
    InvalidIdentifier(&'static str),
    /// No session is known for the connection identifier.
    UnknownSession,
    /// Every connection identifier is in use.
    NoConnectionId,
    /// The peer identity is not among the known peer keys.
    UnknownIdentity,
    /// The peer claims our own identity.
    OwnIdentity,
    /// No credential is available for the peer or for us.
    MissingCredential,
    /// Using an unsupported cipher suite.
    UnsupportedSuite,
    /// Using an authentication method that is not allowed.
    UnsupportedMethod(i64),
    /// The suites of both parties have nothing in common.
    NoCommonSuite,
    /// An EAD hook refused the items.
    Ead(String),
    /// Keys of different curves or types were combined.
    KeyMismatch,
    /// Invalid key material.
    Key,
    /// Wraps errors from the `aead` module.
    Aead(AeadError),
    /// Requested more output from the KDF than it can produce.
    KdfLength,
    /// Signature or MAC didn't verify.
    VerificationFailed,
    /// No application profile for the resource.
    UnknownProfile,
    /// Wraps errors from the `oscore` module.
    Oscore(oscore::Error),
}

impl From<CborError> for Error {
    fn from(e: CborError) -> Error {
        Error::Cbor(e)
    }
}

impl From<AeadError> for Error {
    fn from(e: AeadError) -> Error {
        Error::Aead(e)
    }
}

impl From<oscore::Error> for Error {
    fn from(e: oscore::Error) -> Error {
        Error::Oscore(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Cbor(e) => e.fmt(f),
            Error::Malformed(what) => write!(f, "Malformed message: {}", what),
            Error::InvalidIdentifier(what) => {
                write!(f, "Invalid type or encoding of {}", what)
            }
            Error::UnknownSession => write!(f, "EDHOC session not found"),
            Error::NoConnectionId => {
                write!(f, "No connection identifier is available")
            }
            Error::UnknownIdentity => {
                write!(f, "The identity of the peer is not recognized")
            }
            Error::OwnIdentity => {
                write!(f, "The identity of the peer is equal to my own")
            }
            Error::MissingCredential => {
                write!(f, "Unable to retrieve the credential")
            }
            Error::UnsupportedSuite => write!(f, "Cipher suite unsupported"),
            Error::UnsupportedMethod(m) => {
                write!(f, "Authentication method {} is not supported", m)
            }
            Error::NoCommonSuite => write!(
                f,
                "Impossible to agree on a mutually supported cipher suite"
            ),
            Error::Ead(e) => write!(f, "EAD processing failed: {}", e),
            Error::KeyMismatch => {
                write!(f, "Key doesn't match the expected curve or usage")
            }
            Error::Key => write!(f, "Invalid key material"),
            Error::Aead(e) => e.fmt(f),
            Error::KdfLength => write!(f, "Invalid length for the EDHOC KDF"),
            Error::VerificationFailed => {
                write!(f, "Signature_or_MAC is not valid")
            }
            Error::UnknownProfile => {
                write!(f, "No application profile for the resource")
            }
            Error::Oscore(e) => e.fmt(f),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Cbor(e) => Some(e),
            Error::Aead(e) => Some(e),
            Error::Oscore(e) => Some(e),
            // Other errors don't wrap anything
            _ => None,
        }
    }
}
