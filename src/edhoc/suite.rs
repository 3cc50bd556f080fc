//! The EDHOC cipher suites.

use super::keys::Curve;
use crate::aead::AeadAlgorithm;

/// Output length of the EDHOC hash algorithm (SHA-256), in bytes.
pub const HASH_LEN: usize = 32;
/// Length of an encoded ephemeral public key, in bytes.
pub const EPHEMERAL_LEN: usize = 32;

/// A cipher suite of the EDHOC registry.
///
/// All of them use SHA-256 for hashing and HKDF, and AES-CCM-16-64-128 for
/// the application.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CipherSuite {
    /// AES-CCM-16-64-128, X25519, EdDSA.
    Suite0,
    /// AES-CCM-16-128-128, X25519, EdDSA.
    Suite1,
    /// AES-CCM-16-64-128, P-256, ES256.
    Suite2,
    /// AES-CCM-16-128-128, P-256, ES256.
    Suite3,
}

impl CipherSuite {
    /// Returns the suite with the given registry value, if it's one we know.
    pub fn from_id(id: i64) -> Option<CipherSuite> {
        match id {
            0 => Some(CipherSuite::Suite0),
            1 => Some(CipherSuite::Suite1),
            2 => Some(CipherSuite::Suite2),
            3 => Some(CipherSuite::Suite3),
            _ => None,
        }
    }

    /// Returns the registry value.
    pub fn id(self) -> i64 {
        match self {
            CipherSuite::Suite0 => 0,
            CipherSuite::Suite1 => 1,
            CipherSuite::Suite2 => 2,
            CipherSuite::Suite3 => 3,
        }
    }

    /// Returns the AEAD used for `CIPHERTEXT_3` and `CIPHERTEXT_4`.
    pub fn edhoc_aead(self) -> AeadAlgorithm {
        match self {
            CipherSuite::Suite0 | CipherSuite::Suite2 => {
                AeadAlgorithm::AesCcm16_64_128
            }
            CipherSuite::Suite1 | CipherSuite::Suite3 => {
                AeadAlgorithm::AesCcm16_128_128
            }
        }
    }

    /// Returns the AEAD of the OSCORE context established with this suite.
    pub fn app_aead(self) -> AeadAlgorithm {
        AeadAlgorithm::AesCcm16_64_128
    }

    /// Returns the MAC length used when authenticating with a static DH key.
    pub fn mac_len(self) -> usize {
        self.edhoc_aead().tag_len()
    }

    /// Returns the curve of the ephemeral and static DH keys.
    pub fn dh_curve(self) -> Curve {
        match self {
            CipherSuite::Suite0 | CipherSuite::Suite1 => Curve::X25519,
            CipherSuite::Suite2 | CipherSuite::Suite3 => Curve::P256,
        }
    }

    /// Returns the curve of signature keys.
    pub fn signature_curve(self) -> Curve {
        match self {
            CipherSuite::Suite0 | CipherSuite::Suite1 => Curve::Ed25519,
            CipherSuite::Suite2 | CipherSuite::Suite3 => Curve::P256,
        }
    }
}
