//! Key material for X25519, Ed25519 and P-256.

use std::fmt;

use ed25519_dalek::{Signer, Verifier};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand_core::OsRng;

use super::{error::Error, suite::EPHEMERAL_LEN, Result};

/// The curve a key lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Curve {
    X25519,
    Ed25519,
    P256,
}

/// What an authentication key is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyUsage {
    /// Authentication with a signature.
    Signature,
    /// Authentication with a static Diffie-Hellman key.
    Ecdh,
}

/// A private key together with what's needed to derive its public key.
#[derive(Clone)]
pub enum KeyPair {
    X25519(x25519_dalek::StaticSecret),
    Ed25519(ed25519_dalek::SigningKey),
    P256(p256::SecretKey),
}

/// A public key.
#[derive(Clone, Debug, PartialEq)]
pub enum PublicKey {
    X25519(x25519_dalek::PublicKey),
    Ed25519(ed25519_dalek::VerifyingKey),
    P256(p256::PublicKey),
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "KeyPair({:?})", self.curve())
    }
}

impl KeyPair {
    /// Returns a fresh random key pair on the curve.
    pub fn generate(curve: Curve) -> KeyPair {
        match curve {
            Curve::X25519 => KeyPair::X25519(
                x25519_dalek::StaticSecret::random_from_rng(OsRng),
            ),
            Curve::Ed25519 => {
                let key = ed25519_dalek::SigningKey::generate(&mut OsRng);
                KeyPair::Ed25519(key)
            }
            Curve::P256 => KeyPair::P256(p256::SecretKey::random(&mut OsRng)),
        }
    }

    /// Returns the key pair for the 32 byte private key.
    pub fn from_private_bytes(curve: Curve, private: &[u8]) -> Result<KeyPair> {
        let bytes: [u8; 32] = private.try_into().map_err(|_| Error::Key)?;
        Ok(match curve {
            Curve::X25519 => {
                KeyPair::X25519(x25519_dalek::StaticSecret::from(bytes))
            }
            Curve::Ed25519 => {
                KeyPair::Ed25519(ed25519_dalek::SigningKey::from_bytes(&bytes))
            }
            Curve::P256 => KeyPair::P256(
                p256::SecretKey::from_slice(&bytes).map_err(|_| Error::Key)?,
            ),
        })
    }

    pub fn curve(&self) -> Curve {
        match self {
            KeyPair::X25519(_) => Curve::X25519,
            KeyPair::Ed25519(_) => Curve::Ed25519,
            KeyPair::P256(_) => Curve::P256,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            KeyPair::X25519(secret) => {
                PublicKey::X25519(x25519_dalek::PublicKey::from(secret))
            }
            KeyPair::Ed25519(signing) => {
                PublicKey::Ed25519(signing.verifying_key())
            }
            KeyPair::P256(secret) => PublicKey::P256(secret.public_key()),
        }
    }

    /// Returns the shared secret with the public key of the peer.
    ///
    /// Both keys have to be DH keys on the same curve.
    pub fn diffie_hellman(&self, public: &PublicKey) -> Result<Vec<u8>> {
        match (self, public) {
            (KeyPair::X25519(secret), PublicKey::X25519(public)) => {
                Ok(secret.diffie_hellman(public).as_bytes().to_vec())
            }
            (KeyPair::P256(secret), PublicKey::P256(public)) => {
                let shared = p256::ecdh::diffie_hellman(
                    secret.to_nonzero_scalar(),
                    public.as_affine(),
                );
                Ok(shared.raw_secret_bytes().to_vec())
            }
            _ => Err(Error::KeyMismatch),
        }
    }

    /// Returns the signature over the message (EdDSA or ES256).
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        match self {
            KeyPair::Ed25519(signing) => {
                Ok(signing.sign(message).to_bytes().to_vec())
            }
            KeyPair::P256(secret) => {
                let signing = p256::ecdsa::SigningKey::from_bytes(
                    &secret.to_bytes(),
                )
                .map_err(|_| Error::Key)?;
                let signature: p256::ecdsa::Signature = signing.sign(message);
                Ok(signature.to_bytes().to_vec())
            }
            KeyPair::X25519(_) => Err(Error::KeyMismatch),
        }
    }
}

impl PublicKey {
    pub fn curve(&self) -> Curve {
        match self {
            PublicKey::X25519(_) => Curve::X25519,
            PublicKey::Ed25519(_) => Curve::Ed25519,
            PublicKey::P256(_) => Curve::P256,
        }
    }

    /// Returns the public key as it's sent in `G_X` and `G_Y`, which is the
    /// x-coordinate for P-256.
    pub fn ephemeral_bytes(&self) -> Vec<u8> {
        match self {
            PublicKey::X25519(public) => public.as_bytes().to_vec(),
            PublicKey::Ed25519(public) => public.as_bytes().to_vec(),
            PublicKey::P256(public) => public
                .to_encoded_point(false)
                .x()
                .map(|x| x.to_vec())
                .unwrap_or_default(),
        }
    }

    /// Returns the y-coordinate of a P-256 key.
    pub fn y_coordinate(&self) -> Option<Vec<u8>> {
        match self {
            PublicKey::P256(public) => {
                public.to_encoded_point(false).y().map(|y| y.to_vec())
            }
            _ => None,
        }
    }

    /// Returns the ephemeral public key of the peer from `G_X` or `G_Y`.
    ///
    /// For P-256 the point with the even y-coordinate is used.
    pub fn from_ephemeral(curve: Curve, bytes: &[u8]) -> Result<PublicKey> {
        if bytes.len() != EPHEMERAL_LEN {
            return Err(Error::Key);
        }
        match curve {
            Curve::X25519 => {
                let mut raw = [0; EPHEMERAL_LEN];
                raw.copy_from_slice(bytes);
                Ok(PublicKey::X25519(x25519_dalek::PublicKey::from(raw)))
            }
            Curve::P256 => {
                let mut compressed = Vec::with_capacity(1 + EPHEMERAL_LEN);
                compressed.push(0x02);
                compressed.extend_from_slice(bytes);
                Ok(PublicKey::P256(
                    p256::PublicKey::from_sec1_bytes(&compressed)
                        .map_err(|_| Error::Key)?,
                ))
            }
            Curve::Ed25519 => Err(Error::KeyMismatch),
        }
    }

    /// Returns the public key from its raw bytes, SEC1 encoded for P-256.
    pub fn from_bytes(curve: Curve, bytes: &[u8]) -> Result<PublicKey> {
        match curve {
            Curve::X25519 => {
                let raw: [u8; 32] = bytes.try_into().map_err(|_| Error::Key)?;
                Ok(PublicKey::X25519(x25519_dalek::PublicKey::from(raw)))
            }
            Curve::Ed25519 => {
                let raw: [u8; 32] = bytes.try_into().map_err(|_| Error::Key)?;
                Ok(PublicKey::Ed25519(
                    ed25519_dalek::VerifyingKey::from_bytes(&raw)
                        .map_err(|_| Error::Key)?,
                ))
            }
            Curve::P256 => Ok(PublicKey::P256(
                p256::PublicKey::from_sec1_bytes(bytes)
                    .map_err(|_| Error::Key)?,
            )),
        }
    }

    /// Checks the signature over the message.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        match self {
            PublicKey::Ed25519(public) => {
                let signature = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(|_| Error::VerificationFailed)?;
                public
                    .verify(message, &signature)
                    .map_err(|_| Error::VerificationFailed)
            }
            PublicKey::P256(public) => {
                let verifying = p256::ecdsa::VerifyingKey::from_sec1_bytes(
                    public.to_encoded_point(false).as_bytes(),
                )
                .map_err(|_| Error::Key)?;
                let signature = p256::ecdsa::Signature::from_slice(signature)
                    .map_err(|_| Error::VerificationFailed)?;
                verifying
                    .verify(message, &signature)
                    .map_err(|_| Error::VerificationFailed)
            }
            PublicKey::X25519(_) => Err(Error::KeyMismatch),
        }
    }
}

#[cfg(test)]
mod tests {
    use hexlit::hex;
    use rstest::rstest;

    use super::*;

    // RFC 7748, section 6.1
    const ALICE_PRIVATE: [u8; 32] = hex!(
        "77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a"
    );
    const BOB_PUBLIC: [u8; 32] = hex!(
        "de9edb7d7b7dc1b4d35b61c2ece435373f8343c85b78674dadfc7e146f882b4f"
    );
    const SHARED: [u8; 32] = hex!(
        "4a5d9d5ba4ce2de1728e3bf480350f25e07e21c947d19e3376f09b3c1e161742"
    );
    const ALICE_PUBLIC: [u8; 32] = hex!(
        "8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a"
    );

    #[test]
    fn x25519_vector() {
        let alice =
            KeyPair::from_private_bytes(Curve::X25519, &ALICE_PRIVATE).unwrap();
        assert_eq!(&ALICE_PUBLIC[..], &alice.public_key().ephemeral_bytes()[..]);
        let bob = PublicKey::from_ephemeral(Curve::X25519, &BOB_PUBLIC).unwrap();
        assert_eq!(&SHARED[..], &alice.diffie_hellman(&bob).unwrap()[..]);
    }

    #[rstest]
    #[case(Curve::X25519)]
    #[case(Curve::P256)]
    fn dh_agreement(#[case] curve: Curve) {
        let a = KeyPair::generate(curve);
        let b = KeyPair::generate(curve);
        assert_eq!(
            a.diffie_hellman(&b.public_key()).unwrap(),
            b.diffie_hellman(&a.public_key()).unwrap()
        );
    }

    #[test]
    fn p256_ephemeral_uses_x_only() {
        let a = KeyPair::generate(Curve::P256);
        let b = KeyPair::generate(Curve::P256);
        let g_b = b.public_key().ephemeral_bytes();
        assert_eq!(EPHEMERAL_LEN, g_b.len());
        // The point is rebuilt from its x-coordinate, possibly as its
        // negation, which leads to the same x-coordinate of the secret
        let rebuilt = PublicKey::from_ephemeral(Curve::P256, &g_b).unwrap();
        assert_eq!(g_b, rebuilt.ephemeral_bytes());
        assert_eq!(
            a.diffie_hellman(&rebuilt).unwrap(),
            b.diffie_hellman(&a.public_key()).unwrap()
        );
    }

    #[rstest]
    #[case(Curve::Ed25519)]
    #[case(Curve::P256)]
    fn signatures(#[case] curve: Curve) {
        let key = KeyPair::generate(curve);
        let signature = key.sign(b"Signature1").unwrap();
        assert_eq!(64, signature.len());
        let public = key.public_key();
        assert!(public.verify(b"Signature1", &signature).is_ok());
        assert!(public.verify(b"Signature2", &signature).is_err());
        assert!(public.verify(b"Signature1", &signature[1..]).is_err());
    }

    #[test]
    fn mismatches() {
        let x = KeyPair::generate(Curve::X25519);
        let p = KeyPair::generate(Curve::P256);
        assert!(x.diffie_hellman(&p.public_key()).is_err());
        assert!(x.sign(b"message").is_err());
        assert!(x.public_key().verify(b"message", &[0; 64]).is_err());
        assert!(PublicKey::from_ephemeral(Curve::X25519, &[0; 31]).is_err());
        assert!(PublicKey::from_ephemeral(Curve::Ed25519, &[0; 32]).is_err());
    }
}
