//! The AES-CCM algorithms shared by EDHOC and OSCORE.

use std::{error, fmt};

use aes::Aes128;
use ccm::{
    aead::{generic_array::GenericArray, AeadInPlace, KeyInit},
    consts::{U13, U16, U8},
    Ccm,
};

/// Key length of both algorithms, in bytes.
pub const KEY_LEN: usize = 16;
/// Nonce length of both algorithms, in bytes.
pub const NONCE_LEN: usize = 13;

type AesCcm16_64_128 = Ccm<Aes128, U8, U13>;
type AesCcm16_128_128 = Ccm<Aes128, U16, U13>;

/// Failure to seal or open, including wrong key, nonce or ciphertext length.
#[derive(Debug, PartialEq)]
pub struct AeadError;

impl fmt::Display for AeadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error using AEAD")
    }
}

impl error::Error for AeadError {}

/// The AEAD algorithm of a cipher suite or OSCORE context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AeadAlgorithm {
    /// COSE algorithm 10, 8 byte tag.
    AesCcm16_64_128,
    /// COSE algorithm 30, 16 byte tag.
    AesCcm16_128_128,
}

impl AeadAlgorithm {
    /// Returns the COSE algorithm identifier.
    pub fn cose_id(self) -> i64 {
        match self {
            AeadAlgorithm::AesCcm16_64_128 => 10,
            AeadAlgorithm::AesCcm16_128_128 => 30,
        }
    }

    pub fn key_len(self) -> usize {
        KEY_LEN
    }

    pub fn nonce_len(self) -> usize {
        NONCE_LEN
    }

    pub fn tag_len(self) -> usize {
        match self {
            AeadAlgorithm::AesCcm16_64_128 => 8,
            AeadAlgorithm::AesCcm16_128_128 => 16,
        }
    }

    /// Returns the ciphertext with the tag appended.
    ///
    /// # Arguments
    /// * `key` - The encryption key.
    /// * `nonce` - The nonce.
    /// * `aad` - The additional authenticated data.
    /// * `plaintext` - The data to protect.
    pub fn seal(
        self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, AeadError> {
        match self {
            AeadAlgorithm::AesCcm16_64_128 => {
                seal_with::<AesCcm16_64_128>(key, nonce, aad, plaintext)
            }
            AeadAlgorithm::AesCcm16_128_128 => {
                seal_with::<AesCcm16_128_128>(key, nonce, aad, plaintext)
            }
        }
    }

    /// Returns the plaintext of a ciphertext with appended tag, if it
    /// verifies.
    pub fn open(
        self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, AeadError> {
        if ciphertext.len() < self.tag_len() {
            return Err(AeadError);
        }
        let (ciphertext, tag) =
            ciphertext.split_at(ciphertext.len() - self.tag_len());
        match self {
            AeadAlgorithm::AesCcm16_64_128 => {
                open_with::<AesCcm16_64_128>(key, nonce, aad, ciphertext, tag)
            }
            AeadAlgorithm::AesCcm16_128_128 => {
                open_with::<AesCcm16_128_128>(key, nonce, aad, ciphertext, tag)
            }
        }
    }
}

fn seal_with<C: AeadInPlace + KeyInit>(
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, AeadError> {
    if nonce.len() != NONCE_LEN {
        return Err(AeadError);
    }
    let cipher = C::new_from_slice(key).map_err(|_| AeadError)?;
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            aad,
            &mut buffer,
        )
        .map_err(|_| AeadError)?;
    buffer.extend_from_slice(&tag);

    Ok(buffer)
}

fn open_with<C: AeadInPlace + KeyInit>(
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>, AeadError> {
    if nonce.len() != NONCE_LEN {
        return Err(AeadError);
    }
    let cipher = C::new_from_slice(key).map_err(|_| AeadError)?;
    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            aad,
            &mut buffer,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| AeadError)?;

    Ok(buffer)
}
