//! The EDHOC key schedule, as functions of the session values they need.
//!
//! Nothing in here touches a session. The message processor gathers the
//! inputs and stores the outputs once a whole message went through.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use serde_cbor::Value;
use sha2::{Digest, Sha256};

use super::{
    cose,
    error::Error,
    keys::{KeyPair, PublicKey},
    suite::{CipherSuite, HASH_LEN},
    Result,
};
use crate::cbor;

/// Labels of the EDHOC KDF.
pub const KEYSTREAM_2: i64 = 0;
pub const SALT_3E2M: i64 = 1;
pub const MAC_2: i64 = 2;
pub const K_3: i64 = 3;
pub const IV_3: i64 = 4;
pub const SALT_4E3M: i64 = 5;
pub const MAC_3: i64 = 6;
pub const PRK_OUT: i64 = 7;
pub const K_4: i64 = 8;
pub const IV_4: i64 = 9;
pub const PRK_EXPORTER: i64 = 10;

type HmacSha256 = Hmac<Sha256>;

/// Returns whether the Initiator authenticates with a signature.
pub fn initiator_signs(method: u8) -> bool {
    method == 0 || method == 1
}

/// Returns whether the Responder authenticates with a signature.
pub fn responder_signs(method: u8) -> bool {
    method == 0 || method == 2
}

/// Returns the length of `MAC_2` or `MAC_3`, which is the hash length when
/// the authenticating party signs, the EDHOC AEAD tag length otherwise.
pub fn mac_length(signs: bool, suite: CipherSuite) -> usize {
    if signs {
        HASH_LEN
    } else {
        suite.mac_len()
    }
}

/// Returns the SHA-256 digest of the input.
pub fn hash(input: &[u8]) -> Vec<u8> {
    Sha256::digest(input).to_vec()
}

/// Returns the PRK of HKDF-Extract.
pub fn extract(salt: &[u8], ikm: &[u8]) -> Vec<u8> {
    Hkdf::<Sha256>::extract(Some(salt), ikm).0.to_vec()
}

/// Returns `length` bytes of HKDF-Expand output.
///
/// The PRK may have any length, so that placeholder PRKs of an untouched
/// session can still be expanded.
pub fn expand(prk: &[u8], info: &[u8], length: usize) -> Result<Vec<u8>> {
    if length > 255 * HASH_LEN {
        return Err(Error::KdfLength);
    }

    let mut okm = Vec::with_capacity(length);
    let mut block = Vec::new();
    let mut counter = 1u8;
    while okm.len() < length {
        let mut mac =
            HmacSha256::new_from_slice(prk).map_err(|_| Error::Key)?;
        mac.update(&block);
        mac.update(info);
        mac.update(&[counter]);
        block = mac.finalize().into_bytes().to_vec();
        let take = (length - okm.len()).min(block.len());
        okm.extend_from_slice(&block[..take]);
        counter = counter.wrapping_add(1);
    }

    Ok(okm)
}

/// Returns the output of `EDHOC_KDF(prk, label, context, length)`.
///
/// # Arguments
/// * `prk` - The pseudorandom key.
/// * `label` - The KDF label.
/// * `context` - The raw context, wrapped in a byte string for the `info`.
/// * `length` - The length of the output, in bytes.
pub fn edhoc_kdf(
    prk: &[u8],
    label: i64,
    context: &[u8],
    length: usize,
) -> Result<Vec<u8>> {
    let info = cbor::encode_sequence(&[
        Value::Integer(i128::from(label)),
        Value::Bytes(context.to_vec()),
        Value::Integer(length as i128),
    ])?;

    expand(prk, &info, length)
}

/// Returns `TH_2 = H(G_Y, ? C_R, H(message_1))`.
///
/// `c_r` is only part of the hash for revisions that keep `C_R` outside of
/// the ciphertext.
pub fn th_2(
    g_y: &[u8],
    c_r: Option<&Value>,
    hash_message_1: &[u8],
) -> Result<Vec<u8>> {
    let mut input = cbor::encode_bstr(g_y)?;
    if let Some(c_r) = c_r {
        input.extend(cbor::encode(c_r)?);
    }
    input.extend(cbor::encode_bstr(hash_message_1)?);

    Ok(hash(&input))
}

/// Returns `TH_3 = H(TH_2, PLAINTEXT_2, ? CRED_R)` or, with the same
/// structure, `TH_4 = H(TH_3, PLAINTEXT_3, ? CRED_I)`.
pub fn next_th(
    th: &[u8],
    plaintext: &[u8],
    cred: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let mut input = cbor::encode_bstr(th)?;
    input.extend_from_slice(plaintext);
    if let Some(cred) = cred {
        input.extend_from_slice(cred);
    }

    Ok(hash(&input))
}

/// Returns `PRK_2e` from the ephemeral DH secret.
pub fn prk_2e(salt: &[u8], g_xy: &[u8]) -> Vec<u8> {
    extract(salt, g_xy)
}

/// Returns `PRK_3e2m`, which is `PRK_2e` when the Responder signs.
///
/// # Arguments
/// * `prk_2e` - The previous PRK.
/// * `th_2` - The transcript hash `TH_2`.
/// * `g_rx` - The static-ephemeral DH secret, if the Responder
///   authenticates with a static DH key.
pub fn prk_3e2m(
    prk_2e: &[u8],
    th_2: &[u8],
    g_rx: Option<&[u8]>,
) -> Result<Vec<u8>> {
    match g_rx {
        None => Ok(prk_2e.to_vec()),
        Some(g_rx) => {
            let salt = edhoc_kdf(prk_2e, SALT_3E2M, th_2, HASH_LEN)?;
            Ok(extract(&salt, g_rx))
        }
    }
}

/// Returns `PRK_4e3m`, which is `PRK_3e2m` when the Initiator signs.
pub fn prk_4e3m(
    prk_3e2m: &[u8],
    th_3: &[u8],
    g_iy: Option<&[u8]>,
) -> Result<Vec<u8>> {
    match g_iy {
        None => Ok(prk_3e2m.to_vec()),
        Some(g_iy) => {
            let salt = edhoc_kdf(prk_3e2m, SALT_4E3M, th_3, HASH_LEN)?;
            Ok(extract(&salt, g_iy))
        }
    }
}

/// Returns `MAC_2` or `MAC_3`.
///
/// # Arguments
/// * `prk` - `PRK_3e2m` for `MAC_2`, `PRK_4e3m` for `MAC_3`.
/// * `label` - `MAC_2` or `MAC_3`.
/// * `id_cred` - The `ID_CRED_x` header map.
/// * `th` - `TH_2` or `TH_3`.
/// * `cred` - The CBOR encoded `CRED_x`.
/// * `ead` - The EAD items of the message, may be empty.
/// * `length` - The MAC length.
pub fn mac(
    prk: &[u8],
    label: i64,
    id_cred: &Value,
    th: &[u8],
    cred: &[u8],
    ead: &[Value],
    length: usize,
) -> Result<Vec<u8>> {
    let mut context = cbor::encode(id_cred)?;
    context.extend(cbor::encode_bstr(th)?);
    context.extend_from_slice(cred);
    context.extend(cbor::encode_sequence(ead)?);

    edhoc_kdf(prk, label, &context, length)
}

/// Returns the external data of `Signature_or_MAC_x`, the CBOR sequence of
/// `TH`, `CRED` and the EAD items.
pub fn external_data(
    th: &[u8],
    cred: &[u8],
    ead: &[Value],
) -> Result<Vec<u8>> {
    let mut data = cbor::encode_bstr(th)?;
    data.extend_from_slice(cred);
    data.extend(cbor::encode_sequence(ead)?);

    Ok(data)
}

/// Returns `Signature_or_MAC_x`, which is the MAC itself when the party
/// doesn't sign.
pub fn signature_or_mac(
    signs: bool,
    suite: CipherSuite,
    mac: &[u8],
    id_cred: &Value,
    external_data: &[u8],
    key: &KeyPair,
) -> Result<Vec<u8>> {
    if !signs {
        return Ok(mac.to_vec());
    }
    if key.curve() != suite.signature_curve() {
        return Err(Error::KeyMismatch);
    }

    cose::sign(&cbor::encode(id_cred)?, external_data, mac, key)
}

/// Checks a received `Signature_or_MAC_x` against the computed MAC.
pub fn verify_signature_or_mac(
    signs: bool,
    suite: CipherSuite,
    received: &[u8],
    mac: &[u8],
    id_cred: &Value,
    external_data: &[u8],
    public_key: &PublicKey,
) -> Result<()> {
    if !signs {
        return if received == mac {
            Ok(())
        } else {
            Err(Error::VerificationFailed)
        };
    }
    if public_key.curve() != suite.signature_curve() {
        return Err(Error::KeyMismatch);
    }

    cose::verify(
        &cbor::encode(id_cred)?,
        external_data,
        mac,
        public_key,
        received,
    )
}

/// Returns `KEYSTREAM_2` of the given length.
///
/// Lengths beyond what a single expansion can produce are built from parts
/// with the labels 0, -1, -2 and so on.
pub fn keystream_2(
    prk_2e: &[u8],
    th_2: &[u8],
    length: usize,
) -> Result<Vec<u8>> {
    let part_size = 255 * HASH_LEN;
    if length <= part_size {
        return edhoc_kdf(prk_2e, KEYSTREAM_2, th_2, length);
    }

    let mut keystream = Vec::with_capacity(length);
    let mut label = KEYSTREAM_2;
    while keystream.len() < length {
        let size = (length - keystream.len()).min(part_size);
        keystream.extend(edhoc_kdf(prk_2e, label, th_2, size)?);
        label -= 1;
    }

    Ok(keystream)
}

/// Returns the bytewise XOR of both inputs, as long as the shorter one.
pub fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}

/// Returns the key and IV for `CIPHERTEXT_3` or `CIPHERTEXT_4`.
///
/// # Arguments
/// * `suite` - The selected cipher suite.
/// * `prk` - `PRK_3e2m` or `PRK_4e3m`.
/// * `labels` - `(K_3, IV_3)` or `(K_4, IV_4)`.
/// * `th` - `TH_3` or `TH_4`.
pub fn key_and_iv(
    suite: CipherSuite,
    prk: &[u8],
    labels: (i64, i64),
    th: &[u8],
) -> Result<(Vec<u8>, Vec<u8>)> {
    let aead = suite.edhoc_aead();
    let key = edhoc_kdf(prk, labels.0, th, aead.key_len())?;
    let iv = edhoc_kdf(prk, labels.1, th, aead.nonce_len())?;

    Ok((key, iv))
}

/// Returns `CIPHERTEXT_3` or `CIPHERTEXT_4`, protected with the transcript
/// hash as external data.
pub fn encrypt(
    suite: CipherSuite,
    key: &[u8],
    iv: &[u8],
    th: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let ad = cose::build_ad(th)?;
    Ok(suite.edhoc_aead().seal(key, iv, &ad, plaintext)?)
}

/// Returns the plaintext of `CIPHERTEXT_3` or `CIPHERTEXT_4`.
pub fn decrypt(
    suite: CipherSuite,
    key: &[u8],
    iv: &[u8],
    th: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let ad = cose::build_ad(th)?;
    Ok(suite.edhoc_aead().open(key, iv, &ad, ciphertext)?)
}

/// Returns `PRK_out`.
pub fn prk_out(prk_4e3m: &[u8], th_4: &[u8]) -> Result<Vec<u8>> {
    edhoc_kdf(prk_4e3m, PRK_OUT, th_4, HASH_LEN)
}

/// Returns `PRK_exporter`.
pub fn prk_exporter(prk_out: &[u8]) -> Result<Vec<u8>> {
    edhoc_kdf(prk_out, PRK_EXPORTER, &[], HASH_LEN)
}

/// Returns the output of the EDHOC exporter.
///
/// Any state of the session is accepted, only negative labels and lengths
/// are rejected.
pub fn exporter(
    prk_exporter: &[u8],
    label: i64,
    context: &[u8],
    length: i64,
) -> Result<Vec<u8>> {
    if label < 0 || length < 0 {
        return Err(Error::KdfLength);
    }
    let length = usize::try_from(length).map_err(|_| Error::KdfLength)?;

    edhoc_kdf(prk_exporter, label, context, length)
}
