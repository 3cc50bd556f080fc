use coap_lite::{CoapOption, Packet};
use hkdf::Hkdf;
use serde_bytes::Bytes;
use sha2::Sha256;

use crate::{aead::NONCE_LEN, cbor};

use super::{error::Error, Result};

/// Mask of the Partial IV length in the OSCORE flag byte.
const FLAG_N: u8 = 0b0000_0111;
/// The kid flag.
const FLAG_K: u8 = 0b0000_1000;
/// The kid context flag.
const FLAG_H: u8 = 0b0001_0000;

/// Returns the CBOR encoded `info` structure.
///
/// # Arguments
/// * `id` - The sender ID or recipient ID (or empty for IV).
/// * `alg_aead` - The COSE identifier of the AEAD algorithm.
/// * `type` - Either "Key" or "IV".
/// * `l` - The size of the key/nonce for the AEAD, in bytes.
pub fn build_info(
    id: &[u8],
    alg_aead: i64,
    r#type: &str,
    l: usize,
) -> Result<Vec<u8>> {
    // (id, id_context, alg_aead, type, L)
    let info = (Bytes::new(id), (), alg_aead, r#type, l);
    Ok(cbor::encode(info)?)
}

/// Returns the derived key/IV for this `info` structure.
///
/// # Arguments
/// * `master_secret` - The master secret.
/// * `master_salt` - The master salt.
/// * `info` - The `info` structure, different for key and IV derivation.
/// * `l` - The size of the key/nonce for the AEAD used, in bytes.
pub fn hkdf(
    master_secret: &[u8],
    master_salt: &[u8],
    info: &[u8],
    l: usize,
) -> Result<Vec<u8>> {
    let h = Hkdf::<Sha256>::new(Some(master_salt), master_secret);
    let mut okm = vec![0; l];
    h.expand(info, &mut okm)?;

    Ok(okm)
}

/// Returns the CBOR encoded AAD array.
///
/// There's no argument for class I options, because the standard doesn't
/// define any at this point.
pub fn build_aad_array(
    alg_aead: i64,
    request_kid: &[u8],
    request_piv: &[u8],
) -> Result<Vec<u8>> {
    // (oscore_version, algorithms, request_kid, request_piv, options)
    let arr = (
        1,
        [alg_aead],
        Bytes::new(request_kid),
        Bytes::new(request_piv),
        Bytes::new(&[]),
    );
    Ok(cbor::encode(arr)?)
}

/// Returns the AAD, the AAD array packed into an `Encrypt0` structure.
pub fn build_aad(
    alg_aead: i64,
    request_kid: &[u8],
    request_piv: &[u8],
) -> Result<Vec<u8>> {
    let aad_arr = build_aad_array(alg_aead, request_kid, request_piv)?;
    let aad = ("Encrypt0", Bytes::new(&[]), Bytes::new(&aad_arr));
    Ok(cbor::encode(aad)?)
}

/// The parts of an OSCORE option value.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct OscoreOption {
    pub piv: Option<Vec<u8>>,
    pub kid_context: Option<Vec<u8>>,
    pub kid: Option<Vec<u8>>,
}

/// Returns the value of the OSCORE option.
pub fn build_oscore_option(
    kid: Option<&[u8]>,
    piv: Option<&[u8]>,
    kid_context: Option<&[u8]>,
) -> Vec<u8> {
    let mut option = vec![0];
    if let Some(piv) = piv {
        option[0] |= piv.len() as u8 & FLAG_N;
        option.extend_from_slice(piv);
    }
    if let Some(kid_context) = kid_context {
        option[0] |= FLAG_H;
        option.push(kid_context.len() as u8);
        option.extend_from_slice(kid_context);
    }
    if let Some(kid) = kid {
        option[0] |= FLAG_K;
        option.extend_from_slice(kid);
    }
    // Neither kid nor piv means the option has no value at all
    if option == [0] {
        option.clear();
    }

    option
}

/// Returns the parts of an OSCORE option value.
///
/// A value too short for the lengths its flag byte announces yields no parts
/// at all.
pub fn parse_oscore_option(value: &[u8]) -> OscoreOption {
    let (flags, rest) = match value.split_first() {
        Some((flags, rest)) => (*flags, rest),
        None => return OscoreOption::default(),
    };

    let n = (flags & FLAG_N) as usize;
    if rest.len() < n {
        return OscoreOption::default();
    }
    let (piv, mut rest) = rest.split_at(n);

    let mut kid_context = None;
    if flags & FLAG_H != 0 {
        let s = match rest.first() {
            Some(s) if rest.len() > *s as usize => *s as usize,
            _ => return OscoreOption::default(),
        };
        kid_context = Some(rest[1..=s].to_vec());
        rest = &rest[1 + s..];
    }

    OscoreOption {
        piv: if n == 0 { None } else { Some(piv.to_vec()) },
        kid_context,
        kid: if flags & FLAG_K != 0 {
            Some(rest.to_vec())
        } else {
            None
        },
    }
}

/// Returns the `kid` of an OSCORE option value, if it has one.
pub fn get_kid(value: &[u8]) -> Option<Vec<u8>> {
    parse_oscore_option(value).kid
}

/// Returns the OSCORE option value of the message.
pub fn oscore_option(message: &Packet) -> Result<&[u8]> {
    message
        .get_option(CoapOption::Oscore)
        .and_then(|values| values.front())
        .map(Vec::as_slice)
        .ok_or(Error::NoOscoreOption)
}

/// Returns the nonce for the AEAD.
pub fn compute_nonce(
    mut piv: &[u8],
    mut id_piv: &[u8],
    common_iv: &[u8],
) -> [u8; NONCE_LEN] {
    // Since id_piv could be longer than it should, trim it if necessary
    if id_piv.len() > NONCE_LEN - 6 {
        id_piv = &id_piv[id_piv.len() - (NONCE_LEN - 6)..]
    }
    if piv.len() > 5 {
        piv = &piv[piv.len() - 5..];
    }

    let mut nonce = [0; NONCE_LEN];
    // Left-pad the Partial IV (PIV) with zeros to exactly 5 bytes
    nonce[NONCE_LEN - piv.len()..].copy_from_slice(piv);
    // Left-pad ID_PIV with zeros to exactly nonce length minus 6 bytes
    nonce[1 + NONCE_LEN - 6 - id_piv.len()..NONCE_LEN - 5]
        .copy_from_slice(id_piv);
    // The size of the ID_PIV (a single byte S)
    nonce[0] = id_piv.len() as u8;
    for (b1, b2) in nonce.iter_mut().zip(common_iv.iter()) {
        *b1 ^= b2;
    }

    nonce
}

/// Returns the `piv` as a u64.
pub fn piv_to_u64(mut piv: &[u8]) -> u64 {
    if piv.len() > 8 {
        piv = &piv[piv.len() - 8..];
    }
    let mut piv_arr = [0; 8];
    piv_arr[8 - piv.len()..].copy_from_slice(piv);

    u64::from_be_bytes(piv_arr)
}

/// Returns the `piv` in its correct format (no leading zero bytes).
pub fn format_piv(piv: u64) -> Vec<u8> {
    let bytes = piv.to_be_bytes();
    match bytes.iter().position(|&x| x != 0) {
        Some(n) => bytes[n..].to_vec(),
        None => vec![0x00],
    }
}
