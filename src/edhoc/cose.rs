use std::collections::BTreeMap;

use serde_bytes::Bytes;
use serde_cbor::Value;

use super::{
    keys::{Curve, KeyPair, PublicKey},
    Result,
};
use crate::cbor;

/// The label of `kid` in a COSE header map.
pub const KID: i128 = 4;

/// Returns the signature on the `Sig_structure` of the given data.
///
/// # Arguments
/// * `id_cred_x` - The CBOR encoded header map identifying the
///   authentication key, e.g. `{ 4 : h'1111' }`.
/// * `external_data` - The external data (`TH`, `CRED`, `EAD`).
/// * `mac` - `MAC_2` or `MAC_3`, the payload.
/// * `key` - The signature key.
pub fn sign(
    id_cred_x: &[u8],
    external_data: &[u8],
    mac: &[u8],
    key: &KeyPair,
) -> Result<Vec<u8>> {
    let to_be_signed = build_to_be_signed(id_cred_x, external_data, mac)?;
    key.sign(&to_be_signed)
}

/// Checks that the signature was made on the `Sig_structure` of the given
/// data with the key.
pub fn verify(
    id_cred_x: &[u8],
    external_data: &[u8],
    mac: &[u8],
    public_key: &PublicKey,
    signature: &[u8],
) -> Result<()> {
    let to_be_signed = build_to_be_signed(id_cred_x, external_data, mac)?;
    public_key.verify(&to_be_signed, signature)
}

/// Returns the COSE `Sig_structure` used as input to the signature algorithm.
fn build_to_be_signed(
    id_cred_x: &[u8],
    external_data: &[u8],
    mac: &[u8],
) -> Result<Vec<u8>> {
    let sig_struct = (
        "Signature1",
        Bytes::new(id_cred_x),     // protected
        Bytes::new(external_data), // external_aad
        Bytes::new(mac),           // payload
    );

    Ok(cbor::encode(sig_struct)?)
}

/// Returns the `Enc_structure` of a `COSE_Encrypt0` used as associated data
/// for `CIPHERTEXT_3` and `CIPHERTEXT_4`.
pub fn build_ad(th: &[u8]) -> Result<Vec<u8>> {
    Ok(cbor::encode(("Encrypt0", Bytes::new(&[]), Bytes::new(th)))?)
}

/// Returns the `ID_CRED_x` header map for the given `kid`.
pub fn kid_map(kid: &[u8]) -> Value {
    let mut map = BTreeMap::new();
    map.insert(Value::Integer(KID), Value::Bytes(kid.to_vec()));
    Value::Map(map)
}

/// Returns the `kid` of an `ID_CRED_x` header map, if it has one.
pub fn kid_of(id_cred: &Value) -> Option<&[u8]> {
    match id_cred {
        Value::Map(map) => {
            map.get(&Value::Integer(KID)).and_then(cbor::as_bytes)
        }
        _ => None,
    }
}

/// Returns how `ID_CRED_x` is sent in a plaintext: a map with only `kid` is
/// sent as its identifier, any other map as is.
pub fn id_cred_element(id_cred: &Value) -> Option<Value> {
    match id_cred {
        Value::Map(map) if map.len() == 1 => match kid_of(id_cred) {
            Some(kid) => cbor::encode_identifier(kid),
            None => Some(id_cred.clone()),
        },
        Value::Map(_) => Some(id_cred.clone()),
        _ => None,
    }
}

/// Returns the `ID_CRED_x` header map from how it was sent in a plaintext.
pub fn id_cred_from_element(element: &Value) -> Option<Value> {
    match element {
        Value::Bytes(_) | Value::Integer(_) => {
            cbor::decode_identifier(element).map(|kid| kid_map(&kid))
        }
        Value::Map(_) => Some(element.clone()),
        _ => None,
    }
}

/// Returns the CBOR encoded `COSE_Key` of a public key, usable as `CRED_x`.
///
/// OKP keys are a single x-coordinate, EC2 keys have both coordinates.
pub fn serialize_cose_key(public_key: &PublicKey) -> Result<Vec<u8>> {
    let x = public_key.ephemeral_bytes();
    let mut bytes = match public_key.curve() {
        Curve::P256 => {
            let y = public_key.y_coordinate().unwrap_or_default();
            // (kty, EC2, crv, P-256, x, .., y, ..)
            let raw_key = (1, 2, -1, 1, -2, Bytes::new(&x), -3, Bytes::new(&y));
            cbor::encode(raw_key)?
        }
        curve => {
            let crv = if curve == Curve::X25519 { 4 } else { 6 };
            // (kty, OKP, crv, .., x, ..)
            cbor::encode((1, 1, -1, crv, -2, Bytes::new(&x)))?
        }
    };
    // This is a CBOR array, but we want a map
    cbor::array_to_map(&mut bytes)?;

    Ok(bytes)
}
