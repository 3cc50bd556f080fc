//! Helpful functionality around the `serde_cbor` crate.
//!
//! EDHOC messages are CBOR sequences, i.e. data items written back to back
//! without an enclosing array. Everything in here works on
//! [`serde_cbor::Value`], so that malformed or unexpectedly typed input can be
//! inspected item by item instead of failing a typed deserialization.

use serde::Serialize;
use serde_bytes::Bytes;
use serde_cbor::{Deserializer, Value};

pub mod ead;
mod error;

pub use ead::{pre_parse_ead, EadConvention};
pub use error::CborError;

/// The result type for the `cbor` module.
pub type Result<T> = std::result::Result<T, CborError>;

/// Serializes an object into CBOR.
pub fn encode(object: impl Serialize) -> Result<Vec<u8>> {
    Ok(serde_cbor::to_vec(&object)?)
}

/// Serializes a byte slice as a CBOR byte string.
pub fn encode_bstr(bytes: &[u8]) -> Result<Vec<u8>> {
    encode(Bytes::new(bytes))
}

/// Serializes the items one after the other into a CBOR sequence.
pub fn encode_sequence(items: &[Value]) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(16 * items.len());
    for item in items {
        bytes.extend(serde_cbor::to_vec(item)?);
    }

    Ok(bytes)
}

/// Deserializes a CBOR sequence into its items.
///
/// An empty input is an empty sequence. Truncated or otherwise ill-formed
/// input fails as a whole.
pub fn decode_sequence(bytes: &[u8]) -> Result<Vec<Value>> {
    Deserializer::from_slice(bytes)
        .into_iter::<Value>()
        .map(|item| item.map_err(CborError::from))
        .collect()
}

/// Deserializes only the first item of the input, ignoring what follows.
pub fn decode_first(bytes: &[u8]) -> Result<Option<Value>> {
    Deserializer::from_slice(bytes)
        .into_iter::<Value>()
        .next()
        .transpose()
        .map_err(CborError::from)
}

/// Returns the integer if the value is one that fits into an `i64`.
pub fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => i64::try_from(*i).ok(),
        _ => None,
    }
}

/// Returns the content if the value is a byte string.
pub fn as_bytes(value: &Value) -> Option<&[u8]> {
    match value {
        Value::Bytes(b) => Some(b),
        _ => None,
    }
}

/// Returns whether a single byte identifier has an integer representation.
fn has_int_form(byte: u8) -> bool {
    byte <= 23 || (32..=55).contains(&byte)
}

/// Returns the CBOR representation of an EDHOC connection identifier.
///
/// One byte identifiers that coincide with the encoding of a one byte CBOR
/// integer are sent as that integer, everything else as a byte string. An
/// empty identifier has no representation.
pub fn encode_identifier(id: &[u8]) -> Option<Value> {
    match id {
        [] => None,
        [b] if *b <= 23 => Some(Value::Integer(i128::from(*b))),
        [b] if has_int_form(*b) => Some(Value::Integer(31 - i128::from(*b))),
        _ => Some(Value::Bytes(id.to_vec())),
    }
}

/// Returns the EDHOC connection identifier carried by a CBOR value.
///
/// Fails for values that are neither integers nor byte strings, for integers
/// that don't fit into a single byte of encoding and for byte strings that
/// should have been sent as an integer.
pub fn decode_identifier(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Bytes(b) if b.len() == 1 && has_int_form(b[0]) => None,
        Value::Bytes(b) => Some(b.clone()),
        Value::Integer(i) => match *i {
            0..=23 => Some(vec![*i as u8]),
            -24..=-1 => Some(vec![(31 - *i) as u8]),
            _ => None,
        },
        _ => None,
    }
}

/// Changes the given CBOR bytes from an array of n elements to a map of n / 2
/// key/value pairs.
///
/// Only works for arrays with at most 23 items.
pub fn array_to_map(bytes: &mut [u8]) -> Result<()> {
    // The 5 least significant bits are the number of elements in the array
    let n = 0b000_11111 & bytes[0];
    if n > 23 {
        return Err(CborError::TooManyItems);
    }
    // Change the major type and number of elements accordingly
    bytes[0] = 0b101_00000 | (n / 2);

    Ok(())
}

#[cfg(test)]
mod tests {
    use hexlit::hex;
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(&[0x05], Value::Integer(5))]
    #[case(&[0x17], Value::Integer(23))]
    #[case(&[0x20], Value::Integer(-1))]
    #[case(&[0x37], Value::Integer(-24))]
    #[case(&[0x18], Value::Bytes(vec![0x18]))]
    #[case(&[0x38], Value::Bytes(vec![0x38]))]
    #[case(&[0xFF], Value::Bytes(vec![0xFF]))]
    #[case(&[0x01, 0x02], Value::Bytes(vec![0x01, 0x02]))]
    fn identifier_encoding(#[case] id: &[u8], #[case] expected: Value) {
        let encoded = encode_identifier(id).unwrap();
        assert_eq!(expected, encoded);
        assert_eq!(id, &decode_identifier(&encoded).unwrap()[..]);
    }

    #[test]
    fn empty_identifier() {
        assert_eq!(None, encode_identifier(&[]));
        assert_eq!(Some(vec![]), decode_identifier(&Value::Bytes(vec![])));
    }

    proptest! {
        #[test]
        fn identifier_round_trip(
            id in proptest::collection::vec(any::<u8>(), 1..8),
        ) {
            let encoded = encode_identifier(&id).unwrap();
            prop_assert_eq!(Some(id), decode_identifier(&encoded));
        }

        #[test]
        fn single_byte_identifier_form(id in any::<u8>()) {
            let encoded = encode_identifier(&[id]).unwrap();
            // Exactly the bytes of a one byte integer go as integers
            let int_form = id <= 0x17 || (0x20..=0x37).contains(&id);
            prop_assert_eq!(int_form, matches!(encoded, Value::Integer(_)));
            prop_assert_eq!(Some(vec![id]), decode_identifier(&encoded));

            // The byte string form of those is not canonical
            prop_assert_eq!(
                !int_form,
                decode_identifier(&Value::Bytes(vec![id])).is_some()
            );
        }
    }

    #[rstest]
    #[case(Value::Bytes(vec![0x05]))]
    #[case(Value::Bytes(vec![0x20]))]
    #[case(Value::Integer(24))]
    #[case(Value::Integer(-25))]
    #[case(Value::Text("05".into()))]
    #[case(Value::Bool(true))]
    fn identifier_rejected(#[case] value: Value) {
        assert_eq!(None, decode_identifier(&value));
    }

    #[test]
    fn identifier_bytes_on_wire() {
        let items = [
            encode_identifier(&[0x05]).unwrap(),
            encode_identifier(&[0x20]).unwrap(),
            encode_identifier(&[0x18]).unwrap(),
        ];
        assert_eq!(
            &hex!("05204118")[..],
            &encode_sequence(&items).unwrap()[..]
        );
    }

    const SEQUENCE: [u8; 8] = hex!("030043010203F520");

    #[test]
    fn sequence() {
        let items = decode_sequence(&SEQUENCE).unwrap();
        assert_eq!(
            vec![
                Value::Integer(3),
                Value::Integer(0),
                Value::Bytes(vec![1, 2, 3]),
                Value::Bool(true),
                Value::Integer(-1),
            ],
            items
        );
        assert_eq!(&SEQUENCE[..], &encode_sequence(&items).unwrap()[..]);

        assert!(decode_sequence(&[]).unwrap().is_empty());
        // Byte string announcing more bytes than there are
        assert!(decode_sequence(&SEQUENCE[..4]).is_err());
        assert!(decode_sequence(&[0xFF]).is_err());
    }

    #[test]
    fn first_item() {
        let first = decode_first(&hex!("420A0BDEADBEEF")).unwrap();
        assert_eq!(Some(Value::Bytes(vec![0x0A, 0x0B])), first);
        assert_eq!(None, decode_first(&[]).unwrap());
    }

    #[test]
    fn accessors() {
        assert_eq!(Some(-7), as_int(&Value::Integer(-7)));
        assert_eq!(None, as_int(&Value::Integer(i128::MAX)));
        assert_eq!(None, as_int(&Value::Bytes(vec![])));
        assert_eq!(Some(&[1u8][..]), as_bytes(&Value::Bytes(vec![1])));
        assert_eq!(None, as_bytes(&Value::Integer(1)));
    }

    #[test]
    fn map_header() {
        // [4, h'0A'] becomes {4: h'0A'}
        let mut bytes = encode((4, Bytes::new(&[0x0A]))).unwrap();
        array_to_map(&mut bytes).unwrap();
        assert_eq!(&hex!("A104410A")[..], &bytes[..]);

        let mut long = hex!("9818").to_vec();
        assert!(array_to_map(&mut long).is_err());
    }
}
