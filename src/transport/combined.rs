//! The payload of a request that combines EDHOC message 3 with the first
//! OSCORE protected request.
//!
//! Version 06 sends a CBOR sequence of two byte strings. Version 07 sends the
//! byte string of message 3 followed by the raw OSCORE payload.

use log::{debug, error};
use serde_cbor::{Deserializer, Value};

use super::{error::Error, Result};
use crate::{cbor, edhoc::config::CombinedMessageVersion};

/// The two parts of a combined payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CombinedPayload {
    /// The content of the `CIPHERTEXT_3` byte string.
    pub ciphertext_3: Vec<u8>,
    pub oscore_payload: Vec<u8>,
}

/// Returns the parts of a received combined payload, or `None` if it
/// doesn't have the layout of the version.
pub fn split(
    version: CombinedMessageVersion,
    payload: &[u8],
) -> Option<CombinedPayload> {
    match version {
        CombinedMessageVersion::V06 => split_sequence(payload),
        CombinedMessageVersion::V07 => split_prefix(payload),
    }
}

fn split_sequence(payload: &[u8]) -> Option<CombinedPayload> {
    let items = match cbor::decode_sequence(payload) {
        Ok(items) => items,
        Err(e) => {
            error!("Combined payload: {}", e);
            return None;
        }
    };

    match items.as_slice() {
        [Value::Bytes(ciphertext_3), Value::Bytes(oscore_payload)] => {
            Some(CombinedPayload {
                ciphertext_3: ciphertext_3.clone(),
                oscore_payload: oscore_payload.clone(),
            })
        }
        [_, _] => {
            error!("Combined payload with items of invalid type");
            None
        }
        _ => {
            error!("Combined payload with {} items", items.len());
            None
        }
    }
}

fn split_prefix(payload: &[u8]) -> Option<CombinedPayload> {
    let mut stream = Deserializer::from_slice(payload).into_iter::<Value>();
    let ciphertext_3 = match stream.next() {
        Some(Ok(Value::Bytes(ciphertext_3))) => ciphertext_3,
        Some(Err(e)) => {
            error!("Combined payload: {}", e);
            return None;
        }
        _ => {
            error!("Invalid EDHOC message 3 in combined payload");
            return None;
        }
    };

    let offset = stream.byte_offset();
    if offset >= payload.len() {
        error!("No OSCORE payload in combined payload");
        return None;
    }

    Some(CombinedPayload {
        ciphertext_3,
        oscore_payload: payload[offset..].to_vec(),
    })
}

/// Returns the combined payload of message 3 and an OSCORE payload.
///
/// # Arguments
/// * `version` - The layout to use.
/// * `message_3` - The CBOR sequence `(? C_R, CIPHERTEXT_3)`.
/// * `skip_c_r` - Whether `message_3` starts with `C_R`.
/// * `oscore_payload` - The payload of the OSCORE protected request.
/// * `max_unfragmented_size` - The largest acceptable result.
///
/// Version 07 needs a non-empty `oscore_payload`.
pub fn join(
    version: CombinedMessageVersion,
    message_3: &[u8],
    skip_c_r: bool,
    oscore_payload: &[u8],
    max_unfragmented_size: usize,
) -> Result<Vec<u8>> {
    let items = cbor::decode_sequence(message_3)?;
    let ciphertext_3 = items
        .get(usize::from(skip_c_r))
        .and_then(cbor::as_bytes)
        .ok_or(Error::InvalidMessage3)?;

    let mut combined = cbor::encode_bstr(ciphertext_3)?;
    match version {
        CombinedMessageVersion::V06 => {
            combined.extend(cbor::encode_bstr(oscore_payload)?)
        }
        // The receiver drops message 3 with nothing after it
        CombinedMessageVersion::V07 if oscore_payload.is_empty() => {
            return Err(Error::EmptyOscorePayload)
        }
        CombinedMessageVersion::V07 => {
            combined.extend_from_slice(oscore_payload)
        }
    }

    if combined.len() > max_unfragmented_size {
        return Err(Error::Oversize {
            size: combined.len(),
            max: max_unfragmented_size,
        });
    }
    debug!("Combined payload: {:02x?}", combined);

    Ok(combined)
}

#[cfg(test)]
mod tests {
    use hexlit::hex;
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    // (C_R, h'0A0B0C')
    const MESSAGE_3: [u8; 5] = hex!("17430A0B0C");

    #[rstest]
    #[case(CombinedMessageVersion::V06, &hex!("430A0B0C42AABB"))]
    #[case(CombinedMessageVersion::V07, &hex!("430A0B0CAABB"))]
    fn layouts(#[case] version: CombinedMessageVersion, #[case] payload: &[u8]) {
        let joined = join(version, &MESSAGE_3, true, &hex!("AABB"), 64).unwrap();
        assert_eq!(payload, joined.as_slice());

        let parts = split(version, payload).unwrap();
        assert_eq!(hex!("0A0B0C").to_vec(), parts.ciphertext_3);
        assert_eq!(hex!("AABB").to_vec(), parts.oscore_payload);
    }

    #[test]
    fn without_c_r() {
        let joined = join(
            CombinedMessageVersion::V07,
            &MESSAGE_3[1..],
            false,
            &hex!("AA"),
            64,
        )
        .unwrap();
        assert_eq!(hex!("430A0B0CAA").to_vec(), joined);

        // C_R isn't a byte string
        assert!(matches!(
            join(CombinedMessageVersion::V07, &MESSAGE_3, false, &[0xAA], 64),
            Err(Error::InvalidMessage3)
        ));
    }

    #[test]
    fn oversize() {
        let result =
            join(CombinedMessageVersion::V06, &MESSAGE_3, true, &[0; 4], 8);
        assert!(matches!(result, Err(Error::Oversize { size: 9, max: 8 })));
        assert!(
            join(CombinedMessageVersion::V07, &MESSAGE_3, true, &[0; 4], 8)
                .is_ok()
        );
    }

    #[test]
    fn empty_oscore_payload() {
        assert!(matches!(
            join(CombinedMessageVersion::V07, &MESSAGE_3, true, &[], 64),
            Err(Error::EmptyOscorePayload)
        ));

        // The byte string framing keeps it apart from message 3
        let joined =
            join(CombinedMessageVersion::V06, &MESSAGE_3, true, &[], 64)
                .unwrap();
        assert_eq!(hex!("430A0B0C40").to_vec(), joined);
        let parts = split(CombinedMessageVersion::V06, &joined).unwrap();
        assert!(parts.oscore_payload.is_empty());
    }

    fn any_version() -> impl Strategy<Value = CombinedMessageVersion> {
        prop_oneof![
            Just(CombinedMessageVersion::V06),
            Just(CombinedMessageVersion::V07),
        ]
    }

    proptest! {
        #[test]
        fn split_inverts_join(
            version in any_version(),
            c_r in proptest::option::of(any::<u8>()),
            ciphertext_3 in proptest::collection::vec(any::<u8>(), 0..300),
            oscore_payload in proptest::collection::vec(any::<u8>(), 1..300),
        ) {
            let mut items = Vec::new();
            if let Some(c_r) = c_r {
                items.extend(cbor::encode_identifier(&[c_r]));
            }
            items.push(Value::Bytes(ciphertext_3.clone()));
            let message_3 = cbor::encode_sequence(&items).unwrap();

            let joined = join(
                version,
                &message_3,
                c_r.is_some(),
                &oscore_payload,
                usize::MAX,
            )
            .unwrap();
            let parts = split(version, &joined).unwrap();
            prop_assert_eq!(ciphertext_3, parts.ciphertext_3);
            prop_assert_eq!(oscore_payload, parts.oscore_payload);
        }
    }

    #[rstest]
    // Nothing after message 3
    #[case(CombinedMessageVersion::V07, &hex!("430A0B0C"))]
    #[case(CombinedMessageVersion::V07, &hex!("0A0B0C"))]
    #[case(CombinedMessageVersion::V07, &hex!("430A0B"))]
    #[case(CombinedMessageVersion::V07, &[])]
    #[case(CombinedMessageVersion::V06, &hex!("430A0B0C"))]
    #[case(CombinedMessageVersion::V06, &hex!("430A0B0CAABB"))]
    #[case(CombinedMessageVersion::V06, &hex!("430A0B0C01"))]
    #[case(CombinedMessageVersion::V06, &hex!("430A0B0C41AA41BB"))]
    fn invalid(#[case] version: CombinedMessageVersion, #[case] payload: &[u8]) {
        assert_eq!(None, split(version, payload));
    }

    #[test]
    fn non_canonical_length() {
        // The byte string of message 3 with a one byte length field
        let parts =
            split(CombinedMessageVersion::V07, &hex!("58030A0B0CAA")).unwrap();
        assert_eq!(hex!("0A0B0C").to_vec(), parts.ciphertext_3);
        assert_eq!(vec![0xAA], parts.oscore_payload);
    }
}
