//! EDHOC error messages.

use log::{info, warn};
use serde_cbor::Value;

use super::{
    accepted, encode_cx, message_1::suites_value, written, Items,
    MessageProcessor,
};
use crate::{
    cbor,
    edhoc::{error::Error, Result},
};

pub const ERR_CODE_SUCCESS: i64 = 0;
pub const ERR_CODE_UNSPECIFIED_ERROR: i64 = 1;
pub const ERR_CODE_WRONG_SELECTED_CIPHER_SUITE: i64 = 2;

impl MessageProcessor {
    /// Returns an error message of the current session.
    ///
    /// # Arguments
    /// * `code` - `ERR_CODE_UNSPECIFIED_ERROR`, which needs a diagnostic
    ///   message, or `ERR_CODE_WRONG_SELECTED_CIPHER_SUITE`.
    /// * `diagnostic` - The text sent with an unspecified error.
    pub fn write_error_message(
        &self,
        code: i64,
        diagnostic: Option<&str>,
    ) -> Option<Vec<u8>> {
        written(
            "Writing EDHOC Error Message",
            self.build_error_message(code, diagnostic),
        )
    }

    fn build_error_message(
        &self,
        code: i64,
        diagnostic: Option<&str>,
    ) -> Result<Vec<u8>> {
        let session = self.state.session();
        let state = session.lock();

        let mut items = Vec::with_capacity(3);
        if self.state.send_with_prepended_cx() {
            items.push(encode_cx(&state.peer_connection_id, "C_X")?);
        }
        items.push(Value::Integer(code.into()));
        match code {
            ERR_CODE_UNSPECIFIED_ERROR => {
                let diagnostic = diagnostic
                    .ok_or(Error::Malformed("No diagnostic message"))?;
                items.push(Value::Text(diagnostic.to_string()));
            }
            ERR_CODE_WRONG_SELECTED_CIPHER_SUITE => {
                // Without a decision from message 1 all our suites are
                // offered
                let suites_r = match &state.suites_in_error {
                    Some(suites) => suites.clone(),
                    None => {
                        let own: Vec<i64> = self
                            .state
                            .endpoint()
                            .supported_suites()
                            .iter()
                            .map(|s| s.id())
                            .collect();
                        suites_value(&own)
                    }
                };
                if suite_list(&suites_r).is_none() {
                    return Err(Error::Malformed("Invalid SUITES_R"));
                }
                items.push(suites_r);
            }
            _ => return Err(Error::Malformed("Unsupported error code")),
        }

        Ok(cbor::encode_sequence(&items)?)
    }

    /// Reads an error message.
    ///
    /// Only a wrong selected cipher suite changes the session, which then
    /// knows the suites of the peer. Other codes are logged.
    pub fn read_error_message(&self, sequence: &[u8]) -> bool {
        accepted(
            "Reading EDHOC Error Message",
            self.parse_error_message(sequence),
        )
    }

    fn parse_error_message(&self, sequence: &[u8]) -> Result<()> {
        let values = cbor::decode_sequence(sequence)?;
        if values.is_empty() || values.len() > 3 {
            return Err(Error::Malformed("Wrong number of items"));
        }
        let mut items = Items::new(&values);
        let session = self.addressed_session(&mut items, "C_X")?;

        let code = cbor::as_int(items.next("ERR_CODE")?)
            .ok_or(Error::Malformed("Invalid type of ERR_CODE"))?;
        let err_info = items.next("ERR_INFO")?;
        if items.remaining() != 0 {
            return Err(Error::Malformed("Trailing items in error message"));
        }

        match code {
            ERR_CODE_SUCCESS => warn!("Error message with success code"),
            ERR_CODE_UNSPECIFIED_ERROR => match err_info {
                Value::Text(diagnostic) => {
                    info!("Error message: {}", diagnostic)
                }
                _ => return Err(Error::Malformed("Invalid type of DIAG_MSG")),
            },
            ERR_CODE_WRONG_SELECTED_CIPHER_SUITE => {
                let suites = suite_list(err_info)
                    .ok_or(Error::Malformed("Invalid SUITES_R"))?;
                info!("Peer supports the cipher suites {:?}", suites);
                session.lock().peer_supported_suites = suites;
            }
            code => warn!("Error message with unknown code {}", code),
        }

        Ok(())
    }
}

/// Returns the suites of `SUITES_R`, a single integer or an array of them.
fn suite_list(suites_r: &Value) -> Option<Vec<i64>> {
    match suites_r {
        Value::Integer(_) => cbor::as_int(suites_r).map(|s| vec![s]),
        Value::Array(suites) => suites.iter().map(cbor::as_int).collect(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use hexlit::hex;

    use super::{super::fixtures::*, *};
    use crate::edhoc::{
        config::{AppProfile, ProtocolVersion},
        suite::CipherSuite,
    };

    #[test]
    fn wrong_selected_suite() {
        let (alice, bob) = (Party::new(0x2B, 0x2C), Party::new(0x32, 0x33));
        let initiator = processor(
            endpoint(
                vec![CipherSuite::Suite0, CipherSuite::Suite1],
                &alice,
                &bob,
                AppProfile::default(),
            ),
            true,
            0,
            ProtocolVersion::V23,
        );
        let responder = processor(
            endpoint(vec![CipherSuite::Suite0], &bob, &alice, AppProfile::default()),
            false,
            0,
            ProtocolVersion::V23,
        );

        // The Initiator believes the Responder only supports suite 1
        initiator.state().session().lock().peer_supported_suites = vec![1];
        let message_1 = initiator.write_message_1().unwrap();
        let items = cbor::decode_sequence(&message_1).unwrap();
        assert_eq!(
            Value::Array(vec![Value::Integer(0), Value::Integer(1)]),
            items[2]
        );

        assert!(responder.read_message_1(&message_1));
        let session = responder.state().session();
        assert_eq!(Some(Value::Integer(0)), session.lock().suites_in_error);

        // (2, 0)
        let error = responder
            .write_error_message(ERR_CODE_WRONG_SELECTED_CIPHER_SUITE, None)
            .unwrap();
        assert_eq!(hex!("0200").to_vec(), error);
        assert!(initiator.read_error_message(&error));
        assert_eq!(
            vec![0],
            initiator.state().session().lock().peer_supported_suites
        );

        // The next attempt selects suite 0
        let message_1 = initiator.write_message_1().unwrap();
        let items = cbor::decode_sequence(&message_1).unwrap();
        assert_eq!(Value::Integer(0), items[2]);
    }

    #[test]
    fn all_suites_offered() {
        let (initiator, responder) = pair(0, ProtocolVersion::V23);
        // (h'00000000', 2, 0), addressed to the placeholder of the peer
        assert_eq!(
            Some(hex!("44000000000200").to_vec()),
            initiator.write_error_message(ERR_CODE_WRONG_SELECTED_CIPHER_SUITE, None)
        );
        assert_eq!(
            Some(hex!("0200").to_vec()),
            responder.write_error_message(ERR_CODE_WRONG_SELECTED_CIPHER_SUITE, None)
        );
    }

    #[test]
    fn unspecified_error() {
        let (initiator, responder) = pair(0, ProtocolVersion::V23);
        // (1, "oops")
        let error = responder
            .write_error_message(ERR_CODE_UNSPECIFIED_ERROR, Some("oops"))
            .unwrap();
        assert_eq!(hex!("01646F6F7073").to_vec(), error);
        assert!(initiator.read_error_message(&error));

        assert_eq!(
            None,
            responder.write_error_message(ERR_CODE_UNSPECIFIED_ERROR, None)
        );
        assert_eq!(None, responder.write_error_message(3, Some("oops")));
    }

    #[test]
    fn requests_name_the_session() {
        let (initiator, responder) = pair(0, ProtocolVersion::V23);
        let message_1 = initiator.write_message_1().unwrap();
        assert!(responder.read_message_1(&message_1));

        // (0, 1, "hi") for the new session, (5, 1, "hi") for none
        assert!(responder.read_error_message(&hex!("0001626869")));
        assert!(!responder.read_error_message(&hex!("0501626869")));
    }

    #[test]
    fn invalid_error_messages() {
        let (initiator, _) = pair(0, ProtocolVersion::V23);
        let session = initiator.state().session();

        // (1)
        assert!(!initiator.read_error_message(&hex!("01")));
        // (1, 1)
        assert!(!initiator.read_error_message(&hex!("0101")));
        // (2, h'00')
        assert!(!initiator.read_error_message(&hex!("024100")));
        // (2, [0, "a"])
        assert!(!initiator.read_error_message(&hex!("0282006161")));
        // (1, "a", 0)
        assert!(!initiator.read_error_message(&hex!("01616100")));
        assert!(!initiator.read_error_message(&[]));
        assert!(session.lock().peer_supported_suites.is_empty());

        // Success and unknown codes are only logged
        assert!(initiator.read_error_message(&hex!("0000")));
        assert!(initiator.read_error_message(&hex!("0700")));
        // (2, [1, 3])
        assert!(initiator.read_error_message(&hex!("02820103")));
        assert_eq!(vec![1, 3], session.lock().peer_supported_suites);
    }
}
