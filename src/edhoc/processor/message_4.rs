//! The optional message 4, which only carries EAD items.

use serde_cbor::Value;

use super::{accepted, bytes, encode_cx, written, Items, MessageProcessor};
use crate::{
    cbor,
    edhoc::{crypto, ead::EadSlot, error::Error, Result},
};

impl MessageProcessor {
    /// Returns message 4 of the current session.
    pub fn write_message_4(&self) -> Option<Vec<u8>> {
        written("Writing EDHOC Message 4", self.build_message_4())
    }

    fn build_message_4(&self) -> Result<Vec<u8>> {
        let session = self.state.session();
        let state = session.lock();
        let suite = state.selected_suite;

        let mut items = Vec::with_capacity(2);
        if self.state.send_with_prepended_cx() {
            items.push(encode_cx(&state.peer_connection_id, "C_I")?);
        }

        let ead_4 = self.produce_ead(EadSlot::Message4)?;
        let plaintext_4 = cbor::encode_sequence(&ead_4)?;
        let (key, iv) = crypto::key_and_iv(
            suite,
            &state.prk_4e3m,
            (crypto::K_4, crypto::IV_4),
            &state.th_4,
        )?;
        let ciphertext_4 =
            crypto::encrypt(suite, &key, &iv, &state.th_4, &plaintext_4)?;
        items.push(Value::Bytes(ciphertext_4));

        Ok(cbor::encode_sequence(&items)?)
    }

    /// Reads message 4, checking the EAD items it carries.
    pub fn read_message_4(&self, sequence: &[u8]) -> bool {
        accepted("Reading EDHOC Message 4", self.parse_message_4(sequence))
    }

    fn parse_message_4(&self, sequence: &[u8]) -> Result<()> {
        let values = cbor::decode_sequence(sequence)?;
        let mut items = Items::new(&values);
        let session = self.addressed_session(&mut items, "C_I")?;

        let ciphertext_4 = bytes(
            items.next("CIPHERTEXT_4")?,
            "Invalid type of CIPHERTEXT_4",
        )?;
        if items.remaining() != 0 {
            return Err(Error::Malformed("Trailing items in message 4"));
        }

        let plaintext_4 = {
            let state = session.lock();
            let suite = state.selected_suite;
            let (key, iv) = crypto::key_and_iv(
                suite,
                &state.prk_4e3m,
                (crypto::K_4, crypto::IV_4),
                &state.th_4,
            )?;
            crypto::decrypt(suite, &key, &iv, &state.th_4, ciphertext_4)?
        };
        if plaintext_4.is_empty() {
            return Ok(());
        }

        let fields = cbor::decode_sequence(&plaintext_4)?;
        let ead_4 = self.pre_parse_ead(&fields, self.skip_padding(&fields))?;
        if !ead_4.is_empty() {
            self.state
                .endpoint()
                .ead_processor()
                .pre_verify(EadSlot::Message4, &ead_4)
                .map_err(Error::Ead)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{super::fixtures::*, *};
    use crate::edhoc::{
        config::{AppProfile, ProtocolVersion},
        ead::StaticEad,
        suite::CipherSuite,
    };

    fn run(
        initiator: &MessageProcessor,
        responder: &MessageProcessor,
    ) -> Option<Vec<u8>> {
        let message_1 = initiator.write_message_1().unwrap();
        assert!(responder.read_message_1(&message_1));
        let message_2 = responder.write_message_2().unwrap();
        assert!(initiator.read_message_2(&message_2));
        let message_3 = initiator.write_message_3().unwrap();
        assert!(responder.read_message_3(&message_3));
        responder.write_message_4()
    }

    /// Returns a pair whose Responder sends the EAD items with message 4.
    fn with_ead_4(items: Vec<Value>) -> (MessageProcessor, MessageProcessor) {
        let (alice, bob) = (Party::new(0x2B, 0x2C), Party::new(0x32, 0x33));
        let initiator = processor(
            endpoint(vec![CipherSuite::Suite0], &alice, &bob, AppProfile::default()),
            true,
            0,
            ProtocolVersion::V23,
        );
        let mut bob_endpoint =
            endpoint(vec![CipherSuite::Suite0], &bob, &alice, AppProfile::default());
        bob_endpoint.set_ead_processor(Box::new(
            StaticEad::new().with_items(EadSlot::Message4, items),
        ));
        let responder = processor(bob_endpoint, false, 0, ProtocolVersion::V23);
        (initiator, responder)
    }

    #[test]
    fn empty() {
        let (initiator, responder) = pair(0, ProtocolVersion::V23);
        let message_4 = run(&initiator, &responder).unwrap();

        // Only the tag of the empty plaintext
        let items = cbor::decode_sequence(&message_4).unwrap();
        assert_eq!(1, items.len());
        assert_eq!(
            Some(CipherSuite::Suite0.edhoc_aead().tag_len()),
            cbor::as_bytes(&items[0]).map(<[u8]>::len)
        );
        assert!(initiator.read_message_4(&message_4));
    }

    #[test]
    fn supported_ead() {
        let (initiator, responder) =
            with_ead_4(vec![Value::Integer(5), Value::Bytes(vec![0xAB])]);
        let message_4 = run(&initiator, &responder).unwrap();
        assert!(initiator.read_message_4(&message_4));
    }

    #[test]
    fn critical_ead() {
        // Label -7 is critical and not supported
        let (initiator, responder) = with_ead_4(vec![Value::Integer(-7)]);
        let message_4 = run(&initiator, &responder).unwrap();
        assert!(!initiator.read_message_4(&message_4));
    }

    #[test]
    fn before_handshake() {
        let (initiator, responder) = pair(0, ProtocolVersion::V23);
        let message_4 = run(&initiator, &responder).unwrap();

        // The keys of a fresh session don't match
        let (other, _) = pair(0, ProtocolVersion::V23);
        assert!(!other.read_message_4(&message_4));
        // An empty CIPHERTEXT_4 lacks the tag
        assert!(!initiator.read_message_4(&[0x40]));
    }
}
