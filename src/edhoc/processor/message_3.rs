//! Message 3, in which the Initiator authenticates and the session keys
//! are settled.

use log::debug;
use serde_cbor::Value;

use super::{
    accepted, bytes, encode_cx, g_iy, own_credential, written, Items,
    MessageProcessor,
};
use crate::{
    cbor,
    edhoc::{cose, crypto, ead::EadSlot, error::Error, Result},
};

impl MessageProcessor {
    /// Returns message 3 of the current session.
    ///
    /// An Initiator session keeps the message and the keys derived for it,
    /// then sets up its OSCORE context.
    pub fn write_message_3(&self) -> Option<Vec<u8>> {
        written("Writing EDHOC Message 3", self.build_message_3())
    }

    fn build_message_3(&self) -> Result<Vec<u8>> {
        let version = self.state.protocol_version();
        let session = self.state.session();
        let is_initiator = session.is_initiator();
        let mut state = session.lock();
        let suite = state.selected_suite;

        let mut items = Vec::with_capacity(2);
        if self.state.send_with_prepended_cx() {
            items.push(encode_cx(&state.peer_connection_id, "C_R")?);
        }

        let cred_r = (!version.leq_v15()).then_some(state.peer_cred.as_slice());
        let th_3 = crypto::next_th(&state.th_2, &state.plaintext_2, cred_r)?;
        let g_iy = g_iy(
            is_initiator,
            &state,
            &state.peer_long_term_key,
            &state.peer_ephemeral_key,
        )?;
        let prk_4e3m =
            crypto::prk_4e3m(&state.prk_3e2m, &th_3, g_iy.as_deref())?;

        let credential = own_credential(&state)?;
        let ead_3 = self.produce_ead(EadSlot::Message3)?;
        let signs = crypto::initiator_signs(state.method);
        let mac_3 = crypto::mac(
            &prk_4e3m,
            crypto::MAC_3,
            &credential.id_cred,
            &th_3,
            &credential.cred,
            &ead_3,
            crypto::mac_length(signs, suite),
        )?;
        let external_data =
            crypto::external_data(&th_3, &credential.cred, &ead_3)?;
        let signature = crypto::signature_or_mac(
            signs,
            suite,
            &mac_3,
            &credential.id_cred,
            &external_data,
            &credential.key,
        )?;
        let id_cred_i = cose::id_cred_element(&credential.id_cred)
            .ok_or(Error::InvalidIdentifier("ID_CRED_I"))?;

        let mut fields = Vec::with_capacity(2 + ead_3.len());
        fields.push(id_cred_i);
        fields.push(Value::Bytes(signature));
        fields.extend(ead_3);
        let plaintext_3 = cbor::encode_sequence(&fields)?;

        let (key, iv) = crypto::key_and_iv(
            suite,
            &state.prk_3e2m,
            (crypto::K_3, crypto::IV_3),
            &th_3,
        )?;
        let ciphertext_3 =
            crypto::encrypt(suite, &key, &iv, &th_3, &plaintext_3)?;
        items.push(Value::Bytes(ciphertext_3));
        let message_3 = cbor::encode_sequence(&items)?;

        let cred_i = (!version.leq_v15()).then_some(credential.cred.as_slice());
        let th_4 = crypto::next_th(&th_3, &plaintext_3, cred_i)?;
        let prk_out = crypto::prk_out(&prk_4e3m, &th_4)?;
        let prk_exporter = crypto::prk_exporter(&prk_out)?;

        if is_initiator {
            state.th_3 = th_3;
            state.prk_4e3m = prk_4e3m;
            state.th_4 = th_4;
            state.prk_out = prk_out;
            state.prk_exporter = prk_exporter;
            state.message_3 = message_3.clone();
            drop(state);
            session.setup_oscore_context();
        }

        Ok(message_3)
    }

    /// Reads message 3 and verifies the Initiator.
    ///
    /// A Responder session keeps the keys derived for the message, then
    /// sets up its OSCORE context.
    pub fn read_message_3(&self, sequence: &[u8]) -> bool {
        accepted("Reading EDHOC Message 3", self.parse_message_3(sequence))
    }

    fn parse_message_3(&self, sequence: &[u8]) -> Result<()> {
        let version = self.state.protocol_version();
        let endpoint = self.state.endpoint();
        let values = cbor::decode_sequence(sequence)?;
        let mut items = Items::new(&values);
        let session = self.addressed_session(&mut items, "C_R")?;

        let ciphertext_3 = bytes(
            items.next("CIPHERTEXT_3")?,
            "Invalid type of CIPHERTEXT_3",
        )?;
        if items.remaining() != 0 {
            return Err(Error::Malformed("Trailing items in message 3"));
        }

        let is_initiator = session.is_initiator();
        let mut state = session.lock();
        let suite = state.selected_suite;

        let own_cred = own_credential(&state)?.cred.clone();
        let cred_r = (!version.leq_v15()).then_some(own_cred.as_slice());
        let th_3 = crypto::next_th(&state.th_2, &state.plaintext_2, cred_r)?;
        let (key, iv) = crypto::key_and_iv(
            suite,
            &state.prk_3e2m,
            (crypto::K_3, crypto::IV_3),
            &th_3,
        )?;
        let plaintext_3 =
            crypto::decrypt(suite, &key, &iv, &th_3, ciphertext_3)?;

        let fields = cbor::decode_sequence(&plaintext_3)?;
        if fields.is_empty() {
            return Err(Error::Malformed("Empty PLAINTEXT_3"));
        }
        let mut plaintext = Items::new(&fields);
        plaintext.advance(self.skip_padding(&fields));
        let id_cred_i = plaintext.next("ID_CRED_I")?;
        let signature = bytes(
            plaintext.next("Signature_or_MAC_3")?,
            "Invalid type of Signature_or_MAC_3",
        )?;
        let ead_3 = self.pre_parse_ead(&fields, plaintext.position())?;

        let (peer_id_cred, peer_long_term_key) =
            self.peer_identity(id_cred_i, false)?;
        let ead_processor = endpoint.ead_processor();
        if !ead_3.is_empty() {
            ead_processor
                .pre_verify(EadSlot::Message3, &ead_3)
                .map_err(Error::Ead)?;
        }
        let peer_cred = self.peer_credential(&peer_id_cred)?;

        let g_iy = g_iy(
            is_initiator,
            &state,
            &peer_long_term_key,
            &state.peer_ephemeral_key,
        )?;
        let prk_4e3m =
            crypto::prk_4e3m(&state.prk_3e2m, &th_3, g_iy.as_deref())?;
        let signs = crypto::initiator_signs(state.method);
        let mac_3 = crypto::mac(
            &prk_4e3m,
            crypto::MAC_3,
            &peer_id_cred,
            &th_3,
            &peer_cred,
            &ead_3,
            crypto::mac_length(signs, suite),
        )?;
        let external_data = crypto::external_data(&th_3, &peer_cred, &ead_3)?;
        crypto::verify_signature_or_mac(
            signs,
            suite,
            signature,
            &mac_3,
            &peer_id_cred,
            &external_data,
            &peer_long_term_key,
        )?;
        if !ead_3.is_empty() {
            ead_processor
                .post_verify(EadSlot::Message3, &peer_id_cred, &ead_3)
                .map_err(Error::Ead)?;
        }

        let cred_i = (!version.leq_v15()).then_some(peer_cred.as_slice());
        let th_4 = crypto::next_th(&th_3, &plaintext_3, cred_i)?;
        let prk_out = crypto::prk_out(&prk_4e3m, &th_4)?;
        let prk_exporter = crypto::prk_exporter(&prk_out)?;

        if !is_initiator {
            debug!("Message 3 verified, deriving the OSCORE context");
            state.peer_id_cred = peer_id_cred;
            state.peer_cred = peer_cred;
            state.peer_long_term_key = peer_long_term_key;
            state.th_3 = th_3;
            state.prk_4e3m = prk_4e3m;
            state.th_4 = th_4;
            state.prk_out = prk_out;
            state.prk_exporter = prk_exporter;
            drop(state);
            session.setup_oscore_context();
        }

        Ok(())
    }
}
