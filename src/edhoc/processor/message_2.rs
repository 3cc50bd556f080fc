//! Message 2, in which the Responder authenticates.

use log::debug;
use serde_cbor::Value;

use super::{
    accepted, bytes, decode_cx, dh, encode_cx, g_rx, own_credential, written,
    Items, MessageProcessor,
};
use crate::{
    cbor,
    edhoc::{
        cose, crypto,
        ead::EadSlot,
        error::Error,
        keys::PublicKey,
        suite::EPHEMERAL_LEN,
        Result,
    },
};

impl MessageProcessor {
    /// Returns message 2 of the current session.
    ///
    /// A Responder session keeps the transcript hash and the keys derived
    /// for the message.
    pub fn write_message_2(&self) -> Option<Vec<u8>> {
        written("Writing EDHOC Message 2", self.build_message_2())
    }

    fn build_message_2(&self) -> Result<Vec<u8>> {
        let version = self.state.protocol_version();
        let session = self.state.session();
        let is_initiator = session.is_initiator();
        let mut state = session.lock();
        let suite = state.selected_suite;

        let mut items = Vec::with_capacity(3);
        if self.state.send_with_prepended_cx() {
            items.push(encode_cx(&state.peer_connection_id, "C_I")?);
        }
        let g_y = state.ephemeral_key.public_key().ephemeral_bytes();
        let c_r = encode_cx(&state.connection_id, "C_R")?;

        let th_2 = crypto::th_2(
            &g_y,
            version.leq_v19().then_some(&c_r),
            &state.hash_message_1,
        )?;
        let g_xy = dh(suite, &state.ephemeral_key, &state.peer_ephemeral_key)?;
        let salt: &[u8] = if version.leq_v15() { &[] } else { &th_2 };
        let prk_2e = crypto::prk_2e(salt, &g_xy);
        let g_rx = g_rx(
            is_initiator,
            &state,
            &state.peer_long_term_key,
            &state.peer_ephemeral_key,
        )?;
        let prk_3e2m = crypto::prk_3e2m(&prk_2e, &th_2, g_rx.as_deref())?;

        let credential = own_credential(&state)?;
        let ead_2 = self.produce_ead(EadSlot::Message2)?;
        let signs = crypto::responder_signs(state.method);
        let mac_2 = crypto::mac(
            &prk_3e2m,
            crypto::MAC_2,
            &credential.id_cred,
            &th_2,
            &credential.cred,
            &ead_2,
            crypto::mac_length(signs, suite),
        )?;
        let external_data =
            crypto::external_data(&th_2, &credential.cred, &ead_2)?;
        let signature = crypto::signature_or_mac(
            signs,
            suite,
            &mac_2,
            &credential.id_cred,
            &external_data,
            &credential.key,
        )?;
        let id_cred_r = cose::id_cred_element(&credential.id_cred)
            .ok_or(Error::InvalidIdentifier("ID_CRED_R"))?;

        let mut fields = Vec::with_capacity(3 + ead_2.len());
        if !version.leq_v19() {
            fields.push(c_r.clone());
        }
        fields.push(id_cred_r);
        fields.push(Value::Bytes(signature));
        fields.extend(ead_2);
        let plaintext_2 = cbor::encode_sequence(&fields)?;

        let keystream = crypto::keystream_2(&prk_2e, &th_2, plaintext_2.len())?;
        let mut g_y_ciphertext = g_y;
        g_y_ciphertext.extend(crypto::xor(&plaintext_2, &keystream));
        items.push(Value::Bytes(g_y_ciphertext));
        if version.leq_v19() {
            items.push(c_r);
        }
        let message_2 = cbor::encode_sequence(&items)?;

        if !is_initiator {
            state.th_2 = th_2;
            state.prk_2e = prk_2e;
            state.prk_3e2m = prk_3e2m;
            state.plaintext_2 = plaintext_2;
        }

        Ok(message_2)
    }

    /// Reads message 2 and verifies the Responder.
    ///
    /// An Initiator session keeps the identity of the Responder and the
    /// keys derived for the message.
    pub fn read_message_2(&self, sequence: &[u8]) -> bool {
        accepted("Reading EDHOC Message 2", self.parse_message_2(sequence))
    }

    fn parse_message_2(&self, sequence: &[u8]) -> Result<()> {
        let version = self.state.protocol_version();
        let endpoint = self.state.endpoint();
        let values = cbor::decode_sequence(sequence)?;
        let mut items = Items::new(&values);
        let session = self.addressed_session(&mut items, "C_I")?;

        let g_y_ciphertext = bytes(
            items.next("G_Y_CIPHERTEXT_2")?,
            "Invalid type of G_Y_CIPHERTEXT_2",
        )?;
        if g_y_ciphertext.len() <= EPHEMERAL_LEN {
            return Err(Error::Malformed("G_Y_CIPHERTEXT_2 too short"));
        }
        let (g_y, ciphertext_2) = g_y_ciphertext.split_at(EPHEMERAL_LEN);
        let outer_c_r = if version.leq_v19() {
            Some(items.next("C_R")?)
        } else {
            None
        };
        if items.remaining() != 0 {
            return Err(Error::Malformed("Trailing items in message 2"));
        }

        let is_initiator = session.is_initiator();
        let mut state = session.lock();
        let suite = state.selected_suite;

        let peer_ephemeral_key =
            PublicKey::from_ephemeral(suite.dh_curve(), g_y)?;
        let th_2 = crypto::th_2(g_y, outer_c_r, &state.hash_message_1)?;
        let g_xy = dh(suite, &state.ephemeral_key, &peer_ephemeral_key)?;
        let salt: &[u8] = if version.leq_v15() { &[] } else { &th_2 };
        let prk_2e = crypto::prk_2e(salt, &g_xy);

        let keystream =
            crypto::keystream_2(&prk_2e, &th_2, ciphertext_2.len())?;
        let plaintext_2 = crypto::xor(ciphertext_2, &keystream);
        let fields = cbor::decode_sequence(&plaintext_2)?;
        if fields.is_empty() {
            return Err(Error::Malformed("Empty PLAINTEXT_2"));
        }
        let mut plaintext = Items::new(&fields);
        plaintext.advance(self.skip_padding(&fields));

        let c_r = match outer_c_r {
            Some(c_r) => c_r,
            None => plaintext.next("C_R")?,
        };
        let c_r = decode_cx(c_r, "C_R")?;
        if session.settings().app_profile.use_oscore
            && c_r == state.connection_id
        {
            return Err(Error::Malformed("C_R equal to C_I"));
        }

        let id_cred_r = plaintext.next("ID_CRED_R")?;
        let signature = bytes(
            plaintext.next("Signature_or_MAC_2")?,
            "Invalid type of Signature_or_MAC_2",
        )?;
        let ead_2 = self.pre_parse_ead(&fields, plaintext.position())?;

        let (peer_id_cred, peer_long_term_key) =
            self.peer_identity(id_cred_r, true)?;
        let ead_processor = endpoint.ead_processor();
        if !ead_2.is_empty() {
            ead_processor
                .pre_verify(EadSlot::Message2, &ead_2)
                .map_err(Error::Ead)?;
        }
        let peer_cred = self.peer_credential(&peer_id_cred)?;

        let g_rx = g_rx(
            is_initiator,
            &state,
            &peer_long_term_key,
            &peer_ephemeral_key,
        )?;
        let prk_3e2m = crypto::prk_3e2m(&prk_2e, &th_2, g_rx.as_deref())?;
        let signs = crypto::responder_signs(state.method);
        let mac_2 = crypto::mac(
            &prk_3e2m,
            crypto::MAC_2,
            &peer_id_cred,
            &th_2,
            &peer_cred,
            &ead_2,
            crypto::mac_length(signs, suite),
        )?;
        let external_data = crypto::external_data(&th_2, &peer_cred, &ead_2)?;
        crypto::verify_signature_or_mac(
            signs,
            suite,
            signature,
            &mac_2,
            &peer_id_cred,
            &external_data,
            &peer_long_term_key,
        )?;
        if !ead_2.is_empty() {
            ead_processor
                .post_verify(EadSlot::Message2, &peer_id_cred, &ead_2)
                .map_err(Error::Ead)?;
        }

        if is_initiator {
            debug!("Message 2 from connection identifier {:02x?}", c_r);
            state.peer_connection_id = c_r;
            state.peer_id_cred = peer_id_cred;
            state.peer_cred = peer_cred;
            state.peer_ephemeral_key = peer_ephemeral_key;
            state.peer_long_term_key = peer_long_term_key;
            state.th_2 = th_2;
            state.plaintext_2 = plaintext_2;
            state.prk_2e = prk_2e;
            state.prk_3e2m = prk_3e2m;
        }

        Ok(())
    }
}
