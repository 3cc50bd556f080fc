//! Building and reading of EDHOC messages on the sessions of an endpoint.
//!
//! Every `write_*` function returns the message, or `None` if it can't be
//! built. Every `read_*` function returns whether the message was accepted.
//! The reason of a failure is logged. A session only changes once a message
//! went through completely, and then only on the side of the party the
//! message is meant for.

use std::sync::Arc;

use log::error;
use serde_cbor::Value;

use super::{
    cose, crypto,
    ead::EadSlot,
    error::Error,
    keys::{KeyPair, PublicKey},
    registry::OwnCredential,
    session::{SessionHandle, SessionState},
    state::EngineState,
    suite::CipherSuite,
    Result,
};
use crate::cbor;

mod error_message;
mod message_1;
mod message_2;
mod message_3;
mod message_4;

pub use error_message::{
    ERR_CODE_SUCCESS, ERR_CODE_UNSPECIFIED_ERROR,
    ERR_CODE_WRONG_SELECTED_CIPHER_SUITE,
};

/// What a received CBOR sequence looks like.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    Message1,
    /// Only for revisions that send `C_R` outside of `CIPHERTEXT_2`.
    Message2,
    /// Message 2, 3 or 4 of later revisions, which all have one element.
    Message2Or3Or4,
    Message3Or4,
    ErrorMessage,
    Unknown,
}

/// Builds and reads the messages of the current session of an engine.
#[derive(Clone)]
pub struct MessageProcessor {
    state: Arc<EngineState>,
}

impl MessageProcessor {
    pub fn new(state: Arc<EngineState>) -> MessageProcessor {
        MessageProcessor { state }
    }

    pub fn state(&self) -> &Arc<EngineState> {
        &self.state
    }

    /// Guesses the type of a message from its number of elements.
    ///
    /// A connection identifier that's prepended to requests we receive
    /// doesn't count.
    pub fn message_type_from_structure(&self, sequence: &[u8]) -> MessageType {
        let items = match cbor::decode_sequence(sequence) {
            Ok(items) => items,
            Err(e) => {
                error!("MessageType: {}", e);
                return MessageType::Unknown;
            }
        };

        if self.has_error_message_structure(&items) {
            return MessageType::ErrorMessage;
        }

        let offset = usize::from(self.state.receive_with_prepended_cx());
        let leq_v19 = self.state.protocol_version().leq_v19();
        match items.len().checked_sub(offset) {
            Some(4) | Some(5) => MessageType::Message1,
            Some(2) if leq_v19 => MessageType::Message2,
            Some(1) if leq_v19 => MessageType::Message3Or4,
            Some(1) => MessageType::Message2Or3Or4,
            _ => MessageType::Unknown,
        }
    }

    /// Returns whether the items look like an error message, which is
    /// `(? C_X, ERR_CODE, ERR_INFO)`.
    ///
    /// A request starts with a connection identifier, which can't be `true`
    /// as in front of message 1. A response starts with the error code.
    fn has_error_message_structure(&self, items: &[Value]) -> bool {
        if items.len() != 2 && items.len() != 3 {
            return false;
        }

        if self.state.receive_with_prepended_cx() {
            items[0] != Value::Bool(true)
                && matches!(items[1], Value::Integer(_))
        } else {
            matches!(items[0], Value::Integer(_))
        }
    }

    /// Returns the session a received message is for.
    ///
    /// That's the session of the prepended connection identifier if requests
    /// we receive carry one, the one with the identifier of the current
    /// session otherwise.
    fn addressed_session(
        &self,
        items: &mut Items,
        name: &'static str,
    ) -> Result<SessionHandle> {
        let connection_id = if self.state.receive_with_prepended_cx() {
            decode_cx(items.next(name)?, name)?
        } else {
            self.state.session().lock().connection_id.clone()
        };

        self.state
            .endpoint()
            .session(&connection_id)
            .ok_or(Error::UnknownSession)
    }

    /// Returns the EAD items the application wants to send.
    fn produce_ead(&self, slot: EadSlot) -> Result<Vec<Value>> {
        self.state
            .endpoint()
            .ead_processor()
            .produce(slot)
            .map_err(Error::Ead)
    }

    /// Returns the supported EAD items from `base` on.
    fn pre_parse_ead(
        &self,
        items: &[Value],
        base: usize,
    ) -> Result<Vec<Value>> {
        if base >= items.len() {
            return Ok(Vec::new());
        }

        cbor::pre_parse_ead(
            items,
            base,
            self.state.endpoint().supported_ead_labels(),
            self.state.ead_convention(),
        )
        .ok_or(Error::Malformed("Processing EAD"))
    }

    /// Returns the index of the first item after the padding, which only
    /// older revisions put in front of plaintexts.
    fn skip_padding(&self, items: &[Value]) -> usize {
        if !self.state.protocol_version().leq_v17() {
            return 0;
        }

        items
            .iter()
            .take_while(|item| **item == Value::Bool(true))
            .count()
    }

    /// Returns the `ID_CRED` and public key of the peer from its element in
    /// a plaintext.
    ///
    /// # Arguments
    /// * `element` - How `ID_CRED_x` was sent.
    /// * `reject_own` - Whether our own identities are refused.
    fn peer_identity(
        &self,
        element: &Value,
        reject_own: bool,
    ) -> Result<(Value, PublicKey)> {
        if !matches!(
            element,
            Value::Bytes(_) | Value::Integer(_) | Value::Map(_)
        ) {
            return Err(Error::Malformed("Invalid type of ID_CRED"));
        }
        let id_cred = cose::id_cred_from_element(element)
            .ok_or(Error::InvalidIdentifier("ID_CRED"))?;

        let endpoint = self.state.endpoint();
        let public_key = endpoint
            .peer_public_key(&id_cred)
            .cloned()
            .ok_or(Error::UnknownIdentity)?;
        if reject_own && endpoint.is_own_id_cred(&id_cred) {
            return Err(Error::OwnIdentity);
        }

        Ok((id_cred, public_key))
    }

    /// Returns the `CRED` of the peer identified by `id_cred`.
    fn peer_credential(&self, id_cred: &Value) -> Result<Vec<u8>> {
        self.state
            .endpoint()
            .peer_credential(id_cred)
            .map(<[u8]>::to_vec)
            .ok_or(Error::MissingCredential)
    }
}

/// A cursor over the items of a decoded message.
struct Items<'a> {
    items: &'a [Value],
    index: usize,
}

impl<'a> Items<'a> {
    fn new(items: &'a [Value]) -> Items<'a> {
        Items { items, index: 0 }
    }

    /// Returns the next item, failing with `missing` if there's none.
    fn next(&mut self, missing: &'static str) -> Result<&'a Value> {
        let item = self
            .items
            .get(self.index)
            .ok_or(Error::Malformed(missing))?;
        self.index += 1;

        Ok(item)
    }

    /// Skips `count` items, e.g. padding.
    fn advance(&mut self, count: usize) {
        self.index += count;
    }

    fn position(&self) -> usize {
        self.index
    }

    fn remaining(&self) -> usize {
        self.items.len().saturating_sub(self.index)
    }
}

/// Returns the connection identifier sent as `name`.
fn decode_cx(value: &Value, name: &'static str) -> Result<Vec<u8>> {
    cbor::decode_identifier(value).ok_or(Error::InvalidIdentifier(name))
}

/// Returns how our connection identifier or the peer's is sent.
fn encode_cx(id: &[u8], name: &'static str) -> Result<Value> {
    cbor::encode_identifier(id).ok_or(Error::InvalidIdentifier(name))
}

/// Returns the content of a byte string element.
fn bytes<'a>(value: &'a Value, what: &'static str) -> Result<&'a [u8]> {
    cbor::as_bytes(value).ok_or(Error::Malformed(what))
}

fn own_credential(state: &SessionState) -> Result<&OwnCredential> {
    state.credential.as_ref().ok_or(Error::MissingCredential)
}

/// Returns the DH secret of two keys on the DH curve of the suite.
fn dh(
    suite: CipherSuite,
    private: &KeyPair,
    public: &PublicKey,
) -> Result<Vec<u8>> {
    let curve = suite.dh_curve();
    if private.curve() != curve || public.curve() != curve {
        return Err(Error::KeyMismatch);
    }

    private.diffie_hellman(public)
}

/// Returns `G_RX` for `PRK_3e2m`, if the Responder authenticates with a
/// static DH key.
///
/// The Initiator combines its ephemeral key with the static key of the
/// Responder, the Responder its static key with the ephemeral key of the
/// Initiator.
fn g_rx(
    is_initiator: bool,
    state: &SessionState,
    peer_long_term: &PublicKey,
    peer_ephemeral: &PublicKey,
) -> Result<Option<Vec<u8>>> {
    if crypto::responder_signs(state.method) {
        return Ok(None);
    }

    let suite = state.selected_suite;
    let secret = if is_initiator {
        dh(suite, &state.ephemeral_key, peer_long_term)?
    } else {
        dh(suite, &own_credential(state)?.key, peer_ephemeral)?
    };

    Ok(Some(secret))
}

/// Returns `G_IY` for `PRK_4e3m`, if the Initiator authenticates with a
/// static DH key.
fn g_iy(
    is_initiator: bool,
    state: &SessionState,
    peer_long_term: &PublicKey,
    peer_ephemeral: &PublicKey,
) -> Result<Option<Vec<u8>>> {
    if crypto::initiator_signs(state.method) {
        return Ok(None);
    }

    let suite = state.selected_suite;
    let secret = if is_initiator {
        dh(suite, &own_credential(state)?.key, peer_ephemeral)?
    } else {
        dh(suite, &state.ephemeral_key, peer_long_term)?
    };

    Ok(Some(secret))
}

/// Logs the reason a message couldn't be built.
fn written(prefix: &str, result: Result<Vec<u8>>) -> Option<Vec<u8>> {
    result
        .map_err(|e| error!("{}: {}", prefix, e))
        .ok()
}

/// Logs the reason a message was rejected.
fn accepted(prefix: &str, result: Result<()>) -> bool {
    result.map_err(|e| error!("{}: {}", prefix, e)).is_ok()
}
