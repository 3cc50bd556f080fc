//! Message 1 and the negotiation of the cipher suite.

use std::sync::Arc;

use log::{debug, warn};
use serde_cbor::Value;

use super::{
    accepted, bytes, decode_cx, encode_cx, written, Items, MessageProcessor,
};
use crate::{
    cbor,
    edhoc::{
        crypto,
        ead::EadSlot,
        error::Error,
        keys::PublicKey,
        session::{Role, Session, SessionSettings},
        suite::CipherSuite,
        Result,
    },
};

impl MessageProcessor {
    /// Returns message 1 of the current session.
    ///
    /// The session keeps the selected suite and matching keys. Only an
    /// Initiator session keeps the hash of the message.
    pub fn write_message_1(&self) -> Option<Vec<u8>> {
        written("Writing EDHOC Message 1", self.build_message_1())
    }

    fn build_message_1(&self) -> Result<Vec<u8>> {
        let endpoint = self.state.endpoint();
        let session = self.state.session();
        let is_initiator = session.is_initiator();
        let mut state = session.lock();

        let (suite, suites_i) = negotiate(
            endpoint.supported_suites(),
            &state.peer_supported_suites,
        )?;
        let c_i = encode_cx(&state.connection_id, "C_I")?;
        let ead_1 = self.produce_ead(EadSlot::Message1)?;

        state.select_suite(suite, endpoint, is_initiator);
        let mut items = Vec::with_capacity(5 + ead_1.len());
        if self.state.send_with_prepended_cx() {
            items.push(Value::Bool(true));
        }
        let offset = items.len();
        items.push(Value::Integer(state.method.into()));
        items.push(suites_i);
        let g_x = state.ephemeral_key.public_key().ephemeral_bytes();
        items.push(Value::Bytes(g_x));
        items.push(c_i);
        items.extend(ead_1);
        let message_1 = cbor::encode_sequence(&items)?;

        if is_initiator {
            // A prepended true is the single byte 0xF5
            state.hash_message_1 = crypto::hash(&message_1[offset..]);
        }
        debug!("Message 1 with cipher suite {}", suite.id());

        Ok(message_1)
    }

    /// Reads message 1 and starts a new Responder session for it.
    ///
    /// The new session gets a fresh connection identifier and becomes the
    /// current one. An Initiator session accepts the message without
    /// changing.
    pub fn read_message_1(&self, sequence: &[u8]) -> bool {
        accepted("Reading EDHOC Message 1", self.parse_message_1(sequence))
    }

    fn parse_message_1(&self, sequence: &[u8]) -> Result<()> {
        let values = cbor::decode_sequence(sequence)?;
        if values.is_empty() {
            return Err(Error::Malformed("Empty message 1"));
        }
        let mut items = Items::new(&values);
        if self.state.receive_with_prepended_cx()
            && items.next("true")? != &Value::Bool(true)
        {
            return Err(Error::Malformed("No true in front of message 1"));
        }
        let offset = items.position();

        let old = self.state.session();
        let method = cbor::as_int(items.next("METHOD")?)
            .ok_or(Error::Malformed("Invalid type of METHOD"))?;
        if !old.settings().app_profile.is_method_supported(method) {
            return Err(Error::UnsupportedMethod(method));
        }
        let method =
            u8::try_from(method).map_err(|_| Error::UnsupportedMethod(method))?;

        let endpoint = self.state.endpoint();
        let own: Vec<i64> =
            endpoint.supported_suites().iter().map(|s| s.id()).collect();
        let (selected, suites_in_error) =
            check_suites_i(items.next("SUITES_I")?, &own)?;

        let g_x = bytes(items.next("G_X")?, "Invalid type of G_X")?;
        let c_i = decode_cx(items.next("C_I")?, "C_I")?;

        let ead_1 = self.pre_parse_ead(&values, items.position())?;
        if !ead_1.is_empty() {
            endpoint
                .ead_processor()
                .pre_verify(EadSlot::Message1, &ead_1)
                .map_err(Error::Ead)?;
        }

        if old.is_initiator() {
            return Ok(());
        }

        let suite = endpoint
            .supported_suites()
            .iter()
            .copied()
            .find(|s| s.id() == selected)
            .unwrap_or_else(|| {
                warn!("Unsupported cipher suite {} selected", selected);
                endpoint.preferred_suite()
            });
        let peer_curve =
            CipherSuite::from_id(selected).unwrap_or(suite).dh_curve();
        let peer_ephemeral_key = PublicKey::from_ephemeral(peer_curve, g_x)?;

        let connection_id = endpoint
            .allocate_connection_id(&c_i)
            .ok_or(Error::NoConnectionId)?;
        let settings = SessionSettings {
            role: Role::Responder,
            ..old.settings().clone()
        };
        let peer_suites = old.lock().peer_supported_suites.clone();
        let session = Arc::new(Session::new(
            settings,
            endpoint,
            method,
            connection_id.clone(),
            peer_suites,
        ));
        {
            let mut state = session.lock();
            state.select_suite(suite, endpoint, false);
            state.peer_connection_id = c_i;
            state.peer_ephemeral_key = peer_ephemeral_key;
            state.hash_message_1 = crypto::hash(&sequence[offset..]);
            state.suites_in_error = suites_in_error;
        }

        self.state.replace_session(Arc::clone(&session));
        endpoint.insert_session(&connection_id, session);
        debug!("New session with connection identifier {:02x?}", connection_id);

        Ok(())
    }
}

/// Returns how a list of suites is sent, a single suite as an integer.
pub(super) fn suites_value(ids: &[i64]) -> Value {
    match ids {
        [id] => Value::Integer((*id).into()),
        _ => Value::Array(
            ids.iter().map(|id| Value::Integer((*id).into())).collect(),
        ),
    }
}

/// Returns the suite to use and `SUITES_I`.
///
/// Without knowledge of the peer that's our most preferred suite. Otherwise
/// it's the first of ours the peer supports, and `SUITES_I` lists our suites
/// up to it.
///
/// # Arguments
/// * `own` - Our suites, most preferred first.
/// * `peer` - The suites the peer said it supports.
fn negotiate(
    own: &[CipherSuite],
    peer: &[i64],
) -> Result<(CipherSuite, Value)> {
    let preferred = *own.first().ok_or(Error::UnsupportedSuite)?;
    let selected = if peer.is_empty() {
        preferred
    } else {
        *own.iter()
            .find(|s| peer.contains(&s.id()))
            .ok_or(Error::NoCommonSuite)?
    };

    let ids: Vec<i64> = own
        .iter()
        .map(|s| s.id())
        .take_while(|id| *id != selected.id())
        .chain(Some(selected.id()))
        .collect();

    Ok((selected, suites_value(&ids)))
}

/// Returns the suite selected in `SUITES_I` and the suites to offer in an
/// error message, if the selection isn't acceptable.
///
/// All our suites are offered when we share none with the Initiator, only
/// the first shared one when the Initiator selected another.
fn check_suites_i(
    suites_i: &Value,
    own: &[i64],
) -> Result<(i64, Option<Value>)> {
    match suites_i {
        Value::Integer(_) => {
            let selected = cbor::as_int(suites_i)
                .filter(|s| *s >= 0)
                .ok_or(Error::Malformed("Negative cipher suite in SUITES_I"))?;
            let offer = if own.contains(&selected) {
                None
            } else {
                Some(suites_value(own))
            };

            Ok((selected, offer))
        }
        Value::Array(suites) => {
            if suites.len() < 2 {
                return Err(Error::Malformed(
                    "Too few cipher suites in SUITES_I",
                ));
            }
            let suites: Vec<i64> = suites
                .iter()
                .map(|s| cbor::as_int(s).filter(|s| *s >= 0))
                .collect::<Option<_>>()
                .ok_or(Error::Malformed("Invalid cipher suite in SUITES_I"))?;

            let selected = suites[suites.len() - 1];
            let offer = match suites.iter().copied().find(|s| own.contains(s)) {
                None => Some(suites_value(own)),
                Some(shared) if shared != selected => {
                    Some(suites_value(&[shared]))
                }
                Some(_) => None,
            };

            Ok((selected, offer))
        }
        _ => Err(Error::Malformed("Invalid type of SUITES_I")),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{super::fixtures::*, *};
    use crate::edhoc::config::{AppProfile, ProtocolVersion};

    fn int(i: i64) -> Value {
        Value::Integer(i.into())
    }

    fn array(ids: &[i64]) -> Value {
        Value::Array(ids.iter().map(|i| int(*i)).collect())
    }

    #[rstest]
    #[case(&[0, 1, 2], &[2, 1], CipherSuite::Suite1, array(&[0, 1]))]
    #[case(&[0, 1, 2], &[], CipherSuite::Suite0, int(0))]
    #[case(&[2, 0], &[0], CipherSuite::Suite0, array(&[2, 0]))]
    #[case(&[3, 2], &[3], CipherSuite::Suite3, int(3))]
    fn negotiation(
        #[case] own: &[i64],
        #[case] peer: &[i64],
        #[case] suite: CipherSuite,
        #[case] suites_i: Value,
    ) {
        let own: Vec<_> =
            own.iter().map(|i| CipherSuite::from_id(*i).unwrap()).collect();
        let (selected, value) = negotiate(&own, peer).unwrap();
        assert_eq!(suite, selected);
        assert_eq!(suites_i, value);
    }

    #[test]
    fn nothing_in_common() {
        let own = [CipherSuite::Suite0, CipherSuite::Suite2];
        assert!(matches!(negotiate(&own, &[1, 3]), Err(Error::NoCommonSuite)));
    }

    #[rstest]
    #[case(int(0), &[0], 0, None)]
    #[case(int(2), &[0, 1], 2, Some(array(&[0, 1])))]
    #[case(int(2), &[0], 2, Some(int(0)))]
    #[case(array(&[0, 1]), &[0], 1, Some(int(0)))]
    #[case(array(&[0, 1]), &[0, 1], 1, Some(int(0)))]
    #[case(array(&[1, 0]), &[1, 0], 0, Some(int(1)))]
    #[case(array(&[2, 1]), &[0, 1], 1, None)]
    #[case(array(&[2, 3]), &[0, 1], 3, Some(array(&[0, 1])))]
    fn offered_suites(
        #[case] suites_i: Value,
        #[case] own: &[i64],
        #[case] selected: i64,
        #[case] offer: Option<Value>,
    ) {
        assert_eq!((selected, offer), check_suites_i(&suites_i, own).unwrap());
    }

    #[rstest]
    #[case(int(-1))]
    #[case(array(&[0]))]
    #[case(array(&[0, -2]))]
    #[case(Value::Bytes(vec![0]))]
    fn invalid_suites_i(#[case] suites_i: Value) {
        assert!(matches!(
            check_suites_i(&suites_i, &[0]),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn initiator_writes() {
        let (initiator, _) = pair(3, ProtocolVersion::V23);
        let message_1 = initiator.write_message_1().unwrap();

        // Requests of the Initiator start with true
        assert_eq!(0xF5, message_1[0]);
        let items = cbor::decode_sequence(&message_1).unwrap();
        assert_eq!(5, items.len());
        assert_eq!(int(3), items[1]);
        assert_eq!(int(0), items[2]);
        // C_I is 0x36, sent as -23
        assert_eq!(int(-23), items[4]);

        let session = initiator.state().session();
        let state = session.lock();
        assert_eq!(crypto::hash(&message_1[1..]), state.hash_message_1);
        assert_eq!(
            Some(state.ephemeral_key.public_key().ephemeral_bytes()),
            cbor::as_bytes(&items[3]).map(<[u8]>::to_vec)
        );
    }

    #[test]
    fn responder_starts_session() {
        let (initiator, responder) = pair(0, ProtocolVersion::V23);
        let message_1 = initiator.write_message_1().unwrap();
        let initial = responder.state().session();

        assert!(responder.read_message_1(&message_1));
        let session = responder.state().session();
        assert!(!Arc::ptr_eq(&initial, &session));
        assert!(!session.is_initiator());
        let endpoint = responder.state().endpoint();
        assert!(Arc::ptr_eq(&session, &endpoint.session(&[0x00]).unwrap()));

        let state = session.lock();
        assert_eq!(vec![0x00], state.connection_id);
        assert_eq!(INITIATOR_ID.to_vec(), state.peer_connection_id);
        assert_eq!(crypto::hash(&message_1[1..]), state.hash_message_1);
        assert_eq!(None, state.suites_in_error);
        assert_eq!(CipherSuite::Suite0, state.selected_suite);
    }

    #[test]
    fn initiator_ignores() {
        let (initiator, _) = pair(0, ProtocolVersion::V23);
        // 0, 0, h'00..', 0x36
        let mut message_1 = cbor::encode_sequence(&[int(0), int(0)]).unwrap();
        message_1.extend(cbor::encode_bstr(&[7; 32]).unwrap());
        message_1.extend(cbor::encode(int(-23)).unwrap());

        let before = initiator.state().session();
        assert!(initiator.read_message_1(&message_1));
        assert!(Arc::ptr_eq(&before, &initiator.state().session()));
    }

    #[test]
    fn rejects_message_1() {
        let (initiator, responder) = pair(3, ProtocolVersion::V23);
        let message_1 = initiator.write_message_1().unwrap();

        // Without the leading true
        assert!(!responder.read_message_1(&message_1[1..]));
        assert!(!responder.read_message_1(&[]));
        // Truncated G_X
        assert!(!responder.read_message_1(&message_1[..10]));

        let (alice, bob) = (Party::new(1, 2), Party::new(3, 4));
        let profile = AppProfile {
            methods: [0].into_iter().collect(),
            ..AppProfile::default()
        };
        let strict = processor(
            endpoint(vec![CipherSuite::Suite0], &bob, &alice, profile),
            false,
            0,
            ProtocolVersion::V23,
        );
        assert!(!strict.read_message_1(&message_1));
        assert_eq!(1, strict.state().endpoint().session_count());
    }
}
