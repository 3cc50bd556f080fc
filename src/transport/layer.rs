//! The EDHOC layer of the CoAP stack.
//!
//! It combines message 3 with the first OSCORE request on the way out, splits
//! it again on the way in and records every exchange for the driver.

use std::time::Duration;

use coap_lite::{CoapOption, Packet};
use log::{debug, error};
use serde_cbor::Value;

use super::{
    combined::{self, CombinedPayload},
    exchange::CoapExchangeInfo,
    Result,
};
use crate::{
    cbor,
    edhoc::{processor::MessageProcessor, session::Session},
    oscore::{util, DEFAULT_MAX_UNFRAGMENTED_SIZE},
};

/// The EDHOC option, which marks a request combining message 3 with OSCORE.
pub const EDHOC_OPTION: CoapOption = CoapOption::Unknown(21);

/// How long an OSCORE request waits for a context that may be in setup.
const OSCORE_CONTEXT_WAIT: Duration = Duration::from_millis(100);

/// Callbacks invoked by the CoAP stack for the messages passing through.
///
/// Each returns whether the message continues up or down the stack.
#[derive(Clone)]
pub struct EdhocLayer {
    processor: MessageProcessor,
}

impl EdhocLayer {
    pub fn new(processor: MessageProcessor) -> EdhocLayer {
        debug!("Initializing EDHOC layer");
        EdhocLayer { processor }
    }

    /// Handles an outgoing request.
    ///
    /// A request with both the EDHOC and the OSCORE option gets the
    /// combined payload. It's dropped when no consistent session exists,
    /// and an error is returned if the payload grows too large.
    ///
    /// # Arguments
    /// * `uri` - The URI of the OSCORE context protecting the request.
    /// * `request` - The protected request.
    pub fn send_request(
        &self,
        uri: &str,
        request: &mut Packet,
    ) -> Result<bool> {
        debug!("Sending request through EDHOC layer");
        if !(has_edhoc(request) && has_oscore(request)) {
            return Ok(true);
        }
        debug!("Combined EDHOC+OSCORE request");

        let state = self.processor.state();
        let endpoint = state.endpoint();
        let db = endpoint.oscore_db();
        let recipient_id = match db.recipient_id(uri) {
            Some(id) => id,
            None => {
                error!("No OSCORE context for {}", uri);
                return Ok(false);
            }
        };

        // Our connection identifier is the recipient ID
        let session = match endpoint.session(&recipient_id) {
            Some(session) => session,
            None => {
                error!("Unable to retrieve the EDHOC session");
                return Ok(false);
            }
        };
        let message_3 = {
            let state = session.lock();
            if session.oscore_recipient_id(&state) != recipient_id {
                error!(
                    "Inconsistent OSCORE recipient ids between OSCORE \
                     context and retrieved EDHOC session"
                );
                return Ok(false);
            }
            state.message_3.clone()
        };

        let max = db
            .max_unfragmented_size(uri)
            .unwrap_or(DEFAULT_MAX_UNFRAGMENTED_SIZE);
        let payload = combined::join(
            state.combined_message_version(),
            &message_3,
            state.send_with_prepended_cx(),
            &request.payload,
            max,
        )
        .map_err(|e| {
            error!("{}", e);
            e
        })?;
        request.payload = payload;

        Ok(true)
    }

    /// Handles an outgoing response to the request with message ID
    /// `request_mid`.
    ///
    /// A response to a request still in the draft queue never reached a
    /// resource. It's withheld and the exchange is recorded as unsuccessful.
    pub fn send_response(&self, request_mid: u16) -> bool {
        debug!("Sending response through EDHOC layer");
        let session = self.processor.state().session();
        if !session.exchanger().remove_draft(request_mid) {
            return true;
        }

        record_unsuccessful(&session, request_mid);
        false
    }

    /// Handles an incoming request.
    ///
    /// A combined request is split, its message 3 is read and only the
    /// OSCORE payload continues. Other requests are recorded as drafts for
    /// the resource to complete.
    pub fn receive_request(&self, request: &mut Packet) -> bool {
        debug!("Receiving request through EDHOC layer");
        let state = self.processor.state();

        if !has_edhoc(request) {
            let session = state.session();
            if has_oscore(request) {
                // Message 3 may have just arrived
                session.wait_for_oscore_context(OSCORE_CONTEXT_WAIT);
            }
            record(&session, request, true);
            return true;
        }

        let kid = match util::oscore_option(request) {
            Ok(option) => util::get_kid(option),
            Err(_) => {
                error!(
                    "Received a request with the EDHOC option but without \
                     the OSCORE option"
                );
                return false;
            }
        };
        debug!("Combined EDHOC+OSCORE request: {:02x?}", request.payload);

        let version = state.combined_message_version();
        let CombinedPayload {
            ciphertext_3,
            oscore_payload,
        } = match combined::split(version, &request.payload) {
            Some(parts) => parts,
            None => {
                error!("Could not split received combined message");
                return false;
            }
        };
        let kid = match kid {
            Some(kid) => kid,
            None => {
                error!("No kid in the OSCORE option");
                return false;
            }
        };

        let mut items = Vec::with_capacity(2);
        if state.receive_with_prepended_cx() {
            // C_R is the kid
            items.extend(cbor::encode_identifier(&kid));
        }
        items.push(Value::Bytes(ciphertext_3));
        let message_3 = match cbor::encode_sequence(&items) {
            Ok(message_3) => message_3,
            Err(e) => {
                error!("Rebuilding message 3: {}", e);
                return false;
            }
        };
        debug!("Rebuilt EDHOC message 3: {:02x?}", message_3);

        let session = match state.endpoint().session(&kid) {
            Some(session) => session,
            None => {
                error!("Unable to retrieve the EDHOC session");
                return false;
            }
        };

        request.payload = oscore_payload;
        if self.processor.read_message_3(&message_3) {
            record(&session, request, true);
            true
        } else {
            record_unsuccessful(&session, request.header.message_id);
            false
        }
    }

    /// Handles an incoming response, which the driver picks up right away.
    pub fn receive_response(&self, response: &Packet) -> bool {
        debug!("Receiving response through EDHOC layer");
        record(&self.processor.state().session(), response, false);
        true
    }
}

fn has_edhoc(message: &Packet) -> bool {
    message.get_option(EDHOC_OPTION).is_some()
}

fn has_oscore(message: &Packet) -> bool {
    message.get_option(CoapOption::Oscore).is_some()
}

/// Records a message in the session's exchanger.
///
/// Requests become drafts for a resource to complete, responses are
/// received immediately.
fn record(session: &Session, message: &Packet, is_request: bool) {
    let mut info = CoapExchangeInfo::new(message.header.message_id);
    if has_oscore(message) {
        info.has_oscore_app = true;
        info.has_edhoc = has_edhoc(message);
    }

    if is_request {
        session.exchanger().offer_draft(info);
    } else {
        session.exchanger().offer_received(info);
    }
}

fn record_unsuccessful(session: &Session, mid: u16) {
    let mut info = CoapExchangeInfo::new(mid);
    info.unsuccessful = true;
    session.exchanger().offer_received(info);
}

#[cfg(test)]
mod tests {
    use hexlit::hex;

    use super::{super::Error, *};
    use crate::edhoc::{config::ProtocolVersion, processor::fixtures::*};

    const OSCORE_PAYLOAD: [u8; 2] = hex!("AABB");

    /// Runs a handshake up to message 3, which only the Initiator knows.
    fn until_message_3() -> (MessageProcessor, MessageProcessor) {
        let (initiator, responder) = pair(0, ProtocolVersion::V23);
        let message_1 = initiator.write_message_1().unwrap();
        assert!(responder.read_message_1(&message_1));
        let message_2 = responder.write_message_2().unwrap();
        assert!(initiator.read_message_2(&message_2));
        initiator.write_message_3().unwrap();
        (initiator, responder)
    }

    /// Returns a request protected for the recipient `kid`.
    fn request(kid: &[u8], mid: u16, edhoc: bool) -> Packet {
        let mut packet = Packet::new();
        packet.header.message_id = mid;
        packet.add_option(
            CoapOption::Oscore,
            util::build_oscore_option(Some(kid), Some(&[0x01]), None),
        );
        if edhoc {
            packet.add_option(EDHOC_OPTION, Vec::new());
        }
        packet.payload = OSCORE_PAYLOAD.to_vec();
        packet
    }

    fn oscore_uri(processor: &MessageProcessor) -> String {
        processor.state().endpoint().oscore_uri().to_string()
    }

    #[test]
    fn combined_request() {
        let (initiator, responder) = until_message_3();
        let client = EdhocLayer::new(initiator.clone());
        let server = EdhocLayer::new(responder.clone());

        // The Responder picked C_R 0x00
        let mut packet = request(&[0x00], 7, true);
        let uri = oscore_uri(&initiator);
        assert!(client.send_request(&uri, &mut packet).unwrap());

        // Without C_R, which the OSCORE option already carries
        let message_3 = initiator.state().session().lock().message_3.clone();
        let mut expected = message_3[1..].to_vec();
        expected.extend_from_slice(&OSCORE_PAYLOAD);
        assert_eq!(expected, packet.payload);

        assert!(server.receive_request(&mut packet));
        assert_eq!(OSCORE_PAYLOAD.to_vec(), packet.payload);

        let session = responder.state().session();
        assert!(session.is_oscore_generated());
        let draft = session.exchanger().draft_queue().poll().unwrap();
        assert_eq!(7, draft.mid);
        assert!(draft.has_edhoc && draft.has_oscore_app);
        assert!(!draft.unsuccessful);
    }

    #[test]
    fn plain_requests_pass() {
        let (initiator, _) = until_message_3();
        let client = EdhocLayer::new(initiator.clone());

        let mut packet = request(&[0x00], 7, false);
        let uri = oscore_uri(&initiator);
        assert!(client.send_request(&uri, &mut packet).unwrap());
        assert_eq!(OSCORE_PAYLOAD.to_vec(), packet.payload);
    }

    #[test]
    fn oversize() {
        let (initiator, _) = until_message_3();
        let client = EdhocLayer::new(initiator.clone());

        let mut packet = request(&[0x00], 7, true);
        packet.payload = vec![0; DEFAULT_MAX_UNFRAGMENTED_SIZE];
        assert!(matches!(
            client.send_request(&oscore_uri(&initiator), &mut packet),
            Err(Error::Oversize { .. })
        ));
    }

    #[test]
    fn unknown_context() {
        let (initiator, _) = until_message_3();
        let client = EdhocLayer::new(initiator);

        let mut packet = request(&[0x00], 7, true);
        let uri = "coap://localhost/none";
        assert!(!client.send_request(uri, &mut packet).unwrap());
        assert_eq!(OSCORE_PAYLOAD.to_vec(), packet.payload);
    }

    #[test]
    fn tampered_message_3() {
        let (initiator, responder) = until_message_3();
        let client = EdhocLayer::new(initiator.clone());
        let server = EdhocLayer::new(responder.clone());

        let mut packet = request(&[0x00], 9, true);
        let uri = oscore_uri(&initiator);
        client.send_request(&uri, &mut packet).unwrap();
        // The last byte of the tag of CIPHERTEXT_3
        let last = packet.payload.len() - OSCORE_PAYLOAD.len() - 1;
        packet.payload[last] ^= 0x01;

        assert!(!server.receive_request(&mut packet));
        let session = responder.state().session();
        assert!(!session.is_oscore_generated());
        assert!(session.exchanger().draft_queue().is_empty());
        let received = session.exchanger().received_queue().poll().unwrap();
        assert_eq!(9, received.mid);
        assert!(received.unsuccessful);
    }

    #[test]
    fn invalid_combined_requests() {
        let (_, responder) = until_message_3();
        let server = EdhocLayer::new(responder.clone());

        // Not a combined payload
        let mut packet = request(&[0x00], 3, true);
        packet.payload = hex!("01").to_vec();
        assert!(!server.receive_request(&mut packet));

        // EDHOC without OSCORE
        let mut packet = Packet::new();
        packet.add_option(EDHOC_OPTION, Vec::new());
        packet.payload = hex!("4100AA").to_vec();
        assert!(!server.receive_request(&mut packet));

        // No session for C_R 0x05
        let mut packet = request(&[0x05], 3, true);
        packet.payload = hex!("4100AA").to_vec();
        assert!(!server.receive_request(&mut packet));

        let session = responder.state().session();
        assert!(session.exchanger().draft_queue().is_empty());
        assert!(session.exchanger().received_queue().is_empty());
    }

    #[test]
    fn unanswered_drafts() {
        let (_, responder) = until_message_3();
        let server = EdhocLayer::new(responder.clone());
        let session = responder.state().session();
        let exchanger = session.exchanger();

        // A plain CoAP request
        let mut packet = Packet::new();
        packet.header.message_id = 4;
        assert!(server.receive_request(&mut packet));
        let draft = exchanger.draft_queue().poll().unwrap();
        assert!(!draft.has_oscore_app && !draft.has_edhoc);
        exchanger.offer_draft(draft);

        // A middle layer answers instead of a resource
        assert!(!server.send_response(4));
        let received = exchanger.received_queue().poll().unwrap();
        assert_eq!(4, received.mid);
        assert!(received.unsuccessful);

        // Nothing to withhold anymore
        assert!(server.send_response(4));
    }

    #[test]
    fn responses_are_received() {
        let (initiator, _) = until_message_3();
        let client = EdhocLayer::new(initiator.clone());

        let response = request(&[0x36], 11, false);
        assert!(client.receive_response(&response));
        let session = initiator.state().session();
        let received = session.exchanger().received_queue().poll().unwrap();
        assert_eq!(11, received.mid);
        assert!(received.has_oscore_app && !received.has_edhoc);
    }
}
