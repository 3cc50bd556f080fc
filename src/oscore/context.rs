use coap_lite::{CoapOption, MessageClass, Packet, RequestType, ResponseType};

use super::{error::Error, util, Result};
use crate::aead::{AeadAlgorithm, NONCE_LEN};

/// Replay window size used unless configured otherwise.
pub const DEFAULT_REPLAY_WINDOW: u32 = 32;
/// Maximum unfragmented message size used unless configured otherwise.
pub const DEFAULT_MAX_UNFRAGMENTED_SIZE: usize = 4096;

/// The common context part of the security context.
struct CommonContext {
    // Master secret and salt are unused after derivation, hence not part of
    // this
    alg_aead: AeadAlgorithm,
    common_iv: [u8; NONCE_LEN],
}

/// The sender context part of the security context.
struct SenderContext {
    sender_id: Vec<u8>,
    sender_key: Vec<u8>,
    sender_sequence_number: u64,
}

/// The recipient context part of the security context.
struct RecipientContext {
    recipient_id: Vec<u8>,
    recipient_key: Vec<u8>,
    replay_window: ReplayWindow,
}

/// Sliding window over the received partial IVs.
#[derive(Debug)]
struct ReplayWindow {
    size: u32,
    highest: Option<u64>,
    // Bit i is set if highest - i has been received
    seen: u64,
}

impl ReplayWindow {
    fn new(size: u32) -> ReplayWindow {
        ReplayWindow {
            size: size.min(64),
            highest: None,
            seen: 0,
        }
    }

    /// Fails if the sequence number has been received before or is too old,
    /// otherwise remembers it.
    fn check_and_remember(&mut self, seq: u64) -> Result<()> {
        let highest = match self.highest {
            None => {
                self.highest = Some(seq);
                self.seen = 1;
                return Ok(());
            }
            Some(highest) => highest,
        };

        if seq > highest {
            let shift = seq - highest;
            self.seen = if shift >= 64 { 0 } else { self.seen << shift };
            self.seen |= 1;
            self.highest = Some(seq);
            return Ok(());
        }

        let age = highest - seq;
        if age >= u64::from(self.size) || self.seen & (1 << age) != 0 {
            return Err(Error::ReplayDetected);
        }
        self.seen |= 1 << age;

        Ok(())
    }
}

/// The security context.
pub struct SecurityContext {
    common_context: CommonContext,
    sender_context: SenderContext,
    recipient_context: RecipientContext,
    max_unfragmented_size: usize,
}

/// The known class U options that have to remain public.
static CLASS_U: [CoapOption; 4] = [
    CoapOption::UriHost,
    CoapOption::UriPort,
    CoapOption::ProxyUri,
    CoapOption::ProxyScheme,
];
/// The optional options that we don't support.
static UNSUPPORTED: [CoapOption; 5] = [
    CoapOption::Observe,
    CoapOption::Block2,
    CoapOption::Block1,
    CoapOption::Size2,
    CoapOption::Size1,
];

impl SecurityContext {
    /// Creates a new `SecurityContext`, deriving keys and common IV.
    ///
    /// # Arguments
    /// * `alg_aead` - The AEAD algorithm protecting messages.
    /// * `master_secret` - The master secret.
    /// * `master_salt` - The master salt.
    /// * `sender_id` - Our sender ID.
    /// * `recipient_id` - Our recipient ID, the peer's sender ID.
    pub fn new(
        alg_aead: AeadAlgorithm,
        master_secret: &[u8],
        master_salt: &[u8],
        sender_id: Vec<u8>,
        recipient_id: Vec<u8>,
    ) -> Result<SecurityContext> {
        let alg = alg_aead.cose_id();
        let key_len = alg_aead.key_len();
        let sender_key = util::hkdf(
            master_secret,
            master_salt,
            &util::build_info(&sender_id, alg, "Key", key_len)?,
            key_len,
        )?;
        let recipient_key = util::hkdf(
            master_secret,
            master_salt,
            &util::build_info(&recipient_id, alg, "Key", key_len)?,
            key_len,
        )?;
        let common_iv_vec = util::hkdf(
            master_secret,
            master_salt,
            &util::build_info(&[], alg, "IV", NONCE_LEN)?,
            NONCE_LEN,
        )?;
        let mut common_iv = [0; NONCE_LEN];
        common_iv.copy_from_slice(&common_iv_vec);

        Ok(SecurityContext {
            common_context: CommonContext {
                alg_aead,
                common_iv,
            },
            sender_context: SenderContext {
                sender_id,
                sender_key,
                sender_sequence_number: 0,
            },
            recipient_context: RecipientContext {
                recipient_id,
                recipient_key,
                replay_window: ReplayWindow::new(DEFAULT_REPLAY_WINDOW),
            },
            max_unfragmented_size: DEFAULT_MAX_UNFRAGMENTED_SIZE,
        })
    }

    /// Sets the size of the replay window, at most 64.
    pub fn with_replay_window(mut self, size: u32) -> SecurityContext {
        self.recipient_context.replay_window = ReplayWindow::new(size);
        self
    }

    /// Sets the maximum size of an unfragmented message.
    pub fn with_max_unfragmented_size(
        mut self,
        size: usize,
    ) -> SecurityContext {
        self.max_unfragmented_size = size;
        self
    }

    pub fn sender_id(&self) -> &[u8] {
        &self.sender_context.sender_id
    }

    pub fn recipient_id(&self) -> &[u8] {
        &self.recipient_context.recipient_id
    }

    pub fn max_unfragmented_size(&self) -> usize {
        self.max_unfragmented_size
    }

    /// Returns an OSCORE message based on the original CoAP request.
    ///
    /// # Arguments
    /// * `coap_msg` - The original CoAP request to protect.
    pub fn protect_request(&mut self, coap_msg: &[u8]) -> Result<Vec<u8>> {
        let piv = self.get_piv();
        let aad = util::build_aad(
            self.alg_id(),
            &self.sender_context.sender_id,
            &piv,
        )?;
        let nonce = util::compute_nonce(
            &piv,
            &self.sender_context.sender_id,
            &self.common_context.common_iv,
        );
        let option = util::build_oscore_option(
            Some(&self.sender_context.sender_id),
            Some(&piv),
            None,
        );
        self.sender_context.sender_sequence_number += 1;

        self.protect_message(coap_msg, &aad, nonce, option)
    }

    /// Returns an OSCORE message based on the original CoAP response.
    ///
    /// # Arguments
    /// * `coap_msg` - The original CoAP response to protect.
    /// * `request` - The OSCORE request to which to respond. Necessary to
    ///   extract `kid` and `piv` values.
    /// * `reuse_piv` - Whether the request's `piv` should be reused. Otherwise
    ///   the own `sender_sequence_number` will be used.
    pub fn protect_response(
        &mut self,
        coap_msg: &[u8],
        request: &[u8],
        reuse_piv: bool,
    ) -> Result<Vec<u8>> {
        let piv = self.get_piv();

        let request = Packet::from_bytes(request)?;
        let parts = util::parse_oscore_option(util::oscore_option(&request)?);
        // This is a request, so they need to be present
        let (request_kid, request_piv) = (
            parts.kid.ok_or(Error::NoKidPiv)?,
            parts.piv.ok_or(Error::NoKidPiv)?,
        );

        let aad = util::build_aad(self.alg_id(), &request_kid, &request_piv)?;

        let (nonce, option) = if reuse_piv {
            // Same nonce, empty OSCORE option since there's no change
            (
                util::compute_nonce(
                    &request_piv,
                    &self.recipient_context.recipient_id,
                    &self.common_context.common_iv,
                ),
                util::build_oscore_option(None, None, None),
            )
        } else {
            // Nonce from own sender context, transmit piv but no kid
            let result = (
                util::compute_nonce(
                    &piv,
                    &self.sender_context.sender_id,
                    &self.common_context.common_iv,
                ),
                util::build_oscore_option(None, Some(&piv), None),
            );
            self.sender_context.sender_sequence_number += 1;
            result
        };

        self.protect_message(coap_msg, &aad, nonce, option)
    }

    /// Returns the protected OSCORE message for the given parameters.
    ///
    /// # Arguments
    /// * `coap_msg` - The original CoAP message to protect.
    /// * `aad` - The AAD for the AEAD.
    /// * `nonce` - The AEAD nonce to use.
    /// * `option` - The value of the OSCORE option.
    fn protect_message(
        &self,
        coap_msg: &[u8],
        aad: &[u8],
        nonce: [u8; NONCE_LEN],
        option: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let mut original = Packet::from_bytes(coap_msg)?;
        // The protected parts
        let mut inner = Packet::new();

        inner.header.code = original.header.code;
        original.header.code = match original.header.code {
            MessageClass::Response(_) => {
                MessageClass::Response(ResponseType::Changed)
            }
            // All requests (and unknown + reserved) get POST
            _ => MessageClass::Request(RequestType::Post),
        };

        // Class E options move into the inner message
        let mut moved_options = vec![];
        for (number, value_list) in original.options() {
            let option = CoapOption::from(*number);
            if UNSUPPORTED.contains(&option) {
                return Err(Error::UnsupportedOption(option));
            }
            if CLASS_U.contains(&option) {
                continue;
            }
            inner.set_option(option, value_list.clone());
            moved_options.push(option);
        }
        for option in moved_options {
            original.clear_option(option);
        }

        inner.payload = std::mem::take(&mut original.payload);
        let mut inner_bytes = inner.to_bytes()?;
        // Only code, options and payload are encrypted. The inner message
        // has no token, so this drops the message ID and the first header
        // byte.
        inner_bytes.drain(2..4);
        inner_bytes.remove(0);

        original.payload = self.common_context.alg_aead.seal(
            &self.sender_context.sender_key,
            &nonce,
            aad,
            &inner_bytes,
        )?;
        original.add_option(CoapOption::Oscore, option);

        Ok(original.to_bytes()?)
    }

    /// Returns the original CoAP request protected in the OSCORE message.
    ///
    /// # Arguments
    /// * `oscore_msg` - The OSCORE message protecting the CoAP request.
    pub fn unprotect_request(&mut self, oscore_msg: &[u8]) -> Result<Vec<u8>> {
        let original = Packet::from_bytes(oscore_msg)?;
        let parts = util::parse_oscore_option(util::oscore_option(&original)?);
        let (request_kid, request_piv) = (
            parts.kid.ok_or(Error::NoKidPiv)?,
            parts.piv.ok_or(Error::NoKidPiv)?,
        );

        let aad = util::build_aad(self.alg_id(), &request_kid, &request_piv)?;
        let nonce = util::compute_nonce(
            &request_piv,
            &self.recipient_context.recipient_id,
            &self.common_context.common_iv,
        );
        let unprotected = self.unprotect_message(original, &aad, nonce)?;

        // Only remember the partial IV of a message that verified
        self.recipient_context
            .replay_window
            .check_and_remember(util::piv_to_u64(&request_piv))?;

        Ok(unprotected)
    }

    /// Returns the original CoAP response protected in the OSCORE message.
    ///
    /// # Arguments
    /// * `oscore_msg` - The OSCORE message protecting the CoAP response.
    pub fn unprotect_response(
        &mut self,
        oscore_msg: &[u8],
    ) -> Result<Vec<u8>> {
        let original = Packet::from_bytes(oscore_msg)?;
        let response_piv = util::parse_oscore_option(util::oscore_option(
            &original,
        )?)
        .piv;
        // The request we sent last is the one being answered
        let request_piv = self.get_last_piv()?;
        let (kid, piv) = match response_piv {
            Some(piv) => (&self.recipient_context.recipient_id, piv),
            None => (&self.sender_context.sender_id, request_piv.clone()),
        };

        let aad = util::build_aad(
            self.alg_id(),
            &self.sender_context.sender_id,
            &request_piv,
        )?;
        let nonce =
            util::compute_nonce(&piv, kid, &self.common_context.common_iv);

        self.unprotect_message(original, &aad, nonce)
    }

    /// Returns the original CoAP message protected in the OSCORE message.
    ///
    /// # Arguments
    /// * `original` - The OSCORE message protecting the CoAP message.
    /// * `aad` - The AAD for the AEAD.
    /// * `nonce` - The AEAD nonce to use.
    fn unprotect_message(
        &self,
        mut original: Packet,
        aad: &[u8],
        nonce: [u8; NONCE_LEN],
    ) -> Result<Vec<u8>> {
        // Outer class E options are discarded
        let mut to_discard = vec![];
        for (number, _) in original.options() {
            let option = CoapOption::from(*number);
            if UNSUPPORTED.contains(&option) {
                return Err(Error::UnsupportedOption(option));
            }
            if CLASS_U.contains(&option) {
                continue;
            }
            to_discard.push(option);
        }
        for option in to_discard {
            original.clear_option(option);
        }

        let plaintext = self.common_context.alg_aead.open(
            &self.recipient_context.recipient_key,
            &nonce,
            aad,
            &original.payload,
        )?;
        let (code, rest) =
            plaintext.split_first().ok_or(Error::EmptyPlaintext)?;

        // [ver_t_tkl, code, message_id, message_id]
        let mut inner = vec![0x40, *code, 0x00, 0x00];
        inner.extend(rest);
        let inner = Packet::from_bytes(&inner)?;

        original.header.code = inner.header.code;
        for (number, value_list) in inner.options() {
            original.set_option((*number).into(), value_list.clone());
        }
        original.payload = inner.payload;

        Ok(original.to_bytes()?)
    }

    fn alg_id(&self) -> i64 {
        self.common_context.alg_aead.cose_id()
    }

    /// Returns the byte representation of the partial IV.
    fn get_piv(&self) -> Vec<u8> {
        util::format_piv(self.sender_context.sender_sequence_number)
    }

    /// Returns the byte representation of the last used partial IV.
    fn get_last_piv(&self) -> Result<Vec<u8>> {
        self.sender_context
            .sender_sequence_number
            .checked_sub(1)
            .map(util::format_piv)
            .ok_or(Error::NoKidPiv)
    }
}

#[cfg(test)]
mod tests {
    use hexlit::hex;

    use super::*;

    const MASTER_SECRET: [u8; 16] = hex!("0102030405060708090a0b0c0d0e0f10");
    const MASTER_SALT: [u8; 8] = hex!("9e7ca92223786340");
    const CLIENT_ID: [u8; 0] = [];
    const SERVER_ID: [u8; 1] = [0x01];

    fn client() -> SecurityContext {
        SecurityContext::new(
            AeadAlgorithm::AesCcm16_64_128,
            &MASTER_SECRET,
            &MASTER_SALT,
            CLIENT_ID.to_vec(),
            SERVER_ID.to_vec(),
        )
        .unwrap()
    }

    fn server() -> SecurityContext {
        SecurityContext::new(
            AeadAlgorithm::AesCcm16_64_128,
            &MASTER_SECRET,
            &MASTER_SALT,
            SERVER_ID.to_vec(),
            CLIENT_ID.to_vec(),
        )
        .unwrap()
    }

    fn get_request() -> Vec<u8> {
        let mut packet = Packet::new();
        packet.header.code = MessageClass::Request(RequestType::Get);
        packet.header.message_id = 0x5D1F;
        packet.add_option(CoapOption::UriHost, b"localhost".to_vec());
        packet.add_option(CoapOption::UriPath, b"tv1".to_vec());
        packet.to_bytes().unwrap()
    }

    #[test]
    fn context_derivation() {
        let context = client();
        assert_eq!(
            hex!("4622d4dd6d944168eefb54987c"),
            context.common_context.common_iv
        );
        assert_eq!(
            &hex!("f0910ed7295e6ad4b54fc793154302ff")[..],
            &context.sender_context.sender_key[..]
        );
        assert_eq!(
            &hex!("ffb14e093c94c9cac9471648b4f98710")[..],
            &context.recipient_context.recipient_key[..]
        );
        assert_eq!(0, context.sender_context.sender_sequence_number);
        assert_eq!(&SERVER_ID, context.recipient_id());
    }

    #[test]
    fn request_round_trip() {
        let mut client = client();
        let mut server = server();

        let protected = client.protect_request(&get_request()).unwrap();
        let outer = Packet::from_bytes(&protected).unwrap();
        assert_eq!(MessageClass::Request(RequestType::Post), outer.header.code);
        // Uri-Host stays public, Uri-Path is encrypted
        assert!(outer.get_option(CoapOption::UriHost).is_some());
        assert!(outer.get_option(CoapOption::UriPath).is_none());
        // piv 0, kid empty
        assert_eq!(&[0x09, 0x00][..], util::oscore_option(&outer).unwrap());

        let unprotected = server.unprotect_request(&protected).unwrap();
        let inner = Packet::from_bytes(&unprotected).unwrap();
        assert_eq!(MessageClass::Request(RequestType::Get), inner.header.code);
        assert_eq!(
            b"tv1".to_vec(),
            *inner
                .get_option(CoapOption::UriPath)
                .unwrap()
                .front()
                .unwrap()
        );
    }

    #[test]
    fn response_round_trip() {
        let mut client = client();
        let mut server = server();

        let request = client.protect_request(&get_request()).unwrap();
        server.unprotect_request(&request).unwrap();

        let mut response = Packet::new();
        response.header.code = MessageClass::Response(ResponseType::Content);
        response.payload = b"Hello World!".to_vec();
        let response = response.to_bytes().unwrap();

        for reuse_piv in [true, false] {
            let protected = server
                .protect_response(&response, &request, reuse_piv)
                .unwrap();
            let unprotected = client.unprotect_response(&protected).unwrap();
            let inner = Packet::from_bytes(&unprotected).unwrap();
            assert_eq!(
                MessageClass::Response(ResponseType::Content),
                inner.header.code
            );
            assert_eq!(b"Hello World!".to_vec(), inner.payload);
        }
    }

    #[test]
    fn tampered_request() {
        let mut client = client();
        let mut server = server();

        let protected = client.protect_request(&get_request()).unwrap();
        let mut tampered = Packet::from_bytes(&protected).unwrap();
        tampered.payload[0] ^= 0xFF;
        let tampered = tampered.to_bytes().unwrap();
        assert!(matches!(
            server.unprotect_request(&tampered),
            Err(Error::Aead(_))
        ));
        // A forgery doesn't block the genuine message
        assert!(server.unprotect_request(&protected).is_ok());
    }

    #[test]
    fn replay() {
        let mut client = client();
        let mut server = server();

        let first = client.protect_request(&get_request()).unwrap();
        let second = client.protect_request(&get_request()).unwrap();
        assert!(server.unprotect_request(&second).is_ok());
        // Older but within the window
        assert!(server.unprotect_request(&first).is_ok());
        assert!(matches!(
            server.unprotect_request(&first),
            Err(Error::ReplayDetected)
        ));
    }

    #[test]
    fn replay_window_slides() {
        let mut window = ReplayWindow::new(4);
        assert!(window.check_and_remember(10).is_ok());
        assert!(window.check_and_remember(7).is_ok());
        assert!(window.check_and_remember(7).is_err());
        // Too old
        assert!(window.check_and_remember(6).is_err());
        assert!(window.check_and_remember(100).is_ok());
        assert!(window.check_and_remember(10).is_err());
        assert!(window.check_and_remember(99).is_ok());
    }

    #[test]
    fn response_without_request() {
        let mut client = client();
        let mut server = server();
        let request = client.protect_request(&get_request()).unwrap();
        let response = server
            .protect_response(&get_request(), &request, false)
            .unwrap();

        let mut fresh = self::client();
        assert!(matches!(
            fresh.unprotect_response(&response),
            Err(Error::NoKidPiv)
        ));
    }
}
