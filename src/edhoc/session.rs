//! The EDHOC session and the OSCORE context derived from it.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use log::{debug, error, warn};
use serde_cbor::Value;

use super::{
    config::AppProfile,
    cose, crypto,
    keys::{KeyPair, PublicKey},
    registry::{EndpointInfo, OwnCredential},
    suite::CipherSuite,
    Result,
};
use crate::{
    oscore::{ContextDb, SecurityContext},
    transport::CoapExchanger,
};

/// Exporter label of the OSCORE master secret.
const MASTER_SECRET_LABEL: i64 = 0;
/// Exporter label of the OSCORE master salt.
const MASTER_SALT_LABEL: i64 = 1;
const MASTER_SALT_LEN: i64 = 8;

/// A session shared between the driver and the network side.
pub type SessionHandle = Arc<Session>;

/// Whether we initiate or respond in EDHOC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// What doesn't change over the lifetime of a session.
#[derive(Clone)]
pub struct SessionSettings {
    pub role: Role,
    /// Whether the Initiator is the CoAP client.
    pub client_initiated: bool,
    /// The resource EDHOC runs on.
    pub session_uri: String,
    pub app_profile: AppProfile,
    /// Whether `reset_if_enabled` discards the handshake material.
    pub session_reset: bool,
    pub force_oscore_sender_id: Option<Vec<u8>>,
    pub force_oscore_recipient_id: Option<Vec<u8>>,
    pub oscore_uri: String,
    pub oscore_db: Arc<ContextDb>,
    pub oscore_replay_window: u32,
    pub oscore_max_unfragmented_size: usize,
    pub exchanger: Arc<CoapExchanger>,
}

/// The handshake material of a session.
///
/// Values of the peer and intermediate keys start as placeholders, so that
/// any message can be built at any point of a run.
#[derive(Clone, Debug)]
pub struct SessionState {
    pub method: u8,
    pub connection_id: Vec<u8>,
    pub peer_connection_id: Vec<u8>,
    pub selected_suite: CipherSuite,
    /// The suites the peer said it supports, in its order.
    pub peer_supported_suites: Vec<i64>,
    /// The `SUITES_R` to send in an error message, if any.
    pub suites_in_error: Option<Value>,
    pub ephemeral_key: KeyPair,
    pub credential: Option<OwnCredential>,
    pub peer_ephemeral_key: PublicKey,
    pub peer_long_term_key: PublicKey,
    pub peer_id_cred: Value,
    pub peer_cred: Vec<u8>,
    pub hash_message_1: Vec<u8>,
    pub plaintext_2: Vec<u8>,
    pub prk_2e: Vec<u8>,
    pub prk_3e2m: Vec<u8>,
    pub prk_4e3m: Vec<u8>,
    pub th_2: Vec<u8>,
    pub th_3: Vec<u8>,
    pub th_4: Vec<u8>,
    pub prk_out: Vec<u8>,
    pub prk_exporter: Vec<u8>,
    /// The CBOR sequence of message 3, for a combined request.
    pub message_3: Vec<u8>,
}

impl SessionState {
    /// Returns a state holding only placeholders and our own keys.
    fn fresh(
        role: Role,
        method: u8,
        connection_id: Vec<u8>,
        peer_supported_suites: Vec<i64>,
        endpoint: &EndpointInfo,
    ) -> SessionState {
        let suite = endpoint.preferred_suite();
        let ephemeral_key = KeyPair::generate(suite.dh_curve());
        let credential = endpoint
            .auth_credential(role == Role::Initiator, method, suite)
            .cloned();
        let own_ephemeral = ephemeral_key.public_key();
        let peer_cred = vec![0; 4];

        SessionState {
            method,
            connection_id,
            peer_connection_id: vec![0; 4],
            selected_suite: suite,
            peer_supported_suites,
            suites_in_error: None,
            peer_long_term_key: credential
                .as_ref()
                .map(|c| c.key.public_key())
                .unwrap_or_else(|| own_ephemeral.clone()),
            peer_ephemeral_key: own_ephemeral,
            ephemeral_key,
            credential,
            peer_id_cred: cose::kid_map(&peer_cred),
            peer_cred,
            hash_message_1: vec![1],
            plaintext_2: vec![1],
            prk_2e: vec![1],
            prk_3e2m: vec![1],
            prk_4e3m: vec![1],
            th_2: vec![1],
            th_3: vec![1],
            th_4: vec![1],
            prk_out: vec![1],
            prk_exporter: vec![1],
            message_3: vec![1],
        }
    }

    /// Returns the output of the EDHOC exporter of this session.
    pub fn exporter(
        &self,
        label: i64,
        context: &[u8],
        length: i64,
    ) -> Result<Vec<u8>> {
        crypto::exporter(&self.prk_exporter, label, context, length)
    }

    /// Selects the suite and makes our keys match it.
    ///
    /// The ephemeral key is replaced if it's on another curve.
    pub fn select_suite(
        &mut self,
        suite: CipherSuite,
        endpoint: &EndpointInfo,
        is_initiator: bool,
    ) {
        self.selected_suite = suite;
        self.credential = endpoint
            .auth_credential(is_initiator, self.method, suite)
            .cloned();
        if self.ephemeral_key.curve() != suite.dh_curve() {
            self.ephemeral_key = KeyPair::generate(suite.dh_curve());
        }
    }
}

/// Progress of the OSCORE context of a session, guarded together with its
/// condition variable.
#[derive(Debug, Default)]
struct OscoreStatus {
    generated: bool,
    derivations: u64,
    notifications: u64,
}

/// An EDHOC session.
pub struct Session {
    settings: SessionSettings,
    state: Mutex<SessionState>,
    oscore: Mutex<OscoreStatus>,
    oscore_signal: Condvar,
}

impl Session {
    /// Creates a session with placeholder material and a dummy OSCORE
    /// context.
    ///
    /// # Arguments
    /// * `settings` - What doesn't change during the session.
    /// * `endpoint` - Our credentials and suites.
    /// * `method` - The authentication method.
    /// * `connection_id` - Our connection identifier.
    /// * `peer_supported_suites` - Suites the peer is known to support.
    pub fn new(
        settings: SessionSettings,
        endpoint: &EndpointInfo,
        method: u8,
        connection_id: Vec<u8>,
        peer_supported_suites: Vec<i64>,
    ) -> Session {
        let state = SessionState::fresh(
            settings.role,
            method,
            connection_id,
            peer_supported_suites,
            endpoint,
        );
        let session = Session {
            settings,
            state: Mutex::new(state),
            oscore: Mutex::new(OscoreStatus::default()),
            oscore_signal: Condvar::new(),
        };
        session.reset_oscore(&mut session.lock());

        session
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn is_initiator(&self) -> bool {
        self.settings.role == Role::Initiator
    }

    pub fn exchanger(&self) -> &CoapExchanger {
        &self.settings.exchanger
    }

    /// Gives access to the handshake material.
    ///
    /// The OSCORE operations of the session take this lock as well, so it
    /// must be released before calling them.
    pub fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn status(&self) -> MutexGuard<'_, OscoreStatus> {
        self.oscore.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces all handshake material with placeholders, keeping the
    /// method, our connection identifier and the suites of the peer.
    pub fn reset(&self, endpoint: &EndpointInfo) {
        let mut state = self.lock();
        let fresh = SessionState::fresh(
            self.settings.role,
            state.method,
            std::mem::take(&mut state.connection_id),
            std::mem::take(&mut state.peer_supported_suites),
            endpoint,
        );
        let suites_in_error = state.suites_in_error.take();
        *state = fresh;
        state.suites_in_error = suites_in_error;
        self.reset_oscore(&mut state);
    }

    /// Resets the session if that's enabled. Otherwise only allows a new
    /// OSCORE context to be derived from the current material.
    pub fn reset_if_enabled(&self, endpoint: &EndpointInfo) {
        if self.settings.session_reset {
            self.reset(endpoint);
        } else {
            let _state = self.lock();
            self.status().generated = false;
        }
    }

    /// Derives the dummy OSCORE context of placeholder material and clears
    /// the flag, so the real one is still derived later.
    fn reset_oscore(&self, state: &mut SessionState) {
        self.status().generated = false;
        self.setup_locked(state);
        self.status().generated = false;
    }

    /// Derives the OSCORE context from the exporter and installs it, unless
    /// that already happened for the current material.
    ///
    /// Waiters are woken up whether the derivation succeeded or not.
    pub fn setup_oscore_context(&self) {
        let mut state = self.lock();
        self.setup_locked(&mut state);
    }

    fn setup_locked(&self, state: &mut SessionState) {
        if self.status().generated {
            return;
        }

        let generated = match self.derive_oscore_context(state) {
            Ok(context) => {
                self.settings
                    .oscore_db
                    .add_context(&self.settings.oscore_uri, context);
                true
            }
            Err(e) => {
                error!(
                    "Error when setting up the OSCORE Security Context: {}",
                    e
                );
                false
            }
        };

        let mut status = self.status();
        status.generated = generated;
        status.derivations += 1;
        status.notifications += 1;
        self.oscore_signal.notify_all();
    }

    fn derive_oscore_context(
        &self,
        state: &SessionState,
    ) -> Result<SecurityContext> {
        let alg = state.selected_suite.app_aead();
        let master_secret = state.exporter(
            MASTER_SECRET_LABEL,
            &[],
            alg.key_len() as i64,
        )?;
        debug!("OSCORE Master Secret: {:02x?}", master_secret);
        let master_salt =
            state.exporter(MASTER_SALT_LABEL, &[], MASTER_SALT_LEN)?;
        debug!("OSCORE Master Salt: {:02x?}", master_salt);

        let sender_id = self.oscore_sender_id(state);
        let recipient_id = self.oscore_recipient_id(state);
        debug!(
            "OSCORE Sender Id: {:02x?}, Recipient Id: {:02x?}",
            sender_id, recipient_id
        );
        if sender_id == recipient_id {
            warn!(
                "The Sender ID will be equal to the Recipient ID in this \
                 OSCORE Security Context"
            );
        }

        let context = SecurityContext::new(
            alg,
            &master_secret,
            &master_salt,
            sender_id,
            recipient_id,
        )?
        .with_replay_window(self.settings.oscore_replay_window)
        .with_max_unfragmented_size(
            self.settings.oscore_max_unfragmented_size,
        );

        Ok(context)
    }

    /// Returns the forced sender ID or the connection identifier of the peer.
    pub fn oscore_sender_id(&self, state: &SessionState) -> Vec<u8> {
        self.settings
            .force_oscore_sender_id
            .clone()
            .unwrap_or_else(|| state.peer_connection_id.clone())
    }

    /// Returns the forced recipient ID or our connection identifier.
    pub fn oscore_recipient_id(&self, state: &SessionState) -> Vec<u8> {
        self.settings
            .force_oscore_recipient_id
            .clone()
            .unwrap_or_else(|| state.connection_id.clone())
    }

    pub fn is_oscore_generated(&self) -> bool {
        self.status().generated
    }

    /// Returns how many OSCORE contexts have been derived in this session,
    /// counting the dummy ones.
    pub fn oscore_derivations(&self) -> u64 {
        self.status().derivations
    }

    /// Waits until an OSCORE context is set up or the timeout elapses.
    ///
    /// Returns right away if the context exists, and as soon as a setup
    /// finishes otherwise, even an unsuccessful one. Returns whether the
    /// context exists.
    pub fn wait_for_oscore_context(&self, timeout: Duration) -> bool {
        let status = self.status();
        if status.generated {
            return true;
        }
        let start = status.notifications;
        let (status, _) = self
            .oscore_signal
            .wait_timeout_while(status, timeout, |s| {
                !s.generated && s.notifications == start
            })
            .unwrap_or_else(PoisonError::into_inner);
        debug!(
            "End of waiting for OSCORE context, generated: {}",
            status.generated
        );

        status.generated
    }
}
