//! The engine state: configuration, endpoint and the current session.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

use super::{
    config::{CombinedMessageVersion, EngineConfig, ProtocolVersion},
    error::Error,
    registry::EndpointInfo,
    session::{Role, Session, SessionHandle, SessionSettings},
    Result,
};
use crate::{cbor::EadConvention, transport::CoapExchanger};

/// Everything the message processor and the transport layer share.
pub struct EngineState {
    config: EngineConfig,
    endpoint: Arc<EndpointInfo>,
    current: Mutex<SessionHandle>,
}

impl EngineState {
    /// Creates the state with an initial session for our configured
    /// connection identifier.
    ///
    /// The empty identifier and our own one are reserved. A forced OSCORE
    /// recipient ID maps to the initial session as well.
    pub fn new(
        config: EngineConfig,
        endpoint: Arc<EndpointInfo>,
    ) -> Result<EngineState> {
        let app_profile = endpoint
            .app_profile(&config.edhoc_uri)
            .cloned()
            .ok_or(Error::UnknownProfile)?;

        endpoint.mark_used(&[]);
        endpoint.mark_used(&config.connection_id);

        let settings = SessionSettings {
            role: if config.is_initiator {
                Role::Initiator
            } else {
                Role::Responder
            },
            client_initiated: config.client_initiated(),
            session_uri: config.edhoc_uri.clone(),
            app_profile,
            session_reset: config.session_reset,
            force_oscore_sender_id: config.force_oscore_sender_id.clone(),
            force_oscore_recipient_id: config.force_oscore_recipient_id.clone(),
            oscore_uri: endpoint.oscore_uri().to_string(),
            oscore_db: Arc::clone(endpoint.oscore_db()),
            oscore_replay_window: config.oscore_replay_window,
            oscore_max_unfragmented_size: config.max_unfragmented_size,
            exchanger: Arc::new(CoapExchanger::new()),
        };
        let session = Arc::new(Session::new(
            settings,
            &endpoint,
            config.method,
            config.connection_id.clone(),
            Vec::new(),
        ));

        endpoint.insert_session(&config.connection_id, Arc::clone(&session));
        if let Some(forced) = &config.force_oscore_recipient_id {
            endpoint.insert_session(forced, Arc::clone(&session));
        }
        debug!(
            "Initial session with connection identifier {:02x?}",
            config.connection_id
        );

        Ok(EngineState {
            config,
            endpoint,
            current: Mutex::new(session),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &EndpointInfo {
        &self.endpoint
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.config.protocol_version
    }

    pub fn combined_message_version(&self) -> CombinedMessageVersion {
        self.config.combined_message_version
    }

    /// Returns how EAD items are laid out for the configured revision.
    pub fn ead_convention(&self) -> EadConvention {
        if self.config.protocol_version.leq_v17() {
            EadConvention::ForcedPairs
        } else {
            EadConvention::OptionalValue
        }
    }

    pub fn send_with_prepended_cx(&self) -> bool {
        self.config.send_with_prepended_cx()
    }

    pub fn receive_with_prepended_cx(&self) -> bool {
        self.config.receive_with_prepended_cx()
    }

    fn current(&self) -> MutexGuard<'_, SessionHandle> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the session messages are currently built and read for.
    pub fn session(&self) -> SessionHandle {
        Arc::clone(&self.current())
    }

    pub fn replace_session(&self, session: SessionHandle) {
        *self.current() = session;
    }

    /// Resets the current session if that's enabled.
    pub fn reset_session(&self) {
        self.session().reset_if_enabled(&self.endpoint);
    }
}
