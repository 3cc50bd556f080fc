//! What an endpoint knows about itself and its peers.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::debug;
use serde_cbor::Value;

use super::{
    config::AppProfile,
    cose,
    crypto,
    ead::{EadProcessor, NoEad},
    error::Error,
    keys::{Curve, KeyPair, KeyUsage, PublicKey},
    session::SessionHandle,
    suite::CipherSuite,
    Result,
};
use crate::oscore::ContextDb;

/// An authentication credential of our own.
#[derive(Clone, Debug)]
pub struct OwnCredential {
    pub key: KeyPair,
    /// The `ID_CRED_x` header map identifying the credential.
    pub id_cred: Value,
    /// The CBOR encoded `CRED_x`.
    pub cred: Vec<u8>,
}

impl OwnCredential {
    /// Returns the credential of a raw public key, identified by `kid`.
    pub fn with_kid(key: KeyPair, kid: &[u8]) -> Result<OwnCredential> {
        let cred = cose::serialize_cose_key(&key.public_key())?;
        Ok(OwnCredential {
            key,
            id_cred: cose::kid_map(kid),
            cred,
        })
    }
}

/// Credentials, sessions and settings shared by all sessions of an endpoint.
///
/// It's filled in before the engine starts and lent to it afterwards. Only
/// the sessions map and the set of used connection identifiers change
/// during a run.
pub struct EndpointInfo {
    own_credentials: BTreeMap<(KeyUsage, Curve), OwnCredential>,
    peer_public_keys: BTreeMap<Value, PublicKey>,
    peer_credentials: BTreeMap<Value, Vec<u8>>,
    sessions: Mutex<HashMap<Vec<u8>, SessionHandle>>,
    used_connection_ids: Mutex<BTreeSet<Vec<u8>>>,
    supported_suites: Vec<CipherSuite>,
    supported_ead_labels: BTreeSet<i64>,
    app_profiles: HashMap<String, AppProfile>,
    ead_processor: Box<dyn EadProcessor>,
    oscore_db: Arc<ContextDb>,
    oscore_uri: String,
}

impl EndpointInfo {
    /// Creates an endpoint without credentials or profiles.
    ///
    /// # Arguments
    /// * `supported_suites` - Our cipher suites, most preferred first.
    /// * `oscore_uri` - The URI the OSCORE contexts are installed for.
    pub fn new(
        supported_suites: Vec<CipherSuite>,
        oscore_uri: &str,
    ) -> Result<EndpointInfo> {
        if supported_suites.is_empty() {
            return Err(Error::UnsupportedSuite);
        }

        Ok(EndpointInfo {
            own_credentials: BTreeMap::new(),
            peer_public_keys: BTreeMap::new(),
            peer_credentials: BTreeMap::new(),
            sessions: Mutex::new(HashMap::new()),
            used_connection_ids: Mutex::new(BTreeSet::new()),
            supported_suites,
            supported_ead_labels: BTreeSet::new(),
            app_profiles: HashMap::new(),
            ead_processor: Box::new(NoEad),
            oscore_db: Arc::new(ContextDb::new()),
            oscore_uri: oscore_uri.to_string(),
        })
    }

    /// Adds a credential we authenticate with, replacing the one with the
    /// same usage on the same curve.
    pub fn add_own_credential(
        &mut self,
        usage: KeyUsage,
        credential: OwnCredential,
    ) {
        let curve = credential.key.curve();
        self.own_credentials.insert((usage, curve), credential);
    }

    /// Adds a peer we accept, with its public key and `CRED`.
    pub fn add_peer(
        &mut self,
        id_cred: Value,
        public_key: PublicKey,
        cred: Vec<u8>,
    ) {
        self.peer_public_keys.insert(id_cred.clone(), public_key);
        self.peer_credentials.insert(id_cred, cred);
    }

    pub fn add_app_profile(&mut self, uri: &str, profile: AppProfile) {
        self.app_profiles.insert(uri.to_string(), profile);
    }

    /// Sets the EAD labels we understand, by absolute value.
    pub fn set_supported_ead_labels(&mut self, labels: BTreeSet<i64>) {
        self.supported_ead_labels = labels;
    }

    pub fn set_ead_processor(&mut self, processor: Box<dyn EadProcessor>) {
        self.ead_processor = processor;
    }

    pub fn supported_suites(&self) -> &[CipherSuite] {
        &self.supported_suites
    }

    /// Returns our most preferred cipher suite.
    pub fn preferred_suite(&self) -> CipherSuite {
        // Never empty, checked on creation
        self.supported_suites[0]
    }

    pub fn supported_ead_labels(&self) -> &BTreeSet<i64> {
        &self.supported_ead_labels
    }

    pub fn app_profile(&self, uri: &str) -> Option<&AppProfile> {
        self.app_profiles.get(uri)
    }

    pub fn ead_processor(&self) -> &dyn EadProcessor {
        self.ead_processor.as_ref()
    }

    pub fn oscore_db(&self) -> &Arc<ContextDb> {
        &self.oscore_db
    }

    pub fn oscore_uri(&self) -> &str {
        &self.oscore_uri
    }

    /// Returns the credential a party authenticates with.
    ///
    /// A party that signs for the method uses its signature key on the
    /// signature curve of the suite, otherwise its static DH key on the DH
    /// curve.
    pub fn auth_credential(
        &self,
        is_initiator: bool,
        method: u8,
        suite: CipherSuite,
    ) -> Option<&OwnCredential> {
        let signs = if is_initiator {
            crypto::initiator_signs(method)
        } else {
            crypto::responder_signs(method)
        };
        let key = if signs {
            (KeyUsage::Signature, suite.signature_curve())
        } else {
            (KeyUsage::Ecdh, suite.dh_curve())
        };

        self.own_credentials.get(&key)
    }

    /// Returns whether the `ID_CRED` identifies one of our credentials.
    pub fn is_own_id_cred(&self, id_cred: &Value) -> bool {
        self.own_credentials.values().any(|c| &c.id_cred == id_cred)
    }

    pub fn peer_public_key(&self, id_cred: &Value) -> Option<&PublicKey> {
        self.peer_public_keys.get(id_cred)
    }

    pub fn peer_credential(&self, id_cred: &Value) -> Option<&[u8]> {
        self.peer_credentials.get(id_cred).map(Vec::as_slice)
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<Vec<u8>, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn used_ids(&self) -> MutexGuard<'_, BTreeSet<Vec<u8>>> {
        self.used_connection_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the session with our connection identifier `connection_id`.
    pub fn session(&self, connection_id: &[u8]) -> Option<SessionHandle> {
        self.sessions().get(connection_id).cloned()
    }

    pub fn insert_session(&self, connection_id: &[u8], session: SessionHandle) {
        self.sessions().insert(connection_id.to_vec(), session);
    }

    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    /// Reserves a connection identifier.
    pub fn mark_used(&self, connection_id: &[u8]) {
        self.used_ids().insert(connection_id.to_vec());
    }

    pub fn is_used(&self, connection_id: &[u8]) -> bool {
        self.used_ids().contains(connection_id)
    }

    /// Returns a fresh connection identifier for a session we respond in, and
    /// reserves it.
    ///
    /// That's the smallest unused identifier, trying one byte identifiers
    /// before two byte ones, that differs from the peer's identifier and
    /// isn't the recipient ID of an OSCORE context.
    pub fn allocate_connection_id(&self, peer_id: &[u8]) -> Option<Vec<u8>> {
        let one_byte = (0..=u8::MAX).map(|b| vec![b]);
        let two_bytes = (0..=u16::MAX).map(|b| b.to_be_bytes().to_vec());

        let mut used = self.used_ids();
        let id = one_byte.chain(two_bytes).find(|id| {
            !used.contains(id)
                && id.as_slice() != peer_id
                && !self.oscore_db.has_recipient_id(id)
        })?;
        debug!("Allocated connection identifier {:02x?}", id);
        used.insert(id.clone());

        Some(id)
    }
}
