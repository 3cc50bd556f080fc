//! Configuration of the engine and application profiles of resources.

use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::Deserialize;

/// The EDHOC draft revision whose wire format is used.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    V14,
    V15,
    V16,
    V17,
    V18,
    V19,
    V20,
    V21,
    V22,
    V23,
}

impl ProtocolVersion {
    /// Transcript hashes and `PRK_2e` don't include credentials or `TH_2`.
    pub fn leq_v15(self) -> bool {
        self <= ProtocolVersion::V15
    }

    /// Plaintexts may start with padding and EAD items come in pairs.
    pub fn leq_v17(self) -> bool {
        self <= ProtocolVersion::V17
    }

    /// `C_R` is sent outside of `CIPHERTEXT_2`.
    pub fn leq_v19(self) -> bool {
        self <= ProtocolVersion::V19
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        ProtocolVersion::V23
    }
}

/// Failure to parse a version from its name.
#[derive(Debug, PartialEq)]
pub struct UnknownVersion(pub String);

impl fmt::Display for UnknownVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Unknown version: {}", self.0)
    }
}

impl std::error::Error for UnknownVersion {}

impl FromStr for ProtocolVersion {
    type Err = UnknownVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let version = match s.to_ascii_lowercase().as_str() {
            "v14" => ProtocolVersion::V14,
            "v15" => ProtocolVersion::V15,
            "v16" => ProtocolVersion::V16,
            "v17" => ProtocolVersion::V17,
            "v18" => ProtocolVersion::V18,
            "v19" => ProtocolVersion::V19,
            "v20" => ProtocolVersion::V20,
            "v21" => ProtocolVersion::V21,
            "v22" => ProtocolVersion::V22,
            "v23" => ProtocolVersion::V23,
            _ => return Err(UnknownVersion(s.to_string())),
        };

        Ok(version)
    }
}

/// The layout of a request carrying both EDHOC message 3 and an OSCORE
/// protected payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombinedMessageVersion {
    /// Two byte strings, `(EDHOC part, OSCORE part)`.
    V06,
    /// A byte string with the EDHOC part, followed by the raw OSCORE part.
    V07,
}

impl Default for CombinedMessageVersion {
    fn default() -> Self {
        CombinedMessageVersion::V07
    }
}

impl FromStr for CombinedMessageVersion {
    type Err = UnknownVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v06" => Ok(CombinedMessageVersion::V06),
            "v07" => Ok(CombinedMessageVersion::V07),
            _ => Err(UnknownVersion(s.to_string())),
        }
    }
}

/// Everything the engine needs to know about how it's run.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub protocol_version: ProtocolVersion,
    pub combined_message_version: CombinedMessageVersion,
    /// Whether we are the EDHOC Initiator.
    pub is_initiator: bool,
    /// Whether we are the CoAP client.
    pub is_coap_client: bool,
    /// Whether requests carry a connection identifier in front of the
    /// message.
    pub cx_correlation: bool,
    /// Whether a session is reset completely between runs.
    pub session_reset: bool,
    /// The authentication method (0 to 3).
    pub method: u8,
    /// Our own connection identifier.
    pub connection_id: Vec<u8>,
    pub force_oscore_sender_id: Option<Vec<u8>>,
    pub force_oscore_recipient_id: Option<Vec<u8>>,
    /// The resource EDHOC messages are exchanged on.
    pub edhoc_uri: String,
    /// The resource application data is protected for.
    pub oscore_uri: String,
    pub oscore_replay_window: u32,
    pub max_unfragmented_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            protocol_version: ProtocolVersion::default(),
            combined_message_version: CombinedMessageVersion::default(),
            is_initiator: true,
            is_coap_client: true,
            cx_correlation: true,
            session_reset: true,
            method: 0,
            connection_id: vec![0x36],
            force_oscore_sender_id: None,
            force_oscore_recipient_id: None,
            edhoc_uri: "coap://localhost:5683/.well-known/edhoc".to_string(),
            oscore_uri: "coap://localhost:5683/app".to_string(),
            oscore_replay_window: 32,
            max_unfragmented_size: 4096,
        }
    }
}

impl EngineConfig {
    /// Requests we send start with the connection identifier of the peer.
    pub fn send_with_prepended_cx(&self) -> bool {
        self.is_coap_client && self.cx_correlation
    }

    /// Requests we receive start with our own connection identifier.
    pub fn receive_with_prepended_cx(&self) -> bool {
        !self.is_coap_client && self.cx_correlation
    }

    /// The EDHOC Initiator is also the CoAP client.
    pub fn client_initiated(&self) -> bool {
        self.is_initiator == self.is_coap_client
    }
}

/// How a resource uses EDHOC.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AppProfile {
    /// Authentication methods allowed on the resource.
    pub methods: BTreeSet<u8>,
    /// Whether message 4 is sent.
    pub use_message_4: bool,
    /// Whether the session keys are used for OSCORE.
    pub use_oscore: bool,
    /// Whether message 3 may be combined with the first OSCORE request.
    pub supports_combined_request: bool,
}

impl AppProfile {
    pub fn is_method_supported(&self, method: i64) -> bool {
        u8::try_from(method)
            .map(|m| self.methods.contains(&m))
            .unwrap_or(false)
    }
}

impl Default for AppProfile {
    fn default() -> Self {
        AppProfile {
            methods: (0..=3).collect(),
            use_message_4: false,
            use_oscore: true,
            supports_combined_request: true,
        }
    }
}
