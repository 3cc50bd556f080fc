//! Side processing of External Authorization Data.

use serde_cbor::Value;

/// The EDHOC message an EAD item list belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EadSlot {
    Message1,
    Message2,
    Message3,
    Message4,
}

/// Produces and checks the EAD items of the messages of a session.
///
/// A hook that returns an error rejects the message being processed, with
/// the error as reason.
pub trait EadProcessor: Send + Sync {
    /// Returns the EAD items to append to an outgoing message.
    fn produce(&self, slot: EadSlot) -> Result<Vec<Value>, String> {
        let _ = slot;
        Ok(Vec::new())
    }

    /// Checks the received items before the authentication of the message
    /// is verified. Messages 1 and 4 only go through this hook.
    fn pre_verify(&self, slot: EadSlot, ead: &[Value]) -> Result<(), String> {
        let _ = (slot, ead);
        Ok(())
    }

    /// Checks the received items after the authentication of the message
    /// verified.
    ///
    /// # Arguments
    /// * `slot` - Message 2 or 3.
    /// * `peer_id_cred` - The verified `ID_CRED` of the peer.
    /// * `ead` - The pre-parsed items.
    fn post_verify(
        &self,
        slot: EadSlot,
        peer_id_cred: &Value,
        ead: &[Value],
    ) -> Result<(), String> {
        let _ = (slot, peer_id_cred, ead);
        Ok(())
    }
}

/// Produces nothing and accepts everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoEad;

impl EadProcessor for NoEad {}

/// Sends fixed items and accepts everything.
#[derive(Clone, Debug, Default)]
pub struct StaticEad {
    items: Vec<(EadSlot, Vec<Value>)>,
}

impl StaticEad {
    pub fn new() -> StaticEad {
        StaticEad::default()
    }

    /// Sends `items` with the given message.
    pub fn with_items(mut self, slot: EadSlot, items: Vec<Value>) -> StaticEad {
        self.items.retain(|(s, _)| *s != slot);
        self.items.push((slot, items));
        self
    }
}

impl EadProcessor for StaticEad {
    fn produce(&self, slot: EadSlot) -> Result<Vec<Value>, String> {
        Ok(self
            .items
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, items)| items.clone())
            .unwrap_or_default())
    }
}
