//! The shared database of installed security contexts.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use log::debug;

use super::{context::SecurityContext, error::Error, Result};

/// Security contexts keyed by the URI of the resource they protect.
#[derive(Default)]
pub struct ContextDb {
    contexts: Mutex<HashMap<String, SecurityContext>>,
}

impl ContextDb {
    pub fn new() -> ContextDb {
        ContextDb::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SecurityContext>> {
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs the context for the URI, replacing any previous one.
    pub fn add_context(&self, uri: &str, context: SecurityContext) {
        debug!("Installing OSCORE context for {}", uri);
        self.lock().insert(uri.to_string(), context);
    }

    pub fn remove_context(&self, uri: &str) -> Option<SecurityContext> {
        self.lock().remove(uri)
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.lock().contains_key(uri)
    }

    /// Returns whether any installed context uses the recipient ID.
    pub fn has_recipient_id(&self, recipient_id: &[u8]) -> bool {
        self.lock()
            .values()
            .any(|context| context.recipient_id() == recipient_id)
    }

    pub fn recipient_id(&self, uri: &str) -> Option<Vec<u8>> {
        self.lock().get(uri).map(|c| c.recipient_id().to_vec())
    }

    pub fn sender_id(&self, uri: &str) -> Option<Vec<u8>> {
        self.lock().get(uri).map(|c| c.sender_id().to_vec())
    }

    pub fn max_unfragmented_size(&self, uri: &str) -> Option<usize> {
        self.lock().get(uri).map(SecurityContext::max_unfragmented_size)
    }

    /// Runs `f` on the context of the URI while holding the database lock.
    pub fn with_context<R>(
        &self,
        uri: &str,
        f: impl FnOnce(&mut SecurityContext) -> Result<R>,
    ) -> Result<R> {
        let mut contexts = self.lock();
        let context = contexts
            .get_mut(uri)
            .ok_or_else(|| Error::UnknownContext(uri.to_string()))?;
        f(context)
    }
}
