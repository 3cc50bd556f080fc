//! Descriptors of CoAP exchanges handed from the network side to the driver.

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use log::warn;

/// What a CoAP exchange carried and how it ended.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoapExchangeInfo {
    /// The message ID of the request or response.
    pub mid: u16,
    pub has_edhoc: bool,
    pub has_oscore_app: bool,
    pub has_coap_app: bool,
    /// The exchange failed before reaching a resource.
    pub unsuccessful: bool,
}

impl CoapExchangeInfo {
    pub fn new(mid: u16) -> CoapExchangeInfo {
        CoapExchangeInfo {
            mid,
            ..CoapExchangeInfo::default()
        }
    }
}

/// A bounded queue that never blocks the producer.
pub struct ExchangeQueue {
    capacity: usize,
    items: Mutex<VecDeque<CoapExchangeInfo>>,
    available: Condvar,
}

impl ExchangeQueue {
    pub fn new(capacity: usize) -> ExchangeQueue {
        ExchangeQueue {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<CoapExchangeInfo>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends the exchange, returning `false` if the queue is full.
    pub fn offer(&self, info: CoapExchangeInfo) -> bool {
        let mut items = self.lock();
        if items.len() >= self.capacity {
            return false;
        }
        items.push_back(info);
        self.available.notify_one();
        true
    }

    /// Returns the oldest exchange without waiting.
    pub fn poll(&self) -> Option<CoapExchangeInfo> {
        self.lock().pop_front()
    }

    /// Returns the oldest exchange, waiting as long as it takes.
    pub fn take(&self) -> CoapExchangeInfo {
        let mut items = self.lock();
        loop {
            if let Some(info) = items.pop_front() {
                return info;
            }
            items = self
                .available
                .wait(items)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Returns the oldest exchange, waiting at most `timeout` for one.
    pub fn poll_timeout(&self, timeout: Duration) -> Option<CoapExchangeInfo> {
        let items = self.lock();
        let (mut items, _) = self
            .available
            .wait_timeout_while(items, timeout, |items| items.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        items.pop_front()
    }

    /// Removes every exchange matching the predicate, returning whether
    /// there was one.
    pub fn remove_if(
        &self,
        mut predicate: impl FnMut(&CoapExchangeInfo) -> bool,
    ) -> bool {
        let mut items = self.lock();
        let before = items.len();
        items.retain(|info| !predicate(info));
        items.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// The queues of the exchanges of a session.
///
/// Requests wait in the draft queue until a resource has handled them and
/// completes them into the received queue. Responses go to the received
/// queue directly.
pub struct CoapExchanger {
    draft: ExchangeQueue,
    received: ExchangeQueue,
}

impl Default for CoapExchanger {
    fn default() -> Self {
        CoapExchanger::new()
    }
}

impl CoapExchanger {
    pub fn new() -> CoapExchanger {
        CoapExchanger {
            draft: ExchangeQueue::new(1),
            received: ExchangeQueue::new(1),
        }
    }

    pub fn draft_queue(&self) -> &ExchangeQueue {
        &self.draft
    }

    pub fn received_queue(&self) -> &ExchangeQueue {
        &self.received
    }

    /// Adds a received request that is on its way to a resource.
    pub fn offer_draft(&self, info: CoapExchangeInfo) {
        if !self.draft.offer(info) {
            warn!("Full draft queue found");
        }
    }

    /// Adds an exchange for the driver to observe.
    pub fn offer_received(&self, info: CoapExchangeInfo) {
        if !self.received.offer(info) {
            warn!("Full received queue found");
        }
    }

    /// Removes the draft of the request with message ID `mid`, returning
    /// whether it was there.
    pub fn remove_draft(&self, mid: u16) -> bool {
        self.draft.remove_if(|info| info.mid == mid)
    }

    /// Moves the draft of the request with message ID `mid` to the received
    /// queue, after `update` recorded what the resource found.
    pub fn complete_draft(
        &self,
        mid: u16,
        update: impl FnOnce(&mut CoapExchangeInfo),
    ) -> bool {
        let mut found = None;
        self.draft.remove_if(|info| {
            if info.mid == mid && found.is_none() {
                found = Some(info.clone());
                true
            } else {
                false
            }
        });

        match found {
            Some(mut info) => {
                update(&mut info);
                self.offer_received(info);
                true
            }
            None => false,
        }
    }
}
