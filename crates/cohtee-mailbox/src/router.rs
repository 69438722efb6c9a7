// Author: Lukas Bower
// Purpose: Route cross-world responses back to their pending requests.

//! Pending-request table keyed by [`RequestId`].

use std::collections::HashMap;
use std::sync::{Condvar, Mutex};

use cohtee_wire::Tlv;
use log::debug;

use crate::{MailboxError, RequestId, ShutdownToken, WAKE_INTERVAL};

/// A pending request slot: registered at submission, filled by the
/// responder, destroyed when the caller takes the response.
#[derive(Debug, Default)]
struct PendingRequest {
    response: Option<Tlv>,
}

/// Table of pending requests with condition-variable delivery.
pub struct ResponseRouter {
    slots: Mutex<HashMap<u64, PendingRequest>>,
    delivered: Condvar,
}

impl ResponseRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            delivered: Condvar::new(),
        }
    }

    /// Register a new pending request under `req`.
    pub fn register(&self, req: RequestId) {
        let mut slots = self.slots.lock().expect("router lock poisoned");
        slots.insert(req.into_raw(), PendingRequest::default());
    }

    /// Drop the pending request registered under `req`, if any.
    pub fn forget(&self, req: RequestId) {
        let mut slots = self.slots.lock().expect("router lock poisoned");
        slots.remove(&req.into_raw());
    }

    /// Fill the slot registered under `req`.
    pub fn deliver(&self, req: RequestId, record: Tlv) -> Result<(), MailboxError> {
        let mut slots = self.slots.lock().expect("router lock poisoned");
        let slot = slots
            .get_mut(&req.into_raw())
            .ok_or(MailboxError::UnknownRequest(req))?;
        slot.response = Some(record);
        drop(slots);
        self.delivered.notify_all();
        Ok(())
    }

    /// Length of the ready response for `req`, or 0 if none yet.
    pub fn poll(&self, req: RequestId) -> Result<u16, MailboxError> {
        let slots = self.slots.lock().expect("router lock poisoned");
        let slot = slots
            .get(&req.into_raw())
            .ok_or(MailboxError::UnknownRequest(req))?;
        Ok(slot.response.as_ref().map_or(0, Tlv::length))
    }

    /// Block until the response for `req` is delivered, then destroy the
    /// slot. With `capacity` set, at most that many value bytes are
    /// retained.
    pub fn take(
        &self,
        req: RequestId,
        capacity: Option<usize>,
        shutdown: &ShutdownToken,
    ) -> Result<Tlv, MailboxError> {
        let mut slots = self.slots.lock().expect("router lock poisoned");
        loop {
            if shutdown.is_triggered() {
                return Err(MailboxError::Shutdown);
            }
            let ready = match slots.get(&req.into_raw()) {
                None => return Err(MailboxError::UnknownRequest(req)),
                Some(slot) => slot.response.is_some(),
            };
            if ready {
                let mut record = slots
                    .remove(&req.into_raw())
                    .and_then(|slot| slot.response)
                    .ok_or(MailboxError::UnknownRequest(req))?;
                if let Some(capacity) = capacity {
                    record.truncate_value(capacity);
                }
                return Ok(record);
            }
            let (guard, _) = self
                .delivered
                .wait_timeout(slots, WAKE_INTERVAL)
                .expect("router lock poisoned");
            slots = guard;
        }
    }

    /// Drop every pending request and wake every waiting caller.
    pub fn abandon_all(&self) {
        let mut slots = self.slots.lock().expect("router lock poisoned");
        let abandoned = slots.len();
        slots.clear();
        drop(slots);
        if abandoned > 0 {
            debug!("abandoned {abandoned} pending requests");
        }
        self.delivered.notify_all();
    }
}

impl Default for ResponseRouter {
    fn default() -> Self {
        Self::new()
    }
}
