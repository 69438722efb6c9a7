// Author: Lukas Bower
// Purpose: Provide bounded cross-world queues with request/response correlation.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Cross-world mailbox primitives.
//!
//! Each direction of cross-world traffic is a bounded FIFO of
//! [`Envelope`]s. A submission allocates an explicit [`RequestId`];
//! responses are routed back through a [`ResponseRouter`] keyed by that
//! identifier, so two interleaved callers can never receive each other's
//! replies. Producers never block: a full queue is an error. Consumers
//! block on a condition variable with a bounded wait, re-checking the
//! [`ShutdownToken`] at every wake.

use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cohtee_wire::Tlv;

mod queue;
mod router;

pub use queue::BoundedQueue;
pub use router::ResponseRouter;

/// Default queue capacity per direction.
pub const DEFAULT_CAPACITY: usize = 10;

/// Upper bound on a single blocking wait before the shutdown token is
/// re-checked.
pub(crate) const WAKE_INTERVAL: Duration = Duration::from_millis(20);

/// Correlates one outstanding cross-world call with its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    /// Wrap a raw identifier value.
    #[must_use]
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Access the raw identifier value.
    #[must_use]
    pub fn into_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// One queued message together with its correlation identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Identifier the responder must echo.
    pub req: RequestId,
    /// The carried TLV record.
    pub record: Tlv,
}

/// Errors surfaced by mailbox operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MailboxError {
    /// The direction's queue is at capacity.
    #[error("mailbox queue is full")]
    Full,
    /// No pending request exists under the given identifier.
    #[error("no pending request {0}")]
    UnknownRequest(RequestId),
    /// The mailbox was shut down while the caller waited.
    #[error("mailbox shut down")]
    Shutdown,
}

/// Cooperative cancellation flag observed by every blocking wait.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    triggered: Arc<AtomicBool>,
}

impl ShutdownToken {
    /// Create an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal shutdown to every holder of a clone.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown has been signalled.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

/// The four cross-world traffic directions: guest commands with their
/// responses, and applet escalations with their acknowledgments.
pub struct Mailbox {
    commands: BoundedQueue<Envelope>,
    responses: ResponseRouter,
    escalations: BoundedQueue<Envelope>,
    acks: ResponseRouter,
    next_request: AtomicU64,
    shutdown: ShutdownToken,
}

impl Mailbox {
    /// Create a mailbox whose queues hold at most `capacity` envelopes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            commands: BoundedQueue::new(capacity),
            responses: ResponseRouter::new(),
            escalations: BoundedQueue::new(capacity),
            acks: ResponseRouter::new(),
            next_request: AtomicU64::new(1),
            shutdown: ShutdownToken::new(),
        }
    }

    /// Clone of the mailbox shutdown token.
    #[must_use]
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    fn allocate(&self) -> RequestId {
        RequestId(self.next_request.fetch_add(1, Ordering::Relaxed))
    }

    /// Queue a guest command; returns the identifier its response will
    /// be routed under.
    pub fn submit_command(&self, record: Tlv) -> Result<RequestId, MailboxError> {
        let req = self.allocate();
        self.responses.register(req);
        if let Err(err) = self.commands.try_push(Envelope { req, record }) {
            self.responses.forget(req);
            return Err(err);
        }
        Ok(req)
    }

    /// Whether a command is waiting to be popped.
    #[must_use]
    pub fn command_ready(&self) -> bool {
        !self.commands.is_empty()
    }

    /// Block until a command is queued or shutdown is signalled.
    pub fn pop_command(&self) -> Result<Envelope, MailboxError> {
        self.commands.pop(&self.shutdown)
    }

    /// Deliver the response for a previously submitted command.
    pub fn respond(&self, req: RequestId, record: Tlv) -> Result<(), MailboxError> {
        self.responses.deliver(req, record)
    }

    /// Length of the ready response for `req`, or 0 if none yet.
    pub fn poll_response(&self, req: RequestId) -> Result<u16, MailboxError> {
        self.responses.poll(req)
    }

    /// Block until the response for `req` arrives; at most `capacity`
    /// value bytes are retained.
    pub fn fetch_response(&self, req: RequestId, capacity: usize) -> Result<Tlv, MailboxError> {
        self.responses.take(req, Some(capacity), &self.shutdown)
    }

    /// Queue an applet escalation towards the guest supervisor.
    pub fn submit_escalation(&self, record: Tlv) -> Result<RequestId, MailboxError> {
        let req = self.allocate();
        self.acks.register(req);
        if let Err(err) = self.escalations.try_push(Envelope { req, record }) {
            self.acks.forget(req);
            return Err(err);
        }
        Ok(req)
    }

    /// Length of the next queued escalation, or 0 if none is ready.
    #[must_use]
    pub fn escalation_ready_len(&self) -> u16 {
        self.escalations
            .peek(|env| env.record.length())
            .unwrap_or(0)
    }

    /// Block until an escalation is queued; at most `capacity` value
    /// bytes are retained.
    pub fn fetch_escalation(&self, capacity: usize) -> Result<Envelope, MailboxError> {
        let mut envelope = self.escalations.pop(&self.shutdown)?;
        envelope.record.truncate_value(capacity);
        Ok(envelope)
    }

    /// Deliver the guest's acknowledgment for an escalation.
    pub fn acknowledge(&self, req: RequestId, record: Tlv) -> Result<(), MailboxError> {
        self.acks.deliver(req, record)
    }

    /// Length of the ready acknowledgment for `req`, or 0 if none yet.
    pub fn poll_ack(&self, req: RequestId) -> Result<u16, MailboxError> {
        self.acks.poll(req)
    }

    /// Block until the acknowledgment for `req` arrives.
    pub fn fetch_ack(&self, req: RequestId) -> Result<Tlv, MailboxError> {
        self.acks.take(req, None, &self.shutdown)
    }

    /// Signal shutdown, release waiting callers and abandon every
    /// pending request.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
        self.responses.abandon_all();
        self.acks.abandon_all();
    }
}
