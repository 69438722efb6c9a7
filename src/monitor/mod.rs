// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.5
// Author: Lukas Bower
// Date Modified: 2027-09-02

//! The secure monitor: trap dispatcher, RPC registry, console sink and
//! world scheduling.

use std::sync::Arc;

use cohtee_mailbox::Mailbox;

use crate::config::TrustConfig;
use crate::hal::{EntropySource, StatusLed};

pub mod console;
pub mod dispatch;
pub mod exec;
pub mod rpc;

use console::Console;
use dispatch::{DispatchFatal, SyscallArg, SyscallReply, TrapCause, TrapError, TrapOutcome};
use exec::WorldHandle;
use rpc::Registry;

/// The secure-side supervisor shared by every world.
pub struct Monitor {
    mailbox: Arc<Mailbox>,
    registry: Registry,
    console: Console,
}

impl Monitor {
    /// Build the monitor over its mailbox and board collaborators.
    pub fn new(
        config: &TrustConfig,
        led: Arc<dyn StatusLed>,
        entropy: Arc<dyn EntropySource>,
    ) -> Arc<Self> {
        let mailbox = Arc::new(Mailbox::new(config.queue_capacity));
        let registry = Registry::new(mailbox.clone(), led, entropy);
        Arc::new(Self {
            mailbox,
            registry,
            console: Console::new(),
        })
    }

    /// Shared mailbox carrying all cross-world traffic.
    #[must_use]
    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    /// Create the trap port a world raises its exceptions through.
    #[must_use]
    pub fn port(self: &Arc<Self>, world: WorldHandle) -> MonitorPort {
        MonitorPort {
            monitor: self.clone(),
            world,
        }
    }

    /// Broadcast shutdown: release every waiting caller and abandon all
    /// pending requests.
    pub fn shutdown(&self) {
        self.mailbox.shutdown();
        self.console.flush();
    }
}

/// A world's handle to the monitor.
///
/// Raising a trap switches into the dispatcher on the caller's thread
/// of execution, exactly as a world switch would.
#[derive(Clone)]
pub struct MonitorPort {
    monitor: Arc<Monitor>,
    world: WorldHandle,
}

impl MonitorPort {
    /// Handle of the world owning this port.
    #[must_use]
    pub fn world(&self) -> &WorldHandle {
        &self.world
    }

    /// Raise an arbitrary exception.
    pub fn raise(&self, cause: TrapCause) -> Result<TrapOutcome, DispatchFatal> {
        self.monitor.handle_trap(&self.world, cause)
    }

    /// Raise a supervisor call and unwrap its outcome.
    pub fn syscall(&self, nr: u32, arg: SyscallArg) -> Result<SyscallReply, TrapError> {
        match self.raise(TrapCause::Supervisor { nr, arg }) {
            Ok(TrapOutcome::Reply(reply)) => Ok(reply),
            Ok(TrapOutcome::Stopped) => Ok(SyscallReply::None),
            Ok(TrapOutcome::Faulted(err)) => Err(err),
            // Supervisor calls are always classified; only non-syscall
            // exception classes can be dispatcher-fatal.
            Err(_) => unreachable!("supervisor trap escaped classification"),
        }
    }
}
