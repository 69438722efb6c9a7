// CLASSIFICATION: COMMUNITY
// Filename: dispatch.rs v0.8
// Author: Lukas Bower
// Date Modified: 2027-09-02

//! Secure monitor trap classification and syscall routing.
//!
//! Every hardware exception enters [`Monitor::handle_trap`] exactly
//! once. Classification is total over [`TrapCause`]: a cause with no
//! arm is a [`DispatchFatal`], because the dispatcher has no recoverable
//! error path of its own. Faults attributable to one caller stop only
//! that caller's world.

use cohtee_mailbox::{Envelope, MailboxError, RequestId};
use cohtee_wire::Tlv;
use log::{info, warn};

use super::exec::WorldHandle;
use super::rpc::{RpcArg, RpcError, RpcRet};
use super::Monitor;

/// Cooperative context termination.
pub const SYS_EXIT: u32 = 0;
/// Serialized console byte write.
pub const SYS_WRITE: u32 = 1;
/// Applet-side RPC transport.
pub const SYS_RPC: u32 = 5;
/// Queue a guest command for the applet.
pub const SYS_SUBMIT_COMMAND: u32 = 50;
/// Non-blocking length check on the response direction.
pub const SYS_POLL_RESPONSE: u32 = 51;
/// Blocking fetch on the response direction.
pub const SYS_FETCH_RESPONSE: u32 = 52;
/// Submit the acknowledgment for a fetched escalation.
pub const SYS_ACK_ESCALATION: u32 = 53;
/// Non-blocking length check on the escalation direction.
pub const SYS_POLL_ESCALATION: u32 = 54;
/// Blocking fetch on the escalation direction.
pub const SYS_FETCH_ESCALATION: u32 = 55;

/// Exception classes a world can trap with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrapCause {
    /// Faulting data access.
    DataAbort {
        /// Faulting address.
        address: u32,
        /// Program counter at the fault.
        pc: u32,
    },
    /// Supervisor call.
    Supervisor {
        /// Monitor call number.
        nr: u32,
        /// Typed call argument.
        arg: SyscallArg,
    },
    /// Faulting instruction fetch.
    PrefetchAbort {
        /// Program counter at the fault.
        pc: u32,
    },
    /// Hardware interrupt.
    Irq {
        /// Interrupt line.
        line: u32,
    },
    /// Undefined instruction.
    Undefined {
        /// Program counter at the fault.
        pc: u32,
    },
}

impl TrapCause {
    /// Name of the exception class, for fatal reports.
    #[must_use]
    pub fn describe(&self) -> &'static str {
        match self {
            TrapCause::DataAbort { .. } => "data abort",
            TrapCause::Supervisor { .. } => "supervisor call",
            TrapCause::PrefetchAbort { .. } => "prefetch abort",
            TrapCause::Irq { .. } => "irq",
            TrapCause::Undefined { .. } => "undefined instruction",
        }
    }
}

/// Typed argument carried by a supervisor call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyscallArg {
    /// No argument.
    None,
    /// A console byte.
    Byte(u8),
    /// A TLV record to submit.
    Record(Tlv),
    /// A request identifier to poll.
    Request(RequestId),
    /// A fetch bounded by the caller's buffer capacity.
    Fetch {
        /// Request to fetch the response of.
        req: RequestId,
        /// Caller-side buffer capacity in bytes.
        capacity: usize,
    },
    /// A fetch of the next escalation, bounded by buffer capacity.
    Capacity(usize),
    /// An acknowledgment for a fetched escalation.
    Ack {
        /// Escalation being acknowledged.
        req: RequestId,
        /// Acknowledgment record.
        record: Tlv,
    },
    /// An RPC invocation by method name.
    Rpc {
        /// Method name.
        method: String,
        /// Method argument.
        arg: RpcArg,
    },
}

/// Typed reply produced by a serviced supervisor call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyscallReply {
    /// Nothing to return.
    None,
    /// Identifier allocated for a submission.
    Request(RequestId),
    /// Ready-length, 0 meaning not ready.
    Len(u16),
    /// A fetched record.
    Record(Tlv),
    /// A fetched envelope.
    Envelope(Envelope),
    /// An RPC return value.
    Rpc(RpcRet),
}

/// Faults attributable to a single trap.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TrapError {
    /// A call number outside the serviced set.
    #[error("unexpected monitor call {nr} from {world}")]
    UnexpectedCall {
        /// Offending call number.
        nr: u32,
        /// World that raised it.
        world: &'static str,
    },
    /// An argument that does not match the call's declared shape.
    #[error("malformed argument for monitor call {nr}")]
    BadArgument {
        /// Offending call number.
        nr: u32,
    },
    /// A mailbox operation failed.
    #[error(transparent)]
    Mailbox(#[from] MailboxError),
    /// An RPC dispatch failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl TrapError {
    /// Whether the fault must stop the calling world.
    fn stops_world(&self) -> bool {
        matches!(
            self,
            TrapError::UnexpectedCall { .. } | TrapError::BadArgument { .. }
        )
    }
}

/// Exception classes the dispatcher cannot service at all. There is no
/// degraded mode past this point.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchFatal {
    /// An exception class with no dispatcher arm.
    #[error("unhandled exception: {0}")]
    UnhandledException(&'static str),
}

/// Outcome of one classified trap.
#[derive(Debug, PartialEq, Eq)]
pub enum TrapOutcome {
    /// The call was serviced.
    Reply(SyscallReply),
    /// The trap faulted; the fault is attributable to the caller.
    Faulted(TrapError),
    /// The calling world was stopped.
    Stopped,
}

impl Monitor {
    /// Classify and service one trap.
    pub fn handle_trap(
        &self,
        world: &WorldHandle,
        cause: TrapCause,
    ) -> Result<TrapOutcome, DispatchFatal> {
        match cause {
            TrapCause::DataAbort { address, pc } if !world.secure() => {
                warn!(
                    "SM trapped non-secure data abort addr={address:#010x} pc={pc:#010x}, stopping {}",
                    world.name()
                );
                world.stop();
                Ok(TrapOutcome::Stopped)
            }
            TrapCause::Supervisor { nr, arg } => Ok(self.dispatch_syscall(world, nr, arg)),
            other => Err(DispatchFatal::UnhandledException(other.describe())),
        }
    }

    fn dispatch_syscall(&self, world: &WorldHandle, nr: u32, arg: SyscallArg) -> TrapOutcome {
        let serviced = match nr {
            SYS_SUBMIT_COMMAND => match arg {
                SyscallArg::Record(record) => self
                    .mailbox
                    .submit_command(record)
                    .map(SyscallReply::Request)
                    .map_err(TrapError::from),
                _ => Err(TrapError::BadArgument { nr }),
            },
            SYS_POLL_RESPONSE => match arg {
                SyscallArg::Request(req) => self
                    .mailbox
                    .poll_response(req)
                    .map(SyscallReply::Len)
                    .map_err(TrapError::from),
                _ => Err(TrapError::BadArgument { nr }),
            },
            SYS_FETCH_RESPONSE => match arg {
                SyscallArg::Fetch { req, capacity } => self
                    .mailbox
                    .fetch_response(req, capacity)
                    .map(SyscallReply::Record)
                    .map_err(TrapError::from),
                _ => Err(TrapError::BadArgument { nr }),
            },
            SYS_ACK_ESCALATION => match arg {
                SyscallArg::Ack { req, record } => self
                    .mailbox
                    .acknowledge(req, record)
                    .map(|()| SyscallReply::None)
                    .map_err(TrapError::from),
                _ => Err(TrapError::BadArgument { nr }),
            },
            SYS_POLL_ESCALATION => match arg {
                SyscallArg::None => Ok(SyscallReply::Len(self.mailbox.escalation_ready_len())),
                _ => Err(TrapError::BadArgument { nr }),
            },
            SYS_FETCH_ESCALATION => match arg {
                SyscallArg::Capacity(capacity) => self
                    .mailbox
                    .fetch_escalation(capacity)
                    .map(SyscallReply::Envelope)
                    .map_err(TrapError::from),
                _ => Err(TrapError::BadArgument { nr }),
            },
            SYS_WRITE => match arg {
                SyscallArg::Byte(byte) => {
                    self.console.write_byte(world.secure(), byte);
                    Ok(SyscallReply::None)
                }
                _ => Err(TrapError::BadArgument { nr }),
            },
            SYS_EXIT => {
                info!("SM stopping {} on exit call", world.name());
                world.stop();
                return TrapOutcome::Stopped;
            }
            _ if world.secure() => self.secure_default(world, nr, arg),
            _ => Err(TrapError::UnexpectedCall {
                nr,
                world: world.name(),
            }),
        };

        match serviced {
            Ok(reply) => TrapOutcome::Reply(reply),
            Err(err) => {
                if err.stops_world() {
                    warn!("SM stopping {} after fault: {err}", world.name());
                    world.stop();
                }
                TrapOutcome::Faulted(err)
            }
        }
    }

    /// Default handler for secure-world calls outside the shared set.
    fn secure_default(
        &self,
        world: &WorldHandle,
        nr: u32,
        arg: SyscallArg,
    ) -> Result<SyscallReply, TrapError> {
        match nr {
            SYS_RPC => match arg {
                SyscallArg::Rpc { method, arg } => {
                    Ok(SyscallReply::Rpc(self.registry.dispatch(&method, arg)?))
                }
                _ => Err(TrapError::BadArgument { nr }),
            },
            _ => Err(TrapError::UnexpectedCall {
                nr,
                world: world.name(),
            }),
        }
    }
}
