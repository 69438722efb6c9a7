// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.9
// Author: Lukas Bower
// Date Modified: 2027-09-03

//! The trusted applet: consumes guest commands, gates device packets
//! through the endorsement cache, and runs the VES handshake.

use cohtee_mailbox::{Envelope, MailboxError, RequestId};
use cohtee_wire::{Command, DeviceIdentity, Reply};
use log::{debug, info, warn};

use crate::config::TrustConfig;
use crate::monitor::dispatch::{SyscallArg, SyscallReply, TrapError, SYS_EXIT, SYS_RPC};
use crate::monitor::rpc::{RpcArg, RpcError, RpcRet};
use crate::monitor::MonitorPort;

pub mod attestation;
pub mod endorsement;

use attestation::VesHandshake;
use endorsement::{BlockReason, Decision, EndorsementCache};

/// Negative reply matching the shape of a rejected command, if the
/// caller is waiting for one.
fn negative_reply(identifier: u8) -> Option<Reply> {
    match identifier {
        0x30 => Some(Reply::CheckVerdict { pass: false }),
        0x31 => Some(Reply::EndorseAck { ok: false }),
        0x33 => Some(Reply::AuthResult(cohtee_wire::AuthResult { ok: false })),
        _ => None,
    }
}

/// The semi-trusted applet world.
pub struct Applet {
    port: MonitorPort,
    handshake: VesHandshake,
    cache: EndorsementCache,
    pending_escalation: Option<(RequestId, DeviceIdentity)>,
}

impl Applet {
    /// Build the applet over its trap port and trust configuration.
    #[must_use]
    pub fn new(port: MonitorPort, config: &TrustConfig) -> Self {
        Self {
            port,
            handshake: VesHandshake::new(config.ves_public_key),
            cache: EndorsementCache::new(config.endorsement_ttl),
            pending_escalation: None,
        }
    }

    /// Command loop; returns when terminated or stopped.
    pub fn run(mut self) {
        info!("[applet] booting");
        self.led(true);

        loop {
            if self.port.world().is_stopped() {
                break;
            }
            let Some(envelope) = self.wait_command() else {
                break;
            };
            debug!("[applet] received {}", envelope.record);
            self.poll_escalation_ack();

            match Command::decode(&envelope.record) {
                Ok(Command::Terminate) => {
                    info!("[applet] terminate broadcast received");
                    break;
                }
                Ok(command) => self.handle_command(envelope.req, command),
                Err(err) => {
                    warn!("[applet] rejecting malformed command: {err}");
                    if let Some(reply) = negative_reply(envelope.record.identifier()) {
                        self.send_response(envelope.req, reply);
                    }
                }
            }
        }

        self.led(false);
        info!("[applet] exiting");
        let _ = self.port.syscall(SYS_EXIT, SyscallArg::None);
    }

    fn handle_command(&mut self, req: RequestId, command: Command) {
        match command {
            Command::DeviceCheck { device, packet } => {
                let decision = self.cache.check(device, &packet);
                if let Decision::Block {
                    reason: BlockReason::Expired,
                } = decision
                {
                    self.cache.dump_audit(device);
                    self.escalate_expiry(device);
                }
                self.send_response(
                    req,
                    Reply::CheckVerdict {
                        pass: decision.passed(),
                    },
                );
            }
            Command::EndorseRequest { device } => self.handle_endorse(req, device),
            Command::AuthResponse(response) => {
                let ok = match self.handshake.handle_response(&response) {
                    Ok(()) => {
                        info!("[applet] VES authenticated");
                        true
                    }
                    // Detail stays local; the requester only learns that
                    // authentication failed.
                    Err(_) => false,
                };
                self.send_response(req, Reply::AuthResult(cohtee_wire::AuthResult { ok }));
            }
            // Terminate is intercepted by the command loop.
            Command::Terminate => {}
        }
    }

    fn handle_endorse(&mut self, req: RequestId, device: Option<DeviceIdentity>) {
        if !self.handshake.is_authenticated() {
            info!("[applet] VES not authenticated, issuing challenge");
            match self.rpc("GetChallenge", RpcArg::None) {
                Ok(RpcRet::Challenge(challenge)) => {
                    self.handshake.issue(challenge.nonce);
                    self.send_response(req, Reply::Challenge(challenge));
                }
                other => {
                    warn!("[applet] challenge issuance failed: {other:?}");
                    self.send_response(
                        req,
                        Reply::AuthResult(cohtee_wire::AuthResult { ok: false }),
                    );
                }
            }
            return;
        }

        match device {
            Some(device) => {
                self.cache.endorse(device);
                self.send_response(req, Reply::EndorseAck { ok: true });
            }
            None => {
                warn!("[applet] endorse request without a device identity");
                self.send_response(req, Reply::EndorseAck { ok: false });
            }
        }
    }

    /// Ask the guest supervisor for a fresh endorsement round.
    fn escalate_expiry(&mut self, device: DeviceIdentity) {
        if self.pending_escalation.is_some() {
            return;
        }
        let record = match (Command::EndorseRequest {
            device: Some(device),
        })
        .encode()
        {
            Ok(record) => record,
            Err(err) => {
                warn!("[applet] escalation encode failed: {err}");
                return;
            }
        };
        match self.rpc("SendCommand", RpcArg::Record(record)) {
            Ok(RpcRet::Request(escalation)) => {
                info!("[applet] escalated re-endorsement of dev={device} as {escalation}");
                self.pending_escalation = Some((escalation, device));
            }
            other => warn!("[applet] escalation failed: {other:?}"),
        }
    }

    /// Collect the acknowledgment of an earlier escalation, if ready.
    fn poll_escalation_ack(&mut self) {
        let Some((escalation, device)) = self.pending_escalation else {
            return;
        };
        match self.rpc("CheckRspChannel", RpcArg::Request(escalation)) {
            Ok(RpcRet::Len(0)) => {}
            Ok(RpcRet::Len(_)) => {
                match self.rpc("PopRspChannel", RpcArg::Request(escalation)) {
                    Ok(RpcRet::Record(record)) => match Reply::decode(&record) {
                        Ok(Reply::EndorseAck { ok }) => {
                            info!("[applet] escalation for dev={device} acknowledged ok={ok}");
                        }
                        other => warn!("[applet] unexpected escalation ack: {other:?}"),
                    },
                    other => warn!("[applet] escalation ack fetch failed: {other:?}"),
                }
                self.pending_escalation = None;
            }
            other => {
                warn!("[applet] escalation ack poll failed: {other:?}");
                self.pending_escalation = None;
            }
        }
    }

    fn wait_command(&self) -> Option<Envelope> {
        match self.rpc("PopChannel", RpcArg::None) {
            Ok(RpcRet::Envelope(envelope)) => Some(envelope),
            Err(TrapError::Mailbox(MailboxError::Shutdown))
            | Err(TrapError::Rpc(RpcError::Mailbox(MailboxError::Shutdown))) => None,
            other => {
                warn!("[applet] command wait failed: {other:?}");
                None
            }
        }
    }

    fn send_response(&self, req: RequestId, reply: Reply) {
        let record = match reply.encode() {
            Ok(record) => record,
            Err(err) => {
                warn!("[applet] response encode failed: {err}");
                return;
            }
        };
        if let Err(err) = self.rpc("SendResponse", RpcArg::Respond { req, record }) {
            warn!("[applet] response delivery failed: {err}");
        }
    }

    fn led(&self, on: bool) {
        let _ = self.rpc(
            "LED",
            RpcArg::Led {
                name: "blue".to_string(),
                on,
            },
        );
    }

    fn rpc(&self, method: &str, arg: RpcArg) -> Result<RpcRet, TrapError> {
        match self.port.syscall(
            SYS_RPC,
            SyscallArg::Rpc {
                method: method.to_string(),
                arg,
            },
        )? {
            SyscallReply::Rpc(ret) => Ok(ret),
            other => {
                debug!("[applet] unexpected RPC transport reply: {other:?}");
                Ok(RpcRet::None)
            }
        }
    }
}
