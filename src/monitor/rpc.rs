// CLASSIFICATION: COMMUNITY
// Filename: rpc.rs v0.6
// Author: Lukas Bower
// Date Modified: 2027-09-01

//! Fixed name-keyed operation table the applet may invoke.
//!
//! Calls arrive over the RPC syscall as a method name plus a typed
//! argument. The table is closed: unknown names and argument shape
//! mismatches are hard errors, never coerced.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use cohtee_mailbox::{Envelope, Mailbox, MailboxError, RequestId};
use cohtee_wire::{AuthChallenge, Tlv, NONCE_LEN};
use log::debug;

use crate::hal::{EntropySource, HalError, StatusLed};

/// Argument shapes accepted by registry methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcArg {
    /// No argument.
    None,
    /// A text payload.
    Text(String),
    /// An LED fixture request.
    Led {
        /// Fixture name.
        name: String,
        /// Requested state.
        on: bool,
    },
    /// A bare TLV record.
    Record(Tlv),
    /// A response correlated to a pending request.
    Respond {
        /// Request being answered.
        req: RequestId,
        /// Response record.
        record: Tlv,
    },
    /// A request identifier.
    Request(RequestId),
}

/// Return shapes produced by registry methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcRet {
    /// Nothing to return.
    None,
    /// A text payload.
    Text(String),
    /// Whether a channel has data ready.
    Ready(bool),
    /// A ready-length, 0 meaning not ready.
    Len(u16),
    /// A popped envelope.
    Envelope(Envelope),
    /// A bare TLV record.
    Record(Tlv),
    /// A freshly issued challenge.
    Challenge(AuthChallenge),
    /// The identifier allocated for a submission.
    Request(RequestId),
}

/// Errors surfaced by registry dispatch.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RpcError {
    /// The method name is not in the table.
    #[error("unknown RPC method {0}")]
    UnknownMethod(String),
    /// The argument does not match the method's declared shape.
    #[error("bad argument for RPC method {0}")]
    BadArgument(&'static str),
    /// The fixture is reserved for secure-side indicators.
    #[error("LED {0} is secure only")]
    SecureOnlyFixture(String),
    /// A board collaborator rejected the request.
    #[error(transparent)]
    Hal(#[from] HalError),
    /// A mailbox operation failed.
    #[error(transparent)]
    Mailbox(#[from] MailboxError),
}

/// The fixed method table.
pub struct Registry {
    mailbox: Arc<Mailbox>,
    led: Arc<dyn StatusLed>,
    entropy: Arc<dyn EntropySource>,
    issued_nonces: Mutex<HashSet<[u8; NONCE_LEN]>>,
}

impl Registry {
    /// Build the table over the mailbox and board collaborators.
    pub fn new(
        mailbox: Arc<Mailbox>,
        led: Arc<dyn StatusLed>,
        entropy: Arc<dyn EntropySource>,
    ) -> Self {
        Self {
            mailbox,
            led,
            entropy,
            issued_nonces: Mutex::new(HashSet::new()),
        }
    }

    /// Invoke a method by name.
    pub fn dispatch(&self, method: &str, arg: RpcArg) -> Result<RpcRet, RpcError> {
        debug!("RPC {method}");
        match method {
            "Echo" => match arg {
                RpcArg::Text(text) => Ok(RpcRet::Text(text)),
                _ => Err(RpcError::BadArgument("Echo")),
            },
            "LED" => match arg {
                RpcArg::Led { name, on } => self.led_request(&name, on),
                _ => Err(RpcError::BadArgument("LED")),
            },
            "CheckChannel" => match arg {
                RpcArg::None => Ok(RpcRet::Ready(self.mailbox.command_ready())),
                _ => Err(RpcError::BadArgument("CheckChannel")),
            },
            "PopChannel" => match arg {
                RpcArg::None => Ok(RpcRet::Envelope(self.mailbox.pop_command()?)),
                _ => Err(RpcError::BadArgument("PopChannel")),
            },
            "SendResponse" => match arg {
                RpcArg::Respond { req, record } => {
                    self.mailbox.respond(req, record)?;
                    Ok(RpcRet::None)
                }
                _ => Err(RpcError::BadArgument("SendResponse")),
            },
            "GetChallenge" => match arg {
                RpcArg::None => Ok(RpcRet::Challenge(self.fresh_challenge())),
                _ => Err(RpcError::BadArgument("GetChallenge")),
            },
            "SendCommand" => match arg {
                RpcArg::Record(record) => {
                    Ok(RpcRet::Request(self.mailbox.submit_escalation(record)?))
                }
                _ => Err(RpcError::BadArgument("SendCommand")),
            },
            "CheckRspChannel" => match arg {
                RpcArg::Request(req) => Ok(RpcRet::Len(self.mailbox.poll_ack(req)?)),
                _ => Err(RpcError::BadArgument("CheckRspChannel")),
            },
            "PopRspChannel" => match arg {
                RpcArg::Request(req) => Ok(RpcRet::Record(self.mailbox.fetch_ack(req)?)),
                _ => Err(RpcError::BadArgument("PopRspChannel")),
            },
            other => Err(RpcError::UnknownMethod(other.to_string())),
        }
    }

    fn led_request(&self, name: &str, on: bool) -> Result<RpcRet, RpcError> {
        match name {
            "white" | "White" | "WHITE" => Err(RpcError::SecureOnlyFixture(name.to_string())),
            "blue" | "Blue" | "BLUE" => {
                self.led.set("blue", on)?;
                Ok(RpcRet::None)
            }
            other => Err(RpcError::Hal(HalError::UnknownFixture(other.to_string()))),
        }
    }

    /// Draw a challenge nonce never handed out before in this session.
    fn fresh_challenge(&self) -> AuthChallenge {
        let mut issued = self.issued_nonces.lock().expect("nonce lock poisoned");
        loop {
            let mut nonce = [0u8; NONCE_LEN];
            self.entropy.fill(&mut nonce);
            if issued.insert(nonce) {
                return AuthChallenge { nonce };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{HostLed, OsEntropy};
    use cohtee_mailbox::DEFAULT_CAPACITY;

    fn registry() -> Registry {
        Registry::new(
            Arc::new(Mailbox::new(DEFAULT_CAPACITY)),
            Arc::new(HostLed),
            Arc::new(OsEntropy),
        )
    }

    #[test]
    fn echo_returns_its_input() {
        let reply = registry()
            .dispatch("Echo", RpcArg::Text("hello".to_string()))
            .expect("dispatch");
        assert_eq!(reply, RpcRet::Text("hello".to_string()));
    }

    #[test]
    fn unknown_methods_are_rejected() {
        assert_eq!(
            registry().dispatch("Reboot", RpcArg::None),
            Err(RpcError::UnknownMethod("Reboot".to_string()))
        );
    }

    #[test]
    fn argument_shape_mismatch_is_rejected() {
        assert_eq!(
            registry().dispatch("Echo", RpcArg::None),
            Err(RpcError::BadArgument("Echo"))
        );
    }

    #[test]
    fn white_led_is_secure_only_in_any_case() {
        let registry = registry();
        for name in ["white", "White", "WHITE"] {
            assert_eq!(
                registry.dispatch(
                    "LED",
                    RpcArg::Led {
                        name: name.to_string(),
                        on: true,
                    },
                ),
                Err(RpcError::SecureOnlyFixture(name.to_string()))
            );
        }
    }

    #[test]
    fn blue_led_is_driven() {
        let reply = registry()
            .dispatch(
                "LED",
                RpcArg::Led {
                    name: "Blue".to_string(),
                    on: true,
                },
            )
            .expect("dispatch");
        assert_eq!(reply, RpcRet::None);
    }

    #[test]
    fn challenges_are_fresh_within_a_session() {
        let registry = registry();
        let mut seen = HashSet::new();
        for _ in 0..32 {
            match registry.dispatch("GetChallenge", RpcArg::None) {
                Ok(RpcRet::Challenge(challenge)) => {
                    assert!(seen.insert(challenge.nonce));
                }
                other => panic!("unexpected reply {other:?}"),
            }
        }
    }

    #[test]
    fn channel_methods_serve_the_applet_side() {
        let mailbox = Arc::new(Mailbox::new(DEFAULT_CAPACITY));
        let registry = Registry::new(mailbox.clone(), Arc::new(HostLed), Arc::new(OsEntropy));

        assert_eq!(
            registry.dispatch("CheckChannel", RpcArg::None),
            Ok(RpcRet::Ready(false))
        );

        let req = mailbox
            .submit_command(Tlv::pack(0x30, false, vec![7]).expect("pack record"))
            .expect("submit");
        assert_eq!(
            registry.dispatch("CheckChannel", RpcArg::None),
            Ok(RpcRet::Ready(true))
        );

        let envelope = match registry.dispatch("PopChannel", RpcArg::None) {
            Ok(RpcRet::Envelope(envelope)) => envelope,
            other => panic!("unexpected reply {other:?}"),
        };
        assert_eq!(envelope.req, req);

        let record = Tlv::pack(0x30, false, vec![1]).expect("pack record");
        assert_eq!(
            registry.dispatch("SendResponse", RpcArg::Respond { req, record }),
            Ok(RpcRet::None)
        );
        assert_eq!(mailbox.poll_response(req), Ok(1));
    }

    #[test]
    fn send_command_and_ack_round_trip() {
        let registry = registry();
        let record = Tlv::pack(0x31, false, vec![1, 2]).expect("pack record");
        let req = match registry.dispatch("SendCommand", RpcArg::Record(record)) {
            Ok(RpcRet::Request(req)) => req,
            other => panic!("unexpected reply {other:?}"),
        };
        assert_eq!(
            registry.dispatch("CheckRspChannel", RpcArg::Request(req)),
            Ok(RpcRet::Len(0))
        );
    }
}
