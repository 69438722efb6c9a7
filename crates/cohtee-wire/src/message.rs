// Author: Lukas Bower
// Purpose: Define the typed command and reply layer over raw cohtee TLV records.

//! Typed messages carried by the reserved tag set.
//!
//! Commands travel from the guest towards the applet; replies travel
//! back. Both are closed enums: a record whose tag falls outside the
//! reserved set, or whose tag belongs to the opposite direction, decodes
//! to an explicit error instead of a fallthrough.

use core::fmt;

use crate::tlv::{CodecError, MessageTag, Tlv, TlvReader};

/// Ed25519 public key length in bytes.
pub const KEY_LEN: usize = 32;
/// Challenge nonce length in bytes.
pub const NONCE_LEN: usize = 32;
/// Ed25519 signature length in bytes.
pub const SIG_LEN: usize = 64;

/// Sub-record tag for a device identity embedded in a device check.
const SUB_DEVICE: u8 = 0x01;
/// Sub-record tag for the packet bytes embedded in a device check.
const SUB_PACKET: u8 = 0x02;

/// USB device identity used as the endorsement cache key.
///
/// Two identities are equal iff both fields are equal; there is no
/// wildcard matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    /// Vendor identifier.
    pub vendor_id: u16,
    /// Product identifier.
    pub product_id: u16,
}

impl DeviceIdentity {
    /// Serialize as two big-endian `u16` fields.
    #[must_use]
    pub fn to_bytes(self) -> [u8; 4] {
        let mut out = [0u8; 4];
        out[..2].copy_from_slice(&self.vendor_id.to_be_bytes());
        out[2..].copy_from_slice(&self.product_id.to_be_bytes());
        out
    }

    /// Parse from exactly four bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let fixed: [u8; 4] = bytes
            .try_into()
            .map_err(|_| CodecError::Malformed("device identity"))?;
        Ok(Self {
            vendor_id: u16::from_be_bytes([fixed[0], fixed[1]]),
            product_id: u16::from_be_bytes([fixed[2], fixed[3]]),
        })
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Challenge nonce issued towards the validation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthChallenge {
    /// Single-use random nonce.
    pub nonce: [u8; NONCE_LEN],
}

impl AuthChallenge {
    /// Parse from exactly [`NONCE_LEN`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let nonce = bytes
            .try_into()
            .map_err(|_| CodecError::Malformed("auth challenge"))?;
        Ok(Self { nonce })
    }
}

/// Signed response from the validation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthResponse {
    /// Public key the responder claims to hold.
    pub public_key: [u8; KEY_LEN],
    /// Echo of the challenge nonce.
    pub nonce: [u8; NONCE_LEN],
    /// Ed25519 signature over the authentication message.
    pub signature: [u8; SIG_LEN],
}

impl AuthResponse {
    /// Serialize as key, nonce and signature concatenated.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(KEY_LEN + NONCE_LEN + SIG_LEN);
        out.extend_from_slice(&self.public_key);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.signature);
        out
    }

    /// Parse from exactly `KEY_LEN + NONCE_LEN + SIG_LEN` bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != KEY_LEN + NONCE_LEN + SIG_LEN {
            return Err(CodecError::Malformed("auth response"));
        }
        let mut public_key = [0u8; KEY_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        let mut signature = [0u8; SIG_LEN];
        public_key.copy_from_slice(&bytes[..KEY_LEN]);
        nonce.copy_from_slice(&bytes[KEY_LEN..KEY_LEN + NONCE_LEN]);
        signature.copy_from_slice(&bytes[KEY_LEN + NONCE_LEN..]);
        Ok(Self {
            public_key,
            nonce,
            signature,
        })
    }
}

/// Verdict on a validation service response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthResult {
    /// Whether authentication succeeded.
    pub ok: bool,
}

impl AuthResult {
    /// Serialize as a single byte, 0 or 1.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        u8::from(self.ok)
    }

    /// Parse from exactly one byte; only 0 and 1 are valid.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        match bytes {
            [0] => Ok(Self { ok: false }),
            [1] => Ok(Self { ok: true }),
            _ => Err(CodecError::Malformed("auth result")),
        }
    }
}

/// Commands the applet accepts from the guest side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask whether a packet from the identified device may pass.
    DeviceCheck {
        /// Device the packet was captured from.
        device: DeviceIdentity,
        /// Raw packet bytes.
        packet: Vec<u8>,
    },
    /// Ask to endorse a device; the identity is absent while the
    /// validation service has not yet authenticated.
    EndorseRequest {
        /// Device to endorse once the sender is authenticated.
        device: Option<DeviceIdentity>,
    },
    /// Signed answer to an outstanding challenge.
    AuthResponse(AuthResponse),
    /// Cooperative shutdown broadcast.
    Terminate,
}

impl Command {
    /// Serialize into a TLV record.
    pub fn encode(&self) -> Result<Tlv, CodecError> {
        match self {
            Command::DeviceCheck { device, packet } => {
                let mut value = Vec::new();
                Tlv::pack(SUB_DEVICE, true, device.to_bytes().to_vec())?.encode_into(&mut value);
                Tlv::pack(SUB_PACKET, true, packet.clone())?.encode_into(&mut value);
                Tlv::pack(MessageTag::DeviceCheck.id(), false, value)
            }
            Command::EndorseRequest { device } => {
                let value = device.map(|d| d.to_bytes().to_vec()).unwrap_or_default();
                Tlv::pack(MessageTag::EndorseRequest.id(), false, value)
            }
            Command::AuthResponse(response) => {
                Tlv::pack(MessageTag::AuthResponse.id(), false, response.to_bytes())
            }
            Command::Terminate => Tlv::pack(MessageTag::Terminate.id(), false, Vec::new()),
        }
    }

    /// Parse a TLV record into a command.
    pub fn decode(record: &Tlv) -> Result<Self, CodecError> {
        match MessageTag::try_from(record.identifier())? {
            MessageTag::DeviceCheck => {
                let mut reader = TlvReader::new(record.value());
                let device_sub = reader.next_record()?;
                let packet_sub = reader.next_record()?;
                if device_sub.identifier() != SUB_DEVICE || packet_sub.identifier() != SUB_PACKET {
                    return Err(CodecError::Malformed("device check"));
                }
                Ok(Command::DeviceCheck {
                    device: DeviceIdentity::from_bytes(device_sub.value())?,
                    packet: packet_sub.into_value(),
                })
            }
            MessageTag::EndorseRequest => {
                let device = if record.value().is_empty() {
                    None
                } else {
                    Some(DeviceIdentity::from_bytes(record.value())?)
                };
                Ok(Command::EndorseRequest { device })
            }
            MessageTag::AuthResponse => {
                Ok(Command::AuthResponse(AuthResponse::from_bytes(record.value())?))
            }
            MessageTag::Terminate => Ok(Command::Terminate),
            other => Err(CodecError::UnexpectedTag(other.id())),
        }
    }
}

/// Replies the applet sends back towards the guest side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Pass or block verdict for a device check.
    CheckVerdict {
        /// Whether the packet may pass.
        pass: bool,
    },
    /// Acknowledgment of an endorsement request.
    EndorseAck {
        /// Whether the endorsement was recorded.
        ok: bool,
    },
    /// Challenge towards the validation service.
    Challenge(AuthChallenge),
    /// Verdict on a validation service response.
    AuthResult(AuthResult),
}

impl Reply {
    /// Serialize into a TLV record.
    pub fn encode(&self) -> Result<Tlv, CodecError> {
        match self {
            Reply::CheckVerdict { pass } => {
                Tlv::pack(MessageTag::DeviceCheck.id(), false, vec![u8::from(*pass)])
            }
            Reply::EndorseAck { ok } => {
                Tlv::pack(MessageTag::EndorseRequest.id(), false, vec![u8::from(*ok)])
            }
            Reply::Challenge(challenge) => Tlv::pack(
                MessageTag::AuthChallenge.id(),
                false,
                challenge.nonce.to_vec(),
            ),
            Reply::AuthResult(result) => Tlv::pack(
                MessageTag::AuthResult.id(),
                false,
                vec![result.to_byte()],
            ),
        }
    }

    /// Parse a TLV record into a reply.
    pub fn decode(record: &Tlv) -> Result<Self, CodecError> {
        match MessageTag::try_from(record.identifier())? {
            MessageTag::DeviceCheck => match record.value() {
                [0] => Ok(Reply::CheckVerdict { pass: false }),
                [1] => Ok(Reply::CheckVerdict { pass: true }),
                _ => Err(CodecError::Malformed("check verdict")),
            },
            MessageTag::EndorseRequest => match record.value() {
                [0] => Ok(Reply::EndorseAck { ok: false }),
                [1] => Ok(Reply::EndorseAck { ok: true }),
                _ => Err(CodecError::Malformed("endorse ack")),
            },
            MessageTag::AuthChallenge => {
                Ok(Reply::Challenge(AuthChallenge::from_bytes(record.value())?))
            }
            MessageTag::AuthResult => Ok(Reply::AuthResult(AuthResult::from_bytes(record.value())?)),
            other => Err(CodecError::UnexpectedTag(other.id())),
        }
    }
}
