// CLASSIFICATION: COMMUNITY
// Filename: ves.rs v0.6
// Author: Lukas Bower
// Date Modified: 2027-09-03

//! Validation and Endorsement Service client.
//!
//! Holds the signing half of the key pair, answers the applet's
//! challenge, and endorses devices once authenticated.

use std::sync::mpsc::Sender;

use cohtee_wire::{AuthChallenge, AuthResponse, DeviceIdentity, MessageTag, Reply};
use ed25519_dalek::Signer;
use log::{info, warn};

use crate::applet::attestation::auth_message;
use crate::config::VesCredentials;

use super::{round_trip, BridgeRequest};

/// The guest-resident validation service.
pub struct ValidationService {
    credentials: VesCredentials,
}

impl ValidationService {
    /// Build the service around its signing credentials.
    #[must_use]
    pub fn new(credentials: VesCredentials) -> Self {
        Self { credentials }
    }

    /// Service entry point: endorse the capture device, authenticating
    /// on the way if challenged.
    pub fn run(&self, bridge: &Sender<BridgeRequest>, device: DeviceIdentity) {
        info!("[ves] booting");
        if self.endorse(bridge, device) {
            info!("[ves] endorsed dev={device}");
        } else {
            warn!("[ves] failed to endorse dev={device}");
        }
        info!("[ves] exiting");
    }

    /// Request endorsement of `device`, answering a challenge and
    /// retrying once if the session is not yet authenticated.
    pub fn endorse(&self, bridge: &Sender<BridgeRequest>, device: DeviceIdentity) -> bool {
        match self.request_endorsement(bridge, device) {
            Some(Reply::EndorseAck { ok }) => ok,
            Some(Reply::Challenge(challenge)) => {
                info!("[ves] received auth challenge");
                if !self.authenticate(bridge, &challenge) {
                    return false;
                }
                matches!(
                    self.request_endorsement(bridge, device),
                    Some(Reply::EndorseAck { ok: true })
                )
            }
            other => {
                warn!("[ves] unexpected endorsement reply: {other:?}");
                false
            }
        }
    }

    fn request_endorsement(
        &self,
        bridge: &Sender<BridgeRequest>,
        device: DeviceIdentity,
    ) -> Option<Reply> {
        let reply = round_trip(
            bridge,
            MessageTag::EndorseRequest.id(),
            device.to_bytes().to_vec(),
        )?;
        match Reply::decode(&reply) {
            Ok(reply) => Some(reply),
            Err(err) => {
                warn!("[ves] endorsement reply malformed: {err}");
                None
            }
        }
    }

    fn authenticate(&self, bridge: &Sender<BridgeRequest>, challenge: &AuthChallenge) -> bool {
        let response = self.auth_response(challenge.nonce);
        let Some(reply) = round_trip(
            bridge,
            MessageTag::AuthResponse.id(),
            response.to_bytes(),
        ) else {
            warn!("[ves] authentication got no response");
            return false;
        };
        match Reply::decode(&reply) {
            Ok(Reply::AuthResult(result)) => {
                if result.ok {
                    info!("[ves] authenticated by applet");
                } else {
                    warn!("[ves] applet rejected authentication");
                }
                result.ok
            }
            other => {
                warn!("[ves] unexpected authentication reply: {other:?}");
                false
            }
        }
    }

    /// Build the signed response for a challenge nonce.
    #[must_use]
    pub fn auth_response(&self, nonce: [u8; 32]) -> AuthResponse {
        let signature = self.credentials.signing_key().sign(&auth_message(&nonce));
        AuthResponse {
            public_key: self.credentials.verifying_key().to_bytes(),
            nonce,
            signature: signature.to_bytes(),
        }
    }
}
