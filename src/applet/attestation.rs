// CLASSIFICATION: COMMUNITY
// Filename: attestation.rs v0.6
// Author: Lukas Bower
// Date Modified: 2027-09-02

//! Challenge/response handshake authenticating the validation service.
//!
//! One handshake state exists per secure boot session; it is not
//! per-device. The outstanding nonce is single-use: a response that
//! passes every check consumes it, so a replay of the same response is
//! rejected with no outstanding nonce.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use log::warn;
use sha2::{Digest, Sha256};

use cohtee_wire::{AuthResponse, NONCE_LEN};

/// Context string bound into every authentication signature.
pub const AUTH_CONTEXT: &[u8] = b"cohtee-ves-auth-v1";

/// Message the validation service must sign: SHA-256 over the nonce
/// concatenated with the context string.
#[must_use]
pub fn auth_message(nonce: &[u8; NONCE_LEN]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(nonce);
    hasher.update(AUTH_CONTEXT);
    hasher.finalize().into()
}

/// Rejection causes; detail stays in the local log, the requester only
/// ever sees a generic negative result.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TrustError {
    /// No challenge is outstanding.
    #[error("no outstanding nonce")]
    NoOutstandingNonce,
    /// The echoed nonce does not match the outstanding challenge.
    #[error("nonce mismatch")]
    NonceMismatch,
    /// The claimed public key is not the trusted one.
    #[error("unknown public key")]
    KeyMismatch,
    /// The signature does not verify.
    #[error("bad signature")]
    BadSignature,
}

enum SessionState {
    NoChallenge,
    ChallengeIssued { nonce: [u8; NONCE_LEN] },
    Authenticated,
}

/// Handshake state machine for the secure session.
pub struct VesHandshake {
    state: SessionState,
    trusted_key: VerifyingKey,
}

impl VesHandshake {
    /// Create a handshake trusting exactly one public key.
    #[must_use]
    pub fn new(trusted_key: VerifyingKey) -> Self {
        Self {
            state: SessionState::NoChallenge,
            trusted_key,
        }
    }

    /// Whether the validation service has authenticated this session.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, SessionState::Authenticated)
    }

    /// Record a freshly issued challenge nonce. A nonce already
    /// outstanding is replaced; the old one can no longer validate.
    pub fn issue(&mut self, nonce: [u8; NONCE_LEN]) {
        self.state = SessionState::ChallengeIssued { nonce };
    }

    /// Verify a response against the outstanding challenge.
    ///
    /// Checks run in order: nonce equality, trusted key equality,
    /// signature over [`auth_message`]. A rejection leaves the
    /// outstanding nonce valid for a genuine retry; success consumes it.
    pub fn handle_response(&mut self, response: &AuthResponse) -> Result<(), TrustError> {
        let nonce = match &self.state {
            SessionState::ChallengeIssued { nonce } => *nonce,
            _ => {
                warn!("[applet] auth response without outstanding nonce");
                return Err(TrustError::NoOutstandingNonce);
            }
        };

        if response.nonce != nonce {
            warn!("[applet] auth response nonce mismatch");
            return Err(TrustError::NonceMismatch);
        }

        if response.public_key != *self.trusted_key.as_bytes() {
            warn!("[applet] auth response public key mismatch");
            return Err(TrustError::KeyMismatch);
        }

        let message = auth_message(&nonce);
        let signature = Signature::from_bytes(&response.signature);
        if self.trusted_key.verify(&message, &signature).is_err() {
            warn!("[applet] auth response signature verification failed");
            return Err(TrustError::BadSignature);
        }

        self.state = SessionState::Authenticated;
        Ok(())
    }
}
