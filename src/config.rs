// CLASSIFICATION: COMMUNITY
// Filename: config.rs v0.4
// Author: Lukas Bower
// Date Modified: 2027-08-30

//! Trust configuration injected at startup.
//!
//! Key material is never compiled in: the secure side receives the
//! validation service's public key through [`TrustConfig`], and the demo
//! guest receives the matching signing key through [`VesCredentials`].
//! Both can be loaded from JSON or generated fresh for a demo run.

use std::fs;
use std::path::Path;

use anyhow::Context;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// Default packet budget handed out by a fresh endorsement.
pub const DEFAULT_ENDORSEMENT_TTL: u32 = 1000;
/// Default cross-world queue capacity per direction.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;
/// TrustZone watchdog service interval in milliseconds.
pub const WATCHDOG_TIMEOUT_MS: u32 = 10_000;

/// Secure-side trust parameters.
#[derive(Debug, Clone)]
pub struct TrustConfig {
    /// Public key the validation service must prove possession of.
    pub ves_public_key: VerifyingKey,
    /// Packet budget handed out by a fresh endorsement.
    pub endorsement_ttl: u32,
    /// Cross-world queue capacity per direction.
    pub queue_capacity: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct TrustConfigFile {
    ves_public_key: String,
    endorsement_ttl: Option<u32>,
    queue_capacity: Option<usize>,
}

impl TrustConfig {
    /// Build a configuration around a trusted key with default budgets.
    #[must_use]
    pub fn for_key(ves_public_key: VerifyingKey) -> Self {
        Self {
            ves_public_key,
            endorsement_ttl: DEFAULT_ENDORSEMENT_TTL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Parse a configuration from its JSON form.
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let file: TrustConfigFile =
            serde_json::from_str(text).context("parse trust configuration")?;
        let key_bytes: [u8; 32] = hex::decode(&file.ves_public_key)
            .context("decode ves_public_key hex")?
            .try_into()
            .ok()
            .context("ves_public_key must be 32 bytes")?;
        let ves_public_key =
            VerifyingKey::from_bytes(&key_bytes).context("invalid ves_public_key")?;
        Ok(Self {
            ves_public_key,
            endorsement_ttl: file.endorsement_ttl.unwrap_or(DEFAULT_ENDORSEMENT_TTL),
            queue_capacity: file.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
        })
    }

    /// Load a configuration from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read trust configuration {}", path.display()))?;
        Self::from_json(&text)
    }

    /// Serialize back to the JSON file form.
    pub fn to_json(&self) -> String {
        let file = TrustConfigFile {
            ves_public_key: hex::encode(self.ves_public_key.as_bytes()),
            endorsement_ttl: Some(self.endorsement_ttl),
            queue_capacity: Some(self.queue_capacity),
        };
        serde_json::to_string_pretty(&file).expect("serialize trust configuration")
    }
}

/// Signing half held by the validation service.
#[derive(Clone)]
pub struct VesCredentials {
    signing_key: SigningKey,
}

impl VesCredentials {
    /// Generate a fresh ephemeral key pair.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Parse from a hex-encoded 32-byte secret.
    pub fn from_hex(text: &str) -> anyhow::Result<Self> {
        let secret: [u8; 32] = hex::decode(text.trim())
            .context("decode ves_private_key hex")?
            .try_into()
            .ok()
            .context("ves_private_key must be 32 bytes")?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&secret),
        })
    }

    /// Borrow the signing key.
    #[must_use]
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Public half of the key pair.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

#[derive(Debug, Deserialize)]
struct DemoConfigFile {
    ves_private_key: String,
    endorsement_ttl: Option<u32>,
    queue_capacity: Option<usize>,
}

/// Ephemeral configuration pair for a demo run without a config file.
#[must_use]
pub fn demo_pair() -> (TrustConfig, VesCredentials) {
    let credentials = VesCredentials::generate();
    let config = TrustConfig::for_key(credentials.verifying_key());
    (config, credentials)
}

/// Load a demo configuration carrying both halves of the key pair.
pub fn load_demo(path: &Path) -> anyhow::Result<(TrustConfig, VesCredentials)> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("read demo configuration {}", path.display()))?;
    let file: DemoConfigFile = serde_json::from_str(&text).context("parse demo configuration")?;
    let credentials = VesCredentials::from_hex(&file.ves_private_key)?;
    let mut config = TrustConfig::for_key(credentials.verifying_key());
    if let Some(ttl) = file.endorsement_ttl {
        config.endorsement_ttl = ttl;
    }
    if let Some(capacity) = file.queue_capacity {
        config.queue_capacity = capacity;
    }
    Ok((config, credentials))
}
