// CLASSIFICATION: COMMUNITY
// Filename: hal.rs v0.3
// Author: Lukas Bower
// Date Modified: 2027-08-21

//! Narrow seams towards board hardware.
//!
//! Board bring-up, LED drivers and the TrustZone watchdog live outside
//! this crate; the monitor reaches them only through these traits so
//! tests can substitute doubles.

use log::info;
use rand::rngs::OsRng;
use rand::RngCore;

/// Errors surfaced by board collaborators.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HalError {
    /// The named LED fixture does not exist on this board.
    #[error("invalid LED {0}")]
    UnknownFixture(String),
}

/// Board status LED driver.
pub trait StatusLed: Send + Sync {
    /// Set the named LED fixture on or off.
    fn set(&self, name: &str, on: bool) -> Result<(), HalError>;
}

/// TrustZone watchdog forcing periodic world switches.
pub trait Watchdog: Send + Sync {
    /// Arm the watchdog with the given service interval.
    fn enable(&self, timeout_ms: u32);
}

/// Secure-world entropy source.
pub trait EntropySource: Send + Sync {
    /// Fill `buf` with random bytes.
    fn fill(&self, buf: &mut [u8]);
}

/// Host stand-in for the board LED driver.
#[derive(Debug, Default)]
pub struct HostLed;

impl StatusLed for HostLed {
    fn set(&self, name: &str, on: bool) -> Result<(), HalError> {
        match name {
            "blue" | "white" => {
                info!("SM LED {name} {}", if on { "on" } else { "off" });
                Ok(())
            }
            other => Err(HalError::UnknownFixture(other.to_string())),
        }
    }
}

/// Host stand-in for the TrustZone watchdog.
#[derive(Debug, Default)]
pub struct HostWatchdog;

impl Watchdog for HostWatchdog {
    fn enable(&self, timeout_ms: u32) {
        info!("SM enabling TrustZone watchdog, interval {timeout_ms}ms");
    }
}

/// Operating-system entropy source.
#[derive(Debug, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, buf: &mut [u8]) {
        OsRng.fill_bytes(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_led_rejects_unknown_fixtures() {
        let led = HostLed;
        assert!(led.set("blue", true).is_ok());
        assert_eq!(
            led.set("amber", true),
            Err(HalError::UnknownFixture("amber".to_string()))
        );
    }

    #[test]
    fn os_entropy_fills_buffers() {
        let entropy = OsEntropy;
        let mut first = [0u8; 32];
        let mut second = [0u8; 32];
        entropy.fill(&mut first);
        entropy.fill(&mut second);
        assert_ne!(first, second);
    }
}
