// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v0.9
// Author: Lukas Bower
// Date Modified: 2027-09-03

//! cohtee: the secure-side trust kernel of a split-world execution
//! environment.
//!
//! A secure monitor supervises an untrusted guest and a semi-trusted
//! applet. All cross-world traffic travels as TLV records through the
//! bounded mailbox; device trust is established by the VES attestation
//! handshake and decays through the endorsement cache.

/// Trusted applet: endorsement cache, attestation handshake, command loop.
pub mod applet;

/// Trust configuration and key material injection.
pub mod config;

/// Non-secure guest: bridge, USB replay, validation service client.
pub mod guest;

/// Narrow seams towards board hardware.
pub mod hal;

/// Secure monitor: trap dispatcher, RPC registry, console, worlds.
pub mod monitor;

use std::sync::Arc;

use log::info;

use config::{TrustConfig, VesCredentials, WATCHDOG_TIMEOUT_MS};
use hal::{HostLed, HostWatchdog, OsEntropy, Watchdog};
use monitor::exec::{WorldHandle, WorldSet};
use monitor::Monitor;

/// Boot all three worlds, run the demo traffic to completion and join
/// the shutdown wait-group.
pub fn boot(config: TrustConfig, credentials: VesCredentials) -> anyhow::Result<()> {
    let monitor = Monitor::new(&config, Arc::new(HostLed), Arc::new(OsEntropy));
    HostWatchdog.enable(WATCHDOG_TIMEOUT_MS);

    let applet_world = WorldHandle::new("applet", true);
    let guest_world = WorldHandle::new("guest", false);

    let mut worlds = WorldSet::new();
    {
        let applet = applet::Applet::new(monitor.port(applet_world.clone()), &config);
        worlds.spawn(applet_world, move || applet.run());
    }
    {
        let port = monitor.port(guest_world.clone());
        worlds.spawn(guest_world, move || guest::run_guest(port, credentials));
    }

    info!("SM waiting for applet and guest");
    worlds.join_all();
    monitor.shutdown();
    Ok(())
}
