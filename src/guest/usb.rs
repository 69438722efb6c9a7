// CLASSIFICATION: COMMUNITY
// Filename: usb.rs v0.4
// Author: Lukas Bower
// Date Modified: 2027-09-03

//! Canned USB keyboard capture replayed through the device-check path.
//!
//! Raw USB enumeration and transport live outside this crate; the
//! replay installs its capture device on a port directly and walks the
//! embedded packet log line by line.

use std::sync::mpsc::Sender;

use cohtee_wire::{Command, DeviceIdentity, Reply};
use log::{info, warn};

use super::{round_trip, BridgeRequest};

/// Ports exposed by the board's USB hub.
const MAX_USB_PORTS: usize = 7;

/// Device identity the embedded capture was taken from.
pub const TEST_DEVICE: DeviceIdentity = DeviceIdentity {
    vendor_id: 0x046d,
    product_id: 0xc53f,
};

/// Keyboard capture: port number and packet hex, one packet per line.
const EMBEDDED_KEYBOARD_PACKETS: &str = "
6 0000160000000000
6 0000000000000000
6 0000160000000000
6 0000000000000000
6 0000160000000000
6 0000000000000000
";

/// Send one packet through the device-check path; returns the verdict.
pub fn check_packet(
    bridge: &Sender<BridgeRequest>,
    device: DeviceIdentity,
    packet: Vec<u8>,
) -> bool {
    let record = match (Command::DeviceCheck { device, packet }).encode() {
        Ok(record) => record,
        Err(err) => {
            warn!("[guest] device check encode failed: {err}");
            return false;
        }
    };
    let Some(reply) = round_trip(bridge, record.identifier(), record.into_value()) else {
        warn!("[guest] device check got no response");
        return false;
    };
    match Reply::decode(&reply) {
        Ok(Reply::CheckVerdict { pass }) => pass,
        other => {
            warn!("[guest] unexpected device check reply: {other:?}");
            false
        }
    }
}

/// Replay the embedded capture; returns one verdict per packet.
pub fn replay_embedded(bridge: &Sender<BridgeRequest>) -> Vec<bool> {
    let mut ports: [Option<DeviceIdentity>; MAX_USB_PORTS] = [None; MAX_USB_PORTS];
    // Install the capture device without going through USB enumeration.
    ports[6] = Some(TEST_DEVICE);

    let mut verdicts = Vec::new();
    for line in EMBEDDED_KEYBOARD_PACKETS.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(port_field), Some(hex_field)) = (fields.next(), fields.next()) else {
            warn!("[guest] skipping malformed capture line: {line}");
            continue;
        };
        let Some(device) = port_field
            .parse::<usize>()
            .ok()
            .and_then(|port| ports.get(port).copied())
            .flatten()
        else {
            warn!("[guest] no device on port {port_field}");
            continue;
        };
        let packet = match hex::decode(hex_field.replace(':', "")) {
            Ok(packet) => packet,
            Err(err) => {
                warn!("[guest] bad packet hex: {err}");
                continue;
            }
        };

        let passed = check_packet(bridge, device, packet);
        info!(
            "[guest] packet {} port={port_field}",
            if passed { "ACCEPTED" } else { "BLOCKED" }
        );
        verdicts.push(passed);
    }
    info!("[guest] embedded keyboard replay complete");
    verdicts
}
