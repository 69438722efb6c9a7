// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.8
// Author: Lukas Bower
// Date Modified: 2027-09-03

//! The non-secure guest: monitor-call bridge, USB packet replay and the
//! validation service client.
//!
//! The bridge is the single worker owning the shared submission point;
//! every guest service hands it requests over a channel and blocks on
//! completion, which serializes use of the queue pair.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cohtee_wire::{Command, Reply, Tlv};
use log::{info, warn};

use crate::config::VesCredentials;
use crate::monitor::dispatch::{
    SyscallArg, SyscallReply, SYS_ACK_ESCALATION, SYS_EXIT, SYS_FETCH_ESCALATION,
    SYS_FETCH_RESPONSE, SYS_POLL_ESCALATION, SYS_POLL_RESPONSE, SYS_SUBMIT_COMMAND,
};
use crate::monitor::MonitorPort;

pub mod usb;
pub mod ves;

use ves::ValidationService;

/// Pause between response polls.
const POLL_INTERVAL: Duration = Duration::from_micros(100);

/// One request handed to the bridge worker.
pub struct BridgeRequest {
    /// Outer record tag.
    pub tag: u8,
    /// Outer record value.
    pub value: Vec<u8>,
    /// Whether the caller waits for a response.
    pub expect_rsp: bool,
    /// Completion channel; carries the response, or `None`.
    pub reply: Sender<Option<Tlv>>,
}

/// Submit a command through the bridge and block for its response.
pub fn round_trip(bridge: &Sender<BridgeRequest>, tag: u8, value: Vec<u8>) -> Option<Tlv> {
    let (reply_tx, reply_rx) = mpsc::channel();
    bridge
        .send(BridgeRequest {
            tag,
            value,
            expect_rsp: true,
            reply: reply_tx,
        })
        .ok()?;
    reply_rx.recv().ok()?
}

/// Submit a command through the bridge without waiting for a response.
pub fn send_only(bridge: &Sender<BridgeRequest>, tag: u8, value: Vec<u8>) {
    let (reply_tx, reply_rx) = mpsc::channel();
    if bridge
        .send(BridgeRequest {
            tag,
            value,
            expect_rsp: false,
            reply: reply_tx,
        })
        .is_ok()
    {
        let _ = reply_rx.recv();
    }
}

/// Bridge worker: drains requests until every sender is gone.
pub fn run_bridge(port: MonitorPort, requests: Receiver<BridgeRequest>) {
    for request in requests {
        let response = submit(&port, &request);
        let _ = request.reply.send(response);
    }
}

fn submit(port: &MonitorPort, request: &BridgeRequest) -> Option<Tlv> {
    let record = match Tlv::pack(request.tag, false, request.value.clone()) {
        Ok(record) => record,
        Err(err) => {
            warn!("[guest] bridge refused request: {err}");
            return None;
        }
    };
    let req = match port.syscall(SYS_SUBMIT_COMMAND, SyscallArg::Record(record)) {
        Ok(SyscallReply::Request(req)) => req,
        other => {
            warn!("[guest] submission failed: {other:?}");
            return None;
        }
    };
    if !request.expect_rsp {
        return None;
    }
    wait_response(port, req)
}

fn wait_response(port: &MonitorPort, req: cohtee_mailbox::RequestId) -> Option<Tlv> {
    loop {
        match port.syscall(SYS_POLL_RESPONSE, SyscallArg::Request(req)) {
            Ok(SyscallReply::Len(0)) => {
                if port.world().is_stopped() {
                    return None;
                }
                thread::sleep(POLL_INTERVAL);
            }
            Ok(SyscallReply::Len(len)) => {
                return match port.syscall(
                    SYS_FETCH_RESPONSE,
                    SyscallArg::Fetch {
                        req,
                        capacity: usize::from(len),
                    },
                ) {
                    Ok(SyscallReply::Record(record)) => Some(record),
                    other => {
                        warn!("[guest] response fetch failed: {other:?}");
                        None
                    }
                };
            }
            other => {
                warn!("[guest] response poll failed: {other:?}");
                return None;
            }
        }
    }
}

/// Service applet escalations until `done` is raised: fetch, hand to
/// the validation service for a fresh endorsement round, acknowledge.
fn run_escalation_worker(
    port: MonitorPort,
    bridge: Sender<BridgeRequest>,
    ves: Arc<ValidationService>,
    done: Arc<AtomicBool>,
) {
    while !done.load(Ordering::SeqCst) && !port.world().is_stopped() {
        match port.syscall(SYS_POLL_ESCALATION, SyscallArg::None) {
            Ok(SyscallReply::Len(0)) => thread::sleep(POLL_INTERVAL),
            Ok(SyscallReply::Len(len)) => {
                let envelope = match port.syscall(
                    SYS_FETCH_ESCALATION,
                    SyscallArg::Capacity(usize::from(len)),
                ) {
                    Ok(SyscallReply::Envelope(envelope)) => envelope,
                    other => {
                        warn!("[guest] escalation fetch failed: {other:?}");
                        continue;
                    }
                };
                let ok = match Command::decode(&envelope.record) {
                    Ok(Command::EndorseRequest {
                        device: Some(device),
                    }) => {
                        info!("[guest] applet escalated re-endorsement of dev={device}");
                        ves.endorse(&bridge, device)
                    }
                    other => {
                        warn!("[guest] unexpected escalation: {other:?}");
                        false
                    }
                };
                let ack = match (Reply::EndorseAck { ok }).encode() {
                    Ok(record) => record,
                    Err(err) => {
                        warn!("[guest] escalation ack encode failed: {err}");
                        continue;
                    }
                };
                if let Err(err) = port.syscall(
                    SYS_ACK_ESCALATION,
                    SyscallArg::Ack {
                        req: envelope.req,
                        record: ack,
                    },
                ) {
                    warn!("[guest] escalation ack failed: {err}");
                }
            }
            other => {
                warn!("[guest] escalation poll failed: {other:?}");
                return;
            }
        }
    }
}

/// Guest world entry point: boots the bridge and services, replays the
/// embedded capture, then broadcasts terminate and exits.
pub fn run_guest(port: MonitorPort, credentials: VesCredentials) {
    info!("[guest] booting");

    let (bridge_tx, bridge_rx) = mpsc::channel();
    let bridge_worker = {
        let port = port.clone();
        thread::spawn(move || run_bridge(port, bridge_rx))
    };

    let ves = Arc::new(ValidationService::new(credentials));
    let done = Arc::new(AtomicBool::new(false));
    let escalation_worker = {
        let port = port.clone();
        let bridge = bridge_tx.clone();
        let ves = ves.clone();
        let done = done.clone();
        thread::spawn(move || run_escalation_worker(port, bridge, ves, done))
    };

    let ves_worker = {
        let bridge = bridge_tx.clone();
        let ves = ves.clone();
        thread::spawn(move || ves.run(&bridge, usb::TEST_DEVICE))
    };
    let usb_worker = {
        let bridge = bridge_tx.clone();
        thread::spawn(move || {
            usb::replay_embedded(&bridge);
        })
    };

    let _ = ves_worker.join();
    let _ = usb_worker.join();
    done.store(true, Ordering::SeqCst);
    let _ = escalation_worker.join();

    info!("[guest] terminating applet");
    send_only(&bridge_tx, 0x7F, Vec::new());
    drop(bridge_tx);
    let _ = bridge_worker.join();

    info!("[guest] exiting");
    let _ = port.syscall(SYS_EXIT, SyscallArg::None);
}
