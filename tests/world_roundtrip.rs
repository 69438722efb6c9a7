// CLASSIFICATION: COMMUNITY
// Filename: world_roundtrip.rs v0.6
// Author: Lukas Bower
// Date Modified: 2027-09-04

//! End-to-end traffic across all three worlds: endorsement, TTL decay,
//! expiry escalation and cooperative shutdown.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cohtee::applet::Applet;
use cohtee::config::{demo_pair, TrustConfig, VesCredentials};
use cohtee::guest::ves::ValidationService;
use cohtee::hal::{HostLed, OsEntropy};
use cohtee::monitor::dispatch::{
    SyscallArg, SyscallReply, SYS_ACK_ESCALATION, SYS_FETCH_ESCALATION, SYS_FETCH_RESPONSE,
    SYS_POLL_ESCALATION, SYS_POLL_RESPONSE, SYS_SUBMIT_COMMAND,
};
use cohtee::monitor::exec::WorldHandle;
use cohtee::monitor::{Monitor, MonitorPort};
use cohtee_wire::{Command, DeviceIdentity, MessageTag, Reply, Tlv};

const DEVICE: DeviceIdentity = DeviceIdentity {
    vendor_id: 0x046d,
    product_id: 0xc53f,
};

fn boot_applet(config: &TrustConfig) -> (MonitorPort, JoinHandle<()>) {
    let monitor = Monitor::new(config, Arc::new(HostLed), Arc::new(OsEntropy));
    let applet = Applet::new(monitor.port(WorldHandle::new("applet", true)), config);
    let worker = thread::spawn(move || applet.run());
    (monitor.port(WorldHandle::new("guest", false)), worker)
}

fn round_trip(guest: &MonitorPort, tag: u8, value: Vec<u8>) -> Reply {
    let record = Tlv::pack(tag, false, value).expect("pack record");
    let req = match guest.syscall(SYS_SUBMIT_COMMAND, SyscallArg::Record(record)) {
        Ok(SyscallReply::Request(req)) => req,
        other => panic!("unexpected submit reply {other:?}"),
    };
    let len = loop {
        match guest.syscall(SYS_POLL_RESPONSE, SyscallArg::Request(req)) {
            Ok(SyscallReply::Len(0)) => thread::sleep(Duration::from_millis(1)),
            Ok(SyscallReply::Len(len)) => break len,
            other => panic!("unexpected poll reply {other:?}"),
        }
    };
    match guest.syscall(
        SYS_FETCH_RESPONSE,
        SyscallArg::Fetch {
            req,
            capacity: usize::from(len),
        },
    ) {
        Ok(SyscallReply::Record(record)) => Reply::decode(&record).expect("decode reply"),
        other => panic!("unexpected fetch reply {other:?}"),
    }
}

fn check_packet(guest: &MonitorPort, packet: &[u8]) -> bool {
    let command = Command::DeviceCheck {
        device: DEVICE,
        packet: packet.to_vec(),
    };
    let record = command.encode().expect("encode command");
    match round_trip(guest, record.identifier(), record.into_value()) {
        Reply::CheckVerdict { pass } => pass,
        other => panic!("expected a verdict, got {other:?}"),
    }
}

fn endorse(guest: &MonitorPort, ves: &ValidationService) {
    let challenge = match round_trip(
        guest,
        MessageTag::EndorseRequest.id(),
        DEVICE.to_bytes().to_vec(),
    ) {
        Reply::Challenge(challenge) => challenge,
        other => panic!("expected a challenge, got {other:?}"),
    };
    match round_trip(
        guest,
        MessageTag::AuthResponse.id(),
        ves.auth_response(challenge.nonce).to_bytes(),
    ) {
        Reply::AuthResult(result) => assert!(result.ok),
        other => panic!("expected an auth result, got {other:?}"),
    }
    match round_trip(
        guest,
        MessageTag::EndorseRequest.id(),
        DEVICE.to_bytes().to_vec(),
    ) {
        Reply::EndorseAck { ok } => assert!(ok),
        other => panic!("expected an endorse ack, got {other:?}"),
    }
}

fn terminate(guest: &MonitorPort, applet: JoinHandle<()>) {
    let record = Tlv::pack(MessageTag::Terminate.id(), false, Vec::new()).expect("pack record");
    let _ = guest.syscall(SYS_SUBMIT_COMMAND, SyscallArg::Record(record));
    applet.join().expect("join applet");
}

#[test]
fn ttl_budget_decays_to_expiry_and_escalates() {
    let credentials = VesCredentials::generate();
    let mut config = TrustConfig::for_key(credentials.verifying_key());
    config.endorsement_ttl = 2;
    let (guest, applet) = boot_applet(&config);
    let ves = ValidationService::new(credentials);

    // Nothing passes before endorsement.
    assert!(!check_packet(&guest, b"\x00\x00\x16\x00"));

    endorse(&guest, &ves);

    // A budget of 2 passes exactly two packets.
    assert!(check_packet(&guest, b"pkt_a"));
    assert!(check_packet(&guest, b"pkt_b"));
    assert!(!check_packet(&guest, b"pkt_c"));

    // The expiry was escalated to the guest supervisor; service it.
    let len = loop {
        match guest.syscall(SYS_POLL_ESCALATION, SyscallArg::None) {
            Ok(SyscallReply::Len(0)) => thread::sleep(Duration::from_millis(1)),
            Ok(SyscallReply::Len(len)) => break len,
            other => panic!("unexpected escalation poll reply {other:?}"),
        }
    };
    let envelope = match guest.syscall(
        SYS_FETCH_ESCALATION,
        SyscallArg::Capacity(usize::from(len)),
    ) {
        Ok(SyscallReply::Envelope(envelope)) => envelope,
        other => panic!("unexpected escalation fetch reply {other:?}"),
    };
    match Command::decode(&envelope.record) {
        Ok(Command::EndorseRequest {
            device: Some(device),
        }) => assert_eq!(device, DEVICE),
        other => panic!("unexpected escalation {other:?}"),
    }
    let ack = (Reply::EndorseAck { ok: true }).encode().expect("encode ack");
    guest
        .syscall(
            SYS_ACK_ESCALATION,
            SyscallArg::Ack {
                req: envelope.req,
                record: ack,
            },
        )
        .expect("acknowledge escalation");

    // A fresh endorsement round replaces the expired entry.
    match round_trip(
        &guest,
        MessageTag::EndorseRequest.id(),
        DEVICE.to_bytes().to_vec(),
    ) {
        Reply::EndorseAck { ok } => assert!(ok),
        other => panic!("expected an endorse ack, got {other:?}"),
    }
    assert!(check_packet(&guest, b"pkt_d"));

    terminate(&guest, applet);
}

#[test]
fn malformed_commands_reject_only_that_message() {
    let (config, _) = demo_pair();
    let (guest, applet) = boot_applet(&config);

    // A device check whose value is not two sub-records.
    match round_trip(&guest, MessageTag::DeviceCheck.id(), vec![0xFF; 3]) {
        Reply::CheckVerdict { pass } => assert!(!pass),
        other => panic!("expected a verdict, got {other:?}"),
    }

    // The applet keeps servicing traffic afterwards.
    assert!(!check_packet(&guest, b"pkt"));

    terminate(&guest, applet);
}

#[test]
fn demo_boot_runs_to_completion() {
    let (config, credentials) = demo_pair();
    cohtee::boot(config, credentials).expect("demo boot");
}
