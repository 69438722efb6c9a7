// CLASSIFICATION: COMMUNITY
// Filename: attestation_flow.rs v0.5
// Author: Lukas Bower
// Date Modified: 2027-09-03

//! VES handshake behavior through the full mailbox and applet stack.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cohtee::applet::Applet;
use cohtee::config::{TrustConfig, VesCredentials};
use cohtee::guest::ves::ValidationService;
use cohtee::hal::{HostLed, OsEntropy};
use cohtee::monitor::dispatch::{
    SyscallArg, SyscallReply, SYS_FETCH_RESPONSE, SYS_POLL_RESPONSE, SYS_SUBMIT_COMMAND,
};
use cohtee::monitor::exec::WorldHandle;
use cohtee::monitor::{Monitor, MonitorPort};
use cohtee_wire::{AuthChallenge, DeviceIdentity, MessageTag, Reply, Tlv};

const DEVICE: DeviceIdentity = DeviceIdentity {
    vendor_id: 0x046d,
    product_id: 0xc53f,
};

struct Harness {
    guest: MonitorPort,
    applet: JoinHandle<()>,
}

fn boot_harness(config: TrustConfig) -> Harness {
    let monitor = Monitor::new(&config, Arc::new(HostLed), Arc::new(OsEntropy));
    let applet_world = WorldHandle::new("applet", true);
    let applet = Applet::new(monitor.port(applet_world), &config);
    let applet = thread::spawn(move || applet.run());
    Harness {
        guest: monitor.port(WorldHandle::new("guest", false)),
        applet,
    }
}

impl Harness {
    /// Act as the guest: submit one command and block for its reply.
    fn round_trip(&self, tag: MessageTag, value: Vec<u8>) -> Reply {
        let record = Tlv::pack(tag.id(), false, value).expect("pack record");
        let req = match self
            .guest
            .syscall(SYS_SUBMIT_COMMAND, SyscallArg::Record(record))
        {
            Ok(SyscallReply::Request(req)) => req,
            other => panic!("unexpected submit reply {other:?}"),
        };
        let len = loop {
            match self.guest.syscall(SYS_POLL_RESPONSE, SyscallArg::Request(req)) {
                Ok(SyscallReply::Len(0)) => thread::sleep(Duration::from_millis(1)),
                Ok(SyscallReply::Len(len)) => break len,
                other => panic!("unexpected poll reply {other:?}"),
            }
        };
        let record = match self.guest.syscall(
            SYS_FETCH_RESPONSE,
            SyscallArg::Fetch {
                req,
                capacity: usize::from(len),
            },
        ) {
            Ok(SyscallReply::Record(record)) => record,
            other => panic!("unexpected fetch reply {other:?}"),
        };
        Reply::decode(&record).expect("decode reply")
    }

    fn request_challenge(&self) -> AuthChallenge {
        match self.round_trip(MessageTag::EndorseRequest, DEVICE.to_bytes().to_vec()) {
            Reply::Challenge(challenge) => challenge,
            other => panic!("expected a challenge, got {other:?}"),
        }
    }

    fn send_auth_response(&self, response: &cohtee_wire::AuthResponse) -> bool {
        match self.round_trip(MessageTag::AuthResponse, response.to_bytes()) {
            Reply::AuthResult(result) => result.ok,
            other => panic!("expected an auth result, got {other:?}"),
        }
    }

    fn terminate(self) {
        let record = Tlv::pack(MessageTag::Terminate.id(), false, Vec::new()).expect("pack record");
        let _ = self
            .guest
            .syscall(SYS_SUBMIT_COMMAND, SyscallArg::Record(record));
        self.applet.join().expect("join applet");
    }
}

#[test]
fn endorsement_is_gated_on_authentication() {
    let credentials = VesCredentials::generate();
    let harness = boot_harness(TrustConfig::for_key(credentials.verifying_key()));
    let ves = ValidationService::new(credentials);

    // The first endorse request yields a challenge, not an endorsement.
    let challenge = harness.request_challenge();
    assert!(harness.send_auth_response(&ves.auth_response(challenge.nonce)));

    // Authenticated now: the endorse request is serviced directly.
    match harness.round_trip(MessageTag::EndorseRequest, DEVICE.to_bytes().to_vec()) {
        Reply::EndorseAck { ok } => assert!(ok),
        other => panic!("expected an endorse ack, got {other:?}"),
    }

    harness.terminate();
}

#[test]
fn nonce_mismatch_is_rejected_and_the_challenge_survives() {
    let credentials = VesCredentials::generate();
    let harness = boot_harness(TrustConfig::for_key(credentials.verifying_key()));
    let ves = ValidationService::new(credentials);

    let challenge = harness.request_challenge();

    let mut stale_nonce = challenge.nonce;
    stale_nonce[0] ^= 0xFF;
    assert!(!harness.send_auth_response(&ves.auth_response(stale_nonce)));

    // The outstanding nonce still validates a genuine retry.
    assert!(harness.send_auth_response(&ves.auth_response(challenge.nonce)));

    harness.terminate();
}

#[test]
fn accepted_response_cannot_be_replayed() {
    let credentials = VesCredentials::generate();
    let harness = boot_harness(TrustConfig::for_key(credentials.verifying_key()));
    let ves = ValidationService::new(credentials);

    let challenge = harness.request_challenge();
    let response = ves.auth_response(challenge.nonce);
    assert!(harness.send_auth_response(&response));

    // The nonce was consumed with the accepted response.
    assert!(!harness.send_auth_response(&response));

    harness.terminate();
}

#[test]
fn untrusted_key_is_rejected() {
    let trusted = VesCredentials::generate();
    let harness = boot_harness(TrustConfig::for_key(trusted.verifying_key()));
    let imposter = ValidationService::new(VesCredentials::generate());

    let challenge = harness.request_challenge();
    assert!(!harness.send_auth_response(&imposter.auth_response(challenge.nonce)));

    harness.terminate();
}

#[test]
fn requester_only_learns_a_generic_failure() {
    let credentials = VesCredentials::generate();
    let harness = boot_harness(TrustConfig::for_key(credentials.verifying_key()));
    let ves = ValidationService::new(credentials);

    let challenge = harness.request_challenge();

    // Two different rejection causes produce the same wire answer.
    let mut wrong_nonce = challenge.nonce;
    wrong_nonce[4] ^= 1;
    let nonce_reply = harness.round_trip(
        MessageTag::AuthResponse,
        ves.auth_response(wrong_nonce).to_bytes(),
    );

    let mut forged = ves.auth_response(challenge.nonce);
    forged.signature[1] ^= 1;
    let signature_reply =
        harness.round_trip(MessageTag::AuthResponse, forged.to_bytes());

    assert_eq!(nonce_reply, signature_reply);

    harness.terminate();
}
