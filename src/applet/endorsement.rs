// CLASSIFICATION: COMMUNITY
// Filename: endorsement.rs v0.7
// Author: Lukas Bower
// Date Modified: 2027-09-01

//! Per-device endorsement state with TTL decay and forensic logging.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use cohtee_wire::DeviceIdentity;
use log::info;

/// Packet prefixes retained per device.
pub const RING_CAPACITY: usize = 256;
/// Bytes retained of each logged packet.
pub const RECORD_PREFIX_LEN: usize = 64;

#[derive(Clone, Copy)]
struct PacketRecord {
    len: usize,
    data: [u8; RECORD_PREFIX_LEN],
}

impl PacketRecord {
    const EMPTY: Self = Self {
        len: 0,
        data: [0; RECORD_PREFIX_LEN],
    };
}

/// Fixed-capacity circular log of the most recent packet prefixes.
pub struct PacketRing {
    next: usize,
    wrapped: bool,
    records: Box<[PacketRecord; RING_CAPACITY]>,
}

impl PacketRing {
    /// Create an empty ring.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: 0,
            wrapped: false,
            records: Box::new([PacketRecord::EMPTY; RING_CAPACITY]),
        }
    }

    /// Append a packet prefix; zero-length packets are never stored.
    pub fn log_packet(&mut self, packet: &[u8]) {
        if packet.is_empty() {
            return;
        }
        let kept = packet.len().min(RECORD_PREFIX_LEN);
        let record = &mut self.records[self.next];
        record.len = kept;
        record.data[..kept].copy_from_slice(&packet[..kept]);
        self.next += 1;
        if self.next >= RING_CAPACITY {
            self.next = 0;
            self.wrapped = true;
        }
    }

    /// Whether the ring has cycled at least once.
    #[must_use]
    pub fn wrapped(&self) -> bool {
        self.wrapped
    }

    /// Number of surviving records.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.wrapped {
            RING_CAPACITY
        } else {
            self.next
        }
    }

    /// Whether no records survive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate surviving records oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let start = if self.wrapped { self.next } else { 0 };
        (0..RING_CAPACITY).filter_map(move |i| {
            let record = &self.records[(start + i) % RING_CAPACITY];
            (record.len > 0).then(|| &record.data[..record.len])
        })
    }
}

impl Default for PacketRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Trust state of one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndorsementStatus {
    /// Never endorsed.
    Unknown,
    /// Endorsed with budget remaining.
    Active,
    /// Budget exhausted or explicitly expired; terminal for the entry.
    Expired,
}

/// One device's endorsement record.
pub struct EndorsementEntry {
    device: DeviceIdentity,
    status: EndorsementStatus,
    ttl: u32,
    audit: PacketRing,
}

/// Why a packet was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// The device was never endorsed.
    NotEndorsed,
    /// The endorsement budget ran out.
    Expired,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::NotEndorsed => write!(f, "not endorsed"),
            BlockReason::Expired => write!(f, "expired"),
        }
    }
}

/// Verdict on one checked packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The packet may pass.
    Pass {
        /// Budget remaining after this packet.
        remaining_ttl: u32,
    },
    /// The packet is blocked.
    Block {
        /// Why it was blocked.
        reason: BlockReason,
    },
}

impl Decision {
    /// Whether the packet may pass.
    #[must_use]
    pub fn passed(&self) -> bool {
        matches!(self, Decision::Pass { .. })
    }
}

/// Arena of endorsement entries, one lock per device.
///
/// The outer map lock only guards entry lookup and replacement; packet
/// checks for different devices proceed independently.
pub struct EndorsementCache {
    entries: Mutex<HashMap<DeviceIdentity, Arc<Mutex<EndorsementEntry>>>>,
    ttl_budget: u32,
}

impl EndorsementCache {
    /// Create an empty cache handing out `ttl_budget` packets per
    /// endorsement.
    #[must_use]
    pub fn new(ttl_budget: u32) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl_budget,
        }
    }

    fn entry(&self, device: DeviceIdentity) -> Option<Arc<Mutex<EndorsementEntry>>> {
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .get(&device)
            .cloned()
    }

    /// Decide whether a packet from `device` may pass, decaying the TTL
    /// and logging the packet prefix on pass.
    pub fn check(&self, device: DeviceIdentity, packet: &[u8]) -> Decision {
        let Some(entry) = self.entry(device) else {
            info!("[applet] BLOCK dev={device} (not endorsed) len={}", packet.len());
            return Decision::Block {
                reason: BlockReason::NotEndorsed,
            };
        };
        let mut entry = entry.lock().expect("entry lock poisoned");

        match entry.status {
            EndorsementStatus::Unknown => {
                info!("[applet] BLOCK dev={device} (not endorsed) len={}", packet.len());
                Decision::Block {
                    reason: BlockReason::NotEndorsed,
                }
            }
            EndorsementStatus::Expired => {
                info!("[applet] BLOCK dev={device} (expired) len={}", packet.len());
                Decision::Block {
                    reason: BlockReason::Expired,
                }
            }
            EndorsementStatus::Active if entry.ttl == 0 => {
                entry.status = EndorsementStatus::Expired;
                info!("[applet] BLOCK dev={device} (expired) len={}", packet.len());
                Decision::Block {
                    reason: BlockReason::Expired,
                }
            }
            EndorsementStatus::Active => {
                entry.ttl -= 1;
                if entry.ttl == 0 {
                    entry.status = EndorsementStatus::Expired;
                }
                entry.audit.log_packet(packet);
                info!(
                    "[applet] PASS dev={device} len={} remaining_ttl={}",
                    packet.len(),
                    entry.ttl
                );
                Decision::Pass {
                    remaining_ttl: entry.ttl,
                }
            }
        }
    }

    /// Endorse `device`: the entry is replaced wholesale with a fresh
    /// budget and an empty audit ring. This is the only way out of
    /// `Unknown` or `Expired`.
    pub fn endorse(&self, device: DeviceIdentity) {
        let entry = EndorsementEntry {
            device,
            status: EndorsementStatus::Active,
            ttl: self.ttl_budget,
            audit: PacketRing::new(),
        };
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .insert(device, Arc::new(Mutex::new(entry)));
        info!("[applet] endorsed dev={device} ttl={}", self.ttl_budget);
    }

    /// Current status of `device`, `Unknown` when uncached.
    #[must_use]
    pub fn status(&self, device: DeviceIdentity) -> EndorsementStatus {
        self.entry(device).map_or(EndorsementStatus::Unknown, |entry| {
            entry.lock().expect("entry lock poisoned").status
        })
    }

    /// Dump the audit ring of `device` to the local log, oldest first.
    pub fn dump_audit(&self, device: DeviceIdentity) {
        let Some(entry) = self.entry(device) else {
            return;
        };
        let entry = entry.lock().expect("entry lock poisoned");
        for (index, prefix) in entry.audit.iter().enumerate() {
            info!(
                "[applet] audit[{index}] dev={} len={} data={}",
                entry.device,
                prefix.len(),
                hex::encode(prefix)
            );
        }
    }
}
