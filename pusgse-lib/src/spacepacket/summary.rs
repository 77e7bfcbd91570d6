use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{missing_packets, Apid, Packet};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApidSummary {
    pub count: usize,
    pub bytes: usize,
    /// Packets missing according to the primary header sequence count.
    pub missing: usize,
    pub first_sequence_id: Option<u16>,
    pub last_sequence_id: Option<u16>,
}

/// Tracks per-APID statistics of the packets found in a stream.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub count: usize,
    pub bytes: usize,
    pub missing: usize,
    pub apids: BTreeMap<Apid, ApidSummary>,
}

impl Summary {
    pub fn add(&mut self, packet: &Packet) {
        let hdr = packet.header;
        self.count += 1;
        self.bytes += packet.data.len();

        let apid = self.apids.entry(hdr.apid).or_default();
        apid.count += 1;
        apid.bytes += packet.data.len();
        if let Some(last) = apid.last_sequence_id {
            let missing = missing_packets(hdr.sequence_id, last) as usize;
            apid.missing += missing;
            self.missing += missing;
        } else {
            apid.first_sequence_id = Some(hdr.sequence_id);
        }
        apid.last_sequence_id = Some(hdr.sequence_id);
    }
}
