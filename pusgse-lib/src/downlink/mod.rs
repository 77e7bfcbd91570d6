//! Reconstruction of telemetry dumps.
//!
//! A dump is a raw byte stream of PUS TM packets that may contain corrupted or
//! truncated packets. [Downlink::reconstruct] walks it once, in order:
//!
//! 1. [PacketScanner] yields every packet with a valid CRC, skipping over damage
//! 2. service 13 packets are downlink segments and are reassembled into
//!    [DownlinkEntity]s per transmission id
//! 3. every other TM packet is housekeeping, decoded with the MIB
//!
//! Damage never stops the reconstruction; it is counted in the [ReconstructionReport].
mod reassembly;
mod scanner;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::mib::{DecodedPacket, MibSource};
use crate::pus::{MissionProfile, PusTm};
use crate::spacepacket::{Apid, Summary};
use crate::timecode::CucTime;

pub use reassembly::{
    CeHeader, DownlinkEntity, EntityState, Segment, SegmentKind, SequenceGap,
};
pub use scanner::PacketScanner;

use reassembly::Reassembler;

/// A decoded housekeeping packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HousekeepingPacket {
    /// Byte offset of the packet in the stream.
    pub offset: usize,
    pub apid: Apid,
    pub sequence_id: u16,
    pub time: CucTime,
    pub packet: DecodedPacket,
}

/// Counts of everything found, skipped, or dropped during a reconstruction.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconstructionReport {
    /// Packets with a valid CRC.
    pub packets: usize,
    pub crc_mismatches: usize,
    pub skipped_bytes: usize,
    /// Valid packets that are not PUS TM for the mission profile.
    pub non_pus_packets: usize,
    pub segments: usize,
    /// Segments that could not be parsed.
    pub invalid_segments: usize,
    /// Segments without a preceding first segment.
    pub orphan_segments: usize,
    pub sequence_gaps: Vec<SequenceGap>,
    pub entities: usize,
    pub bad_entities: usize,
    /// Single-segment entities that did not complete.
    pub discarded_entities: usize,
    pub housekeeping_packets: usize,
    /// Housekeeping packets with no usable MIB layout.
    pub unidentified_packets: usize,
    pub summary: Summary,
}

/// Output of a reconstruction.
#[derive(Debug, Default, Clone)]
pub struct Reconstruction {
    /// Complete entities in the order they finished.
    pub entities: Vec<DownlinkEntity>,
    /// Multi-segment entities that ended abnormally or completed with gaps.
    pub bad_entities: Vec<DownlinkEntity>,
    pub housekeeping: Vec<HousekeepingPacket>,
    pub report: ReconstructionReport,
}

/// Reconstruction context for one mission.
///
/// Holds only shared references to immutable context, so any number of streams can be
/// reconstructed concurrently with the same MIB.
#[derive(Debug)]
pub struct Downlink<'a, M: MibSource + ?Sized> {
    profile: &'a MissionProfile,
    mib: &'a M,
}

impl<'a, M: MibSource + ?Sized> Downlink<'a, M> {
    #[must_use]
    pub fn new(profile: &'a MissionProfile, mib: &'a M) -> Self {
        Self { profile, mib }
    }

    /// Reconstruct everything recoverable from `data`.
    #[must_use]
    pub fn reconstruct(&self, data: &[u8]) -> Reconstruction {
        let mut report = ReconstructionReport::default();
        let mut housekeeping = Vec::new();
        let mut reassembler = Reassembler::default();

        let mut scanner = PacketScanner::new(data);
        for packet in scanner.by_ref() {
            report.packets += 1;
            report.summary.add(&packet);

            let tm = match PusTm::from_packet(&packet, self.profile) {
                Ok(tm) => tm,
                Err(err) => {
                    debug!(offset = packet.offset, "not a PUS TM packet: {err}");
                    report.non_pus_packets += 1;
                    continue;
                }
            };

            if tm.service() == SegmentKind::SERVICE {
                if let Some(kind) = SegmentKind::from_sub_service(tm.sub_service()) {
                    report.segments += 1;
                    match Segment::decode(kind, &tm.source_data, packet.offset) {
                        Ok(seg) => reassembler.push(seg),
                        Err(err) => {
                            warn!(offset = packet.offset, "invalid segment: {err}");
                            report.invalid_segments += 1;
                        }
                    }
                    continue;
                }
            }

            let decoded = self.mib.decode(&tm);
            if !decoded.decoded {
                report.unidentified_packets += 1;
            }
            report.housekeeping_packets += 1;
            housekeeping.push(HousekeepingPacket {
                offset: packet.offset,
                apid: tm.apid(),
                sequence_id: tm.header.sequence_id,
                time: tm.secondary.time,
                packet: decoded,
            });
        }
        reassembler.finish();

        report.crc_mismatches = scanner.crc_mismatches();
        report.skipped_bytes = scanner.skipped_bytes();
        report.orphan_segments = reassembler.orphans;
        report.sequence_gaps = std::mem::take(&mut reassembler.gaps);

        let mut entities = Vec::new();
        let mut bad_entities = Vec::new();
        for entity in std::mem::take(&mut reassembler.finished) {
            if !entity.is_bad() {
                entities.push(entity);
            } else if entity.segments > 1 {
                bad_entities.push(entity);
            } else {
                warn!(
                    transmission_id = entity.transmission_id,
                    state = ?entity.state,
                    "discarding single-segment entity"
                );
                report.discarded_entities += 1;
            }
        }
        report.entities = entities.len();
        report.bad_entities = bad_entities.len();

        debug!(
            packets = report.packets,
            crc_mismatches = report.crc_mismatches,
            skipped_bytes = report.skipped_bytes,
            entities = report.entities,
            bad_entities = report.bad_entities,
            unidentified = report.unidentified_packets,
            "reconstruction finished"
        );

        Reconstruction {
            entities,
            bad_entities,
            housekeeping,
            report,
        }
    }
}
