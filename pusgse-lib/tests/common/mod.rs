#![allow(dead_code)]
use std::path::PathBuf;

use pusgse::downlink::{CeHeader, Segment, SegmentKind};
use pusgse::pus::{MissionProfile, TmPacket};
use pusgse::spacepacket::Apid;
use pusgse::timecode::CucTime;

pub const SCIENCE_APID: Apid = 0x3c1;
pub const HK_APID: Apid = 0x100;

pub fn fixture_path(name: &str) -> PathBuf {
    let mut path =
        PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set"));
    path.push("tests/fixtures");
    path.push(name);
    path
}

/// Builds a TM dump packet by packet, numbering packets per APID.
pub struct StreamBuilder {
    pub profile: MissionProfile,
    pub data: Vec<u8>,
    science_seq: u16,
    hk_seq: u16,
}

impl StreamBuilder {
    pub fn new() -> Self {
        Self {
            profile: MissionProfile::default(),
            data: Vec::new(),
            science_seq: 0,
            hk_seq: 0,
        }
    }

    pub fn packet(
        &self,
        apid: Apid,
        seq: u16,
        service: u8,
        sub_service: u8,
        data: &[u8],
    ) -> Vec<u8> {
        TmPacket::builder()
            .apid(apid)
            .sequence_id(seq)
            .service(service)
            .sub_service(sub_service)
            .time(CucTime::from_secs_f64(100.0, &self.profile.time, Some(true)))
            .data(data.to_vec())
            .build()
            .encode(&self.profile)
            .unwrap()
    }

    /// Encode a segment packet without appending it.
    pub fn segment_packet(
        &mut self,
        kind: SegmentKind,
        tid: u8,
        sequence: u16,
        data: &[u8],
    ) -> Vec<u8> {
        let seg = Segment {
            kind,
            transmission_id: tid,
            sequence,
            data: data.to_vec(),
            offset: 0,
        };
        let seq = self.science_seq;
        self.science_seq = self.science_seq.wrapping_add(1) & 0x3fff;
        self.packet(
            SCIENCE_APID,
            seq,
            SegmentKind::SERVICE,
            kind.sub_service(),
            &seg.encode(),
        )
    }

    pub fn segment(&mut self, kind: SegmentKind, tid: u8, sequence: u16, data: &[u8]) -> &mut Self {
        let pkt = self.segment_packet(kind, tid, sequence, data);
        self.data.extend(pkt);
        self
    }

    pub fn housekeeping(&mut self, data: &[u8]) -> &mut Self {
        let pkt = self.packet(HK_APID, self.hk_seq, 3, 25, data);
        self.hk_seq = self.hk_seq.wrapping_add(1) & 0x3fff;
        self.data.extend(pkt);
        self
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.data.extend_from_slice(bytes);
        self
    }
}

/// Entity header followed by the payload, as the first segment carries it.
pub fn entity_start(obs_id: u32, ce_counter: u16, payload_len: usize) -> Vec<u8> {
    CeHeader {
        obs_id,
        ce_counter,
        ce_size: payload_len as u32,
        product_type: 1,
        time: CucTime {
            coarse: 500,
            fine: 0,
            ticks_per_second: 1 << 16,
            sync: None,
        },
    }
    .encode()
    .unwrap()
}

/// Fixed-layout housekeeping with SID 2: supply rail, CCD temperature and mode.
pub fn fee_housekeeping(vcc: u16, temp: u16, mode: u8) -> Vec<u8> {
    let mut data = vec![2];
    data.extend_from_slice(&vcc.to_be_bytes());
    data.extend_from_slice(&temp.to_be_bytes());
    data.push(mode);
    data
}
