use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::prelude::*;
use crate::timecode::{CucFormat, CucTime};

/// Role of a service 13 segment within its transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    First,
    Intermediate,
    Last,
    Abort,
}

impl SegmentKind {
    pub const SERVICE: u8 = 13;

    #[must_use]
    pub fn from_sub_service(sub_service: u8) -> Option<Self> {
        match sub_service {
            1 => Some(Self::First),
            2 => Some(Self::Intermediate),
            3 => Some(Self::Last),
            4 => Some(Self::Abort),
            _ => None,
        }
    }

    #[must_use]
    pub fn sub_service(self) -> u8 {
        match self {
            Self::First => 1,
            Self::Intermediate => 2,
            Self::Last => 3,
            Self::Abort => 4,
        }
    }
}

/// A downlink segment parsed from a service 13 packet's source data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub transmission_id: u8,
    pub sequence: u16,
    /// Segment data; for an abort the first byte is the reason code.
    pub data: Vec<u8>,
    /// Byte offset of the packet in the stream.
    pub offset: usize,
}

impl Segment {
    pub const HEADER_LEN: usize = 3;

    /// # Errors
    /// [Error::NotEnoughData] if `source_data` is shorter than the segment header, or an
    /// abort has no reason code.
    pub fn decode(kind: SegmentKind, source_data: &[u8], offset: usize) -> Result<Self> {
        let minimum = Self::HEADER_LEN + usize::from(kind == SegmentKind::Abort);
        if source_data.len() < minimum {
            return Err(Error::NotEnoughData {
                actual: source_data.len(),
                minimum,
            });
        }
        Ok(Self {
            kind,
            transmission_id: source_data[0],
            sequence: u16::from_be_bytes([source_data[1], source_data[2]]),
            data: source_data[Self::HEADER_LEN..].to_vec(),
            offset,
        })
    }

    /// Source data for this segment, the inverse of [Self::decode].
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER_LEN + self.data.len());
        out.push(self.transmission_id);
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}

/// Compression entity header at the start of a reassembled transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CeHeader {
    pub obs_id: u32,
    pub ce_counter: u16,
    /// Size of the compressed entity in bytes.
    pub ce_size: u32,
    pub product_type: u8,
    pub time: CucTime,
}

impl CeHeader {
    pub const LEN: usize = 12 + 6;
    const TIME: CucFormat = CucFormat::new(4, 2, crate::timecode::FineResolution::Binary);

    /// # Errors
    /// [Error::NotEnoughData] if `buf` is shorter than [Self::LEN].
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LEN {
            return Err(Error::NotEnoughData {
                actual: buf.len(),
                minimum: Self::LEN,
            });
        }
        Ok(Self {
            obs_id: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            ce_counter: u16::from_be_bytes([buf[4], buf[5]]),
            ce_size: u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]),
            product_type: buf[10],
            time: Self::TIME.decode(&buf[12..Self::LEN], false)?,
        })
    }

    /// # Errors
    /// [Error::Format] if the time does not fit the header's time code.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(Self::LEN);
        out.extend_from_slice(&self.obs_id.to_be_bytes());
        out.extend_from_slice(&self.ce_counter.to_be_bytes());
        out.extend_from_slice(&self.ce_size.to_be_bytes());
        out.push(self.product_type);
        out.push(0);
        out.extend(Self::TIME.encode(&CucTime {
            sync: None,
            ..self.time
        })?);
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    /// Ended with a last segment.
    Complete,
    /// Ended with an abort segment.
    Aborted,
    /// A new first segment for the same transmission arrived before the last one.
    Interrupted,
    /// The stream ended before the last segment.
    IncompleteAtEof,
}

/// A segment sequence number that did not follow the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceGap {
    pub transmission_id: u8,
    pub expected: u16,
    pub actual: u16,
    pub offset: usize,
}

/// A reassembled transmission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownlinkEntity {
    pub transmission_id: u8,
    /// Parsed from the start of `data`, if there is enough of it.
    pub header: Option<CeHeader>,
    /// Sequence number of the first segment.
    pub sequence: u16,
    pub state: EntityState,
    pub segments: usize,
    pub gaps: Vec<SequenceGap>,
    pub abort_reason: Option<u8>,
    /// Concatenated segment data, including the entity header.
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl DownlinkEntity {
    /// True for entities that must not go to decompression as-is.
    #[must_use]
    pub fn is_bad(&self) -> bool {
        self.state != EntityState::Complete || !self.gaps.is_empty() || self.header.is_none()
    }
}

#[derive(Debug)]
struct Open {
    sequence: u16,
    last_sequence: u16,
    segments: usize,
    gaps: Vec<SequenceGap>,
    data: Vec<u8>,
}

impl Open {
    fn finish(
        self,
        transmission_id: u8,
        state: EntityState,
        abort_reason: Option<u8>,
    ) -> DownlinkEntity {
        let header = match CeHeader::decode(&self.data) {
            Ok(h) => Some(h),
            Err(err) => {
                warn!(transmission_id, "no compression entity header: {err}");
                None
            }
        };
        debug!(transmission_id, ?state, segments = self.segments, "entity finished");
        DownlinkEntity {
            transmission_id,
            header,
            sequence: self.sequence,
            state,
            segments: self.segments,
            gaps: self.gaps,
            abort_reason,
            data: self.data,
        }
    }
}

/// Assembles segments into entities, one open transmission per transmission id.
#[derive(Debug, Default)]
pub(crate) struct Reassembler {
    open: HashMap<u8, Open>,
    /// Transmission ids in the order they were opened.
    order: Vec<u8>,
    pub finished: Vec<DownlinkEntity>,
    pub gaps: Vec<SequenceGap>,
    pub orphans: usize,
}

impl Reassembler {
    fn close(&mut self, tid: u8, state: EntityState, abort_reason: Option<u8>) {
        if let Some(open) = self.open.remove(&tid) {
            self.order.retain(|t| *t != tid);
            self.finished.push(open.finish(tid, state, abort_reason));
        }
    }

    pub fn push(&mut self, seg: Segment) {
        let tid = seg.transmission_id;
        if seg.kind == SegmentKind::First {
            if self.open.contains_key(&tid) {
                warn!(
                    transmission_id = tid,
                    offset = seg.offset,
                    "new transmission started before the last one ended"
                );
                self.close(tid, EntityState::Interrupted, None);
            }
            self.open.insert(
                tid,
                Open {
                    sequence: seg.sequence,
                    last_sequence: seg.sequence,
                    segments: 1,
                    gaps: Vec::new(),
                    data: seg.data,
                },
            );
            self.order.push(tid);
            return;
        }

        let Some(open) = self.open.get_mut(&tid) else {
            warn!(
                transmission_id = tid,
                offset = seg.offset,
                kind = ?seg.kind,
                "segment without a first segment; dropped"
            );
            self.orphans += 1;
            return;
        };

        let expected = open.last_sequence.wrapping_add(1);
        if seg.sequence != expected {
            warn!(
                transmission_id = tid,
                expected,
                actual = seg.sequence,
                offset = seg.offset,
                "segment out of sequence"
            );
            let gap = SequenceGap {
                transmission_id: tid,
                expected,
                actual: seg.sequence,
                offset: seg.offset,
            };
            open.gaps.push(gap);
            self.gaps.push(gap);
        }
        open.last_sequence = seg.sequence;
        open.segments += 1;

        match seg.kind {
            SegmentKind::Abort => {
                let reason = seg.data.first().copied();
                self.close(tid, EntityState::Aborted, reason);
            }
            SegmentKind::Last => {
                open.data.extend_from_slice(&seg.data);
                self.close(tid, EntityState::Complete, None);
            }
            _ => open.data.extend_from_slice(&seg.data),
        }
    }

    /// Close every open transmission as incomplete.
    pub fn finish(&mut self) {
        for tid in std::mem::take(&mut self.order) {
            if let Some(open) = self.open.remove(&tid) {
                warn!(transmission_id = tid, "stream ended mid-transmission");
                self.finished
                    .push(open.finish(tid, EntityState::IncompleteAtEof, None));
            }
        }
    }
}
