mod summary;

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::bits::{read_bits, write_bits};
use crate::integrity::CrcEngine;
use crate::prelude::*;

pub use summary::{ApidSummary, Summary};

pub type Apid = u16;

/// Telemetry or telecommand, from the primary header type bit.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PacketType {
    Tm,
    Tc,
}

/// Packet grouping as given by the primary header sequence flags.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SequenceFlags {
    /// Part of a group, but not first and not last
    Continuation,
    First,
    Last,
    /// Not part of a group, i.e., standalone
    Unsegmented,
}

impl SequenceFlags {
    fn from_bits(bits: u64) -> Self {
        match bits & 0x3 {
            0 => Self::Continuation,
            1 => Self::First,
            2 => Self::Last,
            _ => Self::Unsegmented,
        }
    }

    fn bits(self) -> u64 {
        match self {
            Self::Continuation => 0,
            Self::First => 1,
            Self::Last => 2,
            Self::Unsegmented => 3,
        }
    }
}

/// CCSDS Primary Header
///
/// The primary header format is common to all CCSDS space packets.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct PrimaryHeader {
    pub version: u8,
    pub packet_type: PacketType,
    pub has_secondary_header: bool,
    pub apid: Apid,
    pub sequence_flags: SequenceFlags,
    pub sequence_id: u16,
    /// Packet data length: octets following the primary header minus 1.
    pub len_minus1: u16,
}

impl PrimaryHeader {
    /// Size of a ``PrimaryHeader``
    pub const LEN: usize = 6;
    pub const SEQ_MAX: u16 = 16383;
    pub const APID_MAX: Apid = 0x7ff;
    /// Idle packet APID
    pub const APID_IDLE: Apid = 0x7ff;

    /// Decode from the first [Self::LEN] bytes of `buf`.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if there are not enough bytes to construct the header.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LEN {
            return Err(Error::NotEnoughData {
                actual: buf.len(),
                minimum: Self::LEN,
            });
        }
        let buf = &buf[..Self::LEN];
        Ok(PrimaryHeader {
            version: read_bits(buf, 0, 3)? as u8,
            packet_type: if read_bits(buf, 3, 1)? == 1 {
                PacketType::Tc
            } else {
                PacketType::Tm
            },
            has_secondary_header: read_bits(buf, 4, 1)? == 1,
            apid: read_bits(buf, 5, 11)? as Apid,
            sequence_flags: SequenceFlags::from_bits(read_bits(buf, 16, 2)?),
            sequence_id: read_bits(buf, 18, 14)? as u16,
            len_minus1: read_bits(buf, 32, 16)? as u16,
        })
    }

    /// Encode to wire format.
    ///
    /// # Errors
    /// [Error::Format] if a field does not fit its bit width.
    pub fn encode(&self) -> Result<[u8; Self::LEN]> {
        if self.version > 0x7 || self.apid > Self::APID_MAX || self.sequence_id > Self::SEQ_MAX {
            return Err(Error::Format(format!(
                "primary header field out of range: {self:?}"
            )));
        }
        let mut buf = [0u8; Self::LEN];
        write_bits(&mut buf, 0, 3, u64::from(self.version))?;
        write_bits(&mut buf, 3, 1, u64::from(self.packet_type == PacketType::Tc))?;
        write_bits(&mut buf, 4, 1, u64::from(self.has_secondary_header))?;
        write_bits(&mut buf, 5, 11, u64::from(self.apid))?;
        write_bits(&mut buf, 16, 2, self.sequence_flags.bits())?;
        write_bits(&mut buf, 18, 14, u64::from(self.sequence_id))?;
        write_bits(&mut buf, 32, 16, u64::from(self.len_minus1))?;
        Ok(buf)
    }

    /// Total octets on the wire for the packet this header describes.
    #[must_use]
    pub fn packet_len(&self) -> usize {
        Self::LEN + self.len_minus1 as usize + 1
    }
}

/// Packet represents a single CCSDS space packet and its associated data.
///
/// This packet contains the primary header data as well as the user data,
/// which may or may not contain a secondary header. See the header's
/// `has_secondary_header` flag.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// All packets have a primary header
    pub header: PrimaryHeader,
    /// All packet bytes, including header, user data, and the error control field
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    /// Byte offset of this packet in the stream it was read from
    pub offset: usize,
}

impl Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Packet{{apid: {}, seq: {}, data:[len={}]}}",
            self.header.apid,
            self.header.sequence_id,
            self.data.len()
        )
    }
}

impl Packet {
    /// Decode the packet at the start of `dat`. Any bytes beyond the length indicated by
    /// the header are ignored.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if there are not enough bytes for the header or for the
    /// packet length the header indicates.
    pub fn decode(dat: &[u8]) -> Result<Packet> {
        let header = PrimaryHeader::decode(dat)?;
        let total = header.packet_len();
        if dat.len() < total {
            return Err(Error::NotEnoughData {
                actual: dat.len(),
                minimum: total,
            });
        }
        Ok(Packet {
            header,
            data: dat[..total].to_vec(),
            offset: 0,
        })
    }

    #[must_use]
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Length of the whole packet in bytes, primary header included.
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.data.len()
    }

    /// Bytes following the primary header, including any secondary header and PEC.
    #[must_use]
    pub fn user_data(&self) -> &[u8] {
        &self.data[PrimaryHeader::LEN..]
    }

    /// Verify the trailing CRC-16/CCITT-FALSE over all preceding packet bytes.
    ///
    /// # Errors
    /// [Error::CrcMismatch] if the packet error control does not match.
    pub fn verify_crc(&self) -> Result<()> {
        CrcEngine::Ccitt16.verify_trailing(&self.data)
    }

    #[must_use]
    pub fn crc_ok(&self) -> bool {
        self.verify_crc().is_ok()
    }

    #[must_use]
    pub fn is_tc(&self) -> bool {
        self.header.packet_type == PacketType::Tc
    }
}

/// Calculate the number of missing sequence ids.
///
/// `cur` is the current sequence id. `last` is the sequence id seen before `cur`.
#[must_use]
pub fn missing_packets(cur: u16, last: u16) -> u16 {
    sequence_gap(u32::from(cur), u32::from(last), u32::from(PrimaryHeader::SEQ_MAX)) as u16
}

/// Number of counter values skipped between `last` and `cur` for a counter that rolls over
/// after `max`.
#[must_use]
pub fn sequence_gap(cur: u32, last: u32, max: u32) -> u32 {
    let modulus = u64::from(max) + 1;
    let expected = (u64::from(last) + 1) % modulus;
    let cur = u64::from(cur) % modulus;
    if cur == expected {
        return 0;
    }
    ((cur + modulus - expected) % modulus) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_header() {
        let dat: [u8; 6] = [
            // bytes from a SNPP CrIS packet
            0xd, 0x59, 0xd2, 0xab, 0xa, 0x8f,
        ];
        let ph = PrimaryHeader::decode(&dat).unwrap();

        assert_eq!(ph.version, 0);
        assert_eq!(ph.packet_type, PacketType::Tm);
        assert!(ph.has_secondary_header);
        assert_eq!(ph.apid, 1369);
        assert_eq!(ph.sequence_flags, SequenceFlags::Unsegmented);
        assert_eq!(ph.sequence_id, 4779);
        assert_eq!(ph.len_minus1, 2703);
        assert_eq!(ph.packet_len(), 2703 + 7);
    }

    #[test]
    fn header_roundtrip() {
        let hdr = PrimaryHeader {
            version: 0,
            packet_type: PacketType::Tc,
            has_secondary_header: true,
            apid: 0x3c5,
            sequence_flags: SequenceFlags::First,
            sequence_id: 0x2001,
            len_minus1: 17,
        };
        let buf = hdr.encode().unwrap();
        assert_eq!(PrimaryHeader::decode(&buf).unwrap(), hdr);
    }

    #[test]
    fn encode_rejects_wide_fields() {
        let hdr = PrimaryHeader {
            version: 0,
            packet_type: PacketType::Tm,
            has_secondary_header: false,
            apid: 0x800,
            sequence_flags: SequenceFlags::Unsegmented,
            sequence_id: 0,
            len_minus1: 0,
        };
        assert!(matches!(hdr.encode(), Err(Error::Format(_))));
    }

    #[test]
    fn decode_short_packet_fails_closed() {
        let dat = [0xd, 0x59, 0xc0, 0x01, 0x0, 0x8, 0x52];
        assert!(matches!(
            Packet::decode(&dat),
            Err(Error::NotEnoughData {
                actual: 7,
                minimum: 15
            })
        ));
        assert!(PrimaryHeader::decode(&dat[..5]).is_err());
    }

    #[test]
    fn decode_takes_only_indicated_length() {
        #[rustfmt::skip]
        let dat: &[u8] = &[
            0xd, 0x59, 0xc0, 0x01, 0x0, 0x2, 0xaa, 0xbb, 0xcc,
            0xd, 0x59, 0xc0, 0x02,
        ];
        let packet = Packet::decode(dat).unwrap();
        assert_eq!(packet.data.len(), 9);
        assert_eq!(packet.user_data(), &[0xaa, 0xbb, 0xcc]);
    }

    #[test]
    fn packet_crc() {
        let mut dat = vec![0x08, 0x64, 0xc0, 0x00, 0x00, 0x04, 0x01, 0x02, 0x03];
        CrcEngine::Ccitt16.append(&mut dat);
        let packet = Packet::decode(&dat).unwrap();
        assert!(packet.crc_ok());

        dat[7] ^= 0x10;
        let packet = Packet::decode(&dat).unwrap();
        assert!(matches!(packet.verify_crc(), Err(Error::CrcMismatch { .. })));
    }

    #[test]
    fn test_missing_packets() {
        assert_eq!(missing_packets(5, 4), 0);
        assert_eq!(missing_packets(5, 3), 1);
        assert_eq!(missing_packets(0, PrimaryHeader::SEQ_MAX), 0);
        assert_eq!(missing_packets(0, PrimaryHeader::SEQ_MAX - 1), 1);
        assert_eq!(missing_packets(0, 0), PrimaryHeader::SEQ_MAX);
    }

    #[test]
    fn test_sequence_gap_u16_counter() {
        assert_eq!(sequence_gap(0, 0xffff, 0xffff), 0);
        assert_eq!(sequence_gap(3, 1, 0xffff), 1);
        assert_eq!(sequence_gap(1, 0xfffe, 0xffff), 2);
    }
}
