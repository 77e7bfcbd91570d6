//! Front-end electronics (FEE) science data transfer packets.
//!
//! Every packet starts with a fixed 12-byte header:
//!
//! | Offset | Size | Field |
//! |---|---|---|
//! | 0 | 1 | logical address |
//! | 1 | 1 | protocol id, [FEE_PROTOCOL_ID] |
//! | 2 | 2 | payload length in bytes |
//! | 4 | 2 | type: mode:4 last:1 side:1 ccd:2 spare:5 packet-type:3 |
//! | 6 | 2 | frame counter |
//! | 8 | 2 | sequence counter |
//! | 10 | 2 | reserved |
//!
//! The type field as a whole is the packet's composite discriminant.
use serde::{Deserialize, Serialize};

use crate::bits::{read_bits, write_bits, BitCursor};
use crate::prelude::*;

pub const FEE_PROTOCOL_ID: u8 = 0xf0;

/// Content of an FEE packet, from the low 3 bits of the type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeePacketType {
    /// Raw CCD pixel data.
    Data,
    /// Event detection windows.
    Event,
    Housekeeping,
    WanderingMask,
}

impl FeePacketType {
    fn from_bits(bits: u64) -> Result<Self> {
        match bits {
            0 => Ok(Self::Data),
            1 => Ok(Self::Event),
            2 => Ok(Self::Housekeeping),
            3 => Ok(Self::WanderingMask),
            other => Err(Error::Format(format!("unknown FEE packet type {other}"))),
        }
    }

    fn bits(self) -> u64 {
        match self {
            Self::Data => 0,
            Self::Event => 1,
            Self::Housekeeping => 2,
            Self::WanderingMask => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CcdSide {
    E,
    F,
}

/// The packed 16-bit type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeeType {
    /// FEE operating mode, 0 to 15.
    pub mode: u8,
    /// Set on the last packet of a frame readout.
    pub last_packet: bool,
    pub ccd_side: CcdSide,
    /// CCD number, 0 to 3.
    pub ccd_id: u8,
    /// Spare bits 8-12, kept as received.
    #[serde(default)]
    pub spare: u8,
    pub packet_type: FeePacketType,
}

impl FeeType {
    /// # Errors
    /// [Error::Format] if the packet type bits are not a known type.
    pub fn from_u16(value: u16) -> Result<Self> {
        let buf = value.to_be_bytes();
        Ok(Self {
            mode: read_bits(&buf, 0, 4)? as u8,
            last_packet: read_bits(&buf, 4, 1)? == 1,
            ccd_side: if read_bits(&buf, 5, 1)? == 1 {
                CcdSide::F
            } else {
                CcdSide::E
            },
            ccd_id: read_bits(&buf, 6, 2)? as u8,
            spare: read_bits(&buf, 8, 5)? as u8,
            packet_type: FeePacketType::from_bits(read_bits(&buf, 13, 3)?)?,
        })
    }

    /// # Errors
    /// [Error::Format] if `mode`, `ccd_id` or `spare` do not fit their fields.
    pub fn to_u16(self) -> Result<u16> {
        if self.mode > 0xf || self.ccd_id > 0x3 || self.spare > 0x1f {
            return Err(Error::Format(format!("FEE type field out of range: {self:?}")));
        }
        let mut buf = [0u8; 2];
        write_bits(&mut buf, 0, 4, u64::from(self.mode))?;
        write_bits(&mut buf, 4, 1, u64::from(self.last_packet))?;
        write_bits(&mut buf, 5, 1, u64::from(self.ccd_side == CcdSide::F))?;
        write_bits(&mut buf, 6, 2, u64::from(self.ccd_id))?;
        write_bits(&mut buf, 8, 5, u64::from(self.spare))?;
        write_bits(&mut buf, 13, 3, self.packet_type.bits())?;
        Ok(u16::from_be_bytes(buf))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeHeader {
    pub logical_address: u8,
    /// Payload length in bytes, excluding this header.
    pub length: u16,
    pub fee_type: FeeType,
    pub frame_counter: u16,
    pub sequence_counter: u16,
    /// Bytes 10-11, kept as received.
    #[serde(default)]
    pub reserved: u16,
}

impl FeeHeader {
    pub const LEN: usize = 12;

    /// # Errors
    /// [Error::NotEnoughData] if `buf` is shorter than [Self::LEN], or [Error::Format]
    /// for a wrong protocol id or packet type.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LEN {
            return Err(Error::NotEnoughData {
                actual: buf.len(),
                minimum: Self::LEN,
            });
        }
        if buf[1] != FEE_PROTOCOL_ID {
            return Err(Error::Format(format!(
                "protocol id {:#04x} is not FEE data transfer",
                buf[1]
            )));
        }
        Ok(Self {
            logical_address: buf[0],
            length: u16::from_be_bytes([buf[2], buf[3]]),
            fee_type: FeeType::from_u16(u16::from_be_bytes([buf[4], buf[5]]))?,
            frame_counter: u16::from_be_bytes([buf[6], buf[7]]),
            sequence_counter: u16::from_be_bytes([buf[8], buf[9]]),
            reserved: u16::from_be_bytes([buf[10], buf[11]]),
        })
    }

    /// # Errors
    /// [Error::Format] if the type field does not fit.
    pub fn encode(&self) -> Result<[u8; Self::LEN]> {
        let mut buf = [0u8; Self::LEN];
        buf[0] = self.logical_address;
        buf[1] = FEE_PROTOCOL_ID;
        buf[2..4].copy_from_slice(&self.length.to_be_bytes());
        buf[4..6].copy_from_slice(&self.fee_type.to_u16()?.to_be_bytes());
        buf[6..8].copy_from_slice(&self.frame_counter.to_be_bytes());
        buf[8..10].copy_from_slice(&self.sequence_counter.to_be_bytes());
        buf[10..12].copy_from_slice(&self.reserved.to_be_bytes());
        Ok(buf)
    }

    /// Bytes 4-5 as a single integer, used as a storage and lookup key.
    ///
    /// # Errors
    /// [Error::Format] if the type field does not fit.
    pub fn discriminant(&self) -> Result<u16> {
        self.fee_type.to_u16()
    }
}

/// A 5x5 pixel window around a detected event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventWindow {
    /// Column of the central pixel.
    pub x: u16,
    /// Row of the central pixel.
    pub y: u16,
    pub pixels: [[u16; 5]; 5],
}

impl EventWindow {
    pub const LEN: usize = 4 + 25 * 2;

    fn decode(cur: &mut BitCursor) -> Result<Self> {
        let x = cur.read(16)? as u16;
        let y = cur.read(16)? as u16;
        let mut pixels = [[0u16; 5]; 5];
        for row in &mut pixels {
            for px in row.iter_mut() {
                *px = cur.read(16)? as u16;
            }
        }
        Ok(Self { x, y, pixels })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.x.to_be_bytes());
        out.extend_from_slice(&self.y.to_be_bytes());
        for px in self.pixels.iter().flatten() {
            out.extend_from_slice(&px.to_be_bytes());
        }
    }
}

/// Decoded payload, by packet type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeePayload {
    Pixels(Vec<u16>),
    Events(Vec<EventWindow>),
    Housekeeping(Vec<u16>),
    WanderingMask(Vec<u16>),
}

fn words(buf: &[u8]) -> Result<Vec<u16>> {
    if buf.len() % 2 != 0 {
        return Err(Error::Format(format!(
            "payload of {} bytes is not a whole number of 16-bit words",
            buf.len()
        )));
    }
    Ok(buf
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect())
}

/// A complete FEE packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePacket {
    pub header: FeeHeader,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl FeePacket {
    /// Build a packet for `payload`, setting the header length.
    ///
    /// # Errors
    /// [Error::Format] if the payload does not fit the 16-bit length field.
    pub fn new(mut header: FeeHeader, payload: Vec<u8>) -> Result<Self> {
        header.length = u16::try_from(payload.len()).map_err(|_| {
            Error::Format(format!("FEE payload of {} bytes too long", payload.len()))
        })?;
        Ok(Self { header, payload })
    }

    /// Packet carrying event windows.
    ///
    /// # Errors
    /// See [Self::new].
    pub fn with_events(header: FeeHeader, windows: &[EventWindow]) -> Result<Self> {
        let mut payload = Vec::with_capacity(windows.len() * EventWindow::LEN);
        for w in windows {
            w.encode(&mut payload);
        }
        Self::new(header, payload)
    }

    /// Decode a packet at the start of `buf`; bytes past the header length are ignored.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if `buf` is shorter than the length in the header.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let header = FeeHeader::decode(buf)?;
        let total = FeeHeader::LEN + header.length as usize;
        if buf.len() < total {
            return Err(Error::NotEnoughData {
                actual: buf.len(),
                minimum: total,
            });
        }
        Ok(Self {
            header,
            payload: buf[FeeHeader::LEN..total].to_vec(),
        })
    }

    /// # Errors
    /// [Error::Format] if the header does not fit.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(FeeHeader::LEN + self.payload.len());
        out.extend_from_slice(&self.header.encode()?);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Interpret the payload according to the header's packet type.
    ///
    /// # Errors
    /// [Error::Format] if the payload size does not match the packet type's record size.
    pub fn decode_payload(&self) -> Result<FeePayload> {
        match self.header.fee_type.packet_type {
            FeePacketType::Data => Ok(FeePayload::Pixels(words(&self.payload)?)),
            FeePacketType::Housekeeping => Ok(FeePayload::Housekeeping(words(&self.payload)?)),
            FeePacketType::WanderingMask => Ok(FeePayload::WanderingMask(words(&self.payload)?)),
            FeePacketType::Event => {
                if self.payload.len() % EventWindow::LEN != 0 {
                    return Err(Error::Format(format!(
                        "event payload of {} bytes is not a whole number of {}-byte windows",
                        self.payload.len(),
                        EventWindow::LEN
                    )));
                }
                let mut cur = BitCursor::new(&self.payload);
                let mut windows = Vec::with_capacity(self.payload.len() / EventWindow::LEN);
                while cur.remaining_bits() > 0 {
                    windows.push(EventWindow::decode(&mut cur)?);
                }
                Ok(FeePayload::Events(windows))
            }
        }
    }
}
