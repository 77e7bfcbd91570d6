//! RMAP (Remote Memory Access Protocol) headers.
//!
//! Reference: ECSS-E-ST-50-52C. Packets start at the target (commands) or initiator
//! (replies) logical address; any SpaceWire path address bytes are expected to have been
//! stripped by the link.
//!
//! | Packet | Header | Trailer |
//! |---|---|---|
//! | Command | 16 bytes + 4 per reply address word, CRC-8 last | write: data + CRC-8 |
//! | Write reply | 8 bytes, CRC-8 last | |
//! | Read reply | 12 bytes, CRC-8 last | data + CRC-8 |
use derive_more::From;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::bits::{read_bits, write_bits};
use crate::integrity::rmap_crc8;
use crate::prelude::*;

pub const RMAP_PROTOCOL_ID: u8 = 0x01;
/// Default logical address used when a node has no assigned address.
pub const DEFAULT_LOGICAL_ADDRESS: u8 = 0xfe;
const MAX_DATA_LENGTH: u32 = 0x00ff_ffff;

/// The RMAP instruction field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RmapInstruction {
    /// Command (true) or reply (false).
    pub command: bool,
    pub write: bool,
    pub verify: bool,
    pub reply: bool,
    pub increment: bool,
    /// Reply address length in 4-byte words, 0 to 3.
    pub reply_addr_len: u8,
}

impl RmapInstruction {
    #[must_use]
    pub fn from_byte(b: u8) -> Self {
        let buf = [b];
        // infallible: all offsets are within the single byte
        let bit = |offset: usize| read_bits(&buf, offset, 1).unwrap_or(0) == 1;
        Self {
            command: bit(1),
            write: bit(2),
            verify: bit(3),
            reply: bit(4),
            increment: bit(5),
            reply_addr_len: b & 0x3,
        }
    }

    /// # Errors
    /// [Error::Format] if the reply address length exceeds 3 words.
    pub fn to_byte(self) -> Result<u8> {
        if self.reply_addr_len > 3 {
            return Err(Error::Format(format!(
                "reply address length {} exceeds 3 words",
                self.reply_addr_len
            )));
        }
        let mut buf = [0u8];
        write_bits(&mut buf, 1, 1, u64::from(self.command))?;
        write_bits(&mut buf, 2, 1, u64::from(self.write))?;
        write_bits(&mut buf, 3, 1, u64::from(self.verify))?;
        write_bits(&mut buf, 4, 1, u64::from(self.reply))?;
        write_bits(&mut buf, 5, 1, u64::from(self.increment))?;
        write_bits(&mut buf, 6, 2, u64::from(self.reply_addr_len))?;
        Ok(buf[0])
    }
}

/// A decoded RMAP packet and the outcome of its CRC checks.
///
/// Field decoding succeeds regardless of the CRCs so bad traffic can still be logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checked<T> {
    pub packet: T,
    pub header_crc_ok: bool,
    /// `None` for packets without a data block.
    pub data_crc_ok: Option<bool>,
}

impl<T> Checked<T> {
    #[must_use]
    pub fn crc_ok(&self) -> bool {
        self.header_crc_ok && self.data_crc_ok.unwrap_or(true)
    }
}

fn need(buf: &[u8], minimum: usize) -> Result<()> {
    if buf.len() < minimum {
        return Err(Error::NotEnoughData {
            actual: buf.len(),
            minimum,
        });
    }
    Ok(())
}

fn check_protocol(buf: &[u8]) -> Result<()> {
    if buf[1] != RMAP_PROTOCOL_ID {
        return Err(Error::Format(format!(
            "protocol id {:#04x} is not RMAP",
            buf[1]
        )));
    }
    Ok(())
}

fn data_length_field(len: usize) -> Result<[u8; 3]> {
    let len = u32::try_from(len).unwrap_or(u32::MAX);
    if len > MAX_DATA_LENGTH {
        return Err(Error::Format(format!("data length {len} exceeds 24 bits")));
    }
    let b = len.to_be_bytes();
    Ok([b[1], b[2], b[3]])
}

/// Decode a data block of `len` bytes plus its CRC starting at `start`.
fn decode_data(buf: &[u8], start: usize, len: usize) -> Result<(Vec<u8>, bool)> {
    need(buf, start + len + 1)?;
    let data = buf[start..start + len].to_vec();
    let ok = rmap_crc8(&data) == buf[start + len];
    Ok((data, ok))
}

/// RMAP command header, plus the data block for write commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
pub struct RmapCommand {
    #[builder(default = DEFAULT_LOGICAL_ADDRESS)]
    pub target_logical_address: u8,
    pub instruction: RmapInstruction,
    #[builder(default)]
    pub key: u8,
    /// Reply address bytes, `4 * instruction.reply_addr_len` long.
    #[builder(default)]
    pub reply_address: Vec<u8>,
    #[builder(default = DEFAULT_LOGICAL_ADDRESS)]
    pub initiator_logical_address: u8,
    pub transaction_id: u16,
    #[builder(default)]
    pub extended_address: u8,
    pub address: u32,
    /// 24-bit data length; the number of bytes to read, or the write data length.
    pub data_length: u32,
    #[builder(default)]
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl RmapCommand {
    /// A verified, acknowledged, incrementing write of `data` to `address`.
    #[must_use]
    pub fn write(transaction_id: u16, address: u32, data: Vec<u8>) -> Self {
        Self::builder()
            .instruction(RmapInstruction {
                command: true,
                write: true,
                verify: true,
                reply: true,
                increment: true,
                reply_addr_len: 0,
            })
            .transaction_id(transaction_id)
            .address(address)
            .data_length(u32::try_from(data.len()).unwrap_or(u32::MAX))
            .data(data)
            .build()
    }

    /// An incrementing read of `length` bytes from `address`.
    #[must_use]
    pub fn read(transaction_id: u16, address: u32, length: u32) -> Self {
        Self::builder()
            .instruction(RmapInstruction {
                command: true,
                reply: true,
                increment: true,
                ..Default::default()
            })
            .transaction_id(transaction_id)
            .address(address)
            .data_length(length)
            .build()
    }

    #[must_use]
    pub fn header_len(&self) -> usize {
        16 + 4 * self.instruction.reply_addr_len as usize
    }

    /// Serialize, computing the header CRC and, for writes, the data CRC.
    ///
    /// # Errors
    /// [Error::Format] if the reply address or data length are inconsistent with the
    /// instruction, or the data length exceeds 24 bits.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let ral = self.instruction.reply_addr_len as usize;
        if self.reply_address.len() != 4 * ral {
            return Err(Error::Format(format!(
                "reply address has {} bytes, instruction requires {}",
                self.reply_address.len(),
                4 * ral
            )));
        }
        if self.instruction.write && self.data_length as usize != self.data.len() {
            return Err(Error::Format(format!(
                "write data length field {} does not match {} data bytes",
                self.data_length,
                self.data.len()
            )));
        }
        let mut out = Vec::with_capacity(self.header_len() + self.data.len() + 1);
        out.extend_from_slice(&[
            self.target_logical_address,
            RMAP_PROTOCOL_ID,
            self.instruction.to_byte()?,
            self.key,
        ]);
        out.extend_from_slice(&self.reply_address);
        out.push(self.initiator_logical_address);
        out.extend_from_slice(&self.transaction_id.to_be_bytes());
        out.push(self.extended_address);
        out.extend_from_slice(&self.address.to_be_bytes());
        out.extend_from_slice(&data_length_field(self.data_length as usize)?);
        out.push(rmap_crc8(&out));
        if self.instruction.write {
            out.extend_from_slice(&self.data);
            out.push(rmap_crc8(&self.data));
        }
        Ok(out)
    }

    /// # Errors
    /// [Error::NotEnoughData] if `buf` is too short for the header or write data, or
    /// [Error::Format] if it is not an RMAP command.
    pub fn decode(buf: &[u8]) -> Result<Checked<Self>> {
        need(buf, 4)?;
        check_protocol(buf)?;
        let instruction = RmapInstruction::from_byte(buf[2]);
        if !instruction.command {
            return Err(Error::Format("RMAP reply where command expected".to_string()));
        }
        let ral = 4 * instruction.reply_addr_len as usize;
        let hdr_len = 16 + ral;
        need(buf, hdr_len)?;
        let rest = &buf[4 + ral..];
        let data_length = u32::from_be_bytes([0, rest[8], rest[9], rest[10]]);
        let header_crc_ok = rmap_crc8(&buf[..hdr_len - 1]) == buf[hdr_len - 1];

        let (data, data_crc_ok) = if instruction.write {
            let (data, ok) = decode_data(buf, hdr_len, data_length as usize)?;
            (data, Some(ok))
        } else {
            (Vec::new(), None)
        };

        Ok(Checked {
            packet: Self {
                target_logical_address: buf[0],
                instruction,
                key: buf[3],
                reply_address: buf[4..4 + ral].to_vec(),
                initiator_logical_address: rest[0],
                transaction_id: u16::from_be_bytes([rest[1], rest[2]]),
                extended_address: rest[3],
                address: u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]),
                data_length,
                data,
            },
            header_crc_ok,
            data_crc_ok,
        })
    }
}

/// Reply to a write command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RmapWriteReply {
    pub initiator_logical_address: u8,
    pub instruction: RmapInstruction,
    pub status: u8,
    pub target_logical_address: u8,
    pub transaction_id: u16,
}

impl RmapWriteReply {
    pub const LEN: usize = 8;

    /// Reply matching `cmd` with the given status.
    #[must_use]
    pub fn for_command(cmd: &RmapCommand, status: u8) -> Self {
        Self {
            initiator_logical_address: cmd.initiator_logical_address,
            instruction: RmapInstruction {
                command: false,
                ..cmd.instruction
            },
            status,
            target_logical_address: cmd.target_logical_address,
            transaction_id: cmd.transaction_id,
        }
    }

    /// # Errors
    /// [Error::Format] for an invalid instruction field.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = vec![
            self.initiator_logical_address,
            RMAP_PROTOCOL_ID,
            self.instruction.to_byte()?,
            self.status,
            self.target_logical_address,
        ];
        out.extend_from_slice(&self.transaction_id.to_be_bytes());
        out.push(rmap_crc8(&out));
        Ok(out)
    }

    /// # Errors
    /// [Error::NotEnoughData] if `buf` is shorter than [Self::LEN], or [Error::Format] if
    /// it is not a write reply.
    pub fn decode(buf: &[u8]) -> Result<Checked<Self>> {
        need(buf, Self::LEN)?;
        check_protocol(buf)?;
        let instruction = RmapInstruction::from_byte(buf[2]);
        if instruction.command || !instruction.write {
            return Err(Error::Format("not an RMAP write reply".to_string()));
        }
        Ok(Checked {
            packet: Self {
                initiator_logical_address: buf[0],
                instruction,
                status: buf[3],
                target_logical_address: buf[4],
                transaction_id: u16::from_be_bytes([buf[5], buf[6]]),
            },
            header_crc_ok: rmap_crc8(&buf[..Self::LEN - 1]) == buf[Self::LEN - 1],
            data_crc_ok: None,
        })
    }
}

/// Reply to a read command, carrying the data read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RmapReadReply {
    pub initiator_logical_address: u8,
    pub instruction: RmapInstruction,
    pub status: u8,
    pub target_logical_address: u8,
    pub transaction_id: u16,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl RmapReadReply {
    pub const HEADER_LEN: usize = 12;

    /// # Errors
    /// [Error::Format] for an invalid instruction field or oversized data.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = vec![
            self.initiator_logical_address,
            RMAP_PROTOCOL_ID,
            self.instruction.to_byte()?,
            self.status,
            self.target_logical_address,
        ];
        out.extend_from_slice(&self.transaction_id.to_be_bytes());
        out.push(0);
        out.extend_from_slice(&data_length_field(self.data.len())?);
        out.push(rmap_crc8(&out));
        out.extend_from_slice(&self.data);
        out.push(rmap_crc8(&self.data));
        Ok(out)
    }

    /// # Errors
    /// [Error::NotEnoughData] if `buf` is too short for the header or the data it
    /// announces, or [Error::Format] if it is not a read reply.
    pub fn decode(buf: &[u8]) -> Result<Checked<Self>> {
        need(buf, Self::HEADER_LEN)?;
        check_protocol(buf)?;
        let instruction = RmapInstruction::from_byte(buf[2]);
        if instruction.command || instruction.write {
            return Err(Error::Format("not an RMAP read reply".to_string()));
        }
        let data_length = u32::from_be_bytes([0, buf[8], buf[9], buf[10]]) as usize;
        let header_crc_ok =
            rmap_crc8(&buf[..Self::HEADER_LEN - 1]) == buf[Self::HEADER_LEN - 1];
        let (data, data_ok) = decode_data(buf, Self::HEADER_LEN, data_length)?;
        Ok(Checked {
            packet: Self {
                initiator_logical_address: buf[0],
                instruction,
                status: buf[3],
                target_logical_address: buf[4],
                transaction_id: u16::from_be_bytes([buf[5], buf[6]]),
                data,
            },
            header_crc_ok,
            data_crc_ok: Some(data_ok),
        })
    }
}

/// Any RMAP packet, distinguished by the instruction field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, From)]
pub enum RmapPacket {
    Command(Checked<RmapCommand>),
    WriteReply(Checked<RmapWriteReply>),
    ReadReply(Checked<RmapReadReply>),
}

impl RmapPacket {
    /// # Errors
    /// See the individual packet decoders.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        need(buf, 3)?;
        check_protocol(buf)?;
        let instruction = RmapInstruction::from_byte(buf[2]);
        match (instruction.command, instruction.write) {
            (true, _) => Ok(RmapCommand::decode(buf)?.into()),
            (false, true) => Ok(RmapWriteReply::decode(buf)?.into()),
            (false, false) => Ok(RmapReadReply::decode(buf)?.into()),
        }
    }

    #[must_use]
    pub fn crc_ok(&self) -> bool {
        match self {
            Self::Command(c) => c.crc_ok(),
            Self::WriteReply(r) => r.crc_ok(),
            Self::ReadReply(r) => r.crc_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_bits() {
        // read, reply, increment, 1 reply address word
        let ins = RmapInstruction::from_byte(0x4d);
        assert!(ins.command);
        assert!(!ins.write);
        assert!(!ins.verify);
        assert!(ins.reply);
        assert!(ins.increment);
        assert_eq!(ins.reply_addr_len, 1);
        assert_eq!(ins.to_byte().unwrap(), 0x4d);
    }

    #[test]
    fn standard_read_command() {
        // RMAP standard read command example, header CRC 0xe5 over the first 15 bytes
        let cmd = RmapCommand::builder()
            .target_logical_address(0xfe)
            .instruction(RmapInstruction::from_byte(0x4c))
            .key(0x00)
            .initiator_logical_address(0x67)
            .transaction_id(0x0000)
            .extended_address(0x00)
            .address(0xa000_0000)
            .data_length(0x10)
            .build();
        let buf = cmd.encode().unwrap();
        assert_eq!(hex::encode(&buf), "fe014c0067000000a0000000000010e5");

        let decoded = RmapCommand::decode(&buf).unwrap();
        assert!(decoded.header_crc_ok);
        assert_eq!(decoded.data_crc_ok, None);
        assert_eq!(decoded.packet, cmd);
    }

    #[test]
    fn write_command_roundtrip_with_reply_address() {
        let mut cmd = RmapCommand::write(0x1234, 0x0000_0100, vec![1, 2, 3, 4, 5]);
        cmd.instruction.reply_addr_len = 2;
        cmd.reply_address = vec![0, 0, 0, 0, 0, 0, 3, 7];
        cmd.key = 0x20;
        let buf = cmd.encode().unwrap();
        assert_eq!(buf.len(), 16 + 8 + 5 + 1);

        let decoded = RmapCommand::decode(&buf).unwrap();
        assert!(decoded.crc_ok());
        assert_eq!(decoded.packet, cmd);
    }

    #[test]
    fn header_crc_recomputed_after_field_change() {
        let mut cmd = RmapCommand::read(1, 0x10, 4);
        let first = cmd.encode().unwrap();
        cmd.address = 0x20;
        let second = cmd.encode().unwrap();
        assert_ne!(first[15], second[15]);
        assert!(RmapCommand::decode(&second).unwrap().header_crc_ok);
    }

    #[test]
    fn corrupt_data_reported_not_failed() {
        let cmd = RmapCommand::write(7, 0x40, vec![0xaa; 8]);
        let mut buf = cmd.encode().unwrap();
        buf[20] ^= 0x01;
        let decoded = RmapCommand::decode(&buf).unwrap();
        assert!(decoded.header_crc_ok);
        assert_eq!(decoded.data_crc_ok, Some(false));
        assert!(!decoded.crc_ok());
    }

    #[test]
    fn write_length_mismatch_rejected() {
        let mut cmd = RmapCommand::write(7, 0x40, vec![0xaa; 8]);
        cmd.data_length = 4;
        assert!(matches!(cmd.encode(), Err(Error::Format(_))));
    }

    #[test]
    fn truncated_write_fails_closed() {
        let buf = RmapCommand::write(7, 0x40, vec![0xaa; 8]).encode().unwrap();
        assert!(matches!(
            RmapCommand::decode(&buf[..20]),
            Err(Error::NotEnoughData { .. })
        ));
        assert!(RmapCommand::decode(&buf[..10]).is_err());
    }

    #[test]
    fn write_reply_roundtrip() {
        let cmd = RmapCommand::write(0xbeef, 0x40, vec![1]);
        let reply = RmapWriteReply::for_command(&cmd, 0);
        let buf = reply.encode().unwrap();
        assert_eq!(buf.len(), RmapWriteReply::LEN);
        let decoded = RmapWriteReply::decode(&buf).unwrap();
        assert!(decoded.header_crc_ok);
        assert_eq!(decoded.packet, reply);

        match RmapPacket::decode(&buf).unwrap() {
            RmapPacket::WriteReply(r) => assert_eq!(r.packet.transaction_id, 0xbeef),
            other => panic!("expected write reply, got {other:?}"),
        }
    }

    #[test]
    fn read_reply_roundtrip() {
        let reply = RmapReadReply {
            initiator_logical_address: 0x67,
            instruction: RmapInstruction {
                reply: true,
                increment: true,
                ..Default::default()
            },
            status: 0,
            target_logical_address: 0xfe,
            transaction_id: 3,
            data: vec![0xde, 0xad, 0xbe, 0xef],
        };
        let buf = reply.encode().unwrap();
        assert_eq!(buf.len(), RmapReadReply::HEADER_LEN + 4 + 1);
        let decoded = RmapReadReply::decode(&buf).unwrap();
        assert!(decoded.crc_ok());
        assert_eq!(decoded.packet, reply);
        assert!(matches!(
            RmapPacket::decode(&buf).unwrap(),
            RmapPacket::ReadReply(_)
        ));
    }

    #[test]
    fn wrong_protocol() {
        let mut buf = RmapCommand::read(1, 0, 4).encode().unwrap();
        buf[1] = 0x02;
        assert!(matches!(RmapCommand::decode(&buf), Err(Error::Format(_))));
    }
}
