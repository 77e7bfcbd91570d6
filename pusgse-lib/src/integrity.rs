//! Checksums used by the packet families in this crate.
//!
//! * CRC-16/CCITT-FALSE protects space packets (the PUS packet error control field).
//! * A reflected CRC-8 (polynomial 0x107) protects RMAP headers and data blocks.
//! * The reflected CRC-16 variant is available for links that use a bit-reversed PEC.
use crc::{Algorithm, Crc, CRC_16_IBM_3740, CRC_16_KERMIT};
use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// Reflected CRC-8 as defined for RMAP (ECSS-E-ST-50-52C).
pub const CRC_8_RMAP: Algorithm<u8> = Algorithm {
    width: 8,
    poly: 0x07,
    init: 0x00,
    refin: true,
    refout: true,
    xorout: 0x00,
    check: 0x20,
    residue: 0x00,
};

const CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);
const RMAP: Crc<u8> = Crc::<u8>::new(&CRC_8_RMAP);
const REFLECTED16: Crc<u16> = Crc::<u16>::new(&CRC_16_KERMIT);

#[must_use]
pub fn crc16_ccitt(dat: &[u8]) -> u16 {
    CCITT.checksum(dat)
}

#[must_use]
pub fn rmap_crc8(dat: &[u8]) -> u8 {
    RMAP.checksum(dat)
}

#[must_use]
pub fn reflected_crc16(dat: &[u8]) -> u16 {
    REFLECTED16.checksum(dat)
}

/// Selects one of the checksum algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrcEngine {
    Ccitt16,
    Rmap8,
    Reflected16,
}

impl CrcEngine {
    #[must_use]
    pub fn checksum(self, dat: &[u8]) -> u16 {
        match self {
            Self::Ccitt16 => crc16_ccitt(dat),
            Self::Rmap8 => u16::from(rmap_crc8(dat)),
            Self::Reflected16 => reflected_crc16(dat),
        }
    }

    /// Number of bytes the checksum occupies on the wire.
    #[must_use]
    pub fn width_bytes(self) -> usize {
        match self {
            Self::Rmap8 => 1,
            Self::Ccitt16 | Self::Reflected16 => 2,
        }
    }

    /// Checksum `dat` and append it big-endian.
    pub fn append(self, dat: &mut Vec<u8>) {
        let crc = self.checksum(dat);
        match self.width_bytes() {
            1 => dat.push(crc as u8),
            _ => dat.extend_from_slice(&crc.to_be_bytes()),
        }
    }

    /// Verify that the trailing checksum of `buf` matches the checksum of all the bytes
    /// before it.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if `buf` is shorter than the checksum, or
    /// [Error::CrcMismatch] if the checksums differ.
    pub fn verify_trailing(self, buf: &[u8]) -> Result<()> {
        let n = self.width_bytes();
        if buf.len() < n {
            return Err(Error::NotEnoughData {
                actual: buf.len(),
                minimum: n,
            });
        }
        let (dat, trailer) = buf.split_at(buf.len() - n);
        let actual = match n {
            1 => u16::from(trailer[0]),
            _ => u16::from_be_bytes([trailer[0], trailer[1]]),
        };
        let expected = self.checksum(dat);
        if expected != actual {
            return Err(Error::CrcMismatch { expected, actual });
        }
        Ok(())
    }
}
