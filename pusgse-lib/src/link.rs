//! Frames multiplexed on a single SpaceWire-like link.
//!
//! All protocols on the link carry a logical address in byte 0 and a protocol id in
//! byte 1, which is enough to route a frame to the right decoder.
use serde::{Deserialize, Serialize};

use crate::fee::{FeePacket, FEE_PROTOCOL_ID};
use crate::prelude::*;
use crate::rmap::{RmapPacket, RMAP_PROTOCOL_ID};
use crate::spacepacket::Packet;

/// CCSDS packet transfer protocol id (ECSS-E-ST-50-53C).
pub const CCSDS_PROTOCOL_ID: u8 = 0x02;
/// Length of the CCSDS packet transfer prefix before the space packet.
pub const CCSDS_PREFIX_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkProtocol {
    Rmap,
    CcsdsPacket,
    Fee,
}

impl LinkProtocol {
    /// Classify a frame by its protocol id byte.
    ///
    /// # Errors
    /// [Error::NotEnoughData] for frames under 2 bytes, [Error::Format] for unknown ids.
    pub fn classify(buf: &[u8]) -> Result<Self> {
        if buf.len() < 2 {
            return Err(Error::NotEnoughData {
                actual: buf.len(),
                minimum: 2,
            });
        }
        match buf[1] {
            RMAP_PROTOCOL_ID => Ok(Self::Rmap),
            CCSDS_PROTOCOL_ID => Ok(Self::CcsdsPacket),
            FEE_PROTOCOL_ID => Ok(Self::Fee),
            id => Err(Error::Format(format!("unknown link protocol id {id:#04x}"))),
        }
    }

    #[must_use]
    pub fn id(self) -> u8 {
        match self {
            Self::Rmap => RMAP_PROTOCOL_ID,
            Self::CcsdsPacket => CCSDS_PROTOCOL_ID,
            Self::Fee => FEE_PROTOCOL_ID,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkFrame {
    Rmap(RmapPacket),
    Ccsds {
        logical_address: u8,
        user_application: u8,
        packet: Packet,
    },
    Fee(FeePacket),
}

impl LinkFrame {
    /// # Errors
    /// Any error from [LinkProtocol::classify] or the protocol's decoder.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        match LinkProtocol::classify(buf)? {
            LinkProtocol::Rmap => Ok(Self::Rmap(RmapPacket::decode(buf)?)),
            LinkProtocol::Fee => Ok(Self::Fee(FeePacket::decode(buf)?)),
            LinkProtocol::CcsdsPacket => {
                if buf.len() < CCSDS_PREFIX_LEN {
                    return Err(Error::NotEnoughData {
                        actual: buf.len(),
                        minimum: CCSDS_PREFIX_LEN,
                    });
                }
                Ok(Self::Ccsds {
                    logical_address: buf[0],
                    user_application: buf[3],
                    packet: Packet::decode(&buf[CCSDS_PREFIX_LEN..])?,
                })
            }
        }
    }

    /// Wrap a space packet for transfer to `logical_address`.
    #[must_use]
    pub fn wrap_packet(logical_address: u8, user_application: u8, packet: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(CCSDS_PREFIX_LEN + packet.len());
        out.extend_from_slice(&[logical_address, CCSDS_PROTOCOL_ID, 0, user_application]);
        out.extend_from_slice(packet);
        out
    }

    #[must_use]
    pub fn protocol(&self) -> LinkProtocol {
        match self {
            Self::Rmap(_) => LinkProtocol::Rmap,
            Self::Ccsds { .. } => LinkProtocol::CcsdsPacket,
            Self::Fee(_) => LinkProtocol::Fee,
        }
    }
}
