//! Mission information base (MIB) driven parameter decoding.
//!
//! The MIB tells the decoder which parameters a packet carries and how each is encoded.
//! Only the record shapes the decoder consumes are modeled here:
//!
//! * packets: a [PacketKey] mapped to a fixed list of parameters or a tree of repeat
//!   groups ([ParameterLayout])
//! * parameters: PTC/PFC codes, optional offsets, and an optional calibration signal
//! * identification: where to find the discriminant in packets of a service type
//!
//! A [Mib] is loaded once, typically from JSON, and shared read-only between decoders.
mod decoder;
mod format;

use std::{collections::HashMap, fmt::Display, fs::File, io::Read, path::Path};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::bits::read_bits;
use crate::prelude::*;
use crate::pus::PusTm;
use crate::spacepacket::Apid;

pub use decoder::{decode_parameters, DecodedPacket, DecodedParameter};
pub use format::{ParamFormat, Value};

/// Identifies a packet layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PacketKey {
    pub service: u8,
    pub sub_service: u8,
    pub apid: Apid,
    /// Additional identification field value, 0 if the packet type has none.
    #[serde(default)]
    pub discriminant: u32,
}

impl PacketKey {
    #[must_use]
    pub fn new(service: u8, sub_service: u8, apid: Apid, discriminant: u32) -> Self {
        Self {
            service,
            sub_service,
            apid,
            discriminant,
        }
    }
}

impl Display for PacketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TM({},{}) apid={} discriminant={}",
            self.service, self.sub_service, self.apid, self.discriminant
        )
    }
}

/// A node of a variable packet layout.
///
/// The node's parameter is always read. If the node has a group, the parameter's value
/// is the number of times the group is repeated, unless `fixrep` overrides it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutNode {
    pub parameter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixrep: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group: Vec<LayoutNode>,
}

impl LayoutNode {
    #[must_use]
    pub fn leaf(parameter: &str) -> Self {
        Self {
            parameter: parameter.to_string(),
            fixrep: None,
            group: Vec::new(),
        }
    }

    /// A counter parameter followed by a repeated group.
    #[must_use]
    pub fn counter(parameter: &str, group: Vec<LayoutNode>) -> Self {
        Self {
            parameter: parameter.to_string(),
            fixrep: None,
            group,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParameterLayout {
    /// Parameters in order, each present exactly once.
    Fixed { parameters: Vec<String> },
    /// Parameters in order with nested repeat groups.
    Variable { nodes: Vec<LayoutNode> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketRecord {
    pub key: PacketKey,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub layout: ParameterLayout,
}

/// Encoding of a parameter and, for fixed packets, where it sits in the source data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterFormat {
    pub ptc: u8,
    pub pfc: u16,
    /// Byte offset from the start of the packet source data.
    #[serde(default)]
    pub byte_offset: Option<usize>,
    /// Bit offset within the byte at `byte_offset`.
    #[serde(default)]
    pub bit_offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterRecord {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub format: ParameterFormat,
    /// Calibration signal applied to the raw value, if any.
    #[serde(default)]
    pub calibration: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

/// Where the discriminant lives in packets of a service type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentificationRecord {
    pub service: u8,
    pub sub_service: u8,
    /// Byte offset from the start of the packet source data.
    pub offset: usize,
    /// Field width in bits.
    pub width: usize,
}

/// Lookups the parameter decoder needs from a MIB.
pub trait MibSource {
    fn lookup_packet_layout(&self, key: &PacketKey) -> Option<&PacketRecord>;
    fn lookup_parameter_format(&self, name: &str) -> Option<ParameterFormat>;

    /// Calibration signal for a parameter.
    fn lookup_calibration(&self, _name: &str) -> Option<&str> {
        None
    }

    /// Discriminant location for packets of a service type.
    fn lookup_identification(
        &self,
        _service: u8,
        _sub_service: u8,
    ) -> Option<IdentificationRecord> {
        None
    }

    /// Build the lookup key for `tm`, reading the discriminant as configured by the
    /// identification records. Packets whose type has no record get discriminant 0.
    fn identify(&self, tm: &PusTm) -> PacketKey {
        let mut key = PacketKey::new(tm.service(), tm.sub_service(), tm.apid(), 0);
        if let Some(ident) = self.lookup_identification(key.service, key.sub_service) {
            match read_bits(&tm.source_data, ident.offset * 8, ident.width) {
                Ok(v) => key.discriminant = v as u32,
                Err(err) => trace!(%key, "discriminant unavailable: {err}"),
            }
        }
        key
    }

    /// Identify and decode the parameters of `tm`.
    fn decode(&self, tm: &PusTm) -> DecodedPacket {
        decode_parameters(self, &self.identify(tm), &tm.source_data)
    }
}

/// On-disk shape of a MIB.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MibRecords {
    #[serde(default)]
    pub packets: Vec<PacketRecord>,
    #[serde(default)]
    pub parameters: Vec<ParameterRecord>,
    #[serde(default)]
    pub identification: Vec<IdentificationRecord>,
}

/// Immutable, indexed MIB.
#[derive(Debug, Default, Clone)]
pub struct Mib {
    packets: HashMap<PacketKey, PacketRecord>,
    parameters: HashMap<String, ParameterRecord>,
    identification: HashMap<(u8, u8), IdentificationRecord>,
}

impl From<MibRecords> for Mib {
    fn from(records: MibRecords) -> Self {
        Self {
            packets: records.packets.into_iter().map(|p| (p.key, p)).collect(),
            parameters: records
                .parameters
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
            identification: records
                .identification
                .into_iter()
                .map(|r| ((r.service, r.sub_service), r))
                .collect(),
        }
    }
}

impl Mib {
    /// # Errors
    /// [Error::Json] if the records cannot be parsed.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let records: MibRecords = serde_json::from_reader(reader)?;
        let mib = Self::from(records);
        debug!(
            packets = mib.packets.len(),
            parameters = mib.parameters.len(),
            "loaded MIB"
        );
        Ok(mib)
    }

    /// # Errors
    /// [Error::Io] if the file cannot be opened, or see [Self::from_reader].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }

    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&ParameterRecord> {
        self.parameters.get(name)
    }

    pub fn packets(&self) -> impl Iterator<Item = &PacketRecord> {
        self.packets.values()
    }
}

impl MibSource for Mib {
    fn lookup_packet_layout(&self, key: &PacketKey) -> Option<&PacketRecord> {
        self.packets.get(key)
    }

    fn lookup_parameter_format(&self, name: &str) -> Option<ParameterFormat> {
        self.parameters.get(name).map(|p| p.format)
    }

    fn lookup_calibration(&self, name: &str) -> Option<&str> {
        self.parameters.get(name)?.calibration.as_deref()
    }

    fn lookup_identification(
        &self,
        service: u8,
        sub_service: u8,
    ) -> Option<IdentificationRecord> {
        self.identification.get(&(service, sub_service)).copied()
    }
}
