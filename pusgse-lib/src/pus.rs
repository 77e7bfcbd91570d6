//! PUS secondary headers and typed TM/TC packet views.
//!
//! The secondary header layout differs between missions. A [MissionProfile] carries the
//! layout variant together with the mission's CUC format and epoch, and every decode or
//! encode in this module is done relative to an explicit profile. All variants share the
//! service / sub-service pair as the semantic discriminant.
//!
//! | Variant | TM secondary header | TC secondary header |
//! |---|---|---|
//! | [PusVariant::A] | spare:1 version:3 spare:4, service, sub-service, destination:8, time | flag:1 version:3 ack:4, service, sub-service, source:8 |
//! | [PusVariant::C] | version:4 time-ref:4, service, sub-service, counter:16, destination:16, time | version:4 ack:4, service, sub-service, source:16 |
//! | [PusVariant::CCompact] | version:4 time-ref:4, service, sub-service, counter:8, destination:8, time | version:4 ack:4, service, sub-service, source:8 |
use std::{fs::File, io::Read, path::Path, str::FromStr};

use hifitime::Epoch;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::bits::{write_bits, BitCursor};
use crate::integrity::CrcEngine;
use crate::prelude::*;
use crate::spacepacket::{Apid, Packet, PacketType, PrimaryHeader, SequenceFlags};
use crate::timecode::{CucFormat, CucTime, FineResolution};

/// Bit layout family of the PUS secondary header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PusVariant {
    /// ECSS PUS-A with 8-bit ids and no message counter.
    A,
    /// ECSS PUS-C with 16-bit message counter and ids.
    C,
    /// PUS-C field order with 8-bit message counter and ids.
    CCompact,
}

impl PusVariant {
    /// PUS version number written into the secondary header.
    #[must_use]
    pub fn version(self) -> u8 {
        match self {
            Self::A => 1,
            Self::C | Self::CCompact => 2,
        }
    }

    fn id_bits(self) -> usize {
        match self {
            Self::A | Self::CCompact => 8,
            Self::C => 16,
        }
    }

    fn counter_bits(self) -> usize {
        match self {
            Self::A => 0,
            Self::CCompact => 8,
            Self::C => 16,
        }
    }
}

/// Per-mission packet configuration.
///
/// Exactly one profile is active for a decoder; streams from different missions are
/// decoded with separate profiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionProfile {
    pub name: String,
    pub variant: PusVariant,
    pub time: CucFormat,
    /// TM time stamps are followed by a time synchronization byte.
    #[serde(default)]
    pub time_sync: bool,
    /// Mission epoch the CUC coarse time counts from (e.g., `2000-01-01T00:00:00 TAI`).
    pub epoch: String,
    /// Packets carry a CRC-16 packet error control field.
    #[serde(default = "default_pec")]
    pub pec: bool,
}

fn default_pec() -> bool {
    true
}

impl Default for MissionProfile {
    fn default() -> Self {
        Self::pus_c_compact()
    }
}

impl MissionProfile {
    pub const PEC_LEN: usize = 2;

    #[must_use]
    pub fn pus_a() -> Self {
        Self {
            name: "pus-a".to_string(),
            variant: PusVariant::A,
            time: CucFormat::new(4, 2, FineResolution::Binary),
            time_sync: false,
            epoch: "2000-01-01T00:00:00 TAI".to_string(),
            pec: true,
        }
    }

    #[must_use]
    pub fn pus_c() -> Self {
        Self {
            name: "pus-c".to_string(),
            variant: PusVariant::C,
            time: CucFormat::new(4, 3, FineResolution::Micros),
            time_sync: false,
            epoch: "1958-01-01T00:00:00 TAI".to_string(),
            pec: true,
        }
    }

    #[must_use]
    pub fn pus_c_compact() -> Self {
        Self {
            name: "pus-c-compact".to_string(),
            variant: PusVariant::CCompact,
            time: CucFormat::new(4, 2, FineResolution::Binary),
            time_sync: true,
            epoch: "2018-01-01T00:00:00 TAI".to_string(),
            pec: true,
        }
    }

    /// Look up one of the built-in profiles by name.
    #[must_use]
    pub fn by_name(name: &str) -> Option<Self> {
        [Self::pus_a(), Self::pus_c(), Self::pus_c_compact()]
            .into_iter()
            .find(|p| p.name == name)
    }

    /// # Errors
    /// On JSON decode errors, or if the time format or epoch are invalid.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let profile: Self = serde_json::from_reader(reader)?;
        profile.time.validate()?;
        profile.mission_epoch()?;
        Ok(profile)
    }

    /// # Errors
    /// See [Self::from_reader].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }

    /// # Errors
    /// [Error::Format] if the configured epoch cannot be parsed.
    pub fn mission_epoch(&self) -> Result<Epoch> {
        Epoch::from_str(&self.epoch)
            .map_err(|e| Error::Format(format!("invalid mission epoch {:?}: {e}", self.epoch)))
    }

    /// Length of the time field in the TM secondary header, including any sync byte.
    #[must_use]
    pub fn time_len(&self) -> usize {
        self.time.len(self.time_sync)
    }

    #[must_use]
    pub fn tm_header_len(&self) -> usize {
        let ids = (self.variant.counter_bits() + self.variant.id_bits()) / 8;
        3 + ids + self.time_len()
    }

    #[must_use]
    pub fn tc_header_len(&self) -> usize {
        3 + self.variant.id_bits() / 8
    }

    fn pec_len(&self) -> usize {
        if self.pec {
            Self::PEC_LEN
        } else {
            0
        }
    }

    /// Decode a TM secondary header from the start of `buf`.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if `buf` is shorter than the header, or a time code error.
    pub fn decode_tm_header(&self, buf: &[u8]) -> Result<TmSecondaryHeader> {
        let len = self.tm_header_len();
        if buf.len() < len {
            return Err(Error::NotEnoughData {
                actual: buf.len(),
                minimum: len,
            });
        }
        let mut cur = BitCursor::new(&buf[..len]);
        let (pus_version, time_ref_status) = match self.variant {
            PusVariant::A => {
                cur.skip(1)?;
                let version = cur.read(3)? as u8;
                cur.skip(4)?;
                (version, 0)
            }
            PusVariant::C | PusVariant::CCompact => (cur.read(4)? as u8, cur.read(4)? as u8),
        };
        let service = cur.read(8)? as u8;
        let sub_service = cur.read(8)? as u8;
        let counter_bits = self.variant.counter_bits();
        let msg_counter = if counter_bits > 0 {
            Some(cur.read(counter_bits)? as u16)
        } else {
            None
        };
        let destination_id = cur.read(self.variant.id_bits())? as u16;
        let start = cur.byte_position();
        let time = self
            .time
            .decode(&buf[start..start + self.time_len()], self.time_sync)?;

        Ok(TmSecondaryHeader {
            pus_version,
            time_ref_status,
            service,
            sub_service,
            msg_counter,
            destination_id,
            time,
        })
    }

    /// Encode a TM secondary header for this profile.
    ///
    /// # Errors
    /// [Error::Format] if a header field does not fit the variant's field width.
    pub fn encode_tm_header(&self, hdr: &TmSecondaryHeader) -> Result<Vec<u8>> {
        let mut first = [0u8; 1];
        match self.variant {
            PusVariant::A => {
                let version = fit_field(u64::from(hdr.pus_version), 3, "PUS version")?;
                write_bits(&mut first, 1, 3, version)?;
            }
            PusVariant::C | PusVariant::CCompact => {
                let version = fit_field(u64::from(hdr.pus_version), 4, "PUS version")?;
                let status = fit_field(u64::from(hdr.time_ref_status), 4, "time reference status")?;
                write_bits(&mut first, 0, 4, version)?;
                write_bits(&mut first, 4, 4, status)?;
            }
        }
        let mut out = vec![first[0], hdr.service, hdr.sub_service];
        let counter_bits = self.variant.counter_bits();
        if counter_bits > 0 {
            push_field(
                &mut out,
                u64::from(hdr.msg_counter.unwrap_or(0)),
                counter_bits,
                "message counter",
            )?;
        }
        push_field(
            &mut out,
            u64::from(hdr.destination_id),
            self.variant.id_bits(),
            "destination id",
        )?;
        let mut time = hdr.time;
        time.sync = if self.time_sync {
            Some(time.sync.unwrap_or(false))
        } else {
            None
        };
        out.extend(self.time.encode(&time)?);
        Ok(out)
    }

    /// Decode a TC secondary header from the start of `buf`.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if `buf` is shorter than the header.
    pub fn decode_tc_header(&self, buf: &[u8]) -> Result<TcSecondaryHeader> {
        let len = self.tc_header_len();
        if buf.len() < len {
            return Err(Error::NotEnoughData {
                actual: buf.len(),
                minimum: len,
            });
        }
        let mut cur = BitCursor::new(&buf[..len]);
        let pus_version = match self.variant {
            PusVariant::A => {
                cur.skip(1)?;
                cur.read(3)? as u8
            }
            PusVariant::C | PusVariant::CCompact => cur.read(4)? as u8,
        };
        let ack = AckFlags::from_bits(cur.read(4)? as u8);
        let service = cur.read(8)? as u8;
        let sub_service = cur.read(8)? as u8;
        let source_id = cur.read(self.variant.id_bits())? as u16;
        Ok(TcSecondaryHeader {
            pus_version,
            ack,
            service,
            sub_service,
            source_id,
        })
    }

    /// Encode a TC secondary header for this profile.
    ///
    /// # Errors
    /// [Error::Format] if the source id does not fit the variant's field width.
    pub fn encode_tc_header(&self, hdr: &TcSecondaryHeader) -> Result<Vec<u8>> {
        let mut first = [0u8; 1];
        match self.variant {
            PusVariant::A => write_bits(&mut first, 1, 3, u64::from(hdr.pus_version))?,
            PusVariant::C | PusVariant::CCompact => {
                write_bits(&mut first, 0, 4, u64::from(hdr.pus_version))?;
            }
        }
        write_bits(&mut first, 4, 4, u64::from(hdr.ack.bits()))?;
        let mut out = vec![first[0], hdr.service, hdr.sub_service];
        push_field(
            &mut out,
            u64::from(hdr.source_id),
            self.variant.id_bits(),
            "source id",
        )?;
        Ok(out)
    }
}

fn fit_field(value: u64, bits: usize, name: &str) -> Result<u64> {
    if value >> bits != 0 {
        return Err(Error::Format(format!(
            "{name} {value} does not fit {bits} bits"
        )));
    }
    Ok(value)
}

fn push_field(out: &mut Vec<u8>, value: u64, bits: usize, name: &str) -> Result<()> {
    let value = fit_field(value, bits, name)?;
    let bytes = value.to_be_bytes();
    out.extend_from_slice(&bytes[8 - bits / 8..]);
    Ok(())
}

/// TC acknowledgement request flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckFlags {
    pub acceptance: bool,
    pub start: bool,
    pub progress: bool,
    pub completion: bool,
}

impl AckFlags {
    #[must_use]
    pub fn all() -> Self {
        Self {
            acceptance: true,
            start: true,
            progress: true,
            completion: true,
        }
    }

    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        Self {
            completion: bits & 0x8 != 0,
            progress: bits & 0x4 != 0,
            start: bits & 0x2 != 0,
            acceptance: bits & 0x1 != 0,
        }
    }

    #[must_use]
    pub fn bits(self) -> u8 {
        u8::from(self.completion) << 3
            | u8::from(self.progress) << 2
            | u8::from(self.start) << 1
            | u8::from(self.acceptance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmSecondaryHeader {
    pub pus_version: u8,
    /// Spacecraft time reference status; always 0 for [PusVariant::A].
    pub time_ref_status: u8,
    pub service: u8,
    pub sub_service: u8,
    /// Message type counter; not present in [PusVariant::A].
    pub msg_counter: Option<u16>,
    pub destination_id: u16,
    pub time: CucTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcSecondaryHeader {
    pub pus_version: u8,
    pub ack: AckFlags,
    pub service: u8,
    pub sub_service: u8,
    pub source_id: u16,
}

/// Typed view of a PUS telemetry packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PusTm {
    pub header: PrimaryHeader,
    pub secondary: TmSecondaryHeader,
    /// Application data between the secondary header and the PEC.
    #[serde(with = "serde_bytes")]
    pub source_data: Vec<u8>,
    /// False if the packet error control did not match. The header fields are still
    /// decoded so malformed traffic can be inspected.
    pub crc_ok: bool,
}

impl PusTm {
    /// # Errors
    /// [Error::Format] if `packet` is not a TM packet with a secondary header, or
    /// [Error::NotEnoughData] if it is too short for the profile's headers.
    pub fn from_packet(packet: &Packet, profile: &MissionProfile) -> Result<Self> {
        if packet.header.packet_type != PacketType::Tm || !packet.header.has_secondary_header {
            return Err(Error::Format(format!(
                "not a PUS TM packet: {:?}",
                packet.header
            )));
        }
        let user = packet.user_data();
        let minimum = profile.tm_header_len() + profile.pec_len();
        if user.len() < minimum {
            return Err(Error::NotEnoughData {
                actual: user.len(),
                minimum,
            });
        }
        let secondary = profile.decode_tm_header(user)?;
        let source_data = user[profile.tm_header_len()..user.len() - profile.pec_len()].to_vec();
        Ok(Self {
            header: packet.header,
            secondary,
            source_data,
            crc_ok: !profile.pec || packet.crc_ok(),
        })
    }

    #[must_use]
    pub fn service(&self) -> u8 {
        self.secondary.service
    }

    #[must_use]
    pub fn sub_service(&self) -> u8 {
        self.secondary.sub_service
    }

    #[must_use]
    pub fn apid(&self) -> Apid {
        self.header.apid
    }
}

/// Typed view of a PUS telecommand packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PusTc {
    pub header: PrimaryHeader,
    pub secondary: TcSecondaryHeader,
    #[serde(with = "serde_bytes")]
    pub app_data: Vec<u8>,
    pub crc_ok: bool,
}

impl PusTc {
    /// # Errors
    /// [Error::Format] if `packet` is not a TC packet with a secondary header, or
    /// [Error::NotEnoughData] if it is too short for the profile's headers.
    pub fn from_packet(packet: &Packet, profile: &MissionProfile) -> Result<Self> {
        if packet.header.packet_type != PacketType::Tc || !packet.header.has_secondary_header {
            return Err(Error::Format(format!(
                "not a PUS TC packet: {:?}",
                packet.header
            )));
        }
        let user = packet.user_data();
        let minimum = profile.tc_header_len() + profile.pec_len();
        if user.len() < minimum {
            return Err(Error::NotEnoughData {
                actual: user.len(),
                minimum,
            });
        }
        let secondary = profile.decode_tc_header(user)?;
        let app_data = user[profile.tc_header_len()..user.len() - profile.pec_len()].to_vec();
        Ok(Self {
            header: packet.header,
            secondary,
            app_data,
            crc_ok: !profile.pec || packet.crc_ok(),
        })
    }
}

fn finish_packet(
    profile: &MissionProfile,
    packet_type: PacketType,
    apid: Apid,
    sequence_flags: SequenceFlags,
    sequence_id: u16,
    body: Vec<u8>,
) -> Result<Vec<u8>> {
    let data_len = body.len() + profile.pec_len();
    if data_len == 0 || data_len > usize::from(u16::MAX) + 1 {
        return Err(Error::Format(format!(
            "packet data field length {data_len} out of range"
        )));
    }
    let header = PrimaryHeader {
        version: 0,
        packet_type,
        has_secondary_header: true,
        apid,
        sequence_flags,
        sequence_id,
        len_minus1: (data_len - 1) as u16,
    };
    let mut out = Vec::with_capacity(header.packet_len());
    out.extend_from_slice(&header.encode()?);
    out.extend(body);
    if profile.pec {
        CrcEngine::Ccitt16.append(&mut out);
    }
    Ok(out)
}

/// Builds a complete TM packet: primary header, secondary header, data and PEC.
///
/// ```
/// use pusgse::pus::{MissionProfile, TmPacket};
/// use pusgse::timecode::CucTime;
///
/// let profile = MissionProfile::pus_c_compact();
/// let bytes = TmPacket::builder()
///     .apid(0x3c1)
///     .service(3)
///     .sub_service(25)
///     .time(CucTime::from_secs_f64(10.0, &profile.time, Some(true)))
///     .data(vec![0x01, 0x02])
///     .build()
///     .encode(&profile)
///     .unwrap();
/// assert_eq!(bytes.len(), 6 + profile.tm_header_len() + 2 + 2);
/// ```
#[derive(Debug, Clone, TypedBuilder)]
pub struct TmPacket {
    pub apid: Apid,
    #[builder(default = SequenceFlags::Unsegmented)]
    pub sequence_flags: SequenceFlags,
    #[builder(default)]
    pub sequence_id: u16,
    pub service: u8,
    pub sub_service: u8,
    #[builder(default)]
    pub msg_counter: u16,
    #[builder(default)]
    pub destination_id: u16,
    #[builder(default)]
    pub time_ref_status: u8,
    pub time: CucTime,
    #[builder(default, setter(into))]
    pub data: Vec<u8>,
}

impl TmPacket {
    /// Serialize, set the packet length field, and append the PEC.
    ///
    /// # Errors
    /// [Error::Format] if any field does not fit the profile's layout.
    pub fn encode(&self, profile: &MissionProfile) -> Result<Vec<u8>> {
        let secondary = TmSecondaryHeader {
            pus_version: profile.variant.version(),
            time_ref_status: self.time_ref_status,
            service: self.service,
            sub_service: self.sub_service,
            msg_counter: Some(self.msg_counter),
            destination_id: self.destination_id,
            time: self.time,
        };
        let mut body = profile.encode_tm_header(&secondary)?;
        body.extend_from_slice(&self.data);
        finish_packet(
            profile,
            PacketType::Tm,
            self.apid,
            self.sequence_flags,
            self.sequence_id,
            body,
        )
    }
}

/// Builds a complete TC packet.
#[derive(Debug, Clone, TypedBuilder)]
pub struct TcPacket {
    pub apid: Apid,
    #[builder(default)]
    pub sequence_id: u16,
    pub service: u8,
    pub sub_service: u8,
    #[builder(default = AckFlags::all())]
    pub ack: AckFlags,
    #[builder(default)]
    pub source_id: u16,
    #[builder(default, setter(into))]
    pub data: Vec<u8>,
}

impl TcPacket {
    /// Serialize, set the packet length field, and append the PEC.
    ///
    /// # Errors
    /// [Error::Format] if any field does not fit the profile's layout.
    pub fn encode(&self, profile: &MissionProfile) -> Result<Vec<u8>> {
        let secondary = TcSecondaryHeader {
            pus_version: profile.variant.version(),
            ack: self.ack,
            service: self.service,
            sub_service: self.sub_service,
            source_id: self.source_id,
        };
        let mut body = profile.encode_tc_header(&secondary)?;
        body.extend_from_slice(&self.data);
        finish_packet(
            profile,
            PacketType::Tc,
            self.apid,
            SequenceFlags::Unsegmented,
            self.sequence_id,
            body,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn time(profile: &MissionProfile) -> CucTime {
        CucTime::from_secs_f64(
            123_456.75,
            &profile.time,
            profile.time_sync.then_some(true),
        )
    }

    #[test_case(MissionProfile::pus_a(), 4 + 6; "pus-a")]
    #[test_case(MissionProfile::pus_c(), 7 + 7; "pus-c")]
    #[test_case(MissionProfile::pus_c_compact(), 5 + 7; "pus-c compact")]
    fn tm_header_roundtrip(profile: MissionProfile, len: usize) {
        let hdr = TmSecondaryHeader {
            pus_version: profile.variant.version(),
            time_ref_status: if profile.variant == PusVariant::A { 0 } else { 5 },
            service: 3,
            sub_service: 25,
            msg_counter: match profile.variant {
                PusVariant::A => None,
                _ => Some(0x42),
            },
            destination_id: 0x17,
            time: time(&profile),
        };
        let buf = profile.encode_tm_header(&hdr).unwrap();
        assert_eq!(buf.len(), len);
        assert_eq!(profile.tm_header_len(), len);
        assert_eq!(profile.decode_tm_header(&buf).unwrap(), hdr);
    }

    #[test]
    fn tm_header_rejects_wide_time_ref_status() {
        let profile = MissionProfile::pus_c();
        let hdr = TmSecondaryHeader {
            pus_version: profile.variant.version(),
            time_ref_status: 16,
            service: 3,
            sub_service: 25,
            msg_counter: Some(0),
            destination_id: 0,
            time: time(&profile),
        };
        assert!(matches!(
            profile.encode_tm_header(&hdr),
            Err(Error::Format(_))
        ));
    }

    #[test_case(MissionProfile::pus_a(), 4; "pus-a")]
    #[test_case(MissionProfile::pus_c(), 5; "pus-c")]
    #[test_case(MissionProfile::pus_c_compact(), 4; "pus-c compact")]
    fn tc_header_roundtrip(profile: MissionProfile, len: usize) {
        let hdr = TcSecondaryHeader {
            pus_version: profile.variant.version(),
            ack: AckFlags {
                acceptance: true,
                start: false,
                progress: false,
                completion: true,
            },
            service: 17,
            sub_service: 1,
            source_id: 0x21,
        };
        let buf = profile.encode_tc_header(&hdr).unwrap();
        assert_eq!(buf.len(), len);
        assert_eq!(profile.decode_tc_header(&buf).unwrap(), hdr);
    }

    #[test]
    fn pus_a_header_bits() {
        let profile = MissionProfile::pus_a();
        let hdr = profile
            .decode_tm_header(&[0x10, 0x03, 0x19, 0x0a, 0, 0, 0, 1, 0x80, 0])
            .unwrap();
        assert_eq!(hdr.pus_version, 1);
        assert_eq!(hdr.service, 3);
        assert_eq!(hdr.sub_service, 25);
        assert_eq!(hdr.destination_id, 10);
        assert_eq!(hdr.msg_counter, None);
        assert!((hdr.time.as_secs_f64() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn id_too_wide_for_variant() {
        let profile = MissionProfile::pus_c_compact();
        let tc = TcPacket::builder()
            .apid(0x10)
            .service(17)
            .sub_service(1)
            .source_id(0x100)
            .build();
        assert!(matches!(tc.encode(&profile), Err(Error::Format(_))));
    }

    #[test]
    fn tm_packet_roundtrip() {
        let profile = MissionProfile::pus_c();
        let bytes = TmPacket::builder()
            .apid(0x3c1)
            .sequence_id(99)
            .service(3)
            .sub_service(25)
            .msg_counter(7)
            .time(time(&profile))
            .data(vec![1, 2, 3, 4])
            .build()
            .encode(&profile)
            .unwrap();

        let packet = Packet::decode(&bytes).unwrap();
        assert_eq!(packet.header.packet_len(), bytes.len());
        assert!(packet.crc_ok());

        let tm = PusTm::from_packet(&packet, &profile).unwrap();
        assert!(tm.crc_ok);
        assert_eq!(tm.apid(), 0x3c1);
        assert_eq!(tm.header.sequence_id, 99);
        assert_eq!(tm.service(), 3);
        assert_eq!(tm.sub_service(), 25);
        assert_eq!(tm.secondary.msg_counter, Some(7));
        assert_eq!(tm.source_data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn crc_mismatch_still_decodes_header() {
        let profile = MissionProfile::pus_c_compact();
        let mut bytes = TmPacket::builder()
            .apid(0x20)
            .service(1)
            .sub_service(1)
            .time(time(&profile))
            .data(vec![9, 9])
            .build()
            .encode(&profile)
            .unwrap();
        let n = bytes.len();
        bytes[n - 3] ^= 0xff;

        let tm = PusTm::from_packet(&Packet::decode(&bytes).unwrap(), &profile).unwrap();
        assert!(!tm.crc_ok);
        assert_eq!(tm.service(), 1);
        assert_eq!(tm.source_data, vec![9, 0xf6]);
    }

    #[test]
    fn tc_packet_roundtrip() {
        let profile = MissionProfile::pus_a();
        let bytes = TcPacket::builder()
            .apid(0x11)
            .sequence_id(3)
            .service(17)
            .sub_service(1)
            .source_id(4)
            .build()
            .encode(&profile)
            .unwrap();
        let packet = Packet::decode(&bytes).unwrap();
        assert!(packet.is_tc());
        let tc = PusTc::from_packet(&packet, &profile).unwrap();
        assert!(tc.crc_ok);
        assert_eq!(tc.secondary.ack, AckFlags::all());
        assert_eq!(tc.secondary.source_id, 4);
        assert!(tc.app_data.is_empty());
        assert!(PusTm::from_packet(&packet, &profile).is_err());
    }

    #[test]
    fn short_packet_fails_closed() {
        let profile = MissionProfile::pus_c();
        let packet =
            Packet::decode(&[0x08, 0x01, 0xc0, 0x00, 0x00, 0x02, 0x20, 0x03, 0x19]).unwrap();
        assert!(matches!(
            PusTm::from_packet(&packet, &profile),
            Err(Error::NotEnoughData { .. })
        ));
    }

    #[test]
    fn profile_from_json() {
        let json = r#"{
            "name": "custom",
            "variant": "c_compact",
            "time": {"coarse_len": 4, "fine_len": 2, "resolution": "binary"},
            "time_sync": true,
            "epoch": "2018-01-01T00:00:00 TAI"
        }"#;
        let profile = MissionProfile::from_reader(json.as_bytes()).unwrap();
        assert!(profile.pec);
        assert_eq!(profile.tm_header_len(), 12);
        assert!(MissionProfile::by_name("pus-a").is_some());
        assert!(MissionProfile::by_name("nope").is_none());
    }
}
