//! CCSDS Unsegmented Time Code (CUC).
//!
//! Reference: [CCSDS Time Code Formats](https://public.ccsds.org/Pubs/301x0b4e1.pdf)
//!
//! Missions differ in the number of coarse and fine octets, in how the fine field is
//! scaled (binary fractions of a second or microseconds) and in whether a trailing
//! synchronization byte follows the time code.
use hifitime::{Duration, Epoch};
use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// How the fine time field is normalized to a fraction of a second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FineResolution {
    /// 2^(8 * fine octets) ticks per second, e.g., 2^16 for 2 fine octets.
    Binary,
    /// 1e6 ticks per second.
    Micros,
}

/// CUC layout for a mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CucFormat {
    /// Number of coarse (seconds) octets, 1 to 4.
    pub coarse_len: usize,
    /// Number of fine octets, 0 to 3.
    pub fine_len: usize,
    pub resolution: FineResolution,
}

impl Default for CucFormat {
    fn default() -> Self {
        Self::new(4, 2, FineResolution::Binary)
    }
}

impl CucFormat {
    #[must_use]
    pub const fn new(coarse_len: usize, fine_len: usize, resolution: FineResolution) -> Self {
        Self {
            coarse_len,
            fine_len,
            resolution,
        }
    }

    /// Encoded length in bytes.
    #[must_use]
    pub fn len(&self, with_sync: bool) -> usize {
        self.coarse_len + self.fine_len + usize::from(with_sync)
    }

    #[must_use]
    pub fn ticks_per_second(&self) -> u64 {
        match self.resolution {
            FineResolution::Binary => 1u64 << (8 * self.fine_len),
            FineResolution::Micros => 1_000_000,
        }
    }

    /// # Errors
    /// [Error::Format] for field sizes that cannot be represented.
    pub fn validate(&self) -> Result<()> {
        if !(1..=4).contains(&self.coarse_len) {
            return Err(Error::Format(format!(
                "CUC coarse octets must be 1 to 4; got {}",
                self.coarse_len
            )));
        }
        if self.fine_len > 3 {
            return Err(Error::Format(format!(
                "CUC fine octets must be 0 to 3; got {}",
                self.fine_len
            )));
        }
        if self.resolution == FineResolution::Micros && self.fine_len < 3 {
            return Err(Error::Format(
                "microsecond CUC resolution requires 3 fine octets".to_string(),
            ));
        }
        Ok(())
    }

    /// Decode a time code occupying exactly `buf`.
    ///
    /// `buf` must be exactly the time code length, plus one if `with_sync` is set.
    ///
    /// # Errors
    /// [Error::Format] if the buffer length does not match or the fine field exceeds
    /// the resolution.
    pub fn decode(&self, buf: &[u8], with_sync: bool) -> Result<CucTime> {
        self.validate()?;
        let want = self.len(with_sync);
        if buf.len() != want {
            return Err(Error::Format(format!(
                "CUC length must be {} or {} bytes; got {}",
                self.len(false),
                self.len(true),
                buf.len()
            )));
        }
        let (coarse_bytes, rest) = buf.split_at(self.coarse_len);
        let (fine_bytes, sync_bytes) = rest.split_at(self.fine_len);
        let coarse = coarse_bytes
            .iter()
            .fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
        let fine = fine_bytes
            .iter()
            .fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
        let ticks = self.ticks_per_second();
        if u64::from(fine) >= ticks {
            return Err(Error::Format(format!(
                "CUC fine value {fine} exceeds {ticks} ticks per second"
            )));
        }

        Ok(CucTime {
            coarse,
            fine,
            ticks_per_second: ticks,
            sync: sync_bytes.first().map(|b| *b != 0),
        })
    }

    /// Encode `time`; a sync byte is written iff `time.sync` is set.
    ///
    /// # Errors
    /// [Error::Format] if the coarse or fine value does not fit this format.
    pub fn encode(&self, time: &CucTime) -> Result<Vec<u8>> {
        self.validate()?;
        if self.coarse_len < 4 && u64::from(time.coarse) >= 1u64 << (8 * self.coarse_len) {
            return Err(Error::Format(format!(
                "coarse time {} does not fit {} octets",
                time.coarse, self.coarse_len
            )));
        }
        let fine = rescale(time.fine, time.ticks_per_second, self.ticks_per_second());
        let mut out = Vec::with_capacity(self.len(time.sync.is_some()));
        out.extend_from_slice(&time.coarse.to_be_bytes()[4 - self.coarse_len..]);
        out.extend_from_slice(&fine.to_be_bytes()[4 - self.fine_len..]);
        if let Some(sync) = time.sync {
            out.push(u8::from(sync));
        }
        Ok(out)
    }
}

fn rescale(fine: u32, from: u64, to: u64) -> u32 {
    if from == to || from == 0 {
        return fine;
    }
    let scaled = (u128::from(fine) * u128::from(to) + u128::from(from) / 2) / u128::from(from);
    scaled.min(u128::from(to - 1)) as u32
}

/// A decoded CUC time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CucTime {
    /// Seconds since the mission epoch.
    pub coarse: u32,
    /// Fractional seconds in ticks.
    pub fine: u32,
    pub ticks_per_second: u64,
    /// Time synchronization status, if the time code carried a sync byte.
    pub sync: Option<bool>,
}

impl CucTime {
    /// Construct from seconds since the mission epoch, rounding the fraction to the
    /// nearest tick of `format`.
    #[must_use]
    pub fn from_secs_f64(secs: f64, format: &CucFormat, sync: Option<bool>) -> Self {
        let ticks = format.ticks_per_second();
        let secs = secs.max(0.0);
        let mut coarse = secs.trunc() as u64;
        let mut fine = (secs.fract() * ticks as f64).round() as u64;
        if fine >= ticks {
            coarse += 1;
            fine = 0;
        }
        Self {
            coarse: coarse.min(u64::from(u32::MAX)) as u32,
            fine: fine as u32,
            ticks_per_second: ticks,
            sync,
        }
    }

    /// Fractional part of the time as seconds.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        f64::from(self.fine) / self.ticks_per_second as f64
    }

    #[must_use]
    pub fn as_secs_f64(&self) -> f64 {
        f64::from(self.coarse) + self.fraction()
    }

    /// Absolute time given the mission epoch this time code counts from.
    #[must_use]
    pub fn epoch(&self, mission_epoch: Epoch) -> Epoch {
        let fine_nanos =
            u128::from(self.fine) * 1_000_000_000 / u128::from(self.ticks_per_second.max(1));
        let nanos = i128::from(self.coarse) * 1_000_000_000 + fine_nanos as i128;
        mission_epoch + Duration::from_total_nanoseconds(nanos)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use test_case::test_case;

    #[test]
    fn binary_fine_with_sync() {
        let format = CucFormat::new(4, 2, FineResolution::Binary);
        let time = CucTime::from_secs_f64(1000.5, &format, Some(true));
        let buf = format.encode(&time).unwrap();
        assert_eq!(buf, vec![0x00, 0x00, 0x03, 0xe8, 0x80, 0x00, 0x01]);

        let decoded = format.decode(&buf, true).unwrap();
        assert!((decoded.as_secs_f64() - 1000.5).abs() <= 1.0 / 65536.0);
        assert_eq!(decoded.sync, Some(true));
    }

    #[test]
    fn micros_fine() {
        let format = CucFormat::new(4, 3, FineResolution::Micros);
        let buf = [0x00, 0x00, 0x00, 0x0a, 0x07, 0xa1, 0x20];
        let time = format.decode(&buf, false).unwrap();
        assert_eq!(time.coarse, 10);
        assert_eq!(time.fine, 500_000);
        assert_eq!(time.sync, None);
        assert!((time.as_secs_f64() - 10.5).abs() < 1e-9);
    }

    #[test_case(5; "too short")]
    #[test_case(8; "too long")]
    #[test_case(0; "empty")]
    fn wrong_length_is_format_error(len: usize) {
        let format = CucFormat::default();
        let buf = vec![0u8; len];
        assert!(matches!(format.decode(&buf, false), Err(Error::Format(_))));
        assert!(matches!(format.decode(&buf, true), Err(Error::Format(_))));
    }

    #[test]
    fn sync_byte_selects_length() {
        let format = CucFormat::default();
        assert!(format.decode(&[0u8; 6], false).is_ok());
        assert!(format.decode(&[0u8; 6], true).is_err());
        assert!(format.decode(&[0u8; 7], true).is_ok());
    }

    #[test]
    fn micros_out_of_range() {
        let format = CucFormat::new(4, 3, FineResolution::Micros);
        let buf = [0, 0, 0, 1, 0x0f, 0x42, 0x40]; // 1_000_000 us
        assert!(format.decode(&buf, false).is_err());
    }

    #[test]
    fn encode_rescales_between_resolutions() {
        let micros = CucFormat::new(4, 3, FineResolution::Micros);
        let binary = CucFormat::new(4, 2, FineResolution::Binary);
        let time = CucTime::from_secs_f64(7.25, &micros, None);
        let buf = binary.encode(&time).unwrap();
        let decoded = binary.decode(&buf, false).unwrap();
        assert_eq!(decoded.fine, 0x4000);
        assert_eq!(decoded.coarse, 7);
    }

    #[test]
    fn coarse_overflow() {
        let format = CucFormat::new(2, 2, FineResolution::Binary);
        let time = CucTime::from_secs_f64(70_000.0, &format, None);
        assert!(format.encode(&time).is_err());
    }

    #[test]
    fn epoch_offset() {
        let mission_epoch = Epoch::from_str("2000-01-01T00:00:00 TAI").unwrap();
        let format = CucFormat::default();
        let time = CucTime::from_secs_f64(86400.25, &format, None);
        let expected = Epoch::from_str("2000-01-02T00:00:00.25 TAI").unwrap();
        assert_eq!(time.epoch(mission_epoch), expected);
    }
}
