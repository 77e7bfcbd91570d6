//! SCOS-2000 parameter type (PTC) and format (PFC) codes.
use serde::{Deserialize, Serialize};

use crate::bits::BitCursor;
use crate::prelude::*;
use crate::timecode::{CucFormat, CucTime, FineResolution};

/// How a parameter value is laid out in a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamFormat {
    Bool,
    /// Enumerated value of the given number of bits.
    Enumerated(usize),
    Unsigned(usize),
    Signed(usize),
    Real32,
    Real64,
    BitString(usize),
    /// Octet string of a fixed number of bytes, or length-prefixed if `None`.
    Octets(Option<usize>),
    /// ASCII string of a fixed number of bytes, or length-prefixed if `None`.
    Ascii(Option<usize>),
    AbsoluteTime(CucFormat),
    RelativeTime(CucFormat),
}

/// Bits in an unsigned or signed integer of the given PFC.
fn integer_bits(ptc: u8, pfc: u16) -> Result<usize> {
    match pfc {
        0..=12 => Ok(pfc as usize + 4),
        13 => Ok(24),
        14 => Ok(32),
        15 => Ok(48),
        16 => Ok(64),
        _ => Err(Error::UnsupportedFormat { ptc, pfc }),
    }
}

fn cuc(ptc: u8, pfc: u16) -> Result<CucFormat> {
    if !(3..=18).contains(&pfc) {
        return Err(Error::UnsupportedFormat { ptc, pfc });
    }
    let pfc = usize::from(pfc - 3);
    Ok(CucFormat::new(pfc / 4 + 1, pfc % 4, FineResolution::Binary))
}

impl ParamFormat {
    /// Resolve a PTC/PFC pair.
    ///
    /// # Errors
    /// [Error::UnsupportedFormat] for pairs with no fixed binary representation here,
    /// e.g., deduced types (PTC 11) or MIL-STD floats.
    pub fn from_ptc_pfc(ptc: u8, pfc: u16) -> Result<Self> {
        let unsupported = || Error::UnsupportedFormat { ptc, pfc };
        match ptc {
            1 if pfc == 0 => Ok(Self::Bool),
            2 if (1..=32).contains(&pfc) => Ok(Self::Enumerated(pfc as usize)),
            3 => Ok(Self::Unsigned(integer_bits(ptc, pfc)?)),
            4 => Ok(Self::Signed(integer_bits(ptc, pfc)?)),
            5 => match pfc {
                1 => Ok(Self::Real32),
                2 => Ok(Self::Real64),
                _ => Err(unsupported()),
            },
            6 if (1..=32).contains(&pfc) => Ok(Self::BitString(pfc as usize)),
            7 => Ok(Self::Octets((pfc > 0).then_some(pfc as usize))),
            8 => Ok(Self::Ascii((pfc > 0).then_some(pfc as usize))),
            9 => Ok(Self::AbsoluteTime(cuc(ptc, pfc)?)),
            10 => Ok(Self::RelativeTime(cuc(ptc, pfc)?)),
            _ => Err(unsupported()),
        }
    }

    /// Width on the wire, or `None` if it depends on the data.
    #[must_use]
    pub fn bit_width(&self) -> Option<usize> {
        match self {
            Self::Bool => Some(1),
            Self::Enumerated(n) | Self::Unsigned(n) | Self::Signed(n) | Self::BitString(n) => {
                Some(*n)
            }
            Self::Real32 => Some(32),
            Self::Real64 => Some(64),
            Self::Octets(n) | Self::Ascii(n) => n.map(|n| n * 8),
            Self::AbsoluteTime(f) | Self::RelativeTime(f) => Some(f.len(false) * 8),
        }
    }

    /// Read one value at the cursor.
    ///
    /// # Errors
    /// [Error::Range] if the value extends past the data.
    pub fn read(&self, cur: &mut BitCursor) -> Result<Value> {
        Ok(match self {
            Self::Bool => Value::Bool(cur.read(1)? == 1),
            Self::Enumerated(n) | Self::Unsigned(n) | Self::BitString(n) => {
                Value::Unsigned(cur.read(*n)?)
            }
            Self::Signed(n) => Value::Signed(cur.read_signed(*n)?),
            Self::Real32 => Value::Real(f64::from(f32::from_bits(cur.read(32)? as u32))),
            Self::Real64 => Value::Real(f64::from_bits(cur.read(64)?)),
            Self::Octets(n) => {
                let n = match n {
                    Some(n) => *n,
                    None => cur.read(8)? as usize,
                };
                Value::Octets(cur.read_bytes(n)?)
            }
            Self::Ascii(n) => {
                let n = match n {
                    Some(n) => *n,
                    None => cur.read(8)? as usize,
                };
                let bytes = cur.read_bytes(n)?;
                let text = String::from_utf8_lossy(&bytes);
                Value::Ascii(text.trim_end_matches('\0').to_string())
            }
            Self::AbsoluteTime(f) | Self::RelativeTime(f) => {
                let bytes = cur.read_bytes(f.len(false))?;
                Value::Time(f.decode(&bytes, false)?)
            }
        })
    }
}

/// A decoded parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Unsigned(u64),
    Signed(i64),
    Real(f64),
    #[serde(with = "serde_bytes")]
    Octets(Vec<u8>),
    Ascii(String),
    Time(CucTime),
}

impl Value {
    /// Numeric value, for calibration and display.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            Self::Unsigned(v) => Some(*v as f64),
            Self::Signed(v) => Some(*v as f64),
            Self::Real(v) => Some(*v),
            Self::Time(t) => Some(t.as_secs_f64()),
            Self::Octets(_) | Self::Ascii(_) => None,
        }
    }

    /// Value as a repetition count.
    ///
    /// # Errors
    /// [Error::Format] if the value is not a non-negative integer.
    pub fn as_count(&self) -> Result<u64> {
        match self {
            Self::Unsigned(v) => Ok(*v),
            Self::Signed(v) if *v >= 0 => Ok(*v as u64),
            other => Err(Error::Format(format!(
                "{other:?} cannot be used as a group repeat count"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(1, 0, ParamFormat::Bool)]
    #[test_case(2, 3, ParamFormat::Enumerated(3))]
    #[test_case(3, 0, ParamFormat::Unsigned(4))]
    #[test_case(3, 4, ParamFormat::Unsigned(8))]
    #[test_case(3, 12, ParamFormat::Unsigned(16))]
    #[test_case(3, 13, ParamFormat::Unsigned(24))]
    #[test_case(3, 14, ParamFormat::Unsigned(32))]
    #[test_case(4, 16, ParamFormat::Signed(64))]
    #[test_case(5, 1, ParamFormat::Real32)]
    #[test_case(5, 2, ParamFormat::Real64)]
    #[test_case(6, 12, ParamFormat::BitString(12))]
    #[test_case(7, 0, ParamFormat::Octets(None))]
    #[test_case(8, 6, ParamFormat::Ascii(Some(6)))]
    #[test_case(9, 17, ParamFormat::AbsoluteTime(CucFormat::new(4, 2, FineResolution::Binary)))]
    #[test_case(10, 3, ParamFormat::RelativeTime(CucFormat::new(1, 0, FineResolution::Binary)))]
    fn ptc_pfc_mapping(ptc: u8, pfc: u16, expected: ParamFormat) {
        assert_eq!(ParamFormat::from_ptc_pfc(ptc, pfc).unwrap(), expected);
    }

    #[test_case(3, 17)]
    #[test_case(5, 3)]
    #[test_case(9, 0)]
    #[test_case(11, 0)]
    #[test_case(13, 0)]
    fn unsupported(ptc: u8, pfc: u16) {
        assert!(matches!(
            ParamFormat::from_ptc_pfc(ptc, pfc),
            Err(Error::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn read_values() {
        let mut dat = vec![0xff, 0xfe];
        dat.extend_from_slice(&1.5f32.to_be_bytes());
        dat.extend_from_slice(&[3, b'a', b'b', b'c', b'o', b'k', 0, 0]);
        let mut cur = BitCursor::new(&dat);

        assert_eq!(
            ParamFormat::Signed(16).read(&mut cur).unwrap(),
            Value::Signed(-2)
        );
        assert_eq!(
            ParamFormat::Real32.read(&mut cur).unwrap(),
            Value::Real(1.5)
        );
        assert_eq!(
            ParamFormat::Ascii(None).read(&mut cur).unwrap(),
            Value::Ascii("abc".to_string())
        );
        assert_eq!(
            ParamFormat::Ascii(Some(4)).read(&mut cur).unwrap(),
            Value::Ascii("ok".to_string())
        );
        assert_eq!(cur.remaining_bits(), 0);
    }

    #[test]
    fn count_from_real_fails() {
        assert!(Value::Real(2.0).as_count().is_err());
        assert_eq!(Value::Unsigned(2).as_count().unwrap(), 2);
    }
}
