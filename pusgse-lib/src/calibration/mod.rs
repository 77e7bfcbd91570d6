//! Conversion between raw ADC counts and engineering values.
//!
//! Each signal has exactly one [Curve] and its inverse. Signals are grouped in an
//! immutable [Calibrations] context, built from the database embedded at compile time
//! or from a file.
//!
//! Inputs outside a signal's calibrated range are still converted, by extrapolation or by
//! the curve's fallback regime, but the result is flagged with `in_range = false` and a
//! warning is logged.
mod poly;
mod prt;
mod spline;

use std::{collections::BTreeMap, collections::HashSet, fs::File, io::Read, io::Write, path::Path};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::prelude::*;

pub use poly::Polynomial;
pub use prt::{resistance as prt_resistance, PrtCurve};
pub use spline::Spline;

const CALIBRATIONSDB: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/src/calibration/calibrations.json"
));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalCategory {
    Voltage,
    Current,
    Temperature,
    Resistance,
}

impl SignalCategory {
    /// Whether signals of this category may be calibrated with `curve`. The CCD
    /// two-regime curve only applies to temperatures and PRT curves only to
    /// resistance-based temperature sensors.
    #[must_use]
    pub fn accepts(self, curve: &Curve) -> bool {
        match curve {
            Curve::Linear { .. } | Curve::Table { .. } | Curve::Polynomial { .. } => true,
            Curve::TwoRegime { .. } => self == Self::Temperature,
            Curve::Prt { .. } => matches!(self, Self::Temperature | Self::Resistance),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    #[default]
    Linear,
    Spline,
}

/// Raw to engineering transfer function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Curve {
    /// `gain * raw + offset`
    Linear { gain: f64, offset: f64 },
    /// `(raw, eng)` points in increasing raw order.
    Table {
        points: Vec<[f64; 2]>,
        #[serde(default)]
        interpolation: Interpolation,
    },
    /// Coefficients in ascending order of power of raw.
    Polynomial { coefficients: Vec<f64> },
    /// Polynomial of `degree` fitted to the operational `table`, used for raw values
    /// between the table's raw extrema. Outside of them `gain * raw + offset`.
    TwoRegime {
        table: Vec<[f64; 2]>,
        degree: usize,
        gain: f64,
        offset: f64,
    },
    /// Platinum resistance thermometer with nominal resistance `r0` whose resistance
    /// is measured as `gain * raw + offset` ohms.
    Prt { r0: f64, gain: f64, offset: f64 },
}

impl Curve {
    fn kind(&self) -> &'static str {
        match self {
            Self::Linear { .. } => "linear",
            Self::Table { .. } => "table",
            Self::Polynomial { .. } => "polynomial",
            Self::TwoRegime { .. } => "two_regime",
            Self::Prt { .. } => "prt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalCalibration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: SignalCategory,
    #[serde(default)]
    pub unit: String,
    /// Calibrated raw range. Curves built on tables derive it from the table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<[f64; 2]>,
    pub curve: Curve,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct CalibrationsDb {
    signals: Vec<SignalCalibration>,
}

/// A converted value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibrated {
    pub value: f64,
    /// False if the input was outside the calibrated range.
    pub in_range: bool,
}

/// Compiled form of a [Curve], with fits and splines computed once.
#[derive(Debug, Clone)]
enum Transfer {
    Linear { gain: f64, offset: f64 },
    Table { xs: Vec<f64>, ys: Vec<f64>, spline: Option<Spline> },
    Polynomial(Polynomial),
    TwoRegime { fit: Polynomial, lo: f64, hi: f64, gain: f64, offset: f64 },
    Prt { curve: PrtCurve, gain: f64, offset: f64 },
}

#[derive(Debug, Clone)]
struct Compiled {
    signal: SignalCalibration,
    transfer: Transfer,
    domain: Option<(f64, f64)>,
}

fn split_table(name: &str, points: &[[f64; 2]]) -> Result<(Vec<f64>, Vec<f64>)> {
    let invalid = |reason: &str| Error::Calibration {
        signal: name.to_string(),
        reason: reason.to_string(),
    };
    if points.len() < 2 {
        return Err(invalid("table needs at least 2 points"));
    }
    if points.windows(2).any(|w| w[1][0] <= w[0][0]) {
        return Err(invalid("table raw values must be strictly increasing"));
    }
    Ok(points.iter().map(|p| (p[0], p[1])).unzip())
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Find `x` in `[lo, hi]` with `f(x) == target` for monotonic `f`.
fn bisect(f: impl Fn(f64) -> f64, lo: f64, hi: f64, target: f64) -> f64 {
    let increasing = f(hi) >= f(lo);
    let (mut lo, mut hi) = (lo, hi);
    for _ in 0..200 {
        let mid = (lo + hi) / 2.0;
        if (f(mid) < target) == increasing {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-9 {
            break;
        }
    }
    (lo + hi) / 2.0
}

impl Compiled {
    fn new(signal: SignalCalibration) -> Result<Self> {
        let invalid = |reason: &str| Error::Calibration {
            signal: signal.name.clone(),
            reason: reason.to_string(),
        };
        if !signal.category.accepts(&signal.curve) {
            return Err(invalid(&format!(
                "{} curve cannot calibrate a {:?} signal",
                signal.curve.kind(),
                signal.category
            )));
        }
        let explicit = signal.range.map(|[lo, hi]| ordered(lo, hi));
        let (transfer, derived) = match &signal.curve {
            Curve::Linear { gain, offset } => {
                if *gain == 0.0 {
                    return Err(invalid("linear gain must be non-zero"));
                }
                (
                    Transfer::Linear {
                        gain: *gain,
                        offset: *offset,
                    },
                    None,
                )
            }
            Curve::Table {
                points,
                interpolation,
            } => {
                let (xs, ys) = split_table(&signal.name, points)?;
                let spline = match interpolation {
                    Interpolation::Linear => None,
                    Interpolation::Spline => Some(
                        Spline::new(&xs, &ys).ok_or_else(|| invalid("cannot build spline"))?,
                    ),
                };
                let domain = (xs[0], xs[xs.len() - 1]);
                (Transfer::Table { xs, ys, spline }, Some(domain))
            }
            Curve::Polynomial { coefficients } => {
                if coefficients.is_empty() {
                    return Err(invalid("polynomial has no coefficients"));
                }
                if explicit.is_none() {
                    return Err(invalid("polynomial curve needs a raw range"));
                }
                (Transfer::Polynomial(Polynomial::new(coefficients.clone())), None)
            }
            Curve::TwoRegime {
                table,
                degree,
                gain,
                offset,
            } => {
                if *gain == 0.0 {
                    return Err(invalid("linear gain must be non-zero"));
                }
                let (xs, ys) = split_table(&signal.name, table)?;
                let fit = Polynomial::fit(&xs, &ys, *degree)
                    .ok_or_else(|| invalid("table does not determine the polynomial fit"))?;
                let (lo, hi) = (xs[0], xs[xs.len() - 1]);
                (
                    Transfer::TwoRegime {
                        fit,
                        lo,
                        hi,
                        gain: *gain,
                        offset: *offset,
                    },
                    Some((lo, hi)),
                )
            }
            Curve::Prt { r0, gain, offset } => {
                if *gain == 0.0 {
                    return Err(invalid("resistance gain must be non-zero"));
                }
                let curve = PrtCurve::new(*r0).ok_or_else(|| invalid("r0 must be positive"))?;
                let (rmin, rmax) = curve.resistance_range();
                let domain = ordered((rmin - offset) / gain, (rmax - offset) / gain);
                (
                    Transfer::Prt {
                        curve,
                        gain: *gain,
                        offset: *offset,
                    },
                    Some(domain),
                )
            }
        };
        Ok(Self {
            domain: explicit.or(derived),
            signal,
            transfer,
        })
    }

    fn forward(&self, raw: f64) -> f64 {
        match &self.transfer {
            Transfer::Linear { gain, offset } => gain * raw + offset,
            Transfer::Table { spline: Some(s), .. } => s.eval(raw),
            Transfer::Table { xs, ys, spline: None } => {
                let n = xs.len();
                let i = xs.partition_point(|x| *x <= raw).clamp(1, n - 1) - 1;
                ys[i] + (raw - xs[i]) * (ys[i + 1] - ys[i]) / (xs[i + 1] - xs[i])
            }
            Transfer::Polynomial(p) => p.eval(raw),
            Transfer::TwoRegime {
                fit,
                lo,
                hi,
                gain,
                offset,
            } => {
                if (*lo..=*hi).contains(&raw) {
                    fit.eval(raw)
                } else {
                    gain * raw + offset
                }
            }
            Transfer::Prt {
                curve,
                gain,
                offset,
            } => curve.temperature(gain * raw + offset),
        }
    }

    fn inverse(&self, value: f64) -> f64 {
        match &self.transfer {
            Transfer::Linear { gain, offset } => (value - offset) / gain,
            Transfer::Prt {
                curve,
                gain,
                offset,
            } => (curve.resistance(value) - offset) / gain,
            Transfer::TwoRegime {
                fit,
                lo,
                hi,
                gain,
                offset,
            } => {
                let (emin, emax) = ordered(fit.eval(*lo), fit.eval(*hi));
                if (emin..=emax).contains(&value) {
                    bisect(|x| fit.eval(x), *lo, *hi, value)
                } else {
                    (value - offset) / gain
                }
            }
            Transfer::Table { .. } | Transfer::Polynomial(_) => {
                // both have a domain; see Compiled::new
                let (lo, hi) = self.domain.unwrap_or((0.0, 0.0));
                let (flo, fhi) = (self.forward(lo), self.forward(hi));
                let (emin, emax) = ordered(flo, fhi);
                if (emin..=emax).contains(&value) {
                    return bisect(|x| self.forward(x), lo, hi, value);
                }
                // extend linearly from the nearer end
                let (end, fend) = if (value - flo).abs() <= (value - fhi).abs() {
                    (lo, flo)
                } else {
                    (hi, fhi)
                };
                let d = ((hi - lo) * 1e-3).max(1e-9);
                let slope = (self.forward(end + d) - self.forward(end - d)) / (2.0 * d);
                if slope == 0.0 {
                    return end;
                }
                end + (value - fend) / slope
            }
        }
    }

    fn in_domain(&self, raw: f64) -> bool {
        self.domain
            .map_or(true, |(lo, hi)| raw >= lo - 1e-9 && raw <= hi + 1e-9)
    }
}

/// Immutable set of signal calibrations.
///
/// # Example
/// ```
/// use pusgse::calibration::Calibrations;
///
/// let cals = Calibrations::builtin().unwrap();
/// let volts = cals.raw_to_eng(3300.0, "VCC_3V3").unwrap();
/// assert!((volts.value - 3.3).abs() < 1e-9);
/// assert!(volts.in_range);
/// ```
#[derive(Debug, Clone)]
pub struct Calibrations {
    signals: BTreeMap<String, Compiled>,
}

impl Calibrations {
    /// # Errors
    /// [Error::Calibration] if any signal's curve is invalid.
    pub fn new(signals: Vec<SignalCalibration>) -> Result<Self> {
        let signals = signals
            .into_iter()
            .map(|s| Ok((s.name.clone(), Compiled::new(s)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        debug!(signals = signals.len(), "loaded calibrations");
        Ok(Self { signals })
    }

    /// The calibration database embedded at compile time.
    ///
    /// # Errors
    /// If the embedded database is invalid.
    pub fn builtin() -> Result<Self> {
        let db: CalibrationsDb = serde_json::from_str(CALIBRATIONSDB)?;
        Self::new(db.signals)
    }

    /// # Errors
    /// [Error::Json] or [Error::Calibration] for invalid input.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let db: CalibrationsDb = serde_json::from_reader(reader)?;
        Self::new(db.signals)
    }

    /// Load calibrations from a file. If `built_in` is set, built-in signals not
    /// defined in the file are added.
    ///
    /// # Errors
    /// [Error::Io] if the file cannot be read, otherwise see [Self::from_reader].
    pub fn with_file<P: AsRef<Path>>(path: P, built_in: bool) -> Result<Self> {
        let mut db: CalibrationsDb = serde_json::from_reader(File::open(path)?)?;
        if built_in {
            let file_names: HashSet<String> = db.signals.iter().map(|s| s.name.clone()).collect();
            let builtin: CalibrationsDb = serde_json::from_str(CALIBRATIONSDB)?;
            for signal in builtin.signals {
                // file definitions take precedence
                if !file_names.contains(&signal.name) {
                    db.signals.push(signal);
                }
            }
        }
        Self::new(db.signals)
    }

    #[must_use]
    pub fn get(&self, signal: &str) -> Option<&SignalCalibration> {
        self.signals.get(signal).map(|c| &c.signal)
    }

    pub fn signals(&self) -> impl Iterator<Item = &SignalCalibration> {
        self.signals.values().map(|c| &c.signal)
    }

    /// Calibrated raw range of `signal`, if it has one.
    #[must_use]
    pub fn range(&self, signal: &str) -> Option<(f64, f64)> {
        self.signals.get(signal)?.domain
    }

    fn compiled(&self, signal: &str) -> Result<&Compiled> {
        self.signals
            .get(signal)
            .ok_or_else(|| Error::UnknownSignal(signal.to_string()))
    }

    /// # Errors
    /// [Error::UnknownSignal] if there is no calibration for `signal`.
    pub fn raw_to_eng(&self, raw: f64, signal: &str) -> Result<Calibrated> {
        let cal = self.compiled(signal)?;
        let in_range = cal.in_domain(raw);
        if !in_range {
            warn!(signal, raw, "raw value outside calibrated range");
        }
        Ok(Calibrated {
            value: cal.forward(raw),
            in_range,
        })
    }

    /// Inverse of [Self::raw_to_eng], rounded to whole counts.
    ///
    /// # Errors
    /// [Error::UnknownSignal] if there is no calibration for `signal`.
    pub fn eng_to_raw(&self, value: f64, signal: &str) -> Result<Calibrated> {
        let cal = self.compiled(signal)?;
        let raw = cal.inverse(value);
        let in_range = cal.in_domain(raw);
        if !in_range {
            warn!(signal, value, "engineering value outside calibrated range");
        }
        Ok(Calibrated {
            value: raw.round(),
            in_range,
        })
    }

    /// Write the two-column `raw<TAB>eng` table for `signal` over its calibrated range,
    /// every `step` counts.
    ///
    /// # Errors
    /// [Error::UnknownSignal], [Error::Calibration] if the signal has no calibrated
    /// range, or [Error::Io].
    pub fn write_table<W: Write>(&self, signal: &str, mut writer: W, step: usize) -> Result<()> {
        let cal = self.compiled(signal)?;
        let (lo, hi) = cal.domain.ok_or_else(|| Error::Calibration {
            signal: signal.to_string(),
            reason: "no calibrated range".to_string(),
        })?;
        let step = step.max(1) as f64;
        writeln!(writer, "# raw\t{} [{}]", cal.signal.name, cal.signal.unit)?;
        let mut raw = lo.ceil();
        while raw <= hi {
            writeln!(writer, "{raw:.0}\t{:.6}", cal.forward(raw))?;
            raw += step;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn linear(name: &str) -> SignalCalibration {
        SignalCalibration {
            name: name.to_string(),
            description: String::new(),
            category: SignalCategory::Voltage,
            unit: "V".to_string(),
            range: Some([0.0, 100.0]),
            curve: Curve::Linear {
                gain: 2.0,
                offset: 1.0,
            },
        }
    }

    #[test]
    fn builtin_roundtrip_within_one_count() {
        let cals = Calibrations::builtin().unwrap();
        for signal in cals.signals() {
            let (lo, hi) = cals.range(&signal.name).unwrap();
            let mut raw = lo.ceil();
            while raw <= hi {
                let eng = cals.raw_to_eng(raw, &signal.name).unwrap();
                assert!(eng.in_range, "{} raw={raw}", signal.name);
                let back = cals.eng_to_raw(eng.value, &signal.name).unwrap();
                assert!(
                    (back.value - raw).abs() <= 1.0,
                    "{} raw={raw} eng={} back={}",
                    signal.name,
                    eng.value,
                    back.value
                );
                raw += 7.0;
            }
        }
    }

    #[test]
    fn ccd_regimes_are_continuous() {
        let cals = Calibrations::builtin().unwrap();
        let Some(SignalCalibration {
            curve: Curve::TwoRegime { gain, offset, .. },
            ..
        }) = cals.get("TEMP_CCD").cloned()
        else {
            panic!("TEMP_CCD is not a two-regime curve");
        };
        let (lo, hi) = cals.range("TEMP_CCD").unwrap();
        let eng = |raw: f64| cals.raw_to_eng(raw, "TEMP_CCD").unwrap();

        for boundary in [lo, hi] {
            let fitted = eng(boundary);
            assert!(fitted.in_range);
            assert!((fitted.value - (gain * boundary + offset)).abs() < gain);
        }
        assert!(!eng(lo - 1.0).in_range);
        assert!((eng(lo).value - eng(lo - 1.0).value).abs() <= gain + 1e-6);
        assert!(!eng(hi + 1.0).in_range);
        assert!((eng(hi + 1.0).value - eng(hi).value).abs() <= gain + 1e-6);
    }

    #[test]
    fn ccd_fallback_regime_inverse() {
        let cals = Calibrations::builtin().unwrap();
        // 20 degC is far above the operational table
        let raw = cals.eng_to_raw(20.0, "TEMP_CCD").unwrap();
        assert!(!raw.in_range);
        assert_eq!(raw.value, 5863.0);
    }

    #[test]
    fn prt_temperature() {
        let cals = Calibrations::builtin().unwrap();
        // 1385.055 ohm at 0.5 ohm per count
        let t = cals.raw_to_eng(2770.11, "TEMP_FEE").unwrap();
        assert!((t.value - 100.0).abs() < 1e-3);
        assert!(t.in_range);
        assert!(!cals.raw_to_eng(100.0, "TEMP_FEE").unwrap().in_range);
    }

    #[test]
    fn linear_out_of_range_still_converts() {
        let cals = Calibrations::new(vec![linear("V")]).unwrap();
        let eng = cals.raw_to_eng(200.0, "V").unwrap();
        assert_eq!(eng.value, 401.0);
        assert!(!eng.in_range);
        let raw = cals.eng_to_raw(21.0, "V").unwrap();
        assert_eq!(raw.value, 10.0);
        assert!(raw.in_range);
    }

    #[test]
    fn table_extrapolates() {
        let mut sig = linear("T");
        sig.range = None;
        sig.curve = Curve::Table {
            points: vec![[0.0, 0.0], [10.0, 100.0], [20.0, 150.0]],
            interpolation: Interpolation::Linear,
        };
        let cals = Calibrations::new(vec![sig]).unwrap();
        assert_eq!(cals.raw_to_eng(15.0, "T").unwrap().value, 125.0);
        let beyond = cals.raw_to_eng(30.0, "T").unwrap();
        assert_eq!(beyond.value, 200.0);
        assert!(!beyond.in_range);
        assert_eq!(cals.eng_to_raw(200.0, "T").unwrap().value, 30.0);
        assert_eq!(cals.eng_to_raw(125.0, "T").unwrap().value, 15.0);
    }

    #[test]
    fn invalid_curves() {
        let mut sig = linear("BAD");
        sig.curve = Curve::Table {
            points: vec![[1.0, 0.0], [1.0, 1.0]],
            interpolation: Interpolation::Linear,
        };
        assert!(matches!(
            Calibrations::new(vec![sig.clone()]),
            Err(Error::Calibration { .. })
        ));
        sig.curve = Curve::Linear {
            gain: 0.0,
            offset: 0.0,
        };
        assert!(Calibrations::new(vec![sig.clone()]).is_err());
        sig.range = None;
        sig.curve = Curve::Polynomial {
            coefficients: vec![1.0, 2.0],
        };
        assert!(Calibrations::new(vec![sig]).is_err());
    }

    #[test]
    fn curve_must_suit_category() {
        let mut sig = linear("V");
        sig.curve = Curve::Prt {
            r0: 1000.0,
            gain: 1.0,
            offset: 0.0,
        };
        let err = Calibrations::new(vec![sig.clone()]).unwrap_err();
        assert!(matches!(err, Error::Calibration { ref signal, .. } if signal == "V"));

        sig.category = SignalCategory::Resistance;
        assert!(Calibrations::new(vec![sig.clone()]).is_ok());

        sig.curve = Curve::TwoRegime {
            table: vec![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]],
            degree: 1,
            gain: 1.0,
            offset: 0.0,
        };
        assert!(Calibrations::new(vec![sig]).is_err());
    }

    #[test]
    fn unknown_signal() {
        let cals = Calibrations::builtin().unwrap();
        assert!(matches!(
            cals.raw_to_eng(1.0, "NOPE"),
            Err(Error::UnknownSignal(_))
        ));
    }

    #[test]
    fn with_file() {
        let tmpdir = tempfile::tempdir().unwrap();
        let path = tmpdir.path().join("calibrations.json");
        let mut sig = linear("VCC_3V3");
        sig.description = "override".to_string();
        fs::write(
            &path,
            serde_json::to_string(&CalibrationsDb { signals: vec![sig] }).unwrap(),
        )
        .unwrap();

        let cals = Calibrations::with_file(&path, false).unwrap();
        assert_eq!(cals.signals().count(), 1);

        let cals = Calibrations::with_file(&path, true).unwrap();
        assert!(cals.signals().count() > 1);
        assert_eq!(cals.get("VCC_3V3").unwrap().description, "override");
    }

    #[test]
    fn table_output() {
        let cals = Calibrations::new(vec![linear("V")]).unwrap();
        let mut out = Vec::new();
        cals.write_table("V", &mut out, 50).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# raw\tV [V]");
        assert_eq!(lines[1..], ["0\t1.000000", "50\t101.000000", "100\t201.000000"]);
    }
}
