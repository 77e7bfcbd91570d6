//! Platinum resistance thermometers per DIN EN 60751.
use super::spline::Spline;

const A: f64 = 3.9083e-3;
const B: f64 = -5.775e-7;
const C: f64 = -4.183e-12;

/// Temperature range covered by the standard, in degrees Celsius.
pub const T_MIN: f64 = -200.0;
pub const T_MAX: f64 = 850.0;

/// Callendar-Van Dusen resistance at `t` degrees Celsius for a sensor with nominal
/// resistance `r0` at 0 degrees.
#[must_use]
pub fn resistance(r0: f64, t: f64) -> f64 {
    let mut r = 1.0 + A * t + B * t * t;
    if t < 0.0 {
        r += C * (t - 100.0) * t * t * t;
    }
    r0 * r
}

/// Resistance to temperature conversion by a spline pre-tabulated over the standard's
/// range at 1 degree steps.
#[derive(Debug, Clone)]
pub struct PrtCurve {
    pub r0: f64,
    spline: Spline,
}

impl PrtCurve {
    /// Returns `None` if `r0` is not positive.
    #[must_use]
    pub fn new(r0: f64) -> Option<Self> {
        if r0 <= 0.0 {
            return None;
        }
        let ts: Vec<f64> = (T_MIN as i32..=T_MAX as i32).map(f64::from).collect();
        let rs: Vec<f64> = ts.iter().map(|t| resistance(r0, *t)).collect();
        Some(Self {
            r0,
            spline: Spline::new(&rs, &ts)?,
        })
    }

    #[must_use]
    pub fn temperature(&self, r: f64) -> f64 {
        self.spline.eval(r)
    }

    #[must_use]
    pub fn resistance(&self, t: f64) -> f64 {
        resistance(self.r0, t)
    }

    /// Resistance range covered by the table.
    #[must_use]
    pub fn resistance_range(&self) -> (f64, f64) {
        (self.spline.first_x(), self.spline.last_x())
    }
}
