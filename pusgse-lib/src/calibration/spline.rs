use ndarray::Array1;

/// Natural cubic spline through a set of points with strictly increasing `x`.
///
/// Outside the knots the spline continues linearly with the end slopes.
#[derive(Debug, Clone)]
pub struct Spline {
    xs: Array1<f64>,
    ys: Array1<f64>,
    /// Second derivatives at the knots.
    m: Array1<f64>,
}

impl Spline {
    /// Returns `None` for fewer than 2 points or `x` that is not strictly increasing.
    #[must_use]
    pub fn new(xs: &[f64], ys: &[f64]) -> Option<Self> {
        let n = xs.len();
        if n < 2 || n != ys.len() || xs.windows(2).any(|w| w[1] <= w[0]) {
            return None;
        }
        let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();

        // Tridiagonal system for the interior second derivatives (Thomas algorithm).
        let mut m = Array1::<f64>::zeros(n);
        if n > 2 {
            let k = n - 2;
            let mut diag = vec![0.0; k];
            let mut rhs = vec![0.0; k];
            for i in 0..k {
                diag[i] = 2.0 * (h[i] + h[i + 1]);
                rhs[i] = 6.0
                    * ((ys[i + 2] - ys[i + 1]) / h[i + 1] - (ys[i + 1] - ys[i]) / h[i]);
            }
            for i in 1..k {
                let w = h[i] / diag[i - 1];
                diag[i] -= w * h[i];
                rhs[i] -= w * rhs[i - 1];
            }
            m[k] = rhs[k - 1] / diag[k - 1];
            for i in (0..k - 1).rev() {
                m[i + 1] = (rhs[i] - h[i + 1] * m[i + 2]) / diag[i];
            }
        }

        Some(Self {
            xs: Array1::from(xs.to_vec()),
            ys: Array1::from(ys.to_vec()),
            m,
        })
    }

    #[must_use]
    pub fn first_x(&self) -> f64 {
        self.xs[0]
    }

    #[must_use]
    pub fn last_x(&self) -> f64 {
        self.xs[self.xs.len() - 1]
    }

    fn slope(&self, i: usize, at_end: bool) -> f64 {
        let h = self.xs[i + 1] - self.xs[i];
        let secant = (self.ys[i + 1] - self.ys[i]) / h;
        if at_end {
            secant + h * (2.0 * self.m[i + 1] + self.m[i]) / 6.0
        } else {
            secant - h * (2.0 * self.m[i] + self.m[i + 1]) / 6.0
        }
    }

    #[must_use]
    pub fn eval(&self, x: f64) -> f64 {
        let n = self.xs.len();
        if x <= self.xs[0] {
            return self.ys[0] + (x - self.xs[0]) * self.slope(0, false);
        }
        if x >= self.xs[n - 1] {
            return self.ys[n - 1] + (x - self.xs[n - 1]) * self.slope(n - 2, true);
        }
        let Some(xs) = self.xs.as_slice() else {
            return f64::NAN;
        };
        let i = xs.partition_point(|k| *k <= x) - 1;
        let h = self.xs[i + 1] - self.xs[i];
        let a = (self.xs[i + 1] - x) / h;
        let b = (x - self.xs[i]) / h;
        a * self.ys[i]
            + b * self.ys[i + 1]
            + ((a * a * a - a) * self.m[i] + (b * b * b - b) * self.m[i + 1]) * h * h / 6.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_through_knots() {
        let xs = [0.0, 1.0, 2.5, 4.0];
        let ys = [1.0, 3.0, 2.0, 5.0];
        let spline = Spline::new(&xs, &ys).unwrap();
        for (x, y) in xs.iter().zip(ys) {
            assert!((spline.eval(*x) - y).abs() < 1e-12);
        }
    }

    #[test]
    fn reproduces_line() {
        let xs: Vec<f64> = (0..10).map(f64::from).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 2.0 * x - 1.0).collect();
        let spline = Spline::new(&xs, &ys).unwrap();
        assert!((spline.eval(3.3) - 5.6).abs() < 1e-12);
        // linear continuation past the ends
        assert!((spline.eval(12.0) - 23.0).abs() < 1e-9);
        assert!((spline.eval(-2.0) + 5.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_unsorted() {
        assert!(Spline::new(&[0.0, 0.0, 1.0], &[1.0, 2.0, 3.0]).is_none());
        assert!(Spline::new(&[0.0], &[1.0]).is_none());
    }
}
