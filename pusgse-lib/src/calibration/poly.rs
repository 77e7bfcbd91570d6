use ndarray::{Array1, Array2};

/// A polynomial in a normalized variable `(x - center) / scale`.
///
/// Fitted curves are evaluated on normalized input to keep the normal equations well
/// conditioned for ADC counts in the thousands.
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial {
    coefficients: Vec<f64>,
    center: f64,
    scale: f64,
}

impl Polynomial {
    /// Polynomial with coefficients in ascending order of power of `x`.
    #[must_use]
    pub fn new(coefficients: Vec<f64>) -> Self {
        Self {
            coefficients,
            center: 0.0,
            scale: 1.0,
        }
    }

    /// Least-squares fit of a polynomial of `degree` to the points.
    ///
    /// Returns `None` if there are fewer points than coefficients or the points do not
    /// determine a unique fit.
    #[must_use]
    pub fn fit(xs: &[f64], ys: &[f64], degree: usize) -> Option<Self> {
        let n = xs.len();
        if n != ys.len() || n < degree + 1 {
            return None;
        }
        let (lo, hi) = xs
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| {
                (lo.min(*x), hi.max(*x))
            });
        let center = (lo + hi) / 2.0;
        let scale = if hi > lo { (hi - lo) / 2.0 } else { 1.0 };

        let vander = Array2::from_shape_fn((n, degree + 1), |(i, j)| {
            ((xs[i] - center) / scale).powi(j as i32)
        });
        let y = Array1::from(ys.to_vec());
        let ata = vander.t().dot(&vander);
        let aty = vander.t().dot(&y);
        let coefficients = solve(ata, aty)?;

        Some(Self {
            coefficients: coefficients.to_vec(),
            center,
            scale,
        })
    }

    #[must_use]
    pub fn eval(&self, x: f64) -> f64 {
        let x = (x - self.center) / self.scale;
        self.coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
    }
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|i, j| a[[*i, col]].abs().total_cmp(&a[[*j, col]].abs()))?;
        if a[[pivot, col]].abs() < 1e-12 {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = Array1::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_recovers_quadratic() {
        let f = |x: f64| 3.0 - 0.5 * x + 2e-4 * x * x;
        let xs: Vec<f64> = (0..20).map(|i| 1000.0 + 150.0 * f64::from(i)).collect();
        let ys: Vec<f64> = xs.iter().map(|x| f(*x)).collect();
        let poly = Polynomial::fit(&xs, &ys, 2).unwrap();
        for x in [1000.0, 1234.5, 3850.0] {
            assert!((poly.eval(x) - f(x)).abs() < 1e-6, "x={x}");
        }
    }

    #[test]
    fn too_few_points() {
        assert!(Polynomial::fit(&[1.0, 2.0], &[1.0, 2.0], 2).is_none());
        assert!(Polynomial::fit(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0], 2).is_none());
    }

    #[test]
    fn eval_plain_coefficients() {
        let poly = Polynomial::new(vec![1.0, 2.0, 3.0]);
        assert_eq!(poly.eval(2.0), 17.0);
    }
}
