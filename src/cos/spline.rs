use nalgebra::{DMatrix, DVector};

use crate::coords::CoordError;
use crate::core::error::{ConfigError, PathError};

/// Minimum number of control points for a cubic fit.
pub const MIN_CONTROL_POINTS: usize = 4;

/// Interpolating cubic spline through points in D dimensions.
///
/// Passes exactly through every control point (no smoothing) and uses
/// not-a-knot end conditions, so any cubic is reproduced exactly.
#[derive(Debug, Clone)]
pub struct ParametricSpline {
    knots: Vec<f64>,
    /// One control point per row.
    values: DMatrix<f64>,
    /// Second derivatives at the knots, one row per knot.
    moments: DMatrix<f64>,
}

impl ParametricSpline {
    /// Fits the spline. `points` holds one control point per row and
    /// `params` must be strictly increasing.
    pub fn fit(params: &[f64], points: &DMatrix<f64>) -> Result<Self, PathError> {
        let n = params.len();
        if n < MIN_CONTROL_POINTS {
            return Err(ConfigError::TooFewControlPoints {
                needed: MIN_CONTROL_POINTS,
                got: n,
            }
            .into());
        }
        if points.nrows() != n {
            return Err(PathError::ShapeMismatch {
                expected: n,
                got: points.nrows(),
            });
        }
        if params.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(CoordError::Degenerate(
                "spline parameters must be strictly increasing".to_string(),
            )
            .into());
        }

        let h: Vec<f64> = params.windows(2).map(|w| w[1] - w[0]).collect();
        let dim = points.ncols();

        let mut a = DMatrix::zeros(n, n);
        let mut rhs = DMatrix::zeros(n, dim);

        // Not-a-knot: third derivative continuous across the second knot
        a[(0, 0)] = h[1];
        a[(0, 1)] = -(h[0] + h[1]);
        a[(0, 2)] = h[0];

        for i in 1..n - 1 {
            a[(i, i - 1)] = h[i - 1];
            a[(i, i)] = 2.0 * (h[i - 1] + h[i]);
            a[(i, i + 1)] = h[i];
            for d in 0..dim {
                let right = (points[(i + 1, d)] - points[(i, d)]) / h[i];
                let left = (points[(i, d)] - points[(i - 1, d)]) / h[i - 1];
                rhs[(i, d)] = 6.0 * (right - left);
            }
        }

        // ...and across the second to last knot
        a[(n - 1, n - 3)] = h[n - 2];
        a[(n - 1, n - 2)] = -(h[n - 3] + h[n - 2]);
        a[(n - 1, n - 1)] = h[n - 3];

        let moments = a.lu().solve(&rhs).ok_or_else(|| {
            CoordError::Degenerate("singular spline system".to_string())
        })?;

        Ok(Self {
            knots: params.to_vec(),
            values: points.clone(),
            moments,
        })
    }

    /// Convenience for one point per vector.
    pub fn fit_vectors(params: &[f64], points: &[DVector<f64>]) -> Result<Self, PathError> {
        let dim = points.first().map(|p| p.len()).unwrap_or(0);
        if points.iter().any(|p| p.len() != dim) {
            return Err(PathError::ShapeMismatch {
                expected: dim,
                got: points.iter().map(|p| p.len()).find(|&l| l != dim).unwrap_or(0),
            });
        }
        let matrix = DMatrix::from_fn(points.len(), dim, |i, d| points[i][d]);
        Self::fit(params, &matrix)
    }

    pub fn dim(&self) -> usize {
        self.values.ncols()
    }

    pub fn knots(&self) -> &[f64] {
        &self.knots
    }

    /// Interval index for `x`. Points outside the knot range use the end pieces.
    fn interval(&self, x: f64) -> usize {
        let last = self.knots.len() - 2;
        match self.knots[1..=last].iter().position(|&k| x < k) {
            Some(i) => i,
            None => last,
        }
    }

    pub fn evaluate(&self, x: f64) -> DVector<f64> {
        let i = self.interval(x);
        let h = self.knots[i + 1] - self.knots[i];
        let a = self.knots[i + 1] - x;
        let c = x - self.knots[i];

        DVector::from_fn(self.dim(), |d, _| {
            let (m0, m1) = (self.moments[(i, d)], self.moments[(i + 1, d)]);
            let (y0, y1) = (self.values[(i, d)], self.values[(i + 1, d)]);
            m0 * a.powi(3) / (6.0 * h)
                + m1 * c.powi(3) / (6.0 * h)
                + (y0 / h - m0 * h / 6.0) * a
                + (y1 / h - m1 * h / 6.0) * c
        })
    }

    /// First derivative with respect to the parameter.
    pub fn derivative(&self, x: f64) -> DVector<f64> {
        let i = self.interval(x);
        let h = self.knots[i + 1] - self.knots[i];
        let a = self.knots[i + 1] - x;
        let c = x - self.knots[i];

        DVector::from_fn(self.dim(), |d, _| {
            let (m0, m1) = (self.moments[(i, d)], self.moments[(i + 1, d)]);
            let (y0, y1) = (self.values[(i, d)], self.values[(i + 1, d)]);
            -m0 * a * a / (2.0 * h) + m1 * c * c / (2.0 * h) + (y1 - y0) / h
                - (m1 - m0) * h / 6.0
        })
    }

    /// Evaluates the curve at `n` equally spaced parameters spanning the knots.
    pub fn resample(&self, n: usize) -> Vec<DVector<f64>> {
        linspace(self.knots[0], self.knots[self.knots.len() - 1], n)
            .into_iter()
            .map(|x| self.evaluate(x))
            .collect()
    }
}

/// `n` equally spaced values from `start` to `end`, both included.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => (0..n)
            .map(|i| start + (end - start) * i as f64 / (n - 1) as f64)
            .collect(),
    }
}
