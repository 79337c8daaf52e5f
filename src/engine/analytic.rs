use nalgebra::{DMatrix, DVector};

use super::evaluator::{CalcRequest, CalcResult, Calculator, EvaluationError};

/// A model surface in the (x, y) plane, evaluated on the first atom.
pub trait Potential2D: Send + Sync {
    fn energy(&self, x: f64, y: f64) -> f64;

    /// (dV/dx, dV/dy)
    fn gradient(&self, x: f64, y: f64) -> (f64, f64);

    /// (d²V/dx², d²V/dxdy, d²V/dy²)
    fn hessian(&self, x: f64, y: f64) -> (f64, f64, f64);

    fn name(&self) -> &str;
}

/// `V = 4 + 4.5x − 4y + x² + 2y² − 2xy + x⁴ − 2x²y`
///
/// Two minima joined by a single saddle point; the standard test bed for
/// chain-of-states methods.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnaPot;

impl Potential2D for AnaPot {
    fn energy(&self, x: f64, y: f64) -> f64 {
        4.0 + 4.5 * x - 4.0 * y + x * x + 2.0 * y * y - 2.0 * x * y + x.powi(4) - 2.0 * x * x * y
    }

    fn gradient(&self, x: f64, y: f64) -> (f64, f64) {
        let dx = 4.5 + 2.0 * x - 2.0 * y + 4.0 * x.powi(3) - 4.0 * x * y;
        let dy = -4.0 + 4.0 * y - 2.0 * x - 2.0 * x * x;
        (dx, dy)
    }

    fn hessian(&self, x: f64, y: f64) -> (f64, f64, f64) {
        (2.0 + 12.0 * x * x - 4.0 * y, -2.0 - 4.0 * x, 4.0)
    }

    fn name(&self) -> &str {
        "anapot"
    }
}

/// The Müller-Brown surface (Theor. Chim. Acta 53 (1979) 75).
#[derive(Debug, Clone, Copy, Default)]
pub struct MullerBrown;

impl MullerBrown {
    const A: [f64; 4] = [-200.0, -100.0, -170.0, 15.0];
    const X0: [f64; 4] = [1.0, 0.0, -0.5, -1.0];
    const Y0: [f64; 4] = [0.0, 0.5, 1.5, 1.0];
    const AA: [f64; 4] = [-1.0, -1.0, -6.5, 0.7];
    const BB: [f64; 4] = [0.0, 0.0, 11.0, 0.6];
    const CC: [f64; 4] = [-10.0, -10.0, -6.5, 0.7];

    /// Exponential term k and its exponent derivatives.
    fn term(k: usize, x: f64, y: f64) -> (f64, f64, f64) {
        let dx = x - Self::X0[k];
        let dy = y - Self::Y0[k];
        let e = Self::A[k]
            * (Self::AA[k] * dx * dx + Self::BB[k] * dx * dy + Self::CC[k] * dy * dy).exp();
        let px = 2.0 * Self::AA[k] * dx + Self::BB[k] * dy;
        let py = Self::BB[k] * dx + 2.0 * Self::CC[k] * dy;
        (e, px, py)
    }
}

impl Potential2D for MullerBrown {
    fn energy(&self, x: f64, y: f64) -> f64 {
        (0..4).map(|k| Self::term(k, x, y).0).sum()
    }

    fn gradient(&self, x: f64, y: f64) -> (f64, f64) {
        (0..4).fold((0.0, 0.0), |(gx, gy), k| {
            let (e, px, py) = Self::term(k, x, y);
            (gx + e * px, gy + e * py)
        })
    }

    fn hessian(&self, x: f64, y: f64) -> (f64, f64, f64) {
        (0..4).fold((0.0, 0.0, 0.0), |(hxx, hxy, hyy), k| {
            let (e, px, py) = Self::term(k, x, y);
            (
                hxx + e * (px * px + 2.0 * Self::AA[k]),
                hxy + e * (px * py + Self::BB[k]),
                hyy + e * (py * py + 2.0 * Self::CC[k]),
            )
        })
    }

    fn name(&self) -> &str {
        "mullerbrown"
    }
}

/// Adapts a [`Potential2D`] to the [`Calculator`] interface.
///
/// Only the first atom's x and y enter the energy; all other force and
/// Hessian entries are zero.
#[derive(Debug, Clone, Default)]
pub struct AnalyticCalculator<P> {
    potential: P,
    calc_counter: usize,
}

impl<P: Potential2D> AnalyticCalculator<P> {
    pub fn new(potential: P) -> Self {
        Self {
            potential,
            calc_counter: 0,
        }
    }

    pub fn calc_counter(&self) -> usize {
        self.calc_counter
    }
}

impl<P: Potential2D> Calculator for AnalyticCalculator<P> {
    fn evaluate(
        &mut self,
        _atoms: &[String],
        coords: &DVector<f64>,
        request: CalcRequest,
    ) -> Result<CalcResult, EvaluationError> {
        if coords.len() < 3 {
            return Err(EvaluationError::ShapeMismatch {
                name: self.potential.name().to_string(),
                quantity: "coordinates",
                expected: 3,
                got: coords.len(),
            });
        }
        self.calc_counter += 1;

        let (x, y) = (coords[0], coords[1]);
        let energy = self.potential.energy(x, y);

        let forces = request.forces.then(|| {
            let (gx, gy) = self.potential.gradient(x, y);
            let mut f = DVector::zeros(coords.len());
            f[0] = -gx;
            f[1] = -gy;
            f
        });

        let hessian = request.hessian.then(|| {
            let (hxx, hxy, hyy) = self.potential.hessian(x, y);
            let mut h = DMatrix::zeros(coords.len(), coords.len());
            h[(0, 0)] = hxx;
            h[(0, 1)] = hxy;
            h[(1, 0)] = hxy;
            h[(1, 1)] = hyy;
            h
        });

        Ok(CalcResult {
            energy,
            forces,
            hessian,
        })
    }

    fn name(&self) -> &str {
        self.potential.name()
    }
}
