use std::fmt;
use std::str::FromStr;

use log::debug;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::core::error::{ConfigError, PathError};
use crate::cos::chain::PathState;
use crate::cos::spline::{linspace, ParametricSpline, MIN_CONTROL_POINTS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Parametrization {
    /// Images equally spaced by arc length.
    #[default]
    Equal,
    /// Arc length stretched by segment energy, packing images near the top.
    Energy,
}

impl FromStr for Parametrization {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equal" => Ok(Parametrization::Equal),
            "energy" => Ok(Parametrization::Energy),
            other => Err(ConfigError::UnknownParametrization(other.to_string())),
        }
    }
}

impl TryFrom<String> for Parametrization {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Parametrization> for String {
    fn from(value: Parametrization) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Parametrization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parametrization::Equal => write!(f, "equal"),
            Parametrization::Energy => write!(f, "energy"),
        }
    }
}

/// Redistributes images along the curve they currently describe.
///
/// A cubic spline is fitted through the images using cumulative (optionally
/// energy-weighted) distances as parameters and resampled at equally spaced
/// parameter values. The endpoints are never moved.
#[derive(Debug, Clone, Copy)]
pub struct Reparametrizer {
    mode: Parametrization,
}

impl Reparametrizer {
    pub fn new(mode: Parametrization) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> Parametrization {
        self.mode
    }

    /// Normalized curve parameters of the given points, in `[0, 1]`.
    ///
    /// Falls back to uniform parameters when the points do not span any
    /// length (e.g., coincident images).
    pub fn parameters(
        &self,
        points: &[DVector<f64>],
        energies: Option<&[f64]>,
    ) -> Result<Vec<f64>, PathError> {
        let n = points.len();
        let distances: Vec<f64> = points.windows(2).map(|w| (&w[1] - &w[0]).norm()).collect();

        let weights: Vec<f64> = match self.mode {
            Parametrization::Equal => vec![1.0; distances.len()],
            Parametrization::Energy => {
                let energies = energies.ok_or(PathError::MissingEnergies(0))?;
                if energies.len() != n {
                    return Err(PathError::ShapeMismatch {
                        expected: n,
                        got: energies.len(),
                    });
                }
                let means: Vec<f64> = energies
                    .windows(2)
                    .map(|w| ((w[0] + w[1]) / 2.0).abs())
                    .collect();
                let max = means.iter().cloned().fold(0.0_f64, f64::max);
                if max > 0.0 {
                    means.iter().map(|m| (m / max).sqrt()).collect()
                } else {
                    vec![1.0; means.len()]
                }
            }
        };

        let mut params = Vec::with_capacity(n);
        let mut acc = 0.0;
        params.push(acc);
        for (w, d) in weights.iter().zip(&distances) {
            acc += w * d;
            params.push(acc);
        }

        let strictly_increasing = params.windows(2).all(|w| w[1] > w[0]);
        if acc <= 0.0 || !strictly_increasing {
            debug!("Degenerate path spacing, using uniform parameters");
            return Ok(linspace(0.0, 1.0, n));
        }

        Ok(params.into_iter().map(|p| p / acc).collect())
    }

    /// Fits a spline through `points` at `params` and evaluates it at `n_out`
    /// equally spaced parameters. The first and last output equal the inputs.
    pub fn resample(
        &self,
        points: &[DVector<f64>],
        params: &[f64],
        n_out: usize,
    ) -> Result<Vec<DVector<f64>>, PathError> {
        let spline = ParametricSpline::fit_vectors(params, points)?;
        let mut out = spline.resample(n_out);

        if let (Some(first), Some(last)) = (points.first(), points.last()) {
            if let Some(o) = out.first_mut() {
                *o = first.clone();
            }
            if n_out > 1 {
                if let Some(o) = out.last_mut() {
                    *o = last.clone();
                }
            }
        }
        Ok(out)
    }

    /// Redistributes `points` (one Cartesian vector per image) into `n_out` images.
    pub fn respace(
        &self,
        points: &[DVector<f64>],
        energies: Option<&[f64]>,
        n_out: usize,
    ) -> Result<Vec<DVector<f64>>, PathError> {
        if points.len() < MIN_CONTROL_POINTS {
            return Err(ConfigError::TooFewControlPoints {
                needed: MIN_CONTROL_POINTS,
                got: points.len(),
            }
            .into());
        }
        let params = self.parameters(points, energies)?;
        self.resample(points, &params, n_out)
    }

    /// Reparametrizes the path in place. Energy mode uses the energies
    /// currently stored on the images.
    pub fn reparametrize(&self, path: &mut PathState) -> Result<(), PathError> {
        match self.mode {
            Parametrization::Equal => self.apply(path, None),
            Parametrization::Energy => {
                let energies = path.energies()?;
                self.apply(path, Some(&energies))
            }
        }
    }

    /// Same as [`Reparametrizer::reparametrize`] with explicitly given energies.
    /// The run loop passes the energies of the cycle that produced the step,
    /// so segment weights lag one step behind the moved coordinates.
    pub fn reparametrize_with_energies(
        &self,
        path: &mut PathState,
        energies: &[f64],
    ) -> Result<(), PathError> {
        self.apply(path, Some(energies))
    }

    fn apply(&self, path: &mut PathState, energies: Option<&[f64]>) -> Result<(), PathError> {
        let points = path.image_cart_coords();
        let new_points = self.respace(&points, energies, points.len())?;
        path.set_image_cart_coords(new_points)
    }
}
