use std::path::PathBuf;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What the caller needs from a calculation. The energy is always computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalcRequest {
    pub forces: bool,
    pub hessian: bool,
}

impl CalcRequest {
    pub fn energy() -> Self {
        Self {
            forces: false,
            hessian: false,
        }
    }

    pub fn forces() -> Self {
        Self {
            forces: true,
            hessian: false,
        }
    }

    pub fn with_hessian(mut self, hessian: bool) -> Self {
        self.hessian = hessian;
        self
    }
}

impl Default for CalcRequest {
    fn default() -> Self {
        Self::forces()
    }
}

/// The result of a single-point calculation, in Hartree and Bohr.
#[derive(Debug, Clone)]
pub struct CalcResult {
    pub energy: f64,
    /// Negative gradient, `3N` entries.
    pub forces: Option<DVector<f64>>,
    /// `3N x 3N` second derivatives.
    pub hessian: Option<DMatrix<f64>>,
}

impl CalcResult {
    /// Checks that everything requested is present, finite and correctly shaped.
    pub fn validate(
        &self,
        name: &str,
        n_coords: usize,
        request: CalcRequest,
    ) -> Result<(), EvaluationError> {
        if !self.energy.is_finite() {
            return Err(EvaluationError::NonFinite {
                name: name.to_string(),
                quantity: "energy",
            });
        }

        match &self.forces {
            Some(f) if f.len() != n_coords => {
                return Err(EvaluationError::ShapeMismatch {
                    name: name.to_string(),
                    quantity: "forces",
                    expected: n_coords,
                    got: f.len(),
                })
            }
            Some(f) if f.iter().any(|x| !x.is_finite()) => {
                return Err(EvaluationError::NonFinite {
                    name: name.to_string(),
                    quantity: "forces",
                })
            }
            None if request.forces => {
                return Err(EvaluationError::Unsupported {
                    name: name.to_string(),
                    what: "forces",
                })
            }
            _ => {}
        }

        match &self.hessian {
            Some(h) if h.nrows() != n_coords || h.ncols() != n_coords => {
                Err(EvaluationError::ShapeMismatch {
                    name: name.to_string(),
                    quantity: "hessian",
                    expected: n_coords,
                    got: h.nrows(),
                })
            }
            None if request.hessian => Err(EvaluationError::Unsupported {
                name: name.to_string(),
                what: "hessian",
            }),
            _ => Ok(()),
        }
    }
}

/// Restart data one calculator may hand to the calculator of the next image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Index of the image whose calculator produced it.
    pub source: usize,
    pub payload: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("image has no calculator attached")]
    NoCalculator,

    #[error("{name}: failed to start '{program}': {source}")]
    Spawn {
        name: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{name}: process exited with {status}: {stderr}")]
    ProcessFailed {
        name: String,
        status: String,
        stderr: String,
        /// The request that was sent to the process.
        input: String,
        /// Where the request was saved for inspection, if that succeeded.
        snapshot: Option<PathBuf>,
    },

    #[error("{name}: could not parse output: {reason}")]
    Parse {
        name: String,
        reason: String,
        input: String,
        snapshot: Option<PathBuf>,
    },

    #[error("{name}: {quantity} has {got} entries, expected {expected}")]
    ShapeMismatch {
        name: String,
        quantity: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{name} cannot provide {what}")]
    Unsupported { name: String, what: &'static str },

    #[error("{name} returned a non-finite {quantity}")]
    NonFinite { name: String, quantity: &'static str },
}

impl EvaluationError {
    /// Saved input of a crashed external calculation, if any.
    pub fn snapshot(&self) -> Option<&PathBuf> {
        match self {
            EvaluationError::ProcessFailed { snapshot, .. }
            | EvaluationError::Parse { snapshot, .. } => snapshot.as_ref(),
            _ => None,
        }
    }
}

/// A source of energies and forces for one image.
///
/// Every image owns its calculator exclusively, so `evaluate` takes
/// `&mut self`. `Send` lets images be evaluated on the rayon pool.
pub trait Calculator: Send {
    fn evaluate(
        &mut self,
        atoms: &[String],
        coords: &DVector<f64>,
        request: CalcRequest,
    ) -> Result<CalcResult, EvaluationError>;

    /// Name used in logs and error messages (e.g., "anapot").
    fn name(&self) -> &str;

    /// Restart data for the next image. `None` if the calculator has none.
    fn checkpoint(&self) -> Option<Checkpoint> {
        None
    }

    /// Takes restart data from a neighbour. Returns false if unsupported.
    fn accept_checkpoint(&mut self, _checkpoint: Checkpoint) -> bool {
        false
    }
}
