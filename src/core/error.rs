use thiserror::Error;

use crate::coords::CoordError;
use crate::cos::chain::PathSnapshot;
use crate::engine::evaluator::EvaluationError;

/// Problems with the run plan. Always raised before the first cycle.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("the string optimizer needs a chain of images, got {0}")]
    NotAChain(String),

    #[error("cubic spline fitting needs at least {needed} control points, got {got}")]
    TooFewControlPoints { needed: usize, got: usize },

    #[error("unknown parametrization '{0}' (expected 'equal' or 'energy')")]
    UnknownParametrization(String),

    #[error("unknown coordinate type '{0}' (expected 'cart' or 'redund')")]
    UnknownCoordType(String),

    #[error("unknown convergence threshold '{0}'")]
    UnknownThreshold(String),

    #[error("no calculator registered under '{0}'")]
    UnknownCalculator(String),

    #[error("no covalent radius known for element '{0}'")]
    UnknownElement(String),

    #[error("image {index} has atoms {found:?}, expected {expected:?}")]
    MismatchedAtoms {
        index: usize,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("a chain of states needs at least {needed} images, got {got}")]
    TooFewImages { needed: usize, got: usize },

    #[error("no internal coordinates could be defined for image {0}")]
    NoInternalCoordinates(usize),

    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

impl ConfigError {
    pub fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Runtime failures of path-level operations.
#[derive(Debug, Error)]
pub enum PathError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Coord(#[from] CoordError),

    #[error("image {0} has no energy; evaluate the path first")]
    MissingEnergies(usize),

    #[error("image {0} has no forces; evaluate the path first")]
    MissingForces(usize),

    #[error("expected {expected} coordinates, got {got}")]
    ShapeMismatch { expected: usize, got: usize },
}

/// Errors that end an optimization run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cycle {cycle}: {source}")]
    Path {
        cycle: usize,
        #[source]
        source: PathError,
    },

    #[error("cycle {cycle}: evaluation of image {image} failed: {source}")]
    Evaluation {
        cycle: usize,
        image: usize,
        #[source]
        source: EvaluationError,
        /// Path coordinates as they were before the failed cycle.
        snapshot: Box<PathSnapshot>,
    },
}
