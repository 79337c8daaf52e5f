use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::coords::CoordError;
use crate::coords::redundant::RedundantCoords;
use crate::core::error::{ConfigError, PathError};
use crate::core::spatial;
use crate::engine::evaluator::{CalcRequest, CalcResult, Calculator, Checkpoint, EvaluationError};

// --- Coordinate Systems ---

/// Which coordinates the optimizer sees for every image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CoordType {
    #[default]
    Cartesian,
    /// Redundant internal coordinates (stretches, bends, torsions).
    Redundant,
}

impl FromStr for CoordType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cart" | "cartesian" => Ok(CoordType::Cartesian),
            "redund" | "redundant" => Ok(CoordType::Redundant),
            other => Err(ConfigError::UnknownCoordType(other.to_string())),
        }
    }
}

impl TryFrom<String> for CoordType {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CoordType> for String {
    fn from(value: CoordType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for CoordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordType::Cartesian => write!(f, "cart"),
            CoordType::Redundant => write!(f, "redund"),
        }
    }
}

// --- Loader Output ---

/// A single structure as produced by a geometry source: atom labels plus
/// flat Cartesian coordinates in Bohr.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub atoms: Vec<String>,
    pub coords: Vec<f64>,
}

impl Geometry {
    pub fn new(atoms: Vec<String>, coords: Vec<f64>) -> Result<Self, ConfigError> {
        if coords.len() != 3 * atoms.len() {
            return Err(ConfigError::invalid(
                "coords",
                format!(
                    "{} atoms need {} coordinates, got {}",
                    atoms.len(),
                    3 * atoms.len(),
                    coords.len()
                ),
            ));
        }
        Ok(Self { atoms, coords })
    }

    pub fn n_atoms(&self) -> usize {
        self.atoms.len()
    }

    pub fn coords_vector(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.coords)
    }
}

// --- The Core Entity ---

/// One point along the path.
///
/// Energy, forces and Hessian are cached results of the last calculation and
/// are dropped whenever the Cartesian coordinates change.
pub struct PathImage {
    atoms: Arc<[String]>,
    cart_coords: DVector<f64>,

    energy: Option<f64>,
    cart_forces: Option<DVector<f64>>,
    hessian: Option<DMatrix<f64>>,

    internal: Option<RedundantCoords>,
    calculator: Option<Box<dyn Calculator>>,
}

impl fmt::Debug for PathImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathImage")
            .field("atoms", &self.atoms)
            .field("energy", &self.energy)
            .field("internal", &self.internal.as_ref().map(|i| i.len()))
            .field("calculator", &self.calculator.as_ref().map(|c| c.name().to_string()))
            .finish()
    }
}

impl PathImage {
    pub fn new(atoms: Arc<[String]>, cart_coords: DVector<f64>) -> Self {
        Self {
            atoms,
            cart_coords,
            energy: None,
            cart_forces: None,
            hessian: None,
            internal: None,
            calculator: None,
        }
    }

    /// Attaches a redundant internal coordinate set; the optimizer then works
    /// on internal values instead of Cartesians.
    pub fn with_internal(mut self, internal: RedundantCoords) -> Self {
        self.internal = Some(internal);
        self
    }

    pub fn atoms(&self) -> &[String] {
        &self.atoms
    }

    pub fn shared_atoms(&self) -> Arc<[String]> {
        Arc::clone(&self.atoms)
    }

    pub fn n_atoms(&self) -> usize {
        self.atoms.len()
    }

    pub fn internal(&self) -> Option<&RedundantCoords> {
        self.internal.as_ref()
    }

    pub fn coord_type(&self) -> CoordType {
        if self.internal.is_some() {
            CoordType::Redundant
        } else {
            CoordType::Cartesian
        }
    }

    pub fn cart_coords(&self) -> &DVector<f64> {
        &self.cart_coords
    }

    pub fn coords3d(&self) -> Vec<Vector3<f64>> {
        spatial::coords3d(&self.cart_coords)
    }

    /// Number of optimizer coordinates of this image.
    pub fn coords_length(&self) -> usize {
        match &self.internal {
            Some(int) => int.len(),
            None => self.cart_coords.len(),
        }
    }

    /// Coordinates in the optimizer's representation.
    pub fn coords(&self) -> Result<DVector<f64>, PathError> {
        match &self.internal {
            Some(int) => Ok(int.values(&self.coords3d())?),
            None => Ok(self.cart_coords.clone()),
        }
    }

    /// Sets coordinates given in the optimizer's representation. Internal
    /// coordinates are back-transformed to Cartesians.
    pub fn set_coords(&mut self, coords: &DVector<f64>) -> Result<(), PathError> {
        if let Some(new_cart) = self.cart_coords_for(coords)? {
            self.set_cart_coords(new_cart);
        }
        Ok(())
    }

    /// Cartesian coordinates matching `coords` in the optimizer's
    /// representation, or `None` if nothing would move. The image is not changed.
    pub fn cart_coords_for(&self, coords: &DVector<f64>) -> Result<Option<DVector<f64>>, PathError> {
        let expected = self.coords_length();
        if coords.len() != expected {
            return Err(PathError::ShapeMismatch {
                expected,
                got: coords.len(),
            });
        }
        if coords.iter().any(|x| !x.is_finite()) {
            return Err(CoordError::Degenerate("non-finite coordinates".into()).into());
        }

        match &self.internal {
            Some(int) => {
                let current = int.values(&self.coords3d())?;
                let dq = int.wrap_differences(&(coords - &current));
                if dq.amax() == 0.0 {
                    return Ok(None);
                }
                Ok(Some(int.backtransform(&self.cart_coords, &dq)?))
            }
            None => Ok(Some(coords.clone())),
        }
    }

    /// Replaces the Cartesian coordinates. Cached results are dropped if anything moved.
    pub fn set_cart_coords(&mut self, coords: DVector<f64>) {
        if coords.len() == self.cart_coords.len() && coords == self.cart_coords {
            return;
        }
        self.cart_coords = coords;
        self.invalidate();
    }

    pub fn invalidate(&mut self) {
        self.energy = None;
        self.cart_forces = None;
        self.hessian = None;
    }

    /// True if energy or forces must be recomputed.
    pub fn is_stale(&self) -> bool {
        self.energy.is_none() || self.cart_forces.is_none()
    }

    pub fn energy(&self) -> Option<f64> {
        self.energy
    }

    pub fn cart_forces(&self) -> Option<&DVector<f64>> {
        self.cart_forces.as_ref()
    }

    pub fn hessian(&self) -> Option<&DMatrix<f64>> {
        self.hessian.as_ref()
    }

    /// Forces in the optimizer's representation.
    pub fn forces(&self) -> Result<Option<DVector<f64>>, PathError> {
        let cart = match &self.cart_forces {
            Some(f) => f,
            None => return Ok(None),
        };
        match &self.internal {
            Some(int) => Ok(Some(int.transform_forces(&self.coords3d(), cart)?)),
            None => Ok(Some(cart.clone())),
        }
    }

    /// Importance weights of the internal coordinates, if any are in use.
    pub fn weights(&self, f_damping: f64) -> Result<Option<Vec<f64>>, PathError> {
        match &self.internal {
            Some(int) => Ok(Some(int.weights(&self.atoms, &self.coords3d(), f_damping)?)),
            None => Ok(None),
        }
    }

    // --- Calculator ---

    pub fn set_calculator(&mut self, calculator: Box<dyn Calculator>) {
        self.calculator = Some(calculator);
        self.invalidate();
    }

    pub fn has_calculator(&self) -> bool {
        self.calculator.is_some()
    }

    pub fn calculator_name(&self) -> Option<&str> {
        self.calculator.as_ref().map(|c| c.name())
    }

    /// Runs the attached calculator at the current geometry. The result is
    /// validated but not stored; see [`PathImage::apply_result`].
    pub fn evaluate(&mut self, request: CalcRequest) -> Result<CalcResult, EvaluationError> {
        let calc = self
            .calculator
            .as_mut()
            .ok_or(EvaluationError::NoCalculator)?;

        let result = calc.evaluate(&self.atoms, &self.cart_coords, request)?;
        result.validate(calc.name(), self.cart_coords.len(), request)?;
        Ok(result)
    }

    pub fn apply_result(&mut self, result: CalcResult) {
        self.energy = Some(result.energy);
        self.cart_forces = result.forces;
        self.hessian = result.hessian;
    }

    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.calculator.as_ref().and_then(|c| c.checkpoint())
    }

    /// Hands restart data from a neighbouring image's calculator to ours.
    /// Returns false if the calculator cannot use it.
    pub fn accept_checkpoint(&mut self, checkpoint: Checkpoint) -> bool {
        match self.calculator.as_mut() {
            Some(c) => c.accept_checkpoint(checkpoint),
            None => false,
        }
    }
}
