//! Internal coordinate primitives.
//!
//! Every primitive maps a handful of atomic positions onto one scalar
//! (a distance, an angle, a dihedral) and knows its derivative with respect
//! to those positions. Weights rank how strongly a primitive couples atoms
//! that are actually close to each other.

use std::fmt;

use nalgebra::{DVector, Vector3};
use thiserror::Error;

use crate::core::chemistry;

pub mod bend;
pub mod redundant;
pub mod stretch;
pub mod torsion;

pub use bend::Bend;
pub use redundant::RedundantCoords;
pub use stretch::Stretch;
pub use torsion::Torsion;

/// Default tolerance of the parallelism test, on `1 - |cos θ|`.
pub const PARALLEL_THRESH: f64 = 1e-6;

/// Default damping of the weight functions.
pub const DEFAULT_DAMPING: f64 = 0.12;

/// Below this norm a vector is treated as zero.
pub(crate) const NORM_EPS: f64 = 1e-12;

#[derive(Debug, Error)]
pub enum CoordError {
    #[error("{kind} references atom {index}, but the geometry only has {n_atoms} atoms")]
    AtomIndexOutOfRange {
        kind: &'static str,
        index: usize,
        n_atoms: usize,
    },

    #[error("degenerate geometry: {0}")]
    Degenerate(String),

    #[error("no covalent radius known for element '{0}'")]
    UnknownElement(String),
}

// --- Shared Geometry Tests ---

/// True if `u` and `v` are parallel (or antiparallel) within `thresh`.
///
/// A zero vector has no direction and counts as parallel to anything, so
/// callers never divide by its norm.
pub fn parallel(u: &Vector3<f64>, v: &Vector3<f64>, thresh: f64) -> bool {
    let nu = u.norm();
    let nv = v.norm();
    if nu < NORM_EPS || nv < NORM_EPS {
        return true;
    }
    let cos = u.dot(v) / (nu * nv);
    1.0 - cos.abs() < thresh
}

/// Angle between two vectors in radians, `0` if either one vanishes.
pub(crate) fn angle_between(u: &Vector3<f64>, v: &Vector3<f64>) -> f64 {
    let nu = u.norm();
    let nv = v.norm();
    if nu < NORM_EPS || nv < NORM_EPS {
        return 0.0;
    }
    (u.dot(v) / (nu * nv)).clamp(-1.0, 1.0).acos()
}

fn check_atom(
    kind: &'static str,
    index: usize,
    n_atoms: usize,
) -> Result<(), CoordError> {
    if index >= n_atoms {
        return Err(CoordError::AtomIndexOutOfRange {
            kind,
            index,
            n_atoms,
        });
    }
    Ok(())
}

/// Proximity weight of an atom pair: `exp(-(d / (r_i + r_j) - 1))`.
///
/// Equals 1 when the atoms sit exactly at the sum of their covalent radii
/// and decays exponentially beyond that.
pub fn rho(
    atoms: &[String],
    coords3d: &[Vector3<f64>],
    i: usize,
    j: usize,
) -> Result<f64, CoordError> {
    let n = coords3d.len().min(atoms.len());
    check_atom("rho", i, n)?;
    check_atom("rho", j, n)?;

    let r_i = chemistry::covalent_radius(&atoms[i])
        .ok_or_else(|| CoordError::UnknownElement(atoms[i].clone()))?;
    let r_j = chemistry::covalent_radius(&atoms[j])
        .ok_or_else(|| CoordError::UnknownElement(atoms[j].clone()))?;

    let d = (coords3d[i] - coords3d[j]).norm();
    Ok((-(d / (r_i + r_j) - 1.0)).exp())
}

// --- Auxiliary Parameters ---

/// A fixed set of named scalar parameters.
///
/// The names are decided at construction. Values can be tuned between cycles,
/// but no parameter can be added or removed afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct CalcParams {
    entries: Vec<(&'static str, f64)>,
}

impl CalcParams {
    pub fn new(entries: &[(&'static str, f64)]) -> Self {
        Self {
            entries: entries.to_vec(),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
    }

    /// Updates an existing parameter. Returns false for unknown names.
    pub fn set(&mut self, name: &str, value: f64) -> bool {
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => {
                entry.1 = value;
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(key, _)| *key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// --- The Primitive Contract ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    Stretch,
    Bend,
    Torsion,
}

impl PrimitiveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimitiveKind::Stretch => "stretch",
            PrimitiveKind::Bend => "bend",
            PrimitiveKind::Torsion => "torsion",
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which derivative [`Primitive::value_and_derivative`] should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivativeKind {
    None,
    /// Gradient against the primitive's own atoms only (`3 * indices().len()`).
    Gradient,
    /// Full row against all atoms, zero for atoms the primitive ignores.
    Jacobian,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveValue {
    pub value: f64,
    pub gradient: Option<DVector<f64>>,
}

pub trait Primitive: fmt::Debug + Send + Sync {
    fn kind(&self) -> PrimitiveKind;

    /// Atom indices, in the order the gradient blocks are laid out.
    fn indices(&self) -> &[usize];

    /// Whether the value wraps around (dihedrals, period 2π).
    fn periodic(&self) -> bool {
        false
    }

    fn calc_params(&self) -> &CalcParams;

    fn calc_params_mut(&mut self) -> &mut CalcParams;

    /// Value and, if asked, the local gradient. Indices are already checked.
    fn compute(&self, coords3d: &[Vector3<f64>], gradient: bool) -> PrimitiveValue;

    /// Non-negative importance of this primitive at the given geometry.
    fn weight(
        &self,
        atoms: &[String],
        coords3d: &[Vector3<f64>],
        f_damping: f64,
    ) -> Result<f64, CoordError>;

    fn clone_box(&self) -> Box<dyn Primitive>;

    fn check_indices(&self, n_atoms: usize) -> Result<(), CoordError> {
        self.indices()
            .iter()
            .try_for_each(|&index| check_atom(self.kind().as_str(), index, n_atoms))
    }

    fn calculate(
        &self,
        coords3d: &[Vector3<f64>],
        gradient: bool,
    ) -> Result<PrimitiveValue, CoordError> {
        self.check_indices(coords3d.len())?;
        Ok(self.compute(coords3d, gradient))
    }

    fn value(&self, coords3d: &[Vector3<f64>]) -> Result<f64, CoordError> {
        Ok(self.calculate(coords3d, false)?.value)
    }

    /// Derivative against all `3N` Cartesian coordinates.
    fn jacobian(&self, coords3d: &[Vector3<f64>]) -> Result<DVector<f64>, CoordError> {
        let local = self.calculate(coords3d, true)?;
        let mut row = DVector::zeros(3 * coords3d.len());
        if let Some(grad) = local.gradient {
            for (k, &atom) in self.indices().iter().enumerate() {
                for c in 0..3 {
                    row[3 * atom + c] += grad[3 * k + c];
                }
            }
        }
        Ok(row)
    }

    fn value_and_derivative(
        &self,
        coords3d: &[Vector3<f64>],
        derivative: DerivativeKind,
    ) -> Result<(f64, Option<DVector<f64>>), CoordError> {
        match derivative {
            DerivativeKind::None => Ok((self.value(coords3d)?, None)),
            DerivativeKind::Gradient => {
                let local = self.calculate(coords3d, true)?;
                Ok((local.value, local.gradient))
            }
            DerivativeKind::Jacobian => {
                let value = self.value(coords3d)?;
                Ok((value, Some(self.jacobian(coords3d)?)))
            }
        }
    }

    /// Weight with the damping stored in the `f_damping` calc parameter.
    fn default_weight(
        &self,
        atoms: &[String],
        coords3d: &[Vector3<f64>],
    ) -> Result<f64, CoordError> {
        let f_damping = self
            .calc_params()
            .get("f_damping")
            .unwrap_or(DEFAULT_DAMPING);
        self.weight(atoms, coords3d, f_damping)
    }

    /// Maps a difference of two values onto the shortest equivalent one.
    fn wrap_difference(&self, diff: f64) -> f64 {
        if !self.periodic() {
            return diff;
        }
        let two_pi = 2.0 * std::f64::consts::PI;
        let mut wrapped = diff.rem_euclid(two_pi);
        if wrapped > std::f64::consts::PI {
            wrapped -= two_pi;
        }
        wrapped
    }
}

impl Clone for Box<dyn Primitive> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Damped sine factor shared by the angle-like weights.
pub(crate) fn damped_sin(angle: f64, f_damping: f64) -> f64 {
    (f_damping + (1.0 - f_damping) * angle.sin()).max(0.0)
}
