use std::collections::BTreeSet;

use log::{debug, warn};
use nalgebra::{DMatrix, DVector, Vector3};

use super::{angle_between, Bend, CoordError, Primitive, Stretch, Torsion};
use crate::core::chemistry::{self, InteractionGrid};
use crate::core::error::ConfigError;
use crate::core::spatial;

/// Bond detection multiplier on the covalent radius sum.
pub const BOND_FACTOR: f64 = 1.3;

/// Bends and torsions are skipped when an angle exceeds this (degrees).
pub const LINEAR_BEND_DEG: f64 = 175.0;

const BACKTRANSFORM_MAX_ITER: usize = 25;
const BACKTRANSFORM_RMS_THRESH: f64 = 1e-6;
const PINV_EPS: f64 = 1e-8;

/// A redundant set of primitive internal coordinates shared by every image of a path.
#[derive(Debug, Clone)]
pub struct RedundantCoords {
    primitives: Vec<Box<dyn Primitive>>,
}

impl RedundantCoords {
    pub fn from_primitives(primitives: Vec<Box<dyn Primitive>>) -> Self {
        Self { primitives }
    }

    /// Detects bonds, bends and torsions present in any of the given geometries.
    ///
    /// Taking the union over all images keeps the coordinate set identical
    /// along the path, including bonds that only exist near one endpoint.
    pub fn setup(atoms: &[String], geometries: &[Vec<Vector3<f64>>]) -> Result<Self, ConfigError> {
        let radii = atoms
            .iter()
            .map(|a| chemistry::covalent_radius(a).ok_or_else(|| ConfigError::UnknownElement(a.clone())))
            .collect::<Result<Vec<f64>, ConfigError>>()?;
        let grid = InteractionGrid::new(&radii, BOND_FACTOR);
        let n = atoms.len();

        // 1. Bonds
        let mut bonds: BTreeSet<(usize, usize)> = BTreeSet::new();
        for coords in geometries {
            for i in 0..n {
                for j in (i + 1)..n {
                    if (coords[i] - coords[j]).norm_squared() < grid.get_bond_sq(i, j) {
                        bonds.insert((i, j));
                    }
                }
            }
        }

        let mut neighbours: Vec<Vec<usize>> = vec![Vec::new(); n];
        for &(i, j) in &bonds {
            neighbours[i].push(j);
            neighbours[j].push(i);
        }

        let linear = LINEAR_BEND_DEG.to_radians();
        let bent_everywhere = |m: usize, o: usize, k: usize| {
            geometries
                .iter()
                .all(|c| angle_between(&(c[m] - c[o]), &(c[k] - c[o])) < linear)
        };

        let mut primitives: Vec<Box<dyn Primitive>> = bonds
            .iter()
            .map(|&(i, j)| Box::new(Stretch::new(i, j)) as Box<dyn Primitive>)
            .collect();

        // 2. Bends around every centre
        for (o, nbrs) in neighbours.iter().enumerate() {
            for (a, &m) in nbrs.iter().enumerate() {
                for &k in &nbrs[a + 1..] {
                    if bent_everywhere(m, o, k) {
                        primitives.push(Box::new(Bend::new(m, o, k)));
                    }
                }
            }
        }

        // 3. Torsions along every bond
        for &(o, p) in &bonds {
            for &m in neighbours[o].iter().filter(|&&m| m != p) {
                for &k in neighbours[p].iter().filter(|&&k| k != o && k != m) {
                    if bent_everywhere(m, o, p) && bent_everywhere(o, p, k) {
                        primitives.push(Box::new(Torsion::new(m, o, p, k)));
                    }
                }
            }
        }

        if primitives.is_empty() {
            return Err(ConfigError::NoInternalCoordinates(0));
        }

        debug!(
            "Internal coordinates: {} stretches, {} primitives in total",
            bonds.len(),
            primitives.len()
        );
        Ok(Self { primitives })
    }

    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    pub fn primitives(&self) -> &[Box<dyn Primitive>] {
        &self.primitives
    }

    pub fn primitives_mut(&mut self) -> &mut [Box<dyn Primitive>] {
        &mut self.primitives
    }

    pub fn values(&self, coords3d: &[Vector3<f64>]) -> Result<DVector<f64>, CoordError> {
        let values = self
            .primitives
            .iter()
            .map(|p| p.value(coords3d))
            .collect::<Result<Vec<f64>, CoordError>>()?;
        Ok(DVector::from_vec(values))
    }

    /// Wilson B matrix, one Jacobian row per primitive.
    pub fn wilson_b(&self, coords3d: &[Vector3<f64>]) -> Result<DMatrix<f64>, CoordError> {
        let mut b = DMatrix::zeros(self.primitives.len(), 3 * coords3d.len());
        for (row, prim) in self.primitives.iter().enumerate() {
            b.set_row(row, &prim.jacobian(coords3d)?.transpose());
        }
        Ok(b)
    }

    fn g_inverse(b: &DMatrix<f64>) -> Result<DMatrix<f64>, CoordError> {
        (b * b.transpose())
            .pseudo_inverse(PINV_EPS)
            .map_err(|e| CoordError::Degenerate(format!("G matrix pseudo-inverse failed: {e}")))
    }

    /// Cartesian forces to internal forces: `f_q = G⁺ B f_x`.
    pub fn transform_forces(
        &self,
        coords3d: &[Vector3<f64>],
        cart_forces: &DVector<f64>,
    ) -> Result<DVector<f64>, CoordError> {
        let b = self.wilson_b(coords3d)?;
        let g_inv = Self::g_inverse(&b)?;
        Ok(g_inv * (b * cart_forces))
    }

    pub fn wrap_differences(&self, dq: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            dq.len(),
            self.primitives
                .iter()
                .zip(dq.iter())
                .map(|(p, &d)| p.wrap_difference(d)),
        )
    }

    /// Finds Cartesians whose internal values are `q(cart) + dq`.
    ///
    /// Iterates `x += Bᵀ G⁺ (q_target − q(x))`. If the iteration does not
    /// settle, the geometry after the first iteration is returned.
    pub fn backtransform(
        &self,
        cart: &DVector<f64>,
        dq: &DVector<f64>,
    ) -> Result<DVector<f64>, CoordError> {
        let q_target = self.values(&spatial::coords3d(cart))? + dq;
        let mut x = cart.clone();
        let mut first: Option<DVector<f64>> = None;

        for iteration in 0..BACKTRANSFORM_MAX_ITER {
            let coords3d = spatial::coords3d(&x);
            let b = self.wilson_b(&coords3d)?;
            let g_inv = Self::g_inverse(&b)?;
            let remaining = self.wrap_differences(&(&q_target - self.values(&coords3d)?));

            let dx = b.transpose() * (g_inv * remaining);
            x += &dx;
            if first.is_none() {
                first = Some(x.clone());
            }

            let rms = (dx.norm_squared() / dx.len().max(1) as f64).sqrt();
            if rms < BACKTRANSFORM_RMS_THRESH {
                debug!("Back-transformation converged after {} iterations", iteration + 1);
                return Ok(x);
            }
        }

        warn!(
            "Back-transformation did not converge in {} iterations, keeping the first step",
            BACKTRANSFORM_MAX_ITER
        );
        Ok(first.unwrap_or(x))
    }

    pub fn weights(
        &self,
        atoms: &[String],
        coords3d: &[Vector3<f64>],
        f_damping: f64,
    ) -> Result<Vec<f64>, CoordError> {
        self.primitives
            .iter()
            .map(|p| p.weight(atoms, coords3d, f_damping))
            .collect()
    }
}
