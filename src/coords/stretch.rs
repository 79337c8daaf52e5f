use log::warn;
use nalgebra::{DVector, Vector3};

use super::{rho, CalcParams, CoordError, Primitive, PrimitiveKind, PrimitiveValue, DEFAULT_DAMPING, NORM_EPS};

/// Distance between two atoms.
#[derive(Debug, Clone)]
pub struct Stretch {
    indices: [usize; 2],
    params: CalcParams,
}

impl Stretch {
    pub fn new(m: usize, n: usize) -> Self {
        Self {
            indices: [m, n],
            params: CalcParams::new(&[("f_damping", DEFAULT_DAMPING)]),
        }
    }
}

impl Primitive for Stretch {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::Stretch
    }

    fn indices(&self) -> &[usize] {
        &self.indices
    }

    fn calc_params(&self) -> &CalcParams {
        &self.params
    }

    fn calc_params_mut(&mut self) -> &mut CalcParams {
        &mut self.params
    }

    fn compute(&self, coords3d: &[Vector3<f64>], gradient: bool) -> PrimitiveValue {
        let [m, n] = self.indices;
        let u = coords3d[m] - coords3d[n];
        let d = u.norm();

        if d < NORM_EPS {
            warn!("Stretch {}-{}: atoms coincide, using a zero gradient", m, n);
            return PrimitiveValue {
                value: 0.0,
                gradient: gradient.then(|| DVector::zeros(6)),
            };
        }

        let gradient = gradient.then(|| {
            let unit = u / d;
            DVector::from_column_slice(&[unit.x, unit.y, unit.z, -unit.x, -unit.y, -unit.z])
        });
        PrimitiveValue { value: d, gradient }
    }

    fn weight(
        &self,
        atoms: &[String],
        coords3d: &[Vector3<f64>],
        _f_damping: f64,
    ) -> Result<f64, CoordError> {
        let [m, n] = self.indices;
        rho(atoms, coords3d, m, n)
    }

    fn clone_box(&self) -> Box<dyn Primitive> {
        Box::new(self.clone())
    }
}
