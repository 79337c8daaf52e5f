use std::f64::consts::PI;

use log::warn;
use nalgebra::{DVector, Vector3};

use super::{
    angle_between, damped_sin, parallel, rho, CalcParams, CoordError, Primitive, PrimitiveKind,
    PrimitiveValue, DEFAULT_DAMPING, NORM_EPS, PARALLEL_THRESH,
};

/// Dihedral angle `m-o-p-n` around the `o-p` axis, in (−π, π].
///
/// Gradient after Blondel and Karplus, J. Comput. Chem. 17 (1996) 1132.
#[derive(Debug, Clone)]
pub struct Torsion {
    indices: [usize; 4],
    params: CalcParams,
}

impl Torsion {
    pub fn new(m: usize, o: usize, p: usize, n: usize) -> Self {
        Self {
            indices: [m, o, p, n],
            params: CalcParams::new(&[
                ("f_damping", DEFAULT_DAMPING),
                ("parallel_thresh", PARALLEL_THRESH),
            ]),
        }
    }

    fn degenerate(&self, gradient: bool) -> PrimitiveValue {
        let [m, o, p, n] = self.indices;
        warn!(
            "Torsion {}-{}-{}-{}: collinear atoms, dihedral undefined; using 0 and a zero gradient",
            m, o, p, n
        );
        PrimitiveValue {
            value: 0.0,
            gradient: gradient.then(|| DVector::zeros(12)),
        }
    }
}

impl Primitive for Torsion {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::Torsion
    }

    fn indices(&self) -> &[usize] {
        &self.indices
    }

    fn periodic(&self) -> bool {
        true
    }

    fn calc_params(&self) -> &CalcParams {
        &self.params
    }

    fn calc_params_mut(&mut self) -> &mut CalcParams {
        &mut self.params
    }

    fn compute(&self, coords3d: &[Vector3<f64>], gradient: bool) -> PrimitiveValue {
        let [m, o, p, n] = self.indices;
        let f = coords3d[m] - coords3d[o];
        let g = coords3d[o] - coords3d[p];
        let h = coords3d[n] - coords3d[p];

        let thresh = self.params.get("parallel_thresh").unwrap_or(PARALLEL_THRESH);
        if parallel(&f, &g, thresh) || parallel(&h, &g, thresh) {
            return self.degenerate(gradient);
        }

        let a = f.cross(&g);
        let b = h.cross(&g);
        let g_norm = g.norm();
        let a_sq = a.norm_squared();
        let b_sq = b.norm_squared();
        if g_norm < NORM_EPS || a_sq < NORM_EPS || b_sq < NORM_EPS {
            return self.degenerate(gradient);
        }

        let value = (b.cross(&a).dot(&g) / g_norm).atan2(a.dot(&b));
        // atan2 yields [-π, π]; keep the half-open convention
        let value = if value <= -PI { value + 2.0 * PI } else { value };

        if !gradient {
            return PrimitiveValue {
                value,
                gradient: None,
            };
        }

        let fg = f.dot(&g);
        let hg = h.dot(&g);

        let g_m = -a * (g_norm / a_sq);
        let g_n = b * (g_norm / b_sq);
        let g_o = a * (g_norm / a_sq) + a * (fg / (a_sq * g_norm)) - b * (hg / (b_sq * g_norm));
        let g_p = -b * (g_norm / b_sq) - a * (fg / (a_sq * g_norm)) + b * (hg / (b_sq * g_norm));

        let mut grad = DVector::zeros(12);
        for (k, block) in [g_m, g_o, g_p, g_n].iter().enumerate() {
            grad[3 * k] = block.x;
            grad[3 * k + 1] = block.y;
            grad[3 * k + 2] = block.z;
        }
        PrimitiveValue {
            value,
            gradient: Some(grad),
        }
    }

    fn weight(
        &self,
        atoms: &[String],
        coords3d: &[Vector3<f64>],
        f_damping: f64,
    ) -> Result<f64, CoordError> {
        self.check_indices(coords3d.len())?;
        let [m, o, p, n] = self.indices;
        let rho_mo = rho(atoms, coords3d, m, o)?;
        let rho_op = rho(atoms, coords3d, o, p)?;
        let rho_pn = rho(atoms, coords3d, p, n)?;

        let theta_1 = angle_between(&(coords3d[m] - coords3d[o]), &(coords3d[p] - coords3d[o]));
        let theta_2 = angle_between(&(coords3d[o] - coords3d[p]), &(coords3d[n] - coords3d[p]));

        Ok((rho_mo * rho_op * rho_pn).cbrt()
            * damped_sin(theta_1, f_damping)
            * damped_sin(theta_2, f_damping))
    }

    fn clone_box(&self) -> Box<dyn Primitive> {
        Box::new(self.clone())
    }
}
