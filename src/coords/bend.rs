use log::warn;
use nalgebra::{DVector, Vector3};

use super::{
    angle_between, damped_sin, parallel, rho, CalcParams, CoordError, Primitive, PrimitiveKind,
    PrimitiveValue, DEFAULT_DAMPING, NORM_EPS, PARALLEL_THRESH,
};

/// Angle `m-o-n` with `o` at the apex.
#[derive(Debug, Clone)]
pub struct Bend {
    indices: [usize; 3],
    params: CalcParams,
}

impl Bend {
    pub fn new(m: usize, o: usize, n: usize) -> Self {
        Self {
            indices: [m, o, n],
            params: CalcParams::new(&[
                ("f_damping", DEFAULT_DAMPING),
                ("parallel_thresh", PARALLEL_THRESH),
            ]),
        }
    }

    fn parallel_thresh(&self) -> f64 {
        self.params.get("parallel_thresh").unwrap_or(PARALLEL_THRESH)
    }
}

impl Primitive for Bend {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::Bend
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
        let [m, o, n] = self.indices;
        let u = coords3d[m] - coords3d[o];
        let v = coords3d[n] - coords3d[o];
        let lu = u.norm();
        let lv = v.norm();

        if lu < NORM_EPS || lv < NORM_EPS {
            warn!("Bend {}-{}-{}: zero-length arm, using a zero gradient", m, o, n);
            return PrimitiveValue {
                value: 0.0,
                gradient: gradient.then(|| DVector::zeros(9)),
            };
        }

        let u_hat = u / lu;
        let v_hat = v / lv;
        let value = u_hat.dot(&v_hat).clamp(-1.0, 1.0).acos();

        if !gradient {
            return PrimitiveValue {
                value,
                gradient: None,
            };
        }

        // Linear arrangements need an arbitrary vector off the u/v line
        let thresh = self.parallel_thresh();
        let cross_1 = Vector3::new(1.0, -1.0, 1.0);
        let cross_2 = Vector3::new(-1.0, 1.0, 1.0);
        let w = if !parallel(&u, &v, thresh) {
            u.cross(&v)
        } else if !parallel(&u, &cross_1, thresh) && !parallel(&v, &cross_1, thresh) {
            u.cross(&cross_1)
        } else {
            u.cross(&cross_2)
        };
        let w = w / w.norm();

        let uxw = u_hat.cross(&w);
        let wxv = w.cross(&v_hat);
        let g_m = uxw / lu;
        let g_n = wxv / lv;
        let g_o = -g_m - g_n;

        let grad = DVector::from_column_slice(&[
            g_m.x, g_m.y, g_m.z, g_o.x, g_o.y, g_o.z, g_n.x, g_n.y, g_n.z,
        ]);
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
        let [m, o, n] = self.indices;
        let rho_mo = rho(atoms, coords3d, m, o)?;
        let rho_on = rho(atoms, coords3d, o, n)?;
        let theta = angle_between(&(coords3d[m] - coords3d[o]), &(coords3d[n] - coords3d[o]));
        Ok((rho_mo * rho_on).sqrt() * damped_sin(theta, f_damping))
    }

    fn clone_box(&self) -> Box<dyn Primitive> {
        Box::new(self.clone())
    }
}
