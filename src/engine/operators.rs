use nalgebra::DVector;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::core::domain::Geometry;

/// Random displacement of interior images.
///
/// Breaks the symmetry of an interpolated guess so the optimizer does not
/// start exactly on a ridge. Endpoints are never touched.
#[derive(Clone, Debug)]
pub struct Shaker {
    scale: f64,
    rng: ChaCha8Rng,
}

impl Shaker {
    /// Unseeded shakers draw from OS entropy.
    pub fn new(scale: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            scale: scale.abs(),
            rng,
        }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Adds uniform noise in `[-scale, scale]` to every component.
    pub fn rattle(&mut self, coords: &DVector<f64>) -> DVector<f64> {
        let mag = self.scale;
        coords.map(|x| x + self.rng.gen_range(-mag..=mag))
    }

    /// Rattles every image except the first and the last.
    pub fn shake_interior(&mut self, geometries: &mut [Geometry]) {
        let n = geometries.len();
        if n < 3 {
            return;
        }
        for geom in &mut geometries[1..n - 1] {
            let shaken = self.rattle(&DVector::from_column_slice(&geom.coords));
            geom.coords = shaken.as_slice().to_vec();
        }
    }
}
