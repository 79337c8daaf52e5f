#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use nalgebra::DVector;
use rxpath::core::domain::{CoordType, Geometry};
use rxpath::core::params::CalcSpec;
use rxpath::cos::chain::PathState;
use rxpath::cos::spline::linspace;
use rxpath::engine::evaluator::{CalcRequest, CalcResult, Calculator, Checkpoint, EvaluationError};
use rxpath::engine::registry::CalculatorRegistry;

/// `E = height - (x0 - peak)²` on the first atom's x coordinate.
pub struct ParabolaCalculator {
    pub peak: f64,
    pub height: f64,
    pub calls: Arc<AtomicUsize>,
}

impl ParabolaCalculator {
    pub fn new(peak: f64) -> Self {
        Self {
            peak,
            height: 1.0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Calculator for ParabolaCalculator {
    fn evaluate(
        &mut self,
        _atoms: &[String],
        coords: &DVector<f64>,
        request: CalcRequest,
    ) -> Result<CalcResult, EvaluationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let dx = coords[0] - self.peak;
        let forces = request.forces.then(|| {
            let mut f = DVector::zeros(coords.len());
            f[0] = 2.0 * dx;
            f
        });
        Ok(CalcResult {
            energy: self.height - dx * dx,
            forces,
            hessian: None,
        })
    }

    fn name(&self) -> &str {
        "parabola"
    }
}

/// Returns a NaN energy, which result validation rejects.
pub struct BrokenCalculator;

impl Calculator for BrokenCalculator {
    fn evaluate(
        &mut self,
        _atoms: &[String],
        coords: &DVector<f64>,
        _request: CalcRequest,
    ) -> Result<CalcResult, EvaluationError> {
        Ok(CalcResult {
            energy: f64::NAN,
            forces: Some(DVector::zeros(coords.len())),
            hessian: None,
        })
    }

    fn name(&self) -> &str {
        "broken"
    }
}

/// Emits a checkpoint after every calculation and records the sources it was handed.
pub struct RelayCalculator {
    pub image: usize,
    pub received: Arc<Mutex<Vec<(usize, usize)>>>,
}

impl Calculator for RelayCalculator {
    fn evaluate(
        &mut self,
        _atoms: &[String],
        coords: &DVector<f64>,
        _request: CalcRequest,
    ) -> Result<CalcResult, EvaluationError> {
        Ok(CalcResult {
            energy: coords[0],
            forces: Some(DVector::zeros(coords.len())),
            hessian: None,
        })
    }

    fn name(&self) -> &str {
        "relay"
    }

    fn checkpoint(&self) -> Option<Checkpoint> {
        Some(Checkpoint {
            source: self.image,
            payload: serde_json::json!({ "orbitals": self.image }),
        })
    }

    fn accept_checkpoint(&mut self, checkpoint: Checkpoint) -> bool {
        if let Ok(mut r) = self.received.lock() {
            r.push((self.image, checkpoint.source));
        }
        true
    }
}

/// `n_images` single-atom geometries evenly spaced on x in `[0, 1]` (Bohr).
pub fn line_geometries(n_images: usize) -> Vec<Geometry> {
    linspace(0.0, 1.0, n_images)
        .into_iter()
        .map(|x| Geometry::new(vec!["X".to_string()], vec![x, 0.0, 0.0]).unwrap())
        .collect()
}

/// Single-atom geometries at the given x positions.
pub fn geometries_at(xs: &[f64]) -> Vec<Geometry> {
    xs.iter()
        .map(|&x| Geometry::new(vec!["X".to_string()], vec![x, 0.0, 0.0]).unwrap())
        .collect()
}

pub fn line_path(n_images: usize) -> PathState {
    PathState::new(line_geometries(n_images), CoordType::Cartesian).unwrap()
}

/// Registry with `parabola`, `broken` and `broken_at_2` (image 2 fails) on top of the defaults.
pub fn test_registry(peak: f64) -> CalculatorRegistry {
    let mut registry = CalculatorRegistry::with_defaults();
    registry.register("parabola", move |_, _| {
        Ok(Box::new(ParabolaCalculator::new(peak)) as Box<dyn Calculator>)
    });
    registry.register("broken", |_, _| Ok(Box::new(BrokenCalculator) as Box<dyn Calculator>));
    registry.register("broken_at_2", move |_, ctx| {
        if ctx.image == 2 {
            Ok(Box::new(BrokenCalculator) as Box<dyn Calculator>)
        } else {
            Ok(Box::new(ParabolaCalculator::new(peak)) as Box<dyn Calculator>)
        }
    });
    registry
}

pub fn attach(path: &mut PathState, registry: &CalculatorRegistry, kind: &str) {
    path.attach_calculators(registry, &CalcSpec::new(kind), Path::new("."))
        .unwrap();
}

/// Fresh, empty scratch directory under the system temp dir.
pub fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("rxpath_{}_{}", tag, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn assert_close(a: f64, b: f64, tol: f64) {
    assert!((a - b).abs() <= tol, "expected {} ≈ {} (tol {})", a, b, tol);
}
