use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coords::redundant::RedundantCoords;
use crate::core::domain::{CoordType, Geometry, PathImage};
use crate::core::error::{ConfigError, PathError};
use crate::core::params::CalcSpec;
use crate::core::{chemistry, spatial};
use crate::cos::spline::{linspace, ParametricSpline, MIN_CONTROL_POINTS};
use crate::engine::evaluator::{CalcRequest, CalcResult, EvaluationError};
use crate::engine::registry::{BuildContext, CalculatorRegistry};

/// Points sampled along the energy spline before refining the maximum.
const HEI_SAMPLES: usize = 1000;
const GOLDEN_TOL: f64 = 1e-10;

/// A failed calculation, tagged with the image it belongs to.
#[derive(Debug, Error)]
#[error("image {image}: {source}")]
pub struct ImageEvaluationError {
    pub image: usize,
    #[source]
    pub source: EvaluationError,
}

/// Cartesian coordinates of every image at one point of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSnapshot {
    pub cycle: usize,
    pub atoms: Vec<String>,
    /// One flat Bohr vector per image.
    pub coords: Vec<Vec<f64>>,
    pub energies: Vec<Option<f64>>,
}

/// Spline estimate of the highest point along the path.
#[derive(Debug, Clone)]
pub struct SplinedHei {
    pub coords: DVector<f64>,
    pub energy: f64,
    /// Normalized Cartesian tangent at the maximum.
    pub tangent: DVector<f64>,
    /// Position along the path in units of images, e.g. 3.3 lies between images 3 and 4.
    pub frac_index: f64,
}

/// The chain of states: an ordered sequence of images from reactant to product.
#[derive(Debug)]
pub struct PathState {
    images: Vec<PathImage>,
    atoms: Arc<[String]>,
    coord_type: CoordType,
    fix_first: bool,
    fix_last: bool,
    fully_grown: bool,
    handoff_warned: bool,
}

impl PathState {
    /// Builds the path. All geometries must share the same atoms; redundant
    /// coordinates additionally need a covalent radius for every element.
    pub fn new(geometries: Vec<Geometry>, coord_type: CoordType) -> Result<Self, ConfigError> {
        if geometries.len() < 2 {
            return Err(ConfigError::TooFewImages {
                needed: 2,
                got: geometries.len(),
            });
        }

        let reference = geometries[0].atoms.clone();
        for (index, geom) in geometries.iter().enumerate() {
            if geom.atoms != reference {
                return Err(ConfigError::MismatchedAtoms {
                    index,
                    expected: reference.clone(),
                    found: geom.atoms.clone(),
                });
            }
            if geom.coords.len() != 3 * reference.len() {
                return Err(ConfigError::invalid(
                    "coords",
                    format!("image {} has {} coordinates", index, geom.coords.len()),
                ));
            }
        }

        let internal = match coord_type {
            CoordType::Cartesian => None,
            CoordType::Redundant => {
                if let Some(unknown) = reference
                    .iter()
                    .find(|a| chemistry::covalent_radius(a).is_none())
                {
                    return Err(ConfigError::UnknownElement(unknown.clone()));
                }
                let all: Vec<_> = geometries
                    .iter()
                    .map(|g| spatial::coords3d(&g.coords_vector()))
                    .collect();
                Some(RedundantCoords::setup(&reference, &all)?)
            }
        };

        let atoms: Arc<[String]> = reference.into();
        let images = geometries
            .into_iter()
            .map(|g| {
                let image = PathImage::new(Arc::clone(&atoms), g.coords_vector());
                match &internal {
                    Some(int) => image.with_internal(int.clone()),
                    None => image,
                }
            })
            .collect();

        Ok(Self {
            images,
            atoms,
            coord_type,
            fix_first: true,
            fix_last: true,
            fully_grown: true,
            handoff_warned: false,
        })
    }

    // --- Accessors ---

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> &[PathImage] {
        &self.images
    }

    pub fn image(&self, index: usize) -> Option<&PathImage> {
        self.images.get(index)
    }

    pub fn image_mut(&mut self, index: usize) -> Option<&mut PathImage> {
        self.images.get_mut(index)
    }

    pub fn atoms(&self) -> &[String] {
        &self.atoms
    }

    pub fn coord_type(&self) -> CoordType {
        self.coord_type
    }

    pub fn set_fixed_ends(&mut self, fix_first: bool, fix_last: bool) {
        self.fix_first = fix_first;
        self.fix_last = fix_last;
    }

    pub fn is_fixed(&self, index: usize) -> bool {
        (index == 0 && self.fix_first) || (index + 1 == self.images.len() && self.fix_last)
    }

    /// A static chain always has all its images. Growing variants clear this
    /// until their last image is added.
    pub fn fully_grown(&self) -> bool {
        self.fully_grown
    }

    pub fn set_fully_grown(&mut self, fully_grown: bool) {
        self.fully_grown = fully_grown;
    }

    /// Number of optimizer coordinates per image.
    pub fn coords_length(&self) -> usize {
        self.images.first().map(|i| i.coords_length()).unwrap_or(0)
    }

    // --- Coordinates ---

    /// All images' optimizer coordinates, concatenated in path order.
    pub fn coords(&self) -> Result<DVector<f64>, PathError> {
        let parts = self
            .images
            .iter()
            .map(|i| i.coords())
            .collect::<Result<Vec<_>, PathError>>()?;
        Ok(concat(&parts))
    }

    /// Sets the concatenated optimizer coordinates. Segments of fixed images are ignored.
    pub fn set_coords(&mut self, coords: &DVector<f64>) -> Result<(), PathError> {
        let len = self.coords_length();
        let expected = len * self.images.len();
        if coords.len() != expected {
            return Err(PathError::ShapeMismatch {
                expected,
                got: coords.len(),
            });
        }
        // All segments are transformed before any image moves
        let mut updates = Vec::with_capacity(self.images.len());
        for index in 0..self.images.len() {
            if self.is_fixed(index) {
                continue;
            }
            let segment = coords.rows(index * len, len).into_owned();
            if let Some(cart) = self.images[index].cart_coords_for(&segment)? {
                updates.push((index, cart));
            }
        }
        for (index, cart) in updates {
            self.images[index].set_cart_coords(cart);
        }
        Ok(())
    }

    pub fn cart_coords(&self) -> DVector<f64> {
        let parts: Vec<DVector<f64>> = self.image_cart_coords();
        concat(&parts)
    }

    pub fn image_cart_coords(&self) -> Vec<DVector<f64>> {
        self.images.iter().map(|i| i.cart_coords().clone()).collect()
    }

    pub fn set_image_cart_coords(&mut self, coords: Vec<DVector<f64>>) -> Result<(), PathError> {
        if coords.len() != self.images.len() {
            return Err(PathError::ShapeMismatch {
                expected: self.images.len(),
                got: coords.len(),
            });
        }
        let expected = 3 * self.atoms.len();
        if let Some(bad) = coords.iter().find(|c| c.len() != expected) {
            return Err(PathError::ShapeMismatch {
                expected,
                got: bad.len(),
            });
        }
        for (image, c) in self.images.iter_mut().zip(coords) {
            image.set_cart_coords(c);
        }
        Ok(())
    }

    // --- Energies & Forces ---

    pub fn energies(&self) -> Result<Vec<f64>, PathError> {
        self.images
            .iter()
            .enumerate()
            .map(|(i, img)| img.energy().ok_or(PathError::MissingEnergies(i)))
            .collect()
    }

    /// Energies where available, for display.
    pub fn known_energies(&self) -> Vec<Option<f64>> {
        self.images.iter().map(|i| i.energy()).collect()
    }

    fn image_forces(&self) -> Result<Vec<DVector<f64>>, PathError> {
        let len = self.coords_length();
        self.images
            .iter()
            .enumerate()
            .map(|(i, img)| {
                if self.is_fixed(i) {
                    return Ok(DVector::zeros(len));
                }
                img.forces()?.ok_or(PathError::MissingForces(i))
            })
            .collect()
    }

    /// Concatenated optimizer forces. Fixed images contribute zeros.
    pub fn forces(&self) -> Result<DVector<f64>, PathError> {
        Ok(concat(&self.image_forces()?))
    }

    /// Forces with the component along the path tangent removed.
    pub fn perpendicular_forces(&self) -> Result<DVector<f64>, PathError> {
        let tangents = self.tangents()?;
        let parts: Vec<DVector<f64>> = self
            .image_forces()?
            .into_iter()
            .zip(&tangents)
            .map(|(f, t)| {
                let along = f.dot(t);
                f - t * along
            })
            .collect();
        Ok(concat(&parts))
    }

    // --- Path Geometry ---

    /// Difference `coords[to] - coords[from]` in optimizer coordinates,
    /// with periodic internals wrapped.
    fn difference(&self, coords: &[DVector<f64>], from: usize, to: usize) -> DVector<f64> {
        let diff = &coords[to] - &coords[from];
        match self.images[to].internal() {
            Some(int) => int.wrap_differences(&diff),
            None => diff,
        }
    }

    /// Unit tangent per image in optimizer coordinates.
    ///
    /// Interior tangents are energy-upwinded (Henkelman and Jónsson,
    /// J. Chem. Phys. 113 (2000) 9978) when all energies are known, central
    /// differences otherwise. Endpoints use one-sided differences.
    pub fn tangents(&self) -> Result<Vec<DVector<f64>>, PathError> {
        let n = self.images.len();
        let coords = self
            .images
            .iter()
            .map(|i| i.coords())
            .collect::<Result<Vec<_>, PathError>>()?;
        let energies = self.energies().ok();

        let tangents = (0..n)
            .map(|i| {
                let raw = if i == 0 {
                    self.difference(&coords, 0, 1)
                } else if i == n - 1 {
                    self.difference(&coords, n - 2, n - 1)
                } else {
                    let plus = self.difference(&coords, i, i + 1);
                    let minus = self.difference(&coords, i - 1, i);
                    match &energies {
                        Some(e) => upwind(&plus, &minus, e[i - 1], e[i], e[i + 1]),
                        None => plus + minus,
                    }
                };
                normalized(raw)
            })
            .collect();
        Ok(tangents)
    }

    pub fn hei_index(&self) -> Result<usize, PathError> {
        let energies = self.energies()?;
        Ok(energies
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, &e)| {
                if e > best.1 {
                    (i, e)
                } else {
                    best
                }
            })
            .0)
    }

    /// Cumulative Cartesian image distances normalized to `[0, 1]`.
    pub fn arc_length_parameters(&self) -> Vec<f64> {
        let coords = self.image_cart_coords();
        let mut params = Vec::with_capacity(coords.len());
        let mut acc = 0.0;
        params.push(acc);
        for w in coords.windows(2) {
            acc += (&w[1] - &w[0]).norm();
            params.push(acc);
        }
        if acc <= 0.0 {
            return linspace(0.0, 1.0, coords.len());
        }
        params.into_iter().map(|p| p / acc).collect()
    }

    /// Interpolated highest-energy point.
    ///
    /// Needs at least four images with distinct positions; otherwise the
    /// highest-energy image itself is returned.
    pub fn splined_hei(&self) -> Result<SplinedHei, PathError> {
        let energies = self.energies()?;
        let hei = self.hei_index()?;
        let params = self.arc_length_parameters();
        let coords = self.image_cart_coords();

        let distinct = params.windows(2).all(|w| w[1] > w[0]);
        if self.images.len() < MIN_CONTROL_POINTS || !distinct {
            return Ok(self.discrete_hei(hei, &energies, &coords));
        }

        let energy_points = DMatrix::from_column_slice(energies.len(), 1, &energies);
        let energy_spline = ParametricSpline::fit(&params, &energy_points)?;
        let coord_spline = ParametricSpline::fit_vectors(&params, &coords)?;
        let energy_at = |x: f64| energy_spline.evaluate(x)[0];

        // 1. Dense scan
        let grid = linspace(0.0, 1.0, HEI_SAMPLES);
        let best = grid
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, &x)| {
                let e = energy_at(x);
                if e > best.1 {
                    (i, e)
                } else {
                    best
                }
            })
            .0;

        // 2. Golden-section refinement around the best sample
        let lo = grid[best.saturating_sub(1)];
        let hi = grid[(best + 1).min(HEI_SAMPLES - 1)];
        let x_max = golden_section_max(energy_at, lo, hi);

        let frac_index = match params.windows(2).position(|w| x_max <= w[1]) {
            Some(i) => i as f64 + (x_max - params[i]) / (params[i + 1] - params[i]),
            None => (self.images.len() - 1) as f64,
        };

        Ok(SplinedHei {
            coords: coord_spline.evaluate(x_max),
            energy: energy_at(x_max),
            tangent: normalized(coord_spline.derivative(x_max)),
            frac_index,
        })
    }

    fn discrete_hei(&self, hei: usize, energies: &[f64], coords: &[DVector<f64>]) -> SplinedHei {
        let n = coords.len();
        let tangent = if hei + 1 < n {
            &coords[hei + 1] - &coords[hei]
        } else {
            &coords[hei] - &coords[hei.saturating_sub(1)]
        };
        SplinedHei {
            coords: coords[hei].clone(),
            energy: energies[hei],
            tangent: normalized(tangent),
            frac_index: hei as f64,
        }
    }

    // --- Calculators ---

    /// Gives every image its own calculator built from `spec`.
    pub fn attach_calculators(
        &mut self,
        registry: &CalculatorRegistry,
        spec: &CalcSpec,
        out_dir: &Path,
    ) -> Result<(), ConfigError> {
        for (image, img) in self.images.iter_mut().enumerate() {
            let calc = registry.build(spec, BuildContext { image, out_dir })?;
            img.set_calculator(calc);
        }
        Ok(())
    }

    /// Images that need a new calculation to satisfy `request`.
    pub fn stale_images(&self, request: CalcRequest) -> Vec<usize> {
        self.images
            .iter()
            .enumerate()
            .filter(|(_, img)| needs_calculation(img, request))
            .map(|(i, _)| i)
            .collect()
    }

    /// Evaluates every stale image and returns how many were calculated.
    ///
    /// Results are applied only once all calculations succeeded; on failure
    /// the path is left exactly as it was and the first failing image is
    /// reported. In sequential mode each calculator may hand restart data
    /// to the calculator of the following image.
    pub fn evaluate(
        &mut self,
        request: CalcRequest,
        parallel: bool,
    ) -> Result<usize, ImageEvaluationError> {
        let results: Vec<(usize, Result<CalcResult, EvaluationError>)> = if parallel {
            self.images
                .par_iter_mut()
                .enumerate()
                .filter(|(_, img)| needs_calculation(img, request))
                .map(|(i, img)| (i, img.evaluate(request)))
                .collect()
        } else {
            self.evaluate_sequential(request)
        };

        let mut successes = Vec::with_capacity(results.len());
        for (image, result) in results {
            match result {
                Ok(r) => successes.push((image, r)),
                Err(source) => return Err(ImageEvaluationError { image, source }),
            }
        }

        let count = successes.len();
        for (image, result) in successes {
            self.images[image].apply_result(result);
        }
        debug!("Evaluated {} images", count);
        Ok(count)
    }

    fn evaluate_sequential(
        &mut self,
        request: CalcRequest,
    ) -> Vec<(usize, Result<CalcResult, EvaluationError>)> {
        let mut results = Vec::new();
        for i in self.stale_images(request) {
            let result = self.images[i].evaluate(request);
            let failed = result.is_err();
            results.push((i, result));
            if failed {
                break;
            }

            if i + 1 < self.images.len() {
                if let Some(checkpoint) = self.images[i].checkpoint() {
                    let accepted = self.images[i + 1].accept_checkpoint(checkpoint);
                    if !accepted && !self.handoff_warned {
                        warn!(
                            "Calculator of image {} cannot use restart data from image {}; continuing without handoff",
                            i + 1,
                            i
                        );
                        self.handoff_warned = true;
                    }
                }
            }
        }
        results
    }

    // --- Snapshots & Alignment ---

    pub fn snapshot(&self, cycle: usize) -> PathSnapshot {
        PathSnapshot {
            cycle,
            atoms: self.atoms.to_vec(),
            coords: self
                .images
                .iter()
                .map(|i| i.cart_coords().as_slice().to_vec())
                .collect(),
            energies: self.known_energies(),
        }
    }

    /// Puts the images back where a snapshot saw them.
    pub fn restore(&mut self, snapshot: &PathSnapshot) -> Result<(), PathError> {
        let coords = snapshot
            .coords
            .iter()
            .map(|c| DVector::from_column_slice(c))
            .collect();
        self.set_image_cart_coords(coords)
    }

    /// Rigidly superposes every image onto the first one.
    ///
    /// Only meaningful for Cartesian paths of at least three atoms; returns
    /// false when nothing was done.
    pub fn align(&mut self) -> bool {
        if self.coord_type != CoordType::Cartesian || self.atoms.len() < 3 {
            return false;
        }
        let reference = self.images[0].cart_coords().clone();
        for image in self.images.iter_mut().skip(1) {
            let aligned = spatial::superpose(image.cart_coords(), &reference);
            if spatial::rmsd(&aligned, image.cart_coords()) > 1e-10 {
                image.set_cart_coords(aligned);
            }
        }
        true
    }
}

fn needs_calculation(image: &PathImage, request: CalcRequest) -> bool {
    image.energy().is_none()
        || (request.forces && image.cart_forces().is_none())
        || (request.hessian && image.hessian().is_none())
}

fn concat(parts: &[DVector<f64>]) -> DVector<f64> {
    let total = parts.iter().map(|p| p.len()).sum();
    DVector::from_iterator(total, parts.iter().flat_map(|p| p.iter().copied()))
}

fn normalized(v: DVector<f64>) -> DVector<f64> {
    let norm = v.norm();
    if norm < 1e-12 {
        DVector::zeros(v.len())
    } else {
        v / norm
    }
}

/// Upwinded tangent of an interior image from its neighbour energies.
fn upwind(
    plus: &DVector<f64>,
    minus: &DVector<f64>,
    e_prev: f64,
    e: f64,
    e_next: f64,
) -> DVector<f64> {
    if e_next > e && e > e_prev {
        return plus.clone();
    }
    if e_next < e && e < e_prev {
        return minus.clone();
    }
    let d_next = (e_next - e).abs();
    let d_prev = (e_prev - e).abs();
    let (d_max, d_min) = (d_next.max(d_prev), d_next.min(d_prev));
    if e_next > e_prev {
        plus * d_max + minus * d_min
    } else {
        plus * d_min + minus * d_max
    }
}

fn golden_section_max<F: Fn(f64) -> f64>(f: F, mut lo: f64, mut hi: f64) -> f64 {
    let ratio = (5.0_f64.sqrt() - 1.0) / 2.0;
    let mut c = hi - ratio * (hi - lo);
    let mut d = lo + ratio * (hi - lo);
    let (mut fc, mut fd) = (f(c), f(d));
    while (hi - lo).abs() > GOLDEN_TOL {
        if fc > fd {
            hi = d;
            d = c;
            fd = fc;
            c = hi - ratio * (hi - lo);
            fc = f(c);
        } else {
            lo = c;
            c = d;
            fc = fd;
            d = lo + ratio * (hi - lo);
            fd = f(d);
        }
    }
    (lo + hi) / 2.0
}
