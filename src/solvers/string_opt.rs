use log::{debug, info};
use nalgebra::DVector;

use crate::core::domain::CoordType;
use crate::core::error::ConfigError;
use crate::core::params::OptParams;
use crate::cos::chain::PathState;
use crate::solvers::convergence::{ConvergenceCriteria, ConvergenceMetrics};
use crate::solvers::{OptimizationTarget, StepPhase};

/// Outcome of one [`StringOptimizer::step`] call.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub step: DVector<f64>,
    pub phase: StepPhase,
    /// Components that were clamped to `±max_step`.
    pub clipped: usize,
}

/// Outcome of one [`StringOptimizer::check_convergence`] call.
#[derive(Debug, Clone, Copy)]
pub struct Verdict {
    pub metrics: ConvergenceMetrics,
    /// The generic force/step criteria are met.
    pub converged: bool,
    /// The fully-grown countdown ran out.
    pub full_stop: bool,
    /// Cycles left on the countdown, if one is active.
    pub stop_in: Option<u32>,
}

impl Verdict {
    pub fn should_stop(&self) -> bool {
        self.full_stop || self.converged
    }
}

/// Steepest descent / conjugate gradient hybrid for chains of states.
///
/// The first cycle, and every cycle after the path changed size, takes a
/// plain steepest-descent step `f / gamma`. Otherwise the previous step is
/// mixed in with weight `min((|f| / |f_prev|)², 1)`, which never lets the
/// inherited part grow the step beyond the steepest-descent share.
#[derive(Debug, Clone)]
pub struct StringOptimizer {
    gamma: f64,
    max_step: f64,
    align: bool,
    coord_type: CoordType,
    criteria: ConvergenceCriteria,

    cycle: usize,
    prev_forces: Option<DVector<f64>>,
    prev_step: Option<DVector<f64>>,
    last_size: Option<usize>,
    stop_in: Option<u32>,
}

impl StringOptimizer {
    /// Fails if `target` is not a chain of images.
    pub fn new(params: &OptParams, target: &dyn OptimizationTarget) -> Result<Self, ConfigError> {
        if !target.is_chain() {
            return Err(ConfigError::NotAChain(target.describe()));
        }
        if !(params.gamma > 0.0) {
            return Err(ConfigError::invalid("opt.gamma", "must be positive"));
        }
        if !(params.max_step > 0.0) {
            return Err(ConfigError::invalid("opt.max_step", "must be positive"));
        }

        Ok(Self {
            gamma: params.gamma,
            max_step: params.max_step,
            align: params.align,
            coord_type: target.coord_type(),
            criteria: params.thresh.into(),
            cycle: 0,
            prev_forces: None,
            prev_step: None,
            last_size: None,
            // One extra count for the cycle that first sees the full path
            stop_in: params.stop_in_when_full.map(|n| n.saturating_add(1)),
        })
    }

    pub fn with_criteria(mut self, criteria: ConvergenceCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn max_step(&self) -> f64 {
        self.max_step
    }

    pub fn cycle(&self) -> usize {
        self.cycle
    }

    pub fn criteria(&self) -> &ConvergenceCriteria {
        &self.criteria
    }

    /// Resumes cycle numbering, e.g. after a restart. History is cleared,
    /// so the next step is a warmup step.
    pub fn resume_at(&mut self, cycle: usize) {
        self.cycle = cycle;
        self.prev_forces = None;
        self.prev_step = None;
    }

    /// Called before forces are computed. Aligns the images on the first
    /// call and whenever the path changed size since the previous one;
    /// returns true if it did.
    pub fn pre_step(&mut self, path: &mut PathState) -> bool {
        let size = path.len() * path.coords_length();
        let changed = self.last_size != Some(size);
        self.last_size = Some(size);

        if changed && self.align && self.coord_type == CoordType::Cartesian {
            let aligned = path.align();
            if aligned {
                info!("Path has {} coordinates, images aligned", size);
            }
            return aligned;
        }
        false
    }

    /// Computes the step for the given forces and records it as history.
    pub fn step(&mut self, forces: &DVector<f64>) -> StepReport {
        let sd_step = forces / self.gamma;

        let history = match (&self.prev_forces, &self.prev_step) {
            (Some(f), Some(s)) if f.len() == forces.len() && s.len() == forces.len() => Some((f, s)),
            _ => None,
        };

        let (raw, phase) = match history {
            Some((prev_forces, prev_step)) => {
                let prev_norm = prev_forces.norm();
                let ratio = if prev_norm > 0.0 {
                    (forces.norm() / prev_norm).powi(2).min(1.0)
                } else {
                    1.0
                };
                debug!("Cycle {}: conjugate step, ratio {:.4}", self.cycle, ratio);
                (&sd_step + prev_step * ratio, StepPhase::Steady)
            }
            None => {
                debug!("Cycle {}: steepest descent step", self.cycle);
                (sd_step, StepPhase::Warmup)
            }
        };

        let (step, clipped) = restrict_step_components(&raw, self.max_step);
        if clipped > 0 {
            debug!("Cycle {}: clipped {} step components", self.cycle, clipped);
        }

        self.prev_forces = Some(forces.clone());
        self.prev_step = Some(step.clone());
        self.cycle += 1;

        StepReport {
            step,
            phase,
            clipped,
        }
    }

    /// Generic convergence test, overridden by the fully-grown countdown.
    ///
    /// While `fully_grown` is reported the countdown drops by one per call.
    /// Once it reaches zero the run must stop, converged or not.
    pub fn check_convergence(
        &mut self,
        forces: &DVector<f64>,
        step: &DVector<f64>,
        fully_grown: bool,
    ) -> Verdict {
        let metrics = ConvergenceMetrics::measure(forces, step);
        let converged = self.criteria.is_met(&metrics);

        if fully_grown {
            if let Some(remaining) = self.stop_in.as_mut() {
                *remaining = remaining.saturating_sub(1);
            }
        }
        let full_stop = self.stop_in == Some(0);

        Verdict {
            metrics,
            converged,
            full_stop,
            stop_in: self.stop_in,
        }
    }
}

/// Clamps every component to `[-max_step, max_step]`, keeping its sign.
/// Returns the clamped step and the number of components changed.
pub fn restrict_step_components(step: &DVector<f64>, max_step: f64) -> (DVector<f64>, usize) {
    let mut clipped = 0;
    let restricted = step.map(|x| {
        if x.abs() > max_step {
            clipped += 1;
            max_step.copysign(x)
        } else {
            x
        }
    });
    (restricted, clipped)
}
