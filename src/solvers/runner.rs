use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use crossbeam_channel::Sender;
use log::{error, info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::core::error::{ConfigError, PathError, RunError};
use crate::core::params::RunConfig;
use crate::cos::chain::PathState;
use crate::cos::reparam::Reparametrizer;
use crate::cos::spline::MIN_CONTROL_POINTS;
use crate::engine::evaluator::CalcRequest;
use crate::io::dump::{self, Dumper};
use crate::solvers::string_opt::StringOptimizer;
use crate::solvers::{CycleStats, HeiUpdate, SolverEvent};

/// What a finished run reports.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started: String,
    pub finished: String,
    /// Cycles performed in this run, restarts not included.
    pub cycles: usize,
    pub last_cycle: Option<usize>,
    pub converged: bool,
    pub full_stop: bool,
    pub cancelled: bool,
    pub energies: Vec<Option<f64>>,
    pub hei_index: Option<usize>,
    pub splined_hei_index: Option<f64>,
    pub splined_hei_energy: Option<f64>,
    pub atoms: Vec<String>,
    /// Final Cartesian coordinates (Bohr), one vector per image.
    pub final_coords: Vec<Vec<f64>>,
}

/// Drives the optimization cycle by cycle.
///
/// One cycle is: cancellation check, growth alignment, calculations,
/// step, convergence test, then (unless stopping) the coordinate update,
/// reparametrization and dumps. Cycles never overlap.
pub struct PathRunner {
    config: RunConfig,
    start_cycle: usize,
    cancel: Arc<AtomicBool>,
}

impl PathRunner {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            start_cycle: 0,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Continues the cycle numbering of an earlier run.
    pub fn with_start_cycle(mut self, cycle: usize) -> Self {
        self.start_cycle = cycle;
        self
    }

    /// Setting the flag stops the run once the current cycle is complete.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    fn validate(&self, path: &PathState) -> Result<(), ConfigError> {
        self.config.validate()?;
        if self.config.cos.reparametrize && path.len() < MIN_CONTROL_POINTS {
            return Err(ConfigError::TooFewControlPoints {
                needed: MIN_CONTROL_POINTS,
                got: path.len(),
            });
        }
        Ok(())
    }

    pub fn run(&self, path: &mut PathState, tx: &Sender<SolverEvent>) -> Result<RunSummary, RunError> {
        // 1. Everything that can be wrong with the setup fails here
        self.validate(path)?;
        let mut optimizer = StringOptimizer::new(&self.config.opt, &*path)?;
        optimizer.resume_at(self.start_cycle);
        let reparametrizer = self
            .config
            .cos
            .reparametrize
            .then(|| Reparametrizer::new(self.config.cos.param));
        path.set_fixed_ends(self.config.cos.fix_ends, self.config.cos.fix_ends);

        let mut dumper = if self.config.opt.dump {
            match Dumper::new(&self.config.out_dir, path.len()) {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!("Dumps disabled: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        let request = CalcRequest::forces().with_hessian(self.config.opt.calc_hessian);
        let run_id = Uuid::new_v4().to_string();
        let started = Utc::now().to_rfc3339();
        let start_time = Instant::now();

        let _ = tx.send(SolverEvent::Log(format!(
            "Run {}: {} images, {} coordinates, param '{}'",
            &run_id[..8],
            path.len(),
            path.coord_type(),
            self.config.cos.param
        )));

        let mut cycles = 0;
        let mut last_cycle = None;
        let mut converged = false;
        let mut full_stop = false;
        let mut cancelled = false;

        // 2. Main Loop
        let end = self.start_cycle + self.config.opt.max_cycles;
        for cycle in self.start_cycle..end {
            if self.cancel.load(Ordering::Relaxed) {
                cancelled = true;
                let _ = tx.send(SolverEvent::Log(format!("Cancelled before cycle {}", cycle)));
                break;
            }

            // A. Alignment and calculations
            optimizer.pre_step(path);
            let snapshot = path.snapshot(cycle);
            let evaluated = match path.evaluate(request, self.config.parallel) {
                Ok(n) => n,
                Err(failure) => {
                    let saved = dump::write_failed_snapshot(&self.config.out_dir, &snapshot);
                    match &saved {
                        Ok(p) => error!("Cycle {}: pre-cycle path saved to {:?}", cycle, p),
                        Err(e) => error!("Cycle {}: could not save pre-cycle path: {:#}", cycle, e),
                    }
                    let _ = tx.send(SolverEvent::Failed(format!(
                        "Cycle {}: image {} failed: {}",
                        cycle, failure.image, failure.source
                    )));
                    let _ = tx.send(SolverEvent::Finished);
                    return Err(RunError::Evaluation {
                        cycle,
                        image: failure.image,
                        source: failure.source,
                        snapshot: Box::new(snapshot),
                    });
                }
            };

            // B. Forces, step and convergence
            let at = |source: PathError| RunError::Path { cycle, source };
            let energies = path.energies().map_err(at)?;
            let forces = if self.config.cos.perp_forces {
                path.perpendicular_forces().map_err(at)?
            } else {
                path.forces().map_err(at)?
            };
            let report = optimizer.step(&forces);
            let verdict = optimizer.check_convergence(&forces, &report.step, path.fully_grown());
            let hei_index = path.hei_index().map_err(at)?;

            cycles += 1;
            last_cycle = Some(cycle);

            // C. Telemetry
            let stats = CycleStats {
                cycle,
                energies: energies.clone(),
                hei_index,
                max_force: verdict.metrics.max_force,
                rms_force: verdict.metrics.rms_force,
                max_step: verdict.metrics.max_step,
                rms_step: verdict.metrics.rms_step,
                phase: report.phase,
                clipped: report.clipped,
                evaluated,
                converged: verdict.converged,
                full_stop: verdict.full_stop,
                stop_in: verdict.stop_in,
            };
            info!(
                "Cycle {:>3}: HEI {} E={:.6} max|f|={:.2e} rms(f)={:.2e} max|dx|={:.2e} ({:?})",
                cycle,
                hei_index,
                energies[hei_index],
                stats.max_force,
                stats.rms_force,
                stats.max_step,
                stats.phase
            );
            let _ = tx.send(SolverEvent::CycleUpdate(stats));
            if let Some(image) = path.image(hei_index) {
                let _ = tx.send(SolverEvent::NewHei(HeiUpdate {
                    cycle,
                    index: hei_index,
                    energy: energies[hei_index],
                    coords: image.cart_coords().clone(),
                }));
            }

            // D. Termination
            if verdict.full_stop {
                full_stop = true;
                let _ = tx.send(SolverEvent::Log(format!(
                    "Cycle {}: fully grown countdown reached zero, stopping",
                    cycle
                )));
                break;
            }
            if verdict.converged {
                converged = true;
                let _ = tx.send(SolverEvent::Log(format!("Converged in cycle {}", cycle)));
                break;
            }

            // E. Update and redistribute
            let new_coords = path.coords().map_err(at)? + &report.step;
            path.set_coords(&new_coords).map_err(at)?;

            if let Some(reparam) = &reparametrizer {
                if (cycle + 1) % self.config.cos.reparam_every == 0 {
                    reparam
                        .reparametrize_with_energies(path, &energies)
                        .map_err(at)?;
                }
            }

            if let Some(d) = dumper.as_mut() {
                if let Err(e) = d.dump_cycle(cycle, path, &energies) {
                    warn!("Cycle {}: dump failed: {:#}", cycle, e);
                }
            }

            let elapsed = start_time.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                let _ = tx.send(SolverEvent::WorkerHeartbeat(cycles as f64 / elapsed));
            }
        }

        // 3. Final calculations for the moved images
        if !cancelled && !path.stale_images(request).is_empty() {
            let cycle = last_cycle.map(|c| c + 1).unwrap_or(self.start_cycle);
            let snapshot = path.snapshot(cycle);
            if let Err(failure) = path.evaluate(request, self.config.parallel) {
                let _ = tx.send(SolverEvent::Failed(failure.to_string()));
                let _ = tx.send(SolverEvent::Finished);
                return Err(RunError::Evaluation {
                    cycle,
                    image: failure.image,
                    source: failure.source,
                    snapshot: Box::new(snapshot),
                });
            }
        }

        let splined = path.splined_hei().ok();
        let summary = RunSummary {
            run_id,
            started,
            finished: Utc::now().to_rfc3339(),
            cycles,
            last_cycle,
            converged,
            full_stop,
            cancelled,
            energies: path.known_energies(),
            hei_index: path.hei_index().ok(),
            splined_hei_index: splined.as_ref().map(|h| h.frac_index),
            splined_hei_energy: splined.as_ref().map(|h| h.energy),
            atoms: path.atoms().to_vec(),
            final_coords: path.snapshot(0).coords,
        };

        if let Some(d) = dumper.as_mut() {
            if let Err(e) = d.dump_final(path, splined.as_ref(), &summary) {
                warn!("Final dump failed: {:#}", e);
            }
        }

        if let Some(h) = &splined {
            let _ = tx.send(SolverEvent::Log(format!(
                "Splined HEI at image {:.2}, E={:.6}",
                h.frac_index, h.energy
            )));
        }
        let _ = tx.send(SolverEvent::Log(format!(
            "Finished after {} cycles (converged: {}, full stop: {}, cancelled: {})",
            cycles, converged, full_stop, cancelled
        )));
        let _ = tx.send(SolverEvent::Finished);

        Ok(summary)
    }
}
