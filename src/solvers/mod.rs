use nalgebra::DVector;

use crate::core::domain::{CoordType, Geometry};
use crate::cos::chain::PathState;

pub mod convergence;
pub mod runner;
pub mod string_opt;

/// Which branch of the step formula produced the last step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepPhase {
    /// Pure steepest descent: first cycle or the path just grew.
    #[default]
    Warmup,
    /// Steepest descent plus the capped share of the previous step.
    Steady,
}

/// Detailed statistics for a single optimization cycle.
/// Used for telemetry and UI visualization.
#[derive(Debug, Clone, Default)]
pub struct CycleStats {
    pub cycle: usize,
    pub energies: Vec<f64>,
    pub hei_index: usize,

    pub max_force: f64,
    pub rms_force: f64,
    pub max_step: f64,
    pub rms_step: f64,

    pub phase: StepPhase,
    /// Step components that hit the max_step clamp.
    pub clipped: usize,
    /// Images that needed a new calculation this cycle.
    pub evaluated: usize,

    pub converged: bool,
    pub full_stop: bool,
    /// Remaining fully-grown countdown, if one is active.
    pub stop_in: Option<u32>,
}

/// Current highest-energy image, for the structure viewer.
#[derive(Debug, Clone)]
pub struct HeiUpdate {
    pub cycle: usize,
    pub index: usize,
    pub energy: f64,
    pub coords: DVector<f64>,
}

/// Events emitted by solvers to the main thread.
#[derive(Debug, Clone)]
pub enum SolverEvent {
    /// Diagnostic log message.
    Log(String),

    /// Cycles per second, sent once per cycle.
    WorkerHeartbeat(f64),

    /// A completed cycle with full statistics.
    CycleUpdate(CycleStats),

    /// The highest-energy image after a cycle's calculations.
    NewHei(HeiUpdate),

    /// The run stopped on an error.
    Failed(String),

    /// Solver has finished its run.
    Finished,
}

/// Anything an optimizer can be pointed at.
pub trait OptimizationTarget {
    /// True for a chain of images.
    fn is_chain(&self) -> bool;

    fn coord_type(&self) -> CoordType;

    /// Short description for error messages.
    fn describe(&self) -> String;
}

impl OptimizationTarget for PathState {
    fn is_chain(&self) -> bool {
        true
    }

    fn coord_type(&self) -> CoordType {
        PathState::coord_type(self)
    }

    fn describe(&self) -> String {
        format!("a chain of {} images", self.len())
    }
}

impl OptimizationTarget for Geometry {
    fn is_chain(&self) -> bool {
        false
    }

    fn coord_type(&self) -> CoordType {
        CoordType::Cartesian
    }

    fn describe(&self) -> String {
        format!("a single structure of {} atoms", self.n_atoms())
    }
}
