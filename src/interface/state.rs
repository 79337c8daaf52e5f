use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, TryRecvError};
use ratatui::widgets::TableState;

use crate::core::params::RunConfig;
use crate::solvers::{CycleStats, HeiUpdate, SolverEvent};

// --- Constants ---
const HISTORY_CAPACITY: usize = 1000;
const LOG_CAPACITY: usize = 200;

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Dashboard,
    Images,
    Parameters,
    StructureViewer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Starting,
    Running,
    Cancelling,
    Finished,
    Error,
}

// --- Telemetry ---

#[derive(Debug, Clone)]
pub struct Telemetry {
    /// (cycle, max |f|)
    pub max_force_history: VecDeque<(f64, f64)>,
    pub rms_force_history: VecDeque<(f64, f64)>,
    /// (cycle, HEI energy)
    pub hei_energy_history: VecDeque<(f64, f64)>,

    pub global_min_energy: f64,
    pub global_max_energy: f64,
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            max_force_history: VecDeque::with_capacity(HISTORY_CAPACITY),
            rms_force_history: VecDeque::with_capacity(HISTORY_CAPACITY),
            hei_energy_history: VecDeque::with_capacity(HISTORY_CAPACITY),
            global_min_energy: f64::MAX,
            global_max_energy: f64::MIN,
        }
    }

    pub fn ingest(&mut self, stats: &CycleStats) {
        if self.max_force_history.len() >= HISTORY_CAPACITY {
            self.max_force_history.pop_front();
            self.rms_force_history.pop_front();
            self.hei_energy_history.pop_front();
        }

        for &e in &stats.energies {
            self.global_min_energy = self.global_min_energy.min(e);
            self.global_max_energy = self.global_max_energy.max(e);
        }
        // Flat profiles still need a drawable range
        if (self.global_max_energy - self.global_min_energy).abs() < 1e-9 {
            self.global_max_energy += 1e-3;
            self.global_min_energy -= 1e-3;
        }

        let x = stats.cycle as f64;
        let hei_energy = stats.energies.get(stats.hei_index).copied().unwrap_or(0.0);
        self.max_force_history.push_back((x, stats.max_force));
        self.rms_force_history.push_back((x, stats.rms_force));
        self.hei_energy_history.push_back((x, hei_energy));
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

/// Visualization State for 3D Viewer
#[derive(Debug, Clone)]
pub struct Viewport {
    pub azimuth: f64,
    pub elevation: f64,
    pub zoom: f64,
    pub auto_rotate: bool,
    pub last_tick: Instant,
}

impl Viewport {
    pub fn new() -> Self {
        Self {
            azimuth: 0.0,
            elevation: 0.3,
            zoom: 1.0,
            auto_rotate: true,
            last_tick: Instant::now(),
        }
    }

    pub fn tick(&mut self) {
        let now = Instant::now();
        if self.auto_rotate {
            let dt = now.duration_since(self.last_tick).as_secs_f64();
            self.azimuth += 0.5 * dt; // rad/s
        }
        self.last_tick = now;
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new()
    }
}

// --- The Master State ---

pub struct AppState {
    // System
    pub should_quit: bool,
    pub mode: AppMode,
    pub config: RunConfig,
    pub atoms: Vec<String>,

    // Worker
    pub rx: Option<Receiver<SolverEvent>>,
    pub cancel: Option<Arc<AtomicBool>>,
    pub worker_status: WorkerStatus,

    // Run Data
    pub start_time: Instant,
    pub latest: Option<CycleStats>,
    pub hei: Option<HeiUpdate>,

    // Analytics
    pub telemetry: Telemetry,
    pub logs: VecDeque<String>,

    // UI Elements
    pub image_state: TableState,
    pub viewport: Viewport,

    pub cycles_per_second: f64,
}

impl AppState {
    pub fn new(config: RunConfig, atoms: Vec<String>) -> Self {
        let mut image_state = TableState::default();
        image_state.select(Some(0));

        Self {
            should_quit: false,
            mode: AppMode::Dashboard,
            config,
            atoms,
            rx: None,
            cancel: None,
            worker_status: WorkerStatus::Idle,
            start_time: Instant::now(),
            latest: None,
            hei: None,
            telemetry: Telemetry::new(),
            logs: VecDeque::with_capacity(LOG_CAPACITY),
            image_state,
            viewport: Viewport::new(),
            cycles_per_second: 0.0,
        }
    }

    pub fn set_channel(&mut self, rx: Receiver<SolverEvent>, cancel: Arc<AtomicBool>) {
        self.rx = Some(rx);
        self.cancel = Some(cancel);
        self.worker_status = WorkerStatus::Starting;
        self.start_time = Instant::now();
    }

    pub fn tick(&mut self) {
        self.viewport.tick();

        if let Some(rx) = self.rx.clone() {
            for _ in 0..100 {
                match rx.try_recv() {
                    Ok(evt) => self.handle_event(evt),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        if self.worker_status != WorkerStatus::Error {
                            self.worker_status = WorkerStatus::Finished;
                        }
                        self.log("Worker disconnected.");
                        self.rx = None;
                        break;
                    }
                }
            }
        }
    }

    pub fn handle_event(&mut self, event: SolverEvent) {
        match event {
            SolverEvent::Log(msg) => self.log(msg),

            SolverEvent::WorkerHeartbeat(rate) => {
                if rate > 0.0 {
                    self.cycles_per_second = rate;
                }
            }

            SolverEvent::CycleUpdate(stats) => {
                if self.worker_status != WorkerStatus::Cancelling {
                    self.worker_status = WorkerStatus::Running;
                }
                self.telemetry.ingest(&stats);
                self.latest = Some(stats);
            }

            SolverEvent::NewHei(update) => self.hei = Some(update),

            SolverEvent::Failed(msg) => {
                self.worker_status = WorkerStatus::Error;
                self.log(format!("!!! {}", msg));
            }

            SolverEvent::Finished => {
                if self.worker_status != WorkerStatus::Error {
                    self.worker_status = WorkerStatus::Finished;
                }
                self.log("Solver finished.");
            }
        }
    }

    /// Logs a message to the internal buffer.
    fn log(&mut self, msg: impl Into<String>) {
        if self.logs.len() >= LOG_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(msg.into());
    }

    pub fn n_images(&self) -> usize {
        self.latest.as_ref().map(|s| s.energies.len()).unwrap_or(0)
    }

    // --- Input Handling ---

    pub fn on_key(&mut self, key: char) {
        match key {
            'q' => self.request_quit(),
            '1' => self.mode = AppMode::Dashboard,
            '2' => self.mode = AppMode::Images,
            '3' => self.mode = AppMode::Parameters,
            '4' => self.mode = AppMode::StructureViewer,
            ' ' => self.viewport.auto_rotate = !self.viewport.auto_rotate,
            'r' => self.viewport.azimuth = 0.0,
            'j' => self.select_next_image(),
            'k' => self.select_prev_image(),
            _ => {}
        }
    }

    /// Asks the worker to stop after its current cycle and leaves the UI.
    pub fn request_quit(&mut self) {
        if let Some(cancel) = &self.cancel {
            cancel.store(true, Ordering::Relaxed);
        }
        if matches!(self.worker_status, WorkerStatus::Running | WorkerStatus::Starting) {
            self.worker_status = WorkerStatus::Cancelling;
        }
        self.should_quit = true;
    }

    fn select_next_image(&mut self) {
        let n = self.n_images();
        if n == 0 {
            return;
        }
        let i = match self.image_state.selected() {
            Some(i) if i + 1 < n => i + 1,
            _ => 0,
        };
        self.image_state.select(Some(i));
    }

    fn select_prev_image(&mut self) {
        let n = self.n_images();
        if n == 0 {
            return;
        }
        let i = match self.image_state.selected() {
            Some(0) | None => n - 1,
            Some(i) => (i - 1).min(n - 1),
        };
        self.image_state.select(Some(i));
    }
}
