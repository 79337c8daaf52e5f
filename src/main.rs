use std::fs::{self, File};
use std::io;
use std::panic;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::unbounded;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{error, info, warn};
use ratatui::{backend::CrosstermBackend, Terminal};

use rxpath::core::domain::Geometry;
use rxpath::core::params::RunConfig;
use rxpath::cos::chain::PathState;
use rxpath::cos::interpolate;
use rxpath::cos::reparam::Parametrization;
use rxpath::engine::operators::Shaker;
use rxpath::engine::registry::CalculatorRegistry;
use rxpath::interface::state::AppState;
use rxpath::interface::ui;
use rxpath::io::{dump, xyz};
use rxpath::solvers::runner::{PathRunner, RunSummary};
use rxpath::solvers::SolverEvent;

const LOG_FILE: &str = "rxpath.log";

// --- CLI Definitions ---

#[derive(Parser, Debug)]
#[command(author, version, about = "rxpath: chain-of-states reaction path optimizer", long_about = None)]
struct Args {
    /// Run plan (JSON)
    config: PathBuf,

    /// Number of worker threads for parallel image calculations
    #[arg(short, long)]
    threads: Option<usize>,

    /// Plain log output instead of the terminal dashboard
    #[arg(long)]
    headless: bool,

    /// Continue from the newest cycle_NNN.trj in the output directory
    #[arg(short, long)]
    restart: bool,

    /// Override the parametrization (equal, energy)
    #[arg(short, long)]
    param: Option<Parametrization>,

    /// Override the cycle limit
    #[arg(short, long)]
    max_cycles: Option<usize>,

    /// Build the path and report it without calculating anything
    #[arg(long)]
    dry_run: bool,
}

// --- Terminal Guard (RAII) ---

struct TuiContext {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
}

impl TuiContext {
    fn new() -> Result<Self> {
        enable_raw_mode().context("Failed to enable raw mode")?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
            .context("Failed to setup terminal alternate screen")?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend).context("Failed to create terminal backend")?;
        Ok(Self { terminal })
    }
}

impl Drop for TuiContext {
    fn drop(&mut self) {
        // Best-effort restoration of terminal state
        let _ = disable_raw_mode();
        let _ = execute!(
            self.terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        );
        let _ = self.terminal.show_cursor();
    }
}

// --- Initialization Helpers ---

fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        // Forcefully restore terminal before printing panic
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
        original_hook(panic_info);
    }));
}

/// The dashboard owns the terminal, so log records go to a file instead.
fn setup_logging(out_dir: &Path, headless: bool) -> Result<()> {
    let env = env_logger::Env::default().default_filter_or("info");
    let mut builder = env_logger::Builder::from_env(env);
    if !headless {
        fs::create_dir_all(out_dir).with_context(|| format!("Failed to create {:?}", out_dir))?;
        let target = out_dir.join(LOG_FILE);
        let file = File::create(&target).with_context(|| format!("Failed to create {:?}", target))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.try_init().context("Failed to initialize logging")?;
    Ok(())
}

fn load_config(args: &Args) -> Result<RunConfig> {
    let text = fs::read_to_string(&args.config)
        .with_context(|| format!("Failed to read run plan {:?}", args.config))?;
    let mut config = RunConfig::from_json_str(&text)
        .with_context(|| format!("Failed to parse run plan {:?}", args.config))?;

    let base = args
        .config
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    config.resolve_paths(&base);

    if let Some(t) = args.threads {
        config.threads = t;
    }
    if let Some(p) = args.param {
        config.cos.param = p;
    }
    if let Some(n) = args.max_cycles {
        config.opt.max_cycles = n;
    }

    config.validate()?;
    Ok(config)
}

/// Initial images plus the cycle number to continue from.
fn initial_geometries(config: &RunConfig, restart: bool) -> Result<(Vec<Geometry>, usize)> {
    if restart {
        match dump::find_latest_cycle(&config.out_dir)? {
            Some((cycle, file)) => {
                let text = fs::read_to_string(&file).with_context(|| format!("Failed to read {:?}", file))?;
                let geoms = xyz::parse_frames(&text)?;
                info!("Restarting from {:?} ({} images)", file, geoms.len());
                return Ok((geoms, cycle + 1));
            }
            None => warn!("No cycle dumps in {:?}, starting fresh", config.out_dir),
        }
    }

    if config.geom.files.is_empty() {
        bail!("the run plan names no geometry files");
    }
    let inputs = xyz::load_geometries(&config.geom.files)?;
    let mut geoms = interpolate::linear(&inputs, config.interpol.between)?;

    if let Some(shake) = &config.shake {
        let mut shaker = Shaker::new(shake.scale, shake.seed);
        shaker.shake_interior(&mut geoms);
        info!("Shook interior images by up to {:.3} Bohr", shaker.scale());
    }
    Ok((geoms, 0))
}

fn build_path(config: &RunConfig, geoms: Vec<Geometry>) -> Result<PathState> {
    let mut path = PathState::new(geoms, config.geom.coord_type)?;
    let registry = CalculatorRegistry::with_defaults();
    path.attach_calculators(&registry, &config.calc, &config.out_dir)?;
    Ok(path)
}

fn report(summary: &RunSummary) {
    info!(
        "Run {} finished: {} cycles, converged={}, full_stop={}, cancelled={}",
        summary.run_id, summary.cycles, summary.converged, summary.full_stop, summary.cancelled
    );
    if let (Some(idx), Some(e)) = (summary.splined_hei_index, summary.splined_hei_energy) {
        info!("Splined HEI at image {:.3}, E = {:.10} Eh", idx, e);
    }
}

// --- Run Modes ---

fn run_headless(runner: PathRunner, mut path: PathState) -> Result<()> {
    let (tx, rx) = unbounded();

    let printer = thread::Builder::new()
        .name("Event-Printer".to_string())
        .spawn(move || {
            for evt in rx {
                match evt {
                    SolverEvent::Log(msg) => info!("{}", msg),
                    SolverEvent::Failed(msg) => error!("{}", msg),
                    _ => {}
                }
            }
        })?;

    let result = runner.run(&mut path, &tx);
    drop(tx);
    let _ = printer.join();

    let summary = result?;
    report(&summary);
    Ok(())
}

fn run_tui(runner: PathRunner, mut path: PathState, config: RunConfig) -> Result<()> {
    let mut tui = TuiContext::new().context("Failed to initialize TUI")?;
    let mut app = AppState::new(config, path.atoms().to_vec());

    let (tx, rx) = unbounded();
    app.set_channel(rx, runner.cancel_token());

    let worker = thread::Builder::new()
        .name("Path-Worker".to_string())
        .spawn(move || match runner.run(&mut path, &tx) {
            Ok(summary) => report(&summary),
            Err(e) => error!("Run failed: {}", e),
        })?;

    // Event Loop
    let tick_rate = Duration::from_millis(50); // 20 FPS
    let mut last_tick = Instant::now();

    while !app.should_quit {
        tui.terminal.draw(|f| ui::draw(f, &mut app))?;

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if crossterm::event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == event::KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char(c) => app.on_key(c),
                        KeyCode::Esc => app.request_quit(),
                        KeyCode::Down => app.on_key('j'),
                        KeyCode::Up => app.on_key('k'),
                        _ => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            app.tick();
            last_tick = Instant::now();
        }
    }

    // Restore the terminal before waiting for the current cycle to finish
    drop(tui);
    if !worker.is_finished() {
        eprintln!("Waiting for the current cycle to finish...");
    }
    let _ = worker.join();
    Ok(())
}

// --- Main ---

fn main() -> Result<()> {
    // 1. Parsing & Logging
    let args = Args::parse();
    let config = load_config(&args)?;
    setup_logging(&config.out_dir, args.headless || args.dry_run)?;

    rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build_global()
        .context("Failed to build the thread pool")?;

    // 2. Path Construction
    let (geoms, start_cycle) = initial_geometries(&config, args.restart)?;
    let path = build_path(&config, geoms)?;
    info!(
        "Path: {} images of {} atoms, {} coordinates, calculator '{}'",
        path.len(),
        path.atoms().len(),
        path.coord_type(),
        config.calc.kind
    );

    if args.dry_run {
        println!("{}", serde_json::to_string_pretty(&config)?);
        println!(
            "{} images, {} atoms, {} optimized coordinates",
            path.len(),
            path.atoms().len(),
            path.coords_length()
        );
        return Ok(());
    }

    // 3. Optimization
    let runner = PathRunner::new(config.clone()).with_start_cycle(start_cycle);
    if args.headless {
        run_headless(runner, path)
    } else {
        setup_panic_hook();
        run_tui(runner, path, config)
    }
}
