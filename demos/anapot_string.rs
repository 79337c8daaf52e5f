use anyhow::Result;
use crossbeam_channel::unbounded;
use rxpath::core::domain::{CoordType, Geometry};
use rxpath::core::params::{CalcSpec, RunConfig};
use rxpath::cos::chain::PathState;
use rxpath::cos::interpolate;
use rxpath::cos::reparam::Parametrization;
use rxpath::engine::registry::CalculatorRegistry;
use rxpath::solvers::runner::PathRunner;
use rxpath::solvers::SolverEvent;
use std::path::Path;
use std::time::Instant;

fn main() -> Result<()> {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).try_init();

    // Both minima of the analytic surface
    let ends = [
        Geometry::new(vec!["X".into()], vec![-1.05274, 1.02776, 0.0])?,
        Geometry::new(vec!["X".into()], vec![1.94101, 3.85427, 0.0])?,
    ];
    let geometries = interpolate::linear(&ends, 9)?;

    let mut config = RunConfig::default();
    config.cos.param = Parametrization::Energy;
    config.opt.max_cycles = 100;
    config.opt.stop_in_when_full = Some(5);
    config.opt.dump = false;
    config.parallel = false;

    let mut path = PathState::new(geometries, CoordType::Cartesian)?;
    path.attach_calculators(&CalculatorRegistry::with_defaults(), &CalcSpec::new("anapot"), Path::new("."))?;

    let (tx, rx) = unbounded();
    let runner = PathRunner::new(config);

    let start = Instant::now();
    let summary = runner.run(&mut path, &tx)?;
    let duration = start.elapsed();

    for msg in rx.try_iter() {
        if let SolverEvent::Log(line) = msg {
            println!("{}", line);
        }
    }

    println!("String took: {:?} for {} cycles", duration, summary.cycles);
    for (i, e) in summary.energies.iter().enumerate() {
        if let Some(e) = e {
            println!("  image {:>2}: {:>10.6}", i, e);
        }
    }
    if let (Some(frac), Some(energy)) = (summary.splined_hei_index, summary.splined_hei_energy) {
        println!("Splined HEI at {:.3}, E = {:.6} (saddle is near 2.8)", frac, energy);
    }
    Ok(())
}
